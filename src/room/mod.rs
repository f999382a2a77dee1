//! A room (spec §3, §4.6): one `Mutex` guarding every field that changes
//! together — membership, master election, custom properties and the event
//! cache — mirroring the teacher's `Game { data: RwLock<GameData>, players:
//! RwLock<Vec<SessionArc>> }` but collapsed to a single lock, since spec §5
//! requires one room-wide mutex rather than per-field locks.

mod cache;

pub use cache::EventCache;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::join_all;
use log::debug;

use crate::codec::Value;
use crate::error::RelayError;
use crate::peer::Peer;
use crate::protocol::event::code as event_code;
use crate::protocol::params::{canonical_property_key, PROP_IS_OPEN, PROP_IS_VISIBLE, PROP_MASTER_CLIENT_ID};
use crate::protocol::Event;
use crate::types::PeerId;
use crate::wire::Packet;

struct RoomState {
    members: HashMap<PeerId, Arc<Peer>>,
    master_id: Option<PeerId>,
    properties: HashMap<String, Value>,
    password: Option<String>,
    event_cache: EventCache,
}

pub struct Room {
    pub name: String,
    pub max_members: usize,
    /// Empty-room TTL in milliseconds (spec §4.5/§4.6); `0` disables cleanup.
    pub empty_room_ttl_ms: u64,
    state: tokio::sync::Mutex<RoomState>,
    last_activity_secs: AtomicU64,
}

pub struct RoomSnapshot {
    pub name: String,
    pub member_count: usize,
    pub max_members: usize,
    pub properties: HashMap<String, Value>,
    pub is_open: bool,
    pub is_visible: bool,
}

impl Room {
    pub fn new(
        name: String,
        max_members: usize,
        password: Option<String>,
        properties: HashMap<String, Value>,
        event_cache_capacity: usize,
        empty_room_ttl_ms: u64,
    ) -> Self {
        Self {
            name,
            max_members,
            empty_room_ttl_ms,
            state: tokio::sync::Mutex::new(RoomState {
                members: HashMap::new(),
                master_id: None,
                properties,
                password,
                event_cache: EventCache::new(event_cache_capacity),
            }),
            last_activity_secs: AtomicU64::new(now_secs()),
        }
    }

    fn touch(&self) {
        self.last_activity_secs.store(now_secs(), Ordering::Relaxed);
    }

    fn seconds_since_activity(&self) -> u64 {
        now_secs().saturating_sub(self.last_activity_secs.load(Ordering::Relaxed))
    }

    /// A room is eligible for destruction once it's empty, has had no
    /// activity for `empty_room_ttl_ms`, and cleanup isn't disabled (TTL=0)
    /// (spec §4.5's cleanup predicate; evaluated by the registry's cleanup
    /// ticker, never synchronously on the last member leaving — boundary
    /// test B3).
    pub async fn is_cleanup_eligible(&self) -> bool {
        self.empty_room_ttl_ms > 0
            && self.is_empty().await
            && self.seconds_since_activity() * 1000 > self.empty_room_ttl_ms
    }

    /// Snapshot of every current member, for building a JoinRoom response's
    /// full member/actor-properties map without holding the room lock across
    /// per-peer awaits.
    pub async fn member_peers(&self) -> Vec<Arc<Peer>> {
        self.state.lock().await.members.values().cloned().collect()
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.members.is_empty()
    }

    pub async fn check_password(&self, supplied: Option<&str>) -> bool {
        let state = self.state.lock().await;
        match &state.password {
            None => true,
            Some(expected) => supplied.map(|s| s == expected.as_str()).unwrap_or(false),
        }
    }

    pub async fn snapshot(&self) -> RoomSnapshot {
        let state = self.state.lock().await;
        RoomSnapshot {
            name: self.name.clone(),
            member_count: state.members.len(),
            max_members: self.max_members,
            is_open: is_open_property(&state.properties),
            is_visible: is_visible_property(&state.properties),
            properties: state.properties.clone(),
        }
    }

    /// Adds `peer` to the room (I1: a room never exceeds `max_members`),
    /// electing it master if it's the first member, then notifies existing
    /// members and replays the cached event backlog to the new member.
    pub async fn add_member(&self, peer: Arc<Peer>) -> Result<(), RelayError> {
        let peer_id = peer.id;
        let nickname = peer.data().await.nickname;
        let (join_event, replay, became_master) = {
            let mut state = self.state.lock().await;
            if state.members.len() >= self.max_members {
                return Err(RelayError::Capacity(format!(
                    "room {} is full ({} members)",
                    self.name, self.max_members
                )));
            }

            let became_master = state.master_id.is_none();
            state.members.insert(peer_id, peer.clone());
            if became_master {
                state.master_id = Some(peer_id);
            }

            // Snapshot the backlog before caching this join so the new
            // member replays only events that predate it, never its own.
            let replay: Vec<Event> = state.event_cache.entries().cloned().collect();

            let mut params = BTreeMap::new();
            params.insert(10u8, Value::Int(peer_id as i32));
            if let Some(nickname) = nickname {
                params.insert(11u8, Value::String(nickname));
            }
            let join_event = Event::new(event_code::JOIN, params);
            state.event_cache.push(join_event.clone());

            (join_event, replay, became_master)
        };

        debug!("room {}: peer {} joined", self.name, peer_id);
        self.broadcast_event(&join_event, Some(peer_id)).await;

        for event in replay {
            self.deliver_event(&peer, &event);
        }

        if became_master {
            self.notify_master_changed(peer_id).await;
        }

        self.touch();
        Ok(())
    }

    /// Removes `peer_id` (I2: removing the master promotes the
    /// remaining member with the smallest peer-id — deterministic, spec
    /// §4.6). Returns the removed peer, if any.
    pub async fn remove_member(&self, peer_id: PeerId) -> Option<Arc<Peer>> {
        let (removed, leave_event, new_master) = {
            let mut state = self.state.lock().await;
            let removed = state.members.remove(&peer_id)?;

            let mut new_master = None;
            if state.master_id == Some(peer_id) {
                new_master = state.members.keys().min().copied();
                state.master_id = new_master;
            }

            let mut params = BTreeMap::new();
            params.insert(10u8, Value::Int(peer_id as i32));
            let leave_event = Event::new(event_code::LEAVE, params);
            state.event_cache.push(leave_event.clone());

            (removed, leave_event, new_master)
        };

        debug!("room {}: peer {} left", self.name, peer_id);
        self.broadcast_event(&leave_event, None).await;

        if let Some(master_id) = new_master {
            self.notify_master_changed(master_id).await;
        }

        self.touch();
        Some(removed)
    }

    pub async fn change_properties(&self, changes: HashMap<String, Value>, broadcast: bool) {
        let event = {
            let mut state = self.state.lock().await;
            for (key, value) in &changes {
                state.properties.insert(canonical_property_key(key), value.clone());
            }
            let mut params = BTreeMap::new();
            for (i, (key, value)) in changes.into_iter().enumerate() {
                // Parameter codes 16.. are reserved for property-change
                // payloads; each changed key/value pair takes two slots.
                params.insert(16 + (i as u8) * 2, Value::String(key));
                params.insert(17 + (i as u8) * 2, value);
            }
            let event = Event::new(event_code::PROPERTIES_CHANGED, params);
            state.event_cache.push(event.clone());
            event
        };

        self.touch();
        if broadcast {
            self.broadcast_event(&event, None).await;
        }
    }

    pub async fn is_open(&self) -> bool {
        is_open_property(&self.state.lock().await.properties)
    }

    pub async fn is_visible(&self) -> bool {
        is_visible_property(&self.state.lock().await.properties)
    }

    pub async fn master_id(&self) -> Option<PeerId> {
        self.state.lock().await.master_id
    }

    /// Raises an application event (spec §4.6's `RaiseEvent` handling) to
    /// every member except `sender`, caching it for future joiners.
    pub async fn raise_event(&self, sender: PeerId, event: Event) {
        {
            let mut state = self.state.lock().await;
            state.event_cache.push(event.clone());
        }
        self.touch();
        self.broadcast_event(&event, Some(sender)).await;
    }

    async fn notify_master_changed(&self, master_id: PeerId) {
        let mut params = BTreeMap::new();
        params.insert(10u8, Value::Int(master_id as i32));
        let event = Event::new(event_code::MASTER_CLIENT_SWITCHED, params);
        {
            let mut state = self.state.lock().await;
            state
                .properties
                .insert(PROP_MASTER_CLIENT_ID.to_string(), Value::Int(master_id as i32));
            state.event_cache.push(event.clone());
        }
        self.broadcast_event(&event, None).await;
    }

    /// Sends `event` to every current member except `exclude`, dropping any
    /// peer whose outbound queue is full rather than letting one slow
    /// reader stall the broadcast (mirrors the teacher's
    /// `futures::future::join_all` fan-out in `Game::write_all`).
    async fn broadcast_event(&self, event: &Event, exclude: Option<PeerId>) {
        let members: Vec<Arc<Peer>> = {
            let state = self.state.lock().await;
            state
                .members
                .values()
                .filter(|p| Some(p.id) != exclude)
                .cloned()
                .collect()
        };

        let sends = members.iter().map(|peer| {
            let event = event.clone();
            async move {
                self.deliver_event(peer, &event);
            }
        });
        join_all(sends).await;
    }

    /// Merges `changes` into this peer's actor-properties and broadcasts the
    /// change as a PropertiesChanged event (spec §4.4's "authenticated for
    /// actor-properties" half of ChangeProperties).
    pub async fn notify_actor_properties_changed(&self, actor_id: PeerId, changes: HashMap<String, Value>) {
        let mut params = BTreeMap::new();
        params.insert(10u8, Value::Int(actor_id as i32));
        for (i, (key, value)) in changes.into_iter().enumerate() {
            params.insert(16 + (i as u8) * 2, Value::String(key));
            params.insert(17 + (i as u8) * 2, value);
        }
        let event = Event::new(event_code::PROPERTIES_CHANGED, params);
        {
            let mut state = self.state.lock().await;
            state.event_cache.push(event.clone());
        }
        self.touch();
        self.broadcast_event(&event, None).await;
    }

    fn deliver_event(&self, peer: &Arc<Peer>, event: &Event) {
        let sequence = peer.next_sequence();
        let command = crate::wire::CommandRecord {
            kind: crate::wire::CommandKind::SendReliable,
            channel: 0,
            flags: 0,
            timestamp: sequence,
            sequence: Some(sequence),
            payload: Some(event.clone().into_value()),
        };
        let mut body = Vec::new();
        command.encode(&mut body);
        let packet = Packet::new(peer.id, bytes::Bytes::from(body));
        if peer.try_send(packet).is_err() {
            debug!("room {}: dropping slow/closed peer {}", self.name, peer.id);
        }
    }
}

fn is_open_property(properties: &HashMap<String, Value>) -> bool {
    match properties.get(PROP_IS_OPEN) {
        Some(Value::Bool(b)) => *b,
        _ => true,
    }
}

fn is_visible_property(properties: &HashMap<String, Value>) -> bool {
    match properties.get(PROP_IS_VISIBLE) {
        Some(Value::Bool(b)) => *b,
        _ => true,
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_room(max_members: usize) -> Room {
        Room::new("lobby".into(), max_members, None, HashMap::new(), 8, 0)
    }

    #[tokio::test]
    async fn first_joiner_becomes_master() {
        let room = make_room(4);
        let (_client, server) = tokio::io::duplex(4096);
        let sink = tokio_util::codec::FramedWrite::new(server, crate::wire::PacketCodec);
        let peer = Peer::spawn(1, sink, 8);
        room.add_member(peer.clone()).await.unwrap();
        assert_eq!(room.master_id().await, Some(1));
    }

    #[tokio::test]
    async fn room_rejects_members_past_capacity() {
        let room = make_room(1);
        let (_c1, s1) = tokio::io::duplex(4096);
        let (_c2, s2) = tokio::io::duplex(4096);
        let peer1 = Peer::spawn(1, tokio_util::codec::FramedWrite::new(s1, crate::wire::PacketCodec), 8);
        let peer2 = Peer::spawn(2, tokio_util::codec::FramedWrite::new(s2, crate::wire::PacketCodec), 8);

        room.add_member(peer1).await.unwrap();
        let err = room.add_member(peer2).await.unwrap_err();
        assert!(matches!(err, RelayError::Capacity(_)));
    }

    #[tokio::test]
    async fn master_is_reassigned_when_it_leaves() {
        let room = make_room(4);
        let (_c1, s1) = tokio::io::duplex(4096);
        let (_c2, s2) = tokio::io::duplex(4096);
        let peer1 = Peer::spawn(1, tokio_util::codec::FramedWrite::new(s1, crate::wire::PacketCodec), 8);
        let peer2 = Peer::spawn(2, tokio_util::codec::FramedWrite::new(s2, crate::wire::PacketCodec), 8);

        room.add_member(peer1).await.unwrap();
        room.add_member(peer2).await.unwrap();
        assert_eq!(room.master_id().await, Some(1));

        room.remove_member(1).await;
        assert_eq!(room.master_id().await, Some(2));
    }

    #[tokio::test]
    async fn empty_room_with_no_ttl_is_never_cleanup_eligible() {
        let room = make_room(4);
        assert!(!room.is_cleanup_eligible().await);
    }

    #[tokio::test]
    async fn fresh_empty_room_with_ttl_is_not_yet_eligible() {
        let room = Room::new("lobby".into(), 4, None, HashMap::new(), 8, 300_000);
        assert!(room.is_empty().await);
        assert!(!room.is_cleanup_eligible().await);
    }
}
