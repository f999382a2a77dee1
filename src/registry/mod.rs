//! Owns every `Peer` and `Room` (spec §3, §4.7): the accept loop, room
//! creation/lookup, and the per-operation handlers the router dispatches
//! into. Lock order is Registry → Room → Peer throughout (spec §5); no
//! method here holds the peers/rooms lock across an `.await` that re-enters
//! either map.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::codec::Framed;

use crate::codec::Value;
use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::observer::ObserverRegistry;
use crate::peer::Peer;
use crate::protocol::operation::return_code;
use crate::protocol::params::op as param;
use crate::protocol::{Event, OperationRequest, OperationResponse};
use crate::room::Room;
use crate::types::{PeerId, RoomName};
use crate::wire::{decode_commands, CommandKind, CommandRecord, Packet, PacketCodec};

pub struct Registry {
    config: ServerConfig,
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    rooms: RwLock<HashMap<RoomName, Arc<Room>>>,
    next_peer_id: AtomicU32,
    observers: ObserverRegistry,
}

impl Registry {
    pub fn new(config: ServerConfig, observers: ObserverRegistry) -> Arc<Self> {
        Arc::new(Self {
            config,
            peers: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            next_peer_id: AtomicU32::new(1),
            observers,
        })
    }

    /// Binds `addr` and accepts connections until the socket errors out.
    /// Each connection is handled on its own task so one slow peer never
    /// blocks another from being accepted.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {addr}");
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    error!("failed to accept connection: {err}");
                    continue;
                }
            };
            let registry = self.clone();
            tokio::spawn(async move {
                if let Err(err) = registry.handle_connection(stream, peer_addr).await {
                    debug!("connection from {peer_addr} ended: {err}");
                }
            });
        }
    }

    /// Drives one connection end to end: frames the stream, spawns the
    /// peer's writer task, reads commands until the stream closes, and
    /// tears the peer down on exit. Generic over the stream type so tests
    /// can drive it with `tokio::io::duplex`.
    pub async fn handle_connection<S>(self: Arc<Self>, stream: S, addr: SocketAddr) -> Result<(), RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(stream, PacketCodec);
        let (sink, mut stream) = framed.split();

        let peer_id = self.next_peer_id.fetch_add(1, Ordering::Relaxed) as PeerId;
        let peer = Peer::spawn(peer_id, sink, self.config.outbound_queue_capacity);

        {
            let mut peers = self.peers.write().await;
            if peers.len() >= self.config.max_peers {
                warn!("rejecting connection from {addr}: at max_peers capacity");
                return Err(RelayError::Capacity("registry is at max_peers".into()));
            }
            peers.insert(peer_id, peer.clone());
        }
        self.observers.peer_connected(peer_id);
        debug!("peer {peer_id} connected from {addr}");
        self.send_bare_command(&peer, CommandKind::VerifyConnect);

        while let Some(frame) = stream.next().await {
            let packet = match frame {
                Ok(packet) => packet,
                Err(err) => {
                    debug!("peer {peer_id}: frame error, closing: {err}");
                    break;
                }
            };
            peer.touch();
            let commands = match decode_commands(&packet.payload) {
                Ok(commands) => commands,
                Err(err) => {
                    debug!("peer {peer_id}: malformed command batch, skipping: {err}");
                    if peer.record_decode_error() {
                        warn!("peer {peer_id}: too many decode errors, closing");
                        break;
                    }
                    continue;
                }
            };
            for command in commands {
                if let Err(err) = self.handle_command(&peer, command).await {
                    debug!("peer {peer_id}: {err}, closing");
                    break;
                }
            }
        }

        self.disconnect(peer_id).await;
        Ok(())
    }

    async fn handle_command(&self, peer: &Arc<Peer>, command: CommandRecord) -> Result<(), RelayError> {
        match command.kind {
            CommandKind::Ping => Ok(()),
            CommandKind::Disconnect => Err(RelayError::Internal("peer requested disconnect".into())),
            CommandKind::VerifyConnect => Ok(()),
            CommandKind::SendReliable | CommandKind::SendUnreliable => {
                let Some(value) = command.payload else {
                    return Ok(());
                };
                let Some(request) = OperationRequest::from_value(value) else {
                    return Ok(());
                };
                self.observers.operation(peer.id, request.op_code);
                let response = crate::router::dispatch(self, peer, request).await;
                self.send_response(peer, response);
                Ok(())
            }
        }
    }

    /// Sends a payload-less command (`VerifyConnect`, `Ping`, `Disconnect`)
    /// to `peer`. A failed send just means the peer is already gone.
    fn send_bare_command(&self, peer: &Arc<Peer>, kind: CommandKind) {
        let command = CommandRecord {
            kind,
            channel: 0,
            flags: 0,
            timestamp: 0,
            sequence: None,
            payload: None,
        };
        let mut body = Vec::new();
        command.encode(&mut body);
        let _ = peer.try_send(Packet::new(peer.id, bytes::Bytes::from(body)));
    }

    fn send_response(&self, peer: &Arc<Peer>, response: OperationResponse) {
        let sequence = peer.next_sequence();
        let command = CommandRecord {
            kind: CommandKind::SendReliable,
            channel: 0,
            flags: 0,
            timestamp: sequence,
            sequence: Some(sequence),
            payload: Some(response.into_value()),
        };
        let mut body = Vec::new();
        command.encode(&mut body);
        let _ = peer.try_send(Packet::new(peer.id, bytes::Bytes::from(body)));
    }

    pub(crate) async fn op_authenticate(&self, peer: &Arc<Peer>, request: OperationRequest) -> OperationResponse {
        let user_id = match request.params.get(&param::USER_ID) {
            Some(Value::String(s)) => s.clone(),
            _ => format!("user_{}", now_millis()),
        };
        let nickname = match request.params.get(&param::NICK_NAME) {
            Some(Value::String(s)) => s.clone(),
            _ => format!("Guest_{}", now_millis()),
        };
        peer.set_authenticated(user_id.clone(), Some(nickname.clone())).await;

        let mut params = std::collections::BTreeMap::new();
        params.insert(param::NICK_NAME, Value::String(nickname));
        params.insert(param::USER_ID, Value::String(user_id));
        OperationResponse::ok(request.op_code, params)
    }

    pub(crate) async fn op_join_room(&self, peer: &Arc<Peer>, request: OperationRequest) -> OperationResponse {
        if !peer.data().await.authenticated {
            return OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "not authenticated",
            );
        }
        let Some(Value::String(room_name)) = request.params.get(&param::ROOM_NAME) else {
            return OperationResponse::error(request.op_code, return_code::OPERATION_INVALID, "missing roomName");
        };

        let room = {
            let rooms = self.rooms.read().await;
            rooms.get(room_name).cloned()
        };

        let room = match room {
            Some(room) => room,
            None => {
                let create_if_missing = matches!(
                    request.params.get(&param::CREATE_IF_NOT_EXISTS),
                    Some(Value::Bool(true))
                );
                if !create_if_missing {
                    return OperationResponse::error(
                        request.op_code,
                        return_code::ROOM_NOT_FOUND,
                        "room does not exist",
                    );
                }
                match self.create_room(room_name.clone(), &request.params).await {
                    Ok(room) => room,
                    Err(_) => {
                        return OperationResponse::error(
                            request.op_code,
                            return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                            "room already exists",
                        )
                    }
                }
            }
        };

        self.join_room(peer, room, &request).await
    }

    pub(crate) async fn op_leave_or_create_room(&self, peer: &Arc<Peer>, request: OperationRequest) -> OperationResponse {
        if let Some(room_name) = peer.current_room().await {
            self.leave_room(peer, &room_name).await;
            return OperationResponse::ok(request.op_code, Default::default());
        }

        let Some(Value::String(room_name)) = request.params.get(&param::ROOM_NAME) else {
            return OperationResponse::error(request.op_code, return_code::OPERATION_INVALID, "missing roomName");
        };

        match self.create_room(room_name.clone(), &request.params).await {
            Ok(room) => self.join_room(peer, room, &request).await,
            Err(_) => OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "room already exists",
            ),
        }
    }

    pub(crate) async fn op_join_random_room(&self, peer: &Arc<Peer>, request: OperationRequest) -> OperationResponse {
        if !peer.data().await.authenticated {
            return OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "not authenticated",
            );
        }
        let candidate = {
            let rooms = self.rooms.read().await;
            let mut joinable = Vec::new();
            for room in rooms.values() {
                if room.is_open().await && room.member_count().await < room.max_members {
                    joinable.push(room.clone());
                }
            }
            joinable.choose(&mut rand::thread_rng()).cloned()
        };

        match candidate {
            Some(room) => self.join_room(peer, room, &request).await,
            None => OperationResponse::error(
                request.op_code,
                return_code::ROOM_NOT_FOUND,
                "no joinable room available",
            ),
        }
    }

    async fn join_room(&self, peer: &Arc<Peer>, room: Arc<Room>, request: &OperationRequest) -> OperationResponse {
        if peer.current_room().await.is_some() {
            return OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "already in a room",
            );
        }

        if !room.is_open().await {
            return OperationResponse::error(request.op_code, return_code::ROOM_CLOSED, "room is closed");
        }

        let password = match request.params.get(&param::PASSWORD) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        };
        if !room.check_password(password).await {
            return OperationResponse::error(
                request.op_code,
                return_code::JOIN_FAILED_DENIED,
                "invalid password",
            );
        }

        match room.add_member(peer.clone()).await {
            Ok(()) => {
                peer.set_current_room(Some(room.name.clone())).await;
                let mut params = std::collections::BTreeMap::new();
                if let Some(master_id) = room.master_id().await {
                    params.insert(param::MASTER_CLIENT_ID, Value::Int(master_id as i32));
                }
                params.insert(param::ACTOR_NR, Value::Int(peer.id as i32));

                let snapshot = room.snapshot().await;
                let game_properties = snapshot
                    .properties
                    .into_iter()
                    .map(|(k, v)| (Value::String(k), v))
                    .collect();
                params.insert(param::PROPERTIES, Value::Hashtable(game_properties));

                let members = room.member_peers().await;
                let mut actor_properties = Vec::with_capacity(members.len());
                let mut member_list = Vec::with_capacity(members.len());
                for member in &members {
                    let data = member.data().await;
                    actor_properties.push((
                        Value::Int(member.id as i32),
                        Value::Hashtable(
                            data.custom_properties
                                .iter()
                                .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                                .collect(),
                        ),
                    ));
                    let mut entry = vec![(Value::Byte(param::ACTOR_NR as i8), Value::Int(member.id as i32))];
                    if let Some(nickname) = data.nickname {
                        entry.push((Value::Byte(param::NICK_NAME as i8), Value::String(nickname)));
                    }
                    member_list.push(Value::Hashtable(entry));
                }
                params.insert(param::ACTOR_PROPERTIES, Value::Hashtable(actor_properties));
                params.insert(param::MEMBERS, Value::ObjectArray(member_list));
                params.insert(param::PLAYER_TTL, Value::Int(0));
                params.insert(param::EMPTY_ROOM_TTL, Value::Int(room.empty_room_ttl_ms as i32));

                OperationResponse::ok(request.op_code, params)
            }
            Err(_) => OperationResponse::error(request.op_code, return_code::ROOM_FULL, "room is full"),
        }
    }

    async fn leave_room(&self, peer: &Arc<Peer>, room_name: &RoomName) {
        let room = {
            let rooms = self.rooms.read().await;
            rooms.get(room_name).cloned()
        };
        if let Some(room) = room {
            room.remove_member(peer.id).await;
            peer.set_current_room(None).await;
        }
    }

    /// Game-wide properties may only be changed by the room's master client;
    /// per-actor properties only require the caller to be authenticated
    /// (spec §4.4's two-tier `ChangeProperties` rule).
    pub(crate) async fn op_change_properties(&self, peer: &Arc<Peer>, request: OperationRequest) -> OperationResponse {
        if !peer.data().await.authenticated {
            return OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "not authenticated",
            );
        }
        let Some(room_name) = peer.current_room().await else {
            return OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "not in a room",
            );
        };
        let room = {
            let rooms = self.rooms.read().await;
            rooms.get(&room_name).cloned()
        };
        let Some(room) = room else {
            return OperationResponse::error(request.op_code, return_code::ROOM_NOT_FOUND, "room no longer exists");
        };

        let changes: HashMap<String, Value> = match request.params.get(&param::PROPERTIES) {
            Some(Value::Hashtable(pairs)) => pairs
                .iter()
                .filter_map(|(k, v)| match k {
                    Value::String(s) => Some((s.clone(), v.clone())),
                    _ => None,
                })
                .collect(),
            _ => HashMap::new(),
        };
        let broadcast = !matches!(request.params.get(&param::BROADCAST), Some(Value::Bool(false)));

        let targets_actor = request.params.get(&param::ACTOR_PROPERTIES).is_some();
        if targets_actor {
            peer.merge_custom_properties(changes.clone()).await;
            room.notify_actor_properties_changed(peer.id, changes).await;
            return OperationResponse::ok(request.op_code, Default::default());
        }

        if room.master_id().await != Some(peer.id) {
            return OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "only the master client may change game properties",
            );
        }
        room.change_properties(changes, broadcast).await;
        OperationResponse::ok(request.op_code, Default::default())
    }

    pub(crate) async fn op_get_room_list(&self, request: OperationRequest) -> OperationResponse {
        let rooms = self.rooms.read().await;
        let mut entries = Vec::new();
        for room in rooms.values() {
            let snapshot = room.snapshot().await;
            if !snapshot.is_visible {
                continue;
            }
            let properties = snapshot
                .properties
                .into_iter()
                .map(|(k, v)| (Value::String(k), v))
                .collect();
            let room_entry = vec![
                (Value::String("name".into()), Value::String(snapshot.name)),
                (Value::String("playerCount".into()), Value::Int(snapshot.member_count as i32)),
                (Value::String("maxPlayers".into()), Value::Int(snapshot.max_members as i32)),
                (Value::String("isOpen".into()), Value::Bool(snapshot.is_open)),
                (Value::String("isVisible".into()), Value::Bool(snapshot.is_visible)),
                (Value::String("customProperties".into()), Value::Hashtable(properties)),
            ];
            entries.push(Value::Hashtable(room_entry));
        }
        let mut params = std::collections::BTreeMap::new();
        params.insert(param::ROOM_LIST, Value::ObjectArray(entries));
        OperationResponse::ok(request.op_code, params)
    }

    pub(crate) async fn op_raise_event(&self, peer: &Arc<Peer>, request: OperationRequest) -> OperationResponse {
        if !peer.data().await.authenticated {
            return OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "not authenticated",
            );
        }
        let Some(room_name) = peer.current_room().await else {
            return OperationResponse::error(
                request.op_code,
                return_code::OPERATION_NOT_ALLOWED_IN_CURRENT_STATE,
                "not in a room",
            );
        };
        let room = {
            let rooms = self.rooms.read().await;
            rooms.get(&room_name).cloned()
        };
        let Some(room) = room else {
            return OperationResponse::error(request.op_code, return_code::ROOM_NOT_FOUND, "room no longer exists");
        };

        let event_code = match request.params.get(&param::EVENT_CODE) {
            Some(v) => v.as_i64().unwrap_or(0) as u8,
            None => {
                return OperationResponse::error(request.op_code, return_code::OPERATION_INVALID, "missing eventCode")
            }
        };
        let mut params = std::collections::BTreeMap::new();
        if let Some(data) = request.params.get(&param::EVENT_DATA) {
            params.insert(param::EVENT_DATA, data.clone());
        }
        room.raise_event(peer.id, Event::new(event_code, params)).await;
        OperationResponse::ok(request.op_code, Default::default())
    }

    async fn create_room(
        &self,
        name: RoomName,
        params: &std::collections::BTreeMap<u8, Value>,
    ) -> Result<Arc<Room>, RelayError> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&name) {
            return Err(RelayError::Internal(format!("room {name} already exists")));
        }
        if rooms.len() >= self.config.max_rooms {
            return Err(RelayError::Capacity("registry is at max_rooms".into()));
        }

        let max_members = match params.get(&param::MAX_PLAYERS) {
            Some(v) => v.as_i64().unwrap_or(self.config.max_room_members as i64) as usize,
            None => self.config.max_room_members,
        }
        .clamp(1, self.config.max_players_room_hard_cap);
        let password = match params.get(&param::PASSWORD) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let properties = match params.get(&param::PROPERTIES) {
            Some(Value::Hashtable(pairs)) => pairs
                .iter()
                .filter_map(|(k, v)| match k {
                    Value::String(s) => Some((s.clone(), v.clone())),
                    _ => None,
                })
                .collect(),
            _ => HashMap::new(),
        };

        let room = Arc::new(Room::new(
            name.clone(),
            max_members,
            password,
            properties,
            self.config.event_cache_capacity,
            self.config.empty_room_ttl_secs * 1000,
        ));
        rooms.insert(name.clone(), room.clone());
        self.observers.room_created(&name);
        Ok(room)
    }

    /// Destroys every room whose empty-room TTL has elapsed (spec §4.5/§4.6's
    /// cleanup predicate). Run periodically from [`Self::run_cleanup`],
    /// never synchronously when a room's last member leaves.
    async fn cleanup_expired_rooms(&self) {
        let mut rooms = self.rooms.write().await;
        let mut expired = Vec::new();
        for (name, room) in rooms.iter() {
            if room.is_cleanup_eligible().await {
                expired.push(name.clone());
            }
        }
        for name in expired {
            rooms.remove(&name);
            self.observers.room_closed(&name);
        }
    }

    /// Periodically destroys empty rooms past their TTL (spec §4.5/§4.6).
    pub async fn run_cleanup(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        loop {
            tokio::time::sleep(interval).await;
            self.cleanup_expired_rooms().await;
        }
    }

    async fn disconnect(&self, peer_id: PeerId) {
        let peer = self.peers.write().await.remove(&peer_id);
        let Some(peer) = peer else { return };
        if !peer.mark_closed() {
            return;
        }
        if let Some(room_name) = peer.current_room().await {
            self.leave_room(&peer, &room_name).await;
        }
        self.observers.peer_disconnected(peer_id);
        debug!("peer {peer_id} disconnected");
    }

    /// Sends `Ping` to peers due for one and disconnects peers that haven't
    /// been heard from within `liveness_timeout_secs` (spec §4.7).
    pub async fn run_liveness(self: Arc<Self>) {
        let interval = Duration::from_secs((self.config.ping_interval_secs / 3).max(1));
        loop {
            tokio::time::sleep(interval).await;

            let peers: Vec<Arc<Peer>> = self.peers.read().await.values().cloned().collect();
            let mut stale = Vec::new();
            for peer in &peers {
                if peer.seconds_since_seen() > self.config.liveness_timeout_secs {
                    stale.push(peer.id);
                    continue;
                }
                if peer.seconds_since_ping_sent() > self.config.ping_interval_secs {
                    self.send_bare_command(peer, CommandKind::Ping);
                    peer.record_ping_sent();
                }
            }
            for peer_id in stale {
                debug!("peer {peer_id} timed out");
                self.disconnect(peer_id).await;
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Disconnects every currently-connected peer. Used by the shutdown
    /// drain (spec §4.8) once its deadline elapses.
    pub async fn disconnect_all(&self) {
        let ids: Vec<PeerId> = self.peers.read().await.keys().copied().collect();
        for peer_id in ids {
            self.disconnect(peer_id).await;
        }
    }

    /// Sends `Disconnect` to every connected peer (spec §4.8's shutdown
    /// sequence), giving well-behaved clients a chance to close cleanly
    /// before the drain deadline forces sockets shut.
    pub async fn broadcast_disconnect(&self) {
        let peers: Vec<Arc<Peer>> = self.peers.read().await.values().cloned().collect();
        for peer in &peers {
            self.send_bare_command(peer, CommandKind::Disconnect);
        }
    }
}

fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
