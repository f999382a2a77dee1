//! Observability hooks (spec §6.3), recast as a plain trait-object registry
//! rather than the teacher's actor `Service` lifecycle, since this crate's
//! concurrency model is lock-based rather than message-passing.

use std::sync::Arc;

use crate::types::{PeerId, RoomName};

/// Lifecycle hook a caller can register to observe relay activity without
/// coupling to its internals. All methods default to doing nothing, so
/// implementors only need to override what they care about.
pub trait Observer: Send + Sync {
    fn on_peer_connected(&self, _peer_id: PeerId) {}
    fn on_peer_disconnected(&self, _peer_id: PeerId) {}
    fn on_room_created(&self, _room: &RoomName) {}
    fn on_room_closed(&self, _room: &RoomName) {}
    fn on_operation(&self, _peer_id: PeerId, _op_code: u8) {}
}

/// Holds every registered observer and fans calls out to each of them.
/// Cloning is cheap (an `Arc` per observer), so a clone can be handed to
/// each accepted connection.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.observers.push(observer);
    }

    pub fn peer_connected(&self, peer_id: PeerId) {
        for observer in &self.observers {
            observer.on_peer_connected(peer_id);
        }
    }

    pub fn peer_disconnected(&self, peer_id: PeerId) {
        for observer in &self.observers {
            observer.on_peer_disconnected(peer_id);
        }
    }

    pub fn room_created(&self, room: &RoomName) {
        for observer in &self.observers {
            observer.on_room_created(room);
        }
    }

    pub fn room_closed(&self, room: &RoomName) {
        for observer in &self.observers {
            observer.on_room_closed(room);
        }
    }

    pub fn operation(&self, peer_id: PeerId, op_code: u8) {
        for observer in &self.observers {
            observer.on_operation(peer_id, op_code);
        }
    }
}
