//! Small type aliases used across module boundaries.

/// Identifies a peer for the lifetime of its connection. Assigned by the
/// [`crate::registry::Registry`] when a peer connects; never reused while
/// that peer is alive.
pub type PeerId = u16;

/// A room is looked up by name rather than a numeric id (spec §3).
pub type RoomName = String;
