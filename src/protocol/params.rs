//! Parameter and property key conventions shared by the operation/event
//! layer.
//!
//! Operation parameters are keyed by small integer codes (mirroring actual
//! Photon operation parameters); room custom properties are keyed by
//! strings, and those are the ones client builds disagree on the casing of
//! (`"maxPlayers"` vs `"MaxPlayers"`), so property lookups go through
//! [`canonical_property_key`] rather than comparing raw strings.

/// Operation parameter codes (spec §4.4).
pub mod op {
    // Keys 0-2 are reserved by the operation/event envelope itself
    // (op-code, return-code, debug-message) and must never be reused here.
    pub const USER_ID: u8 = 10;
    pub const APP_VERSION: u8 = 11;
    pub const NICK_NAME: u8 = 12;
    pub const MASTER_CLIENT_ID: u8 = 13;
    pub const ACTOR_NR: u8 = 14;
    pub const ROOM_NAME: u8 = 255;
    pub const MAX_PLAYERS: u8 = 248;
    pub const PROPERTIES: u8 = 251;
    pub const BROADCAST: u8 = 250;
    pub const PASSWORD: u8 = 241;
    pub const CREATE_IF_NOT_EXISTS: u8 = 249;
    pub const MATCH_PROPERTIES: u8 = 247;
    pub const EVENT_CODE: u8 = 244;
    pub const EVENT_DATA: u8 = 245;
    pub const TARGET_ACTORS: u8 = 243;
    pub const ROOM_LIST: u8 = 246;
    /// Per-actor custom properties, keyed by caller for ChangeProperties and
    /// keyed by actor-nr (a [`Value::Hashtable`] of actor-nr -> properties)
    /// in the JoinRoom response.
    pub const ACTOR_PROPERTIES: u8 = 242;
    pub const MEMBERS: u8 = 240;
    pub const PLAYER_TTL: u8 = 15;
    pub const EMPTY_ROOM_TTL: u8 = 16;
}

/// Well-known room property names, recognised regardless of the casing a
/// particular client build sends.
pub const PROP_MAX_PLAYERS: &str = "maxplayers";
pub const PROP_IS_OPEN: &str = "isopen";
pub const PROP_IS_VISIBLE: &str = "isvisible";
pub const PROP_MASTER_CLIENT_ID: &str = "masterclientid";

/// Normalises a property key for lookup: ASCII-lowercased. `"MaxPlayers"`
/// and `"maxPlayers"` both canonicalise to `"maxplayers"`.
pub fn canonical_property_key(key: &str) -> String {
    key.to_ascii_lowercase()
}
