//! GpBinaryV16-compatible self-hosted real-time multiplayer relay server.
//!
//! The crate is layered bottom-up: [`codec`] implements the tagged binary
//! value format, [`wire`] frames that format into packets and command
//! records, [`protocol`] gives the command payloads operation/event
//! meaning, and [`peer`]/[`room`]/[`registry`]/[`router`] implement the
//! relay itself on top of those layers.

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod observer;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod router;
pub mod shutdown;
pub mod types;
pub mod wire;

pub use config::ServerConfig;
pub use error::RelayError;
pub use registry::Registry;
