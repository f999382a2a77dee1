//! Packet and command framing layered over [`crate::codec`]'s tagged values.

mod command;
mod frame;

pub use command::{decode_commands, CommandKind, CommandRecord};
pub use frame::{Packet, PacketCodec, SIGNATURE};

use thiserror::Error;

/// Errors specific to the framing layer itself (the codec layer's
/// [`crate::codec::DecodeError`] covers malformed tagged values inside a
/// command's payload).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed command record: {0}")]
    Command(#[from] crate::codec::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
