//! Crate-wide error taxonomy (spec §7): transport, decode, protocol-policy,
//! capacity and internal failures, aggregated the way the teacher's
//! top-level error enums pull in per-subsystem errors via `#[from]`.

use thiserror::Error;

use crate::codec::DecodeError;
use crate::protocol::ProtocolError;
use crate::wire::FrameError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("internal error: {0}")]
    Internal(String),
}
