//! GpBinaryV16 tagged-value codec (spec §4.1).
//!
//! This module only knows how to turn bytes into [`value::Value`] trees and
//! back; it has no notion of packets, commands or operations — those build
//! on top of it in [`crate::wire`] and [`crate::protocol`].

mod custom;
mod io;
mod tag;
mod value;

pub use custom::CustomData;
pub use io::{Reader, WriteExt};
pub use tag::{tag_at, Tag};
pub use value::{decode_value, encode_value, Dictionary, Value};

use thiserror::Error;

/// Everything that can go wrong turning wire bytes into a [`Value`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected end of buffer at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("unknown type tag 0x{tag:02X} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    #[error("declared length {len} exceeds remaining buffer at offset {offset}")]
    LengthOverflow { len: usize, offset: usize },

    #[error("declared length is negative at offset {offset}")]
    NegativeLength { offset: usize },

    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },
}
