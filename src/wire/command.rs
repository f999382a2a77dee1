//! Command records carried inside a packet payload (spec §4.3):
//! `kind(u8) channel(u8) flags(u8) reserved(u8) timestamp(u32) [sequence(u32)]
//! [payload: tagged Value]`.

use crate::codec::{decode_value, encode_value, DecodeError, Value};
use crate::codec::{Reader, WriteExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    VerifyConnect = 3,
    Disconnect = 4,
    Ping = 5,
    SendReliable = 6,
    SendUnreliable = 7,
}

impl CommandKind {
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            3 => CommandKind::VerifyConnect,
            4 => CommandKind::Disconnect,
            5 => CommandKind::Ping,
            6 => CommandKind::SendReliable,
            7 => CommandKind::SendUnreliable,
            _ => return None,
        })
    }

    fn carries_sequence(self) -> bool {
        matches!(self, CommandKind::SendReliable | CommandKind::SendUnreliable)
    }

    fn carries_payload(self) -> bool {
        matches!(self, CommandKind::SendReliable | CommandKind::SendUnreliable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub kind: CommandKind,
    pub channel: u8,
    pub flags: u8,
    pub timestamp: u32,
    pub sequence: Option<u32>,
    pub payload: Option<Value>,
}

impl CommandRecord {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.write_u8(self.kind as u8);
        out.write_u8(self.channel);
        out.write_u8(self.flags);
        out.write_u8(0); // reserved
        out.write_u32(self.timestamp);
        if let Some(sequence) = self.sequence {
            out.write_u32(sequence);
        }
        if let Some(payload) = &self.payload {
            encode_value(payload, out);
        }
    }
}

/// Decodes every command record packed into a packet's payload. A malformed
/// record fails the whole batch; callers treat that as containable per-peer
/// (count it, skip the rest of this packet) rather than fatal — they do not
/// tear down the connection on the first bad packet.
pub fn decode_commands(payload: &[u8]) -> Result<Vec<CommandRecord>, DecodeError> {
    let mut reader = Reader::new(payload);
    let mut commands = Vec::new();
    while !reader.is_empty() {
        commands.push(decode_one(&mut reader)?);
    }
    Ok(commands)
}

fn decode_one(reader: &mut Reader) -> Result<CommandRecord, DecodeError> {
    let offset = reader.offset();
    let kind_byte = reader.u8()?;
    let kind = CommandKind::from_byte(kind_byte)
        .ok_or(DecodeError::UnknownTag { tag: kind_byte, offset })?;
    let channel = reader.u8()?;
    let flags = reader.u8()?;
    let _reserved = reader.u8()?;
    let timestamp = reader.u32()?;

    let sequence = if kind.carries_sequence() {
        Some(reader.u32()?)
    } else {
        None
    };

    let payload = if kind.carries_payload() {
        Some(decode_value(reader)?)
    } else {
        None
    };

    Ok(CommandRecord {
        kind,
        channel,
        flags,
        timestamp,
        sequence,
        payload,
    })
}
