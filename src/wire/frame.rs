//! Outer packet framing (spec §4.2): `signature(u16) peer_id(u16) crc(u32)
//! length(u32) payload`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Magic value every packet header starts with. Packets whose signature
/// doesn't match are dropped rather than treated as a framing error, since a
/// single garbled byte shouldn't take the whole connection down.
pub const SIGNATURE: u16 = 0xFB17;

const HEADER_LEN: usize = 2 + 2 + 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub peer_id: u16,
    /// Carried through for wire fidelity; this implementation does not
    /// validate it (spec §4.2 leaves crc verification out of scope).
    pub crc: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(peer_id: u16, payload: Bytes) -> Self {
        Self {
            peer_id,
            crc: 0,
            payload,
        }
    }

    fn read(src: &mut BytesMut) -> Option<Self> {
        if src.len() < HEADER_LEN {
            return None;
        }

        let mut header = &src[..HEADER_LEN];
        let signature = header.get_u16();
        if signature != SIGNATURE {
            // Resynchronise by dropping the bad leading byte; the next
            // `decode` call retries from the following offset.
            src.advance(1);
            return None;
        }
        let peer_id = header.get_u16();
        let crc = header.get_u32();
        let length = header.get_u32() as usize;

        if src.len() < HEADER_LEN + length {
            return None;
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(length).freeze();
        Some(Packet {
            peer_id,
            crc,
            payload,
        })
    }

    fn write(&self, dst: &mut BytesMut) {
        dst.put_u16(SIGNATURE);
        dst.put_u16(self.peer_id);
        dst.put_u32(self.crc);
        dst.put_u32(self.payload.len() as u32);
        dst.extend_from_slice(&self.payload);
    }
}

#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Loop so a dropped out-of-sync byte doesn't stall decoding until
        // more bytes arrive.
        loop {
            let before = src.len();
            if let Some(packet) = Packet::read(src) {
                return Ok(Some(packet));
            }
            if src.len() == before {
                return Ok(None);
            }
        }
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.write(dst);
        Ok(())
    }
}
