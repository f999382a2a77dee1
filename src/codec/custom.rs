//! Custom-data payloads (tag `0x63`). These are the small set of
//! Unity-shaped structs PUN clients exchange inline: vectors, a quaternion,
//! and a player reference.

use super::io::{Reader, WriteExt};
use super::DecodeError;

pub const VARIANT_VEC2: u8 = b'W';
pub const VARIANT_VEC3: u8 = b'V';
pub const VARIANT_QUATERNION: u8 = b'Q';
pub const VARIANT_PHOTON_PLAYER: u8 = b'P';

#[derive(Debug, Clone, PartialEq)]
pub enum CustomData {
    Vec2 { x: f32, y: f32 },
    Vec3 { x: f32, y: f32, z: f32 },
    Quaternion { w: f32, x: f32, y: f32, z: f32 },
    PhotonPlayer { player_id: u32 },
    /// Any variant byte this implementation doesn't know the shape of,
    /// along with its declared-length payload kept opaque.
    Unknown { variant: u8, bytes: Vec<u8> },
}

impl CustomData {
    pub fn variant(&self) -> u8 {
        match self {
            CustomData::Vec2 { .. } => VARIANT_VEC2,
            CustomData::Vec3 { .. } => VARIANT_VEC3,
            CustomData::Quaternion { .. } => VARIANT_QUATERNION,
            CustomData::PhotonPlayer { .. } => VARIANT_PHOTON_PLAYER,
            CustomData::Unknown { variant, .. } => *variant,
        }
    }

    pub(super) fn encode(&self, out: &mut Vec<u8>) {
        out.write_u8(self.variant());
        let mut payload = Vec::new();
        match self {
            CustomData::Vec2 { x, y } => {
                payload.write_f32(*x);
                payload.write_f32(*y);
            }
            CustomData::Vec3 { x, y, z } => {
                payload.write_f32(*x);
                payload.write_f32(*y);
                payload.write_f32(*z);
            }
            CustomData::Quaternion { w, x, y, z } => {
                payload.write_f32(*w);
                payload.write_f32(*x);
                payload.write_f32(*y);
                payload.write_f32(*z);
            }
            CustomData::PhotonPlayer { player_id } => {
                payload.write_u32(*player_id);
            }
            CustomData::Unknown { bytes, .. } => {
                payload.write_bytes(bytes);
            }
        }
        out.write_u16(payload.len() as u16);
        out.write_bytes(&payload);
    }

    pub(super) fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let variant = reader.u8()?;
        let len = reader.len16()?;
        let payload = reader.bytes(len)?;
        let mut body = Reader::new(payload);

        let parsed = match variant {
            VARIANT_VEC2 if len == 8 => Some(CustomData::Vec2 {
                x: body.f32()?,
                y: body.f32()?,
            }),
            VARIANT_VEC3 if len == 12 => Some(CustomData::Vec3 {
                x: body.f32()?,
                y: body.f32()?,
                z: body.f32()?,
            }),
            VARIANT_QUATERNION if len == 16 => Some(CustomData::Quaternion {
                w: body.f32()?,
                x: body.f32()?,
                y: body.f32()?,
                z: body.f32()?,
            }),
            VARIANT_PHOTON_PLAYER if len == 4 => Some(CustomData::PhotonPlayer {
                player_id: body.u32()?,
            }),
            _ => None,
        };

        Ok(parsed.unwrap_or(CustomData::Unknown {
            variant,
            bytes: payload.to_vec(),
        }))
    }
}
