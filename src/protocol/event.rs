//! Server-to-peer event envelope (spec §4.4): `u8 event-code` plus a
//! `Value::Hashtable` of parameters, same reserved-key convention as
//! [`super::operation`].

use std::collections::BTreeMap;

use crate::codec::Value;

/// Internally-assigned event codes for the notifications this relay
/// raises. These are this implementation's own constants, not a claim of
/// byte-for-byte compatibility with a particular Photon client build (spec
/// §9 calls that out as a follow-up needing a reference-client capture).
pub mod code {
    pub const JOIN: u8 = 255;
    pub const LEAVE: u8 = 254;
    pub const PROPERTIES_CHANGED: u8 = 253;
    pub const MASTER_CLIENT_SWITCHED: u8 = 252;
}

const ENVELOPE_KEY_EVENT_CODE: i8 = 0;

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub code: u8,
    pub params: BTreeMap<u8, Value>,
}

impl Event {
    pub fn new(code: u8, params: BTreeMap<u8, Value>) -> Self {
        Self { code, params }
    }

    pub fn into_value(self) -> Value {
        let mut entries = vec![(
            Value::Byte(ENVELOPE_KEY_EVENT_CODE),
            Value::Byte(self.code as i8),
        )];
        entries.extend(
            self.params
                .into_iter()
                .map(|(k, v)| (Value::Byte(k as i8), v)),
        );
        Value::Hashtable(entries)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Hashtable(mut entries) = value else {
            return None;
        };
        let idx = entries
            .iter()
            .position(|(k, _)| matches!(k, Value::Byte(b) if *b == ENVELOPE_KEY_EVENT_CODE))?;
        let (_, code_value) = entries.remove(idx);
        let code = match code_value {
            Value::Byte(b) => b as u8,
            other => other.as_i64()? as u8,
        };
        let params = entries
            .into_iter()
            .filter_map(|(k, v)| match k {
                Value::Byte(b) => Some((b as u8, v)),
                _ => None,
            })
            .collect();
        Some(Event { code, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_value() {
        let mut params = BTreeMap::new();
        params.insert(10u8, Value::String("peer-joined".into()));
        let event = Event::new(code::JOIN, params);
        let value = event.clone().into_value();
        let decoded = Event::from_value(value).unwrap();
        assert_eq!(decoded, event);
    }
}
