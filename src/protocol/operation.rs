//! Operation request/response envelope (spec §4.4) and its op/return code
//! tables.

use std::collections::BTreeMap;

use crate::codec::Value;

/// Operation codes a peer may invoke.
pub mod opcode {
    pub const AUTHENTICATE: u8 = 230;
    pub const JOIN_ROOM: u8 = 226;
    /// Overloaded: leaves the peer's current room if it is in one,
    /// otherwise creates a new room (spec §4.4 footnote 1).
    pub const LEAVE_OR_CREATE_ROOM: u8 = 227;
    pub const JOIN_RANDOM_ROOM: u8 = 225;
    pub const CHANGE_PROPERTIES: u8 = 248;
    pub const GET_ROOM_LIST: u8 = 253;
    /// Accepted as an alias of [`GET_ROOM_LIST`]; older clients send this
    /// code for the same operation.
    pub const GET_ROOM_LIST_ALT: u8 = 220;
    pub const RAISE_EVENT: u8 = 255;
}

/// Operation return codes (spec §4.4).
pub mod return_code {
    pub const OK: i16 = 0;
    pub const OPERATION_INVALID: i16 = -1;
    pub const INTERNAL_SERVER_ERROR: i16 = -2;
    pub const OPERATION_NOT_ALLOWED_IN_CURRENT_STATE: i16 = 32760;
    pub const JOIN_FAILED_DENIED: i16 = 32758;
    pub const ROOM_CLOSED: i16 = 32757;
    /// Pinned choice between the two return-code candidates spec.md §9
    /// leaves open.
    pub const ROOM_FULL: i16 = 32765;
    pub const ROOM_NOT_FOUND: i16 = 32764;
}

/// Reserved integer keys inside the envelope `Value::Hashtable` that are not
/// application parameters (spec §4.4's Open Question resolution).
mod envelope_key {
    pub const OP_CODE: i8 = 0;
    pub const RETURN_CODE: i8 = 1;
    pub const DEBUG_MESSAGE: i8 = 2;
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub op_code: u8,
    pub params: BTreeMap<u8, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationResponse {
    pub op_code: u8,
    pub return_code: i16,
    pub debug_message: Option<String>,
    pub params: BTreeMap<u8, Value>,
}

impl OperationResponse {
    pub fn ok(op_code: u8, params: BTreeMap<u8, Value>) -> Self {
        Self {
            op_code,
            return_code: return_code::OK,
            debug_message: None,
            params,
        }
    }

    pub fn error(op_code: u8, return_code: i16, debug_message: impl Into<String>) -> Self {
        Self {
            op_code,
            return_code,
            debug_message: Some(debug_message.into()),
            params: BTreeMap::new(),
        }
    }
}

fn params_to_entries(params: &BTreeMap<u8, Value>) -> Vec<(Value, Value)> {
    params
        .iter()
        .map(|(k, v)| (Value::Byte(*k as i8), v.clone()))
        .collect()
}

fn entries_to_params(entries: Vec<(Value, Value)>) -> BTreeMap<u8, Value> {
    entries
        .into_iter()
        .filter_map(|(k, v)| match k {
            Value::Byte(b) => Some((b as u8, v)),
            _ => None,
        })
        .collect()
}

impl OperationRequest {
    pub fn into_value(self) -> Value {
        let mut entries = vec![(
            Value::Byte(envelope_key::OP_CODE),
            Value::Byte(self.op_code as i8),
        )];
        entries.extend(params_to_entries(&self.params));
        Value::Hashtable(entries)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Hashtable(mut entries) = value else {
            return None;
        };
        let op_code = take_byte(&mut entries, envelope_key::OP_CODE)?;
        entries.retain(|(k, _)| !is_reserved_key(k, envelope_key::OP_CODE));
        Some(OperationRequest {
            op_code,
            params: entries_to_params(entries),
        })
    }
}

impl OperationResponse {
    pub fn into_value(self) -> Value {
        let mut entries = vec![
            (
                Value::Byte(envelope_key::OP_CODE),
                Value::Byte(self.op_code as i8),
            ),
            (
                Value::Byte(envelope_key::RETURN_CODE),
                Value::Short(self.return_code),
            ),
        ];
        if let Some(message) = self.debug_message {
            entries.push((
                Value::Byte(envelope_key::DEBUG_MESSAGE),
                Value::String(message),
            ));
        }
        entries.extend(params_to_entries(&self.params));
        Value::Hashtable(entries)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Hashtable(mut entries) = value else {
            return None;
        };
        let op_code = take_byte(&mut entries, envelope_key::OP_CODE)?;
        let return_code = match take_entry(&mut entries, envelope_key::RETURN_CODE) {
            Some(Value::Short(s)) => s,
            Some(other) => other.as_i64()? as i16,
            None => return None,
        };
        let debug_message = match take_entry(&mut entries, envelope_key::DEBUG_MESSAGE) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        entries.retain(|(k, _)| {
            !is_reserved_key(k, envelope_key::OP_CODE)
                && !is_reserved_key(k, envelope_key::RETURN_CODE)
                && !is_reserved_key(k, envelope_key::DEBUG_MESSAGE)
        });
        Some(OperationResponse {
            op_code,
            return_code,
            debug_message,
            params: entries_to_params(entries),
        })
    }
}

fn is_reserved_key(key: &Value, reserved: i8) -> bool {
    matches!(key, Value::Byte(b) if *b == reserved)
}

fn take_entry(entries: &mut Vec<(Value, Value)>, reserved: i8) -> Option<Value> {
    let idx = entries
        .iter()
        .position(|(k, _)| is_reserved_key(k, reserved))?;
    Some(entries.remove(idx).1)
}

fn take_byte(entries: &mut Vec<(Value, Value)>, reserved: i8) -> Option<u8> {
    match take_entry(entries, reserved)? {
        Value::Byte(b) => Some(b as u8),
        other => other.as_i64().map(|v| v as u8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_value() {
        let mut params = BTreeMap::new();
        params.insert(crate::protocol::params::op::ROOM_NAME, Value::String("lobby".into()));
        let request = OperationRequest {
            op_code: opcode::JOIN_ROOM,
            params,
        };
        let value = request.clone().into_value();
        let decoded = OperationRequest::from_value(value).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn response_round_trips_with_debug_message() {
        let response = OperationResponse::error(
            opcode::JOIN_ROOM,
            return_code::ROOM_FULL,
            "room is full",
        );
        let value = response.clone().into_value();
        let decoded = OperationResponse::from_value(value).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn response_round_trips_without_debug_message() {
        let mut params = BTreeMap::new();
        params.insert(10u8, Value::Int(1));
        let response = OperationResponse::ok(opcode::GET_ROOM_LIST, params);
        let value = response.clone().into_value();
        let decoded = OperationResponse::from_value(value).unwrap();
        assert_eq!(decoded, response);
    }
}
