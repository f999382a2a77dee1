//! End-to-end scenarios driving [`Registry::handle_connection`] over
//! in-memory duplex streams, standing in for real TCP sockets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use gpbinary_relay::codec::Value;
use gpbinary_relay::config::ServerConfig;
use gpbinary_relay::error::RelayError;
use gpbinary_relay::observer::ObserverRegistry;
use gpbinary_relay::protocol::operation::{opcode, return_code};
use gpbinary_relay::protocol::params::op as param;
use gpbinary_relay::protocol::{Event, OperationRequest, OperationResponse};
use gpbinary_relay::registry::Registry;
use gpbinary_relay::wire::{decode_commands, CommandKind, CommandRecord, Packet, PacketCodec};

type ClientStream = Framed<tokio::io::DuplexStream, PacketCodec>;

fn test_registry() -> Arc<Registry> {
    let mut config = ServerConfig::default();
    config.max_room_members = 8;
    config.event_cache_capacity = 16;
    Registry::new(config, ObserverRegistry::new())
}

/// Connects a fresh peer to `registry` over an in-memory duplex pair and
/// returns its client-side framed stream plus the server task's handle.
async fn connect(registry: &Arc<Registry>) -> (ClientStream, JoinHandle<Result<(), RelayError>>) {
    let (client, server) = tokio::io::duplex(8192);
    let registry = registry.clone();
    let addr = "127.0.0.1:0".parse().unwrap();
    let handle = tokio::spawn(async move { registry.handle_connection(server, addr).await });
    (Framed::new(client, PacketCodec), handle)
}

async fn send_request(stream: &mut ClientStream, seq: u32, op_code: u8, params: BTreeMap<u8, Value>) {
    let request = OperationRequest { op_code, params };
    let command = CommandRecord {
        kind: CommandKind::SendReliable,
        channel: 0,
        flags: 0,
        timestamp: seq,
        sequence: Some(seq),
        payload: Some(request.into_value()),
    };
    let mut body = Vec::new();
    command.encode(&mut body);
    stream.send(Packet::new(0, Bytes::from(body))).await.unwrap();
}

/// Reads the next command carrying a payload, decoding it to a raw `Value`.
/// Commands with no payload (VerifyConnect/Ping/Disconnect) are skipped.
async fn next_value(stream: &mut ClientStream) -> Value {
    loop {
        let packet = stream.next().await.expect("stream closed").expect("frame error");
        let commands = decode_commands(&packet.payload).expect("malformed command batch");
        for command in commands {
            if let Some(value) = command.payload {
                return value;
            }
        }
    }
}

async fn next_command_kind(stream: &mut ClientStream) -> CommandKind {
    let packet = stream.next().await.expect("stream closed").expect("frame error");
    let commands = decode_commands(&packet.payload).expect("malformed command batch");
    commands[0].kind
}

/// Reads values until one parses as an [`OperationResponse`] (it carries a
/// return code; events don't), skipping any events queued ahead of it.
async fn next_response(stream: &mut ClientStream) -> OperationResponse {
    loop {
        let value = next_value(stream).await;
        if let Some(response) = OperationResponse::from_value(value) {
            return response;
        }
    }
}

async fn authenticate(stream: &mut ClientStream, seq: u32, nickname: &str, user_id: &str) -> OperationResponse {
    let mut params = BTreeMap::new();
    params.insert(param::NICK_NAME, Value::String(nickname.to_string()));
    params.insert(param::USER_ID, Value::String(user_id.to_string()));
    send_request(stream, seq, opcode::AUTHENTICATE, params).await;
    next_response(stream).await
}

fn string_prop(key: &str, value: Value) -> (Value, Value) {
    (Value::String(key.to_string()), value)
}

#[tokio::test]
async fn handshake_and_auth() {
    let registry = test_registry();
    let (mut stream, _handle) = connect(&registry).await;

    assert_eq!(next_command_kind(&mut stream).await, CommandKind::VerifyConnect);

    let response = authenticate(&mut stream, 1, "alice", "u1").await;
    assert_eq!(response.op_code, opcode::AUTHENTICATE);
    assert_eq!(response.return_code, return_code::OK);
    assert_eq!(
        response.params.get(&param::NICK_NAME),
        Some(&Value::String("alice".to_string()))
    );
    assert_eq!(
        response.params.get(&param::USER_ID),
        Some(&Value::String("u1".to_string()))
    );
}

#[tokio::test]
async fn create_and_join() {
    let registry = test_registry();
    let (mut a, _a_handle) = connect(&registry).await;
    let (mut b, _b_handle) = connect(&registry).await;

    authenticate(&mut a, 1, "alice", "u1").await;

    let mut create_params = BTreeMap::new();
    create_params.insert(param::ROOM_NAME, Value::String("r1".to_string()));
    create_params.insert(param::MAX_PLAYERS, Value::Int(2));
    create_params.insert(
        param::PROPERTIES,
        Value::Hashtable(vec![
            string_prop("isopen", Value::Bool(true)),
            string_prop("isvisible", Value::Bool(true)),
        ]),
    );
    send_request(&mut a, 2, opcode::LEAVE_OR_CREATE_ROOM, create_params).await;
    let create_response = next_response(&mut a).await;
    assert_eq!(create_response.return_code, return_code::OK);
    assert_eq!(create_response.params.get(&param::MASTER_CLIENT_ID), Some(&Value::Int(1)));

    authenticate(&mut b, 1, "bob", "u2").await;
    let mut join_params = BTreeMap::new();
    join_params.insert(param::ROOM_NAME, Value::String("r1".to_string()));
    send_request(&mut b, 2, opcode::JOIN_ROOM, join_params).await;

    let join_event = Event::from_value(next_value(&mut a).await).expect("expected a JOIN event");
    assert_eq!(join_event.code, gpbinary_relay::protocol::event::code::JOIN);
    assert_eq!(join_event.params.get(&10u8), Some(&Value::Int(2)));
    assert_eq!(join_event.params.get(&11u8), Some(&Value::String("bob".to_string())));

    let join_response = next_response(&mut b).await;
    assert_eq!(join_response.return_code, return_code::OK);
    assert_eq!(join_response.params.get(&param::MASTER_CLIENT_ID), Some(&Value::Int(1)));
}

#[tokio::test]
async fn raise_event_fans_out_excluding_sender() {
    let registry = test_registry();
    let (mut a, _a_handle) = connect(&registry).await;
    let (mut b, _b_handle) = connect(&registry).await;
    let (mut c, _c_handle) = connect(&registry).await;

    authenticate(&mut a, 1, "alice", "u1").await;
    let mut create_params = BTreeMap::new();
    create_params.insert(param::ROOM_NAME, Value::String("r1".to_string()));
    send_request(&mut a, 2, opcode::LEAVE_OR_CREATE_ROOM, create_params).await;
    next_response(&mut a).await;

    authenticate(&mut b, 1, "bob", "u2").await;
    let mut join_params = BTreeMap::new();
    join_params.insert(param::ROOM_NAME, Value::String("r1".to_string()));
    send_request(&mut b, 2, opcode::JOIN_ROOM, join_params.clone()).await;
    next_value(&mut a).await; // JOIN(B) on A
    next_response(&mut b).await;

    authenticate(&mut c, 1, "carol", "u3").await;
    send_request(&mut c, 2, opcode::JOIN_ROOM, join_params).await;
    next_value(&mut a).await; // JOIN(C) on A
    next_value(&mut b).await; // JOIN(C) on B
    next_response(&mut c).await;

    let mut raise_params = BTreeMap::new();
    raise_params.insert(param::EVENT_CODE, Value::Byte(42));
    raise_params.insert(
        param::EVENT_DATA,
        Value::Hashtable(vec![string_prop("k", Value::String("v".to_string()))]),
    );
    send_request(&mut a, 3, opcode::RAISE_EVENT, raise_params).await;
    next_response(&mut a).await;

    let expected_data = Value::Hashtable(vec![string_prop("k", Value::String("v".to_string()))]);
    let event_b = Event::from_value(next_value(&mut b).await).unwrap();
    assert_eq!(event_b.code, 42);
    assert_eq!(event_b.params.get(&param::EVENT_DATA), Some(&expected_data));
    let event_c = Event::from_value(next_value(&mut c).await).unwrap();
    assert_eq!(event_c.code, 42);
    assert_eq!(event_c.params.get(&param::EVENT_DATA), Some(&expected_data));

    // A should not receive its own raised event: nothing else should be
    // sitting in its stream beyond what we've already consumed.
    let result = tokio::time::timeout(Duration::from_millis(100), next_value(&mut a)).await;
    assert!(result.is_err(), "sender unexpectedly received its own raised event");
}

#[tokio::test]
async fn cached_event_replays_to_a_later_joiner() {
    let registry = test_registry();
    let (mut a, _a_handle) = connect(&registry).await;
    let (mut c, _c_handle) = connect(&registry).await;

    authenticate(&mut a, 1, "alice", "u1").await;
    let mut create_params = BTreeMap::new();
    create_params.insert(param::ROOM_NAME, Value::String("r1".to_string()));
    send_request(&mut a, 2, opcode::LEAVE_OR_CREATE_ROOM, create_params).await;
    next_response(&mut a).await;

    let mut raise_params = BTreeMap::new();
    raise_params.insert(param::EVENT_CODE, Value::Byte(7));
    raise_params.insert(
        param::EVENT_DATA,
        Value::Hashtable(vec![string_prop("x", Value::Int(1))]),
    );
    send_request(&mut a, 3, opcode::RAISE_EVENT, raise_params).await;
    next_response(&mut a).await;

    authenticate(&mut c, 1, "carol", "u3").await;
    let mut join_params = BTreeMap::new();
    join_params.insert(param::ROOM_NAME, Value::String("r1".to_string()));
    send_request(&mut c, 2, opcode::JOIN_ROOM, join_params).await;

    let replayed = Event::from_value(next_value(&mut c).await).expect("expected the cached event first");
    assert_eq!(replayed.code, 7);
    assert_eq!(replayed.params.get(&param::EVENT_DATA), Some(&raise_params_data()));

    let join_response = next_response(&mut c).await;
    assert_eq!(join_response.return_code, return_code::OK);
}

fn raise_params_data() -> Value {
    Value::Hashtable(vec![string_prop("x", Value::Int(1))])
}

#[tokio::test]
async fn master_client_switches_when_master_leaves() {
    let registry = test_registry();
    let (mut a, a_handle) = connect(&registry).await;
    let (mut b, _b_handle) = connect(&registry).await;
    let (mut c, _c_handle) = connect(&registry).await;

    authenticate(&mut a, 1, "alice", "u1").await;
    let mut create_params = BTreeMap::new();
    create_params.insert(param::ROOM_NAME, Value::String("r1".to_string()));
    send_request(&mut a, 2, opcode::LEAVE_OR_CREATE_ROOM, create_params).await;
    next_response(&mut a).await;

    authenticate(&mut b, 1, "bob", "u2").await;
    let mut join_params = BTreeMap::new();
    join_params.insert(param::ROOM_NAME, Value::String("r1".to_string()));
    send_request(&mut b, 2, opcode::JOIN_ROOM, join_params.clone()).await;
    next_value(&mut a).await; // JOIN(B) on A
    next_response(&mut b).await;

    authenticate(&mut c, 1, "carol", "u3").await;
    send_request(&mut c, 2, opcode::JOIN_ROOM, join_params).await;
    next_value(&mut a).await; // JOIN(C) on A
    next_value(&mut b).await; // JOIN(C) on B
    next_response(&mut c).await;

    drop(a);
    a_handle.await.unwrap().unwrap();

    let leave_on_b = Event::from_value(next_value(&mut b).await).unwrap();
    assert_eq!(leave_on_b.code, gpbinary_relay::protocol::event::code::LEAVE);
    assert_eq!(leave_on_b.params.get(&10u8), Some(&Value::Int(1)));
    let switch_on_b = Event::from_value(next_value(&mut b).await).unwrap();
    assert_eq!(switch_on_b.code, gpbinary_relay::protocol::event::code::MASTER_CLIENT_SWITCHED);
    assert_eq!(switch_on_b.params.get(&10u8), Some(&Value::Int(2)));

    let leave_on_c = Event::from_value(next_value(&mut c).await).unwrap();
    assert_eq!(leave_on_c.code, gpbinary_relay::protocol::event::code::LEAVE);
    let switch_on_c = Event::from_value(next_value(&mut c).await).unwrap();
    assert_eq!(switch_on_c.code, gpbinary_relay::protocol::event::code::MASTER_CLIENT_SWITCHED);
    assert_eq!(switch_on_c.params.get(&10u8), Some(&Value::Int(2)));
}

#[tokio::test]
async fn password_gate_rejects_then_accepts() {
    let registry = test_registry();
    let (mut owner, _owner_handle) = connect(&registry).await;
    let (mut guest, _guest_handle) = connect(&registry).await;

    authenticate(&mut owner, 1, "owner", "u1").await;
    let mut create_params = BTreeMap::new();
    create_params.insert(param::ROOM_NAME, Value::String("p1".to_string()));
    create_params.insert(param::PASSWORD, Value::String("secret".to_string()));
    send_request(&mut owner, 2, opcode::LEAVE_OR_CREATE_ROOM, create_params).await;
    next_response(&mut owner).await;

    authenticate(&mut guest, 1, "guest", "u2").await;

    let mut wrong_params = BTreeMap::new();
    wrong_params.insert(param::ROOM_NAME, Value::String("p1".to_string()));
    wrong_params.insert(param::PASSWORD, Value::String("wrong".to_string()));
    send_request(&mut guest, 2, opcode::JOIN_ROOM, wrong_params).await;
    let denied = next_response(&mut guest).await;
    assert_eq!(denied.return_code, return_code::JOIN_FAILED_DENIED);

    let mut right_params = BTreeMap::new();
    right_params.insert(param::ROOM_NAME, Value::String("p1".to_string()));
    right_params.insert(param::PASSWORD, Value::String("secret".to_string()));
    send_request(&mut guest, 3, opcode::JOIN_ROOM, right_params).await;
    let accepted = next_response(&mut guest).await;
    assert_eq!(accepted.return_code, return_code::OK);
}
