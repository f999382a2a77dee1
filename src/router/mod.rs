//! Dispatches a decoded operation to its handler on [`Registry`] (spec
//! §4.4). The teacher's `session/router.rs` builds a
//! `HashMap<(u16,u16), Box<dyn Route>>` because it has to support ad-hoc
//! route registration across many components; this relay has exactly seven
//! fixed operations, so the same idea collapses to a plain match instead of
//! a boxed trait-object table.

use std::sync::Arc;

use crate::peer::Peer;
use crate::protocol::operation::{opcode, return_code};
use crate::protocol::{OperationRequest, OperationResponse};
use crate::registry::Registry;

pub async fn dispatch(registry: &Registry, peer: &Arc<Peer>, request: OperationRequest) -> OperationResponse {
    match request.op_code {
        opcode::AUTHENTICATE => registry.op_authenticate(peer, request).await,
        opcode::JOIN_ROOM => registry.op_join_room(peer, request).await,
        opcode::LEAVE_OR_CREATE_ROOM => registry.op_leave_or_create_room(peer, request).await,
        opcode::JOIN_RANDOM_ROOM => registry.op_join_random_room(peer, request).await,
        opcode::CHANGE_PROPERTIES => registry.op_change_properties(peer, request).await,
        opcode::GET_ROOM_LIST | opcode::GET_ROOM_LIST_ALT => registry.op_get_room_list(request).await,
        opcode::RAISE_EVENT => registry.op_raise_event(peer, request).await,
        other => OperationResponse::error(other, return_code::OPERATION_INVALID, "unknown operation"),
    }
}
