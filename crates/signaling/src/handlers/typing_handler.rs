//! Typing-Handler

use std::sync::Arc;

use schnack_protocol::control::TypingRequest;
use schnack_protocol::{ControlMessage, ErrorCode};

use crate::registry::ClientHandle;
use crate::server_state::{RelayStore, SchnackState};

/// Relay ohne Antwort bei Erfolg; nur Teilnehmer des Raums duerfen tippen
pub fn handle_typing<R: RelayStore>(
    request: TypingRequest,
    request_id: u32,
    handle: &ClientHandle,
    state: &Arc<SchnackState<R>>,
) -> Option<ControlMessage> {
    if !state.rooms.ist_im_raum(handle.connection_id, request.chat_id) {
        return Some(ControlMessage::error(
            request_id,
            ErrorCode::Unauthorized,
            format!("Nicht im Raum {}", request.chat_id),
        ));
    }

    state
        .typing
        .setzen(handle, request.chat_id, request.is_typing);
    None
}
