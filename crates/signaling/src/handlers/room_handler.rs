//! Raum-Handler – join_chat, leave_chat

use std::sync::Arc;

use schnack_protocol::control::{ChatRef, ControlPayload, JoinChatResponse};
use schnack_protocol::ControlMessage;

use super::fehler_antwort;
use crate::registry::ClientHandle;
use crate::server_state::{RelayStore, SchnackState};

/// Tritt einem Chat-Raum bei, nur fuer Teilnehmer des Chats
pub async fn handle_join_chat<R: RelayStore>(
    request: ChatRef,
    request_id: u32,
    handle: &ClientHandle,
    state: &Arc<SchnackState<R>>,
) -> ControlMessage {
    let chat_id = request.chat_id;
    if let Err(e) = state
        .chat_service
        .teilnahme_pruefen(chat_id, handle.user_id)
        .await
    {
        tracing::warn!(user_id = %handle.user_id, chat_id = %chat_id, fehler = %e, "Beitritt abgelehnt");
        return fehler_antwort(request_id, e);
    }

    state.rooms.beitreten(handle, chat_id);

    ControlMessage::new(
        request_id,
        ControlPayload::JoinChatResponse(JoinChatResponse {
            chat_id,
            occupants: state.rooms.occupants(chat_id),
        }),
    )
}

/// Verlaesst einen Chat-Raum; nicht beigetreten ist kein Fehler
pub fn handle_leave_chat<R: RelayStore>(
    request: ChatRef,
    request_id: u32,
    handle: &ClientHandle,
    state: &Arc<SchnackState<R>>,
) -> ControlMessage {
    let chat_id = request.chat_id;

    // Eine offene Tipp-Anzeige endet mit dem Verlassen
    if state.typing.tippt(chat_id, handle.user_id) {
        state.typing.setzen(handle, chat_id, false);
    }
    state.rooms.verlassen(handle.connection_id, chat_id);

    ControlMessage::ack(request_id)
}
