//! Message-Dispatcher – Routet Client-Befehle an die Handler
//!
//! Die Verbindung ist beim Dispatch bereits authentifiziert; die Identitaet
//! kommt aus dem `ClientHandle` und nie aus der Nachricht. Der `match` ueber
//! `ControlPayload` ist erschoepfend: jedes neue Ereignis muss hier
//! eingeordnet werden.

use std::sync::Arc;

use schnack_protocol::{CallSignalArt, ControlMessage, ControlPayload, ErrorCode};

use crate::handlers::{call_handler, message_handler, room_handler, typing_handler};
use crate::registry::ClientHandle;
use crate::server_state::{RelayStore, SchnackState};

pub struct MessageDispatcher<R: RelayStore> {
    state: Arc<SchnackState<R>>,
}

impl<R: RelayStore> MessageDispatcher<R> {
    pub fn neu(state: Arc<SchnackState<R>>) -> Self {
        Self { state }
    }

    /// Verarbeitet einen Befehl und gibt die Antwort zurueck
    ///
    /// `None` heisst: keine Antwort an den Absender (Tipp-Anzeige, Anruf-Signale,
    /// Pong).
    pub async fn dispatch(
        &self,
        message: ControlMessage,
        handle: &ClientHandle,
    ) -> Option<ControlMessage> {
        let request_id = message.request_id;
        let state = &self.state;

        match message.payload {
            // -------------------------------------------------------------------
            // Raeume
            // -------------------------------------------------------------------
            ControlPayload::JoinChat(req) => {
                Some(room_handler::handle_join_chat(req, request_id, handle, state).await)
            }
            ControlPayload::LeaveChat(req) => Some(room_handler::handle_leave_chat(
                req, request_id, handle, state,
            )),

            // -------------------------------------------------------------------
            // Nachrichten und Zustellstatus
            // -------------------------------------------------------------------
            ControlPayload::SendMessage(req) => {
                Some(message_handler::handle_send_message(req, request_id, handle, state).await)
            }
            ControlPayload::MessageDelivered(req) => Some(
                message_handler::handle_message_delivered(req, request_id, handle, state).await,
            ),
            ControlPayload::MessageSeen(req) => {
                Some(message_handler::handle_message_seen(req, request_id, handle, state).await)
            }
            ControlPayload::MarkChatRead(req) => {
                Some(message_handler::handle_mark_chat_read(req, request_id, handle, state).await)
            }

            // -------------------------------------------------------------------
            // Tippen
            // -------------------------------------------------------------------
            ControlPayload::Typing(req) => {
                typing_handler::handle_typing(req, request_id, handle, state)
            }

            // -------------------------------------------------------------------
            // Anrufe
            // -------------------------------------------------------------------
            ControlPayload::CallInvite(s) => {
                call_handler::handle_call_signal(CallSignalArt::Invite, s, request_id, handle, state)
                    .await
            }
            ControlPayload::CallOffer(s) => {
                call_handler::handle_call_signal(CallSignalArt::Offer, s, request_id, handle, state)
                    .await
            }
            ControlPayload::CallAnswer(s) => {
                call_handler::handle_call_signal(CallSignalArt::Answer, s, request_id, handle, state)
                    .await
            }
            ControlPayload::CallIceCandidate(s) => {
                call_handler::handle_call_signal(
                    CallSignalArt::IceCandidate,
                    s,
                    request_id,
                    handle,
                    state,
                )
                .await
            }
            ControlPayload::CallReject(s) => {
                call_handler::handle_call_signal(CallSignalArt::Reject, s, request_id, handle, state)
                    .await
            }
            ControlPayload::CallEnd(s) => {
                call_handler::handle_call_signal(CallSignalArt::End, s, request_id, handle, state)
                    .await
            }

            // -------------------------------------------------------------------
            // Keepalive
            // -------------------------------------------------------------------
            ControlPayload::Ping(ping) => Some(ControlMessage::pong(
                request_id,
                ping.timestamp_ms,
                jetzt_ms(),
            )),
            ControlPayload::Pong(_) | ControlPayload::Ack => None,

            // -------------------------------------------------------------------
            // Ungueltig nach dem Verbindungsaufbau
            // -------------------------------------------------------------------
            ControlPayload::Connect(_) => Some(ControlMessage::error(
                request_id,
                ErrorCode::InvalidRequest,
                "Verbindung ist bereits authentifiziert",
            )),
            ControlPayload::ConnectResponse(_)
            | ControlPayload::JoinChatResponse(_)
            | ControlPayload::MessageSent(_)
            | ControlPayload::NewMessage(_)
            | ControlPayload::MarkChatReadResponse(_)
            | ControlPayload::StatusUpdated(_)
            | ControlPayload::UserTyping(_)
            | ControlPayload::UserOnline(_)
            | ControlPayload::UserOffline(_)
            | ControlPayload::Error(_) => {
                tracing::debug!(user_id = %handle.user_id, "Server-Ereignis vom Client erhalten");
                Some(ControlMessage::error(
                    request_id,
                    ErrorCode::InvalidRequest,
                    "Ereignis wird nur vom Server gesendet",
                ))
            }
        }
    }
}

/// Aktuelle Unix-Zeit in Millisekunden
pub(crate) fn jetzt_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
