//! Nachrichten-Handler – send_message, message_delivered, message_seen, mark_chat_read
//!
//! Statusaenderungen gehen an den ganzen Raum, einschliesslich des
//! Ausloesers. Ein Aufruf ohne Uebergang wird nur quittiert.

use std::sync::Arc;

use schnack_chat::{ChatGelesen, NachrichtEntwurf, StatusAenderung};
use schnack_protocol::control::{
    ChatRef, ControlPayload, MarkChatReadResponse, MessageDeliveredRequest, MessageSeenRequest,
    MessageSent, SendMessageRequest, StatusUpdated,
};
use schnack_protocol::ControlMessage;

use super::fehler_antwort;
use crate::registry::ClientHandle;
use crate::server_state::{RelayStore, SchnackState};

/// Persistiert die Nachricht, bestaetigt sie dem Absender und verteilt sie an den Raum
///
/// Die Bestaetigung traegt die `temp_id` des Clients. Bei einem Fehler
/// steht sie in den Details der Fehler-Antwort.
pub async fn handle_send_message<R: RelayStore>(
    request: SendMessageRequest,
    request_id: u32,
    handle: &ClientHandle,
    state: &Arc<SchnackState<R>>,
) -> ControlMessage {
    let temp_id = request.temp_id;
    let entwurf = NachrichtEntwurf {
        chat_id: request.chat_id,
        content: request.content,
        message_type: request.message_type,
        file_url: request.file_url,
        file_name: request.file_name,
        file_size: request.file_size,
        reply_to: request.reply_to,
    };

    let nachricht = match state
        .chat_service
        .nachricht_erstellen(handle.user_id, entwurf)
        .await
    {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(
                user_id = %handle.user_id,
                chat_id = %request.chat_id,
                fehler = %e,
                "Nachricht abgelehnt"
            );
            let antwort = fehler_antwort(request_id, e);
            return match temp_id {
                Some(t) => antwort.mit_details(serde_json::json!({ "temp_id": t })),
                None => antwort,
            };
        }
    };

    state.metriken.messages_total.inc();
    let verteilt = state.rooms.broadcast(
        nachricht.chat_id,
        &ControlMessage::ereignis(ControlPayload::NewMessage(nachricht.clone())),
        Some(handle.connection_id),
    );
    tracing::debug!(
        message_id = %nachricht.id,
        chat_id = %nachricht.chat_id,
        empfaenger = verteilt,
        "Nachricht verteilt"
    );

    ControlMessage::new(
        request_id,
        ControlPayload::MessageSent(MessageSent {
            temp_id,
            message: nachricht,
        }),
    )
}

pub async fn handle_message_delivered<R: RelayStore>(
    request: MessageDeliveredRequest,
    request_id: u32,
    handle: &ClientHandle,
    state: &Arc<SchnackState<R>>,
) -> ControlMessage {
    match state
        .chat_service
        .als_zugestellt_markieren(request.message_id, handle.user_id)
        .await
    {
        Ok(aenderung) => {
            if let Some(aenderung) = aenderung {
                status_verteilen(state, aenderung);
            }
            ControlMessage::ack(request_id)
        }
        Err(e) => {
            tracing::debug!(message_id = %request.message_id, fehler = %e, "delivered abgelehnt");
            fehler_antwort(request_id, e)
        }
    }
}

pub async fn handle_message_seen<R: RelayStore>(
    request: MessageSeenRequest,
    request_id: u32,
    handle: &ClientHandle,
    state: &Arc<SchnackState<R>>,
) -> ControlMessage {
    match state
        .chat_service
        .als_gelesen_markieren(request.message_id, handle.user_id, Some(request.chat_id))
        .await
    {
        Ok(aenderung) => {
            if let Some(aenderung) = aenderung {
                status_verteilen(state, aenderung);
            }
            ControlMessage::ack(request_id)
        }
        Err(e) => {
            tracing::debug!(message_id = %request.message_id, fehler = %e, "seen abgelehnt");
            fehler_antwort(request_id, e)
        }
    }
}

/// Jede Aenderung wird einzeln verteilt, auch wenn eine spaetere Nachricht scheitert
pub async fn handle_mark_chat_read<R: RelayStore>(
    request: ChatRef,
    request_id: u32,
    handle: &ClientHandle,
    state: &Arc<SchnackState<R>>,
) -> ControlMessage {
    match state
        .chat_service
        .chat_als_gelesen_markieren(request.chat_id, handle.user_id)
        .await
    {
        Ok(ChatGelesen { aenderungen, fehler }) => {
            let updated = aenderungen.len() as u32;
            for aenderung in aenderungen {
                status_verteilen(state, aenderung);
            }
            if let Some(e) = fehler {
                return fehler_antwort(request_id, e)
                    .mit_details(serde_json::json!({ "updated": updated }));
            }
            ControlMessage::new(
                request_id,
                ControlPayload::MarkChatReadResponse(MarkChatReadResponse {
                    chat_id: request.chat_id,
                    updated,
                }),
            )
        }
        Err(e) => fehler_antwort(request_id, e),
    }
}

fn status_verteilen<R: RelayStore>(state: &Arc<SchnackState<R>>, aenderung: StatusAenderung) {
    state
        .metriken
        .status_transitions_total
        .with_label_values(&[aenderung.status.als_str()])
        .inc();

    let chat_id = aenderung.chat_id;
    let ereignis = ControlMessage::ereignis(ControlPayload::StatusUpdated(StatusUpdated {
        message_id: aenderung.message_id,
        chat_id,
        status: aenderung.status,
        read_by: aenderung.read_by,
    }));
    state.rooms.broadcast(chat_id, &ereignis, None);
}
