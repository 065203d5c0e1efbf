//! Anruf-Handler – Invite, Offer, Answer, ICE, Reject, End
//!
//! Der Relay prueft nur, ob der Absender Teilnehmer des Chats ist. Den Raum
//! muss er nicht betreten haben: wer eine Einladung direkt bekommen hat,
//! kann ablehnen oder auflegen, ohne vorher `join_chat` zu senden. Wer
//! einen Anruf beenden darf, wird nicht weiter eingeschraenkt.

use std::sync::Arc;

use schnack_protocol::{CallSignal, CallSignalArt, ControlMessage};

use super::fehler_antwort;
use crate::registry::ClientHandle;
use crate::server_state::{RelayStore, SchnackState};

/// Leitet ein Anruf-Signal weiter; keine Antwort bei Erfolg
pub async fn handle_call_signal<R: RelayStore>(
    art: CallSignalArt,
    signal: CallSignal,
    request_id: u32,
    handle: &ClientHandle,
    state: &Arc<SchnackState<R>>,
) -> Option<ControlMessage> {
    let chat_id = signal.chat_id;

    if let Err(e) = state
        .chat_service
        .teilnahme_pruefen(chat_id, handle.user_id)
        .await
    {
        return Some(fehler_antwort(request_id, e));
    }

    let teilnehmer = if art == CallSignalArt::Invite {
        match state.chat_service.teilnehmer(chat_id).await {
            Ok(t) => t,
            Err(e) => return Some(fehler_antwort(request_id, e)),
        }
    } else {
        Vec::new()
    };

    state.calls.weiterleiten(art, handle, signal, &teilnehmer);
    None
}
