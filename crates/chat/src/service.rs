//! ChatService – Zustellstatus-Automat
//!
//! ```text
//! sent ──delivered──▶ delivered ──seen──▶ seen
//!   └──────────────────seen──────────────────┘
//! ```
//!
//! Uebergaenge laufen ausschliesslich ueber bedingte Schreibzugriffe im
//! Store. Ein Aufruf der keinen Uebergang bewirkt hat liefert `None`.

use std::sync::Arc;

use chrono::Utc;
use schnack_core::{ChatId, MessageId, Nachricht, NachrichtenStatus, UserId};
use schnack_db::{ChatRepository, LeseErgebnis, MessageRepository, NeueNachricht};

use crate::{
    error::{ChatError, ChatResult},
    types::{ChatGelesen, NachrichtEntwurf, StatusAenderung},
};

/// Maximale Laenge einer Textnachricht in Zeichen
pub const MAX_NACHRICHTEN_LAENGE: usize = 4096;

pub struct ChatService<R: ChatRepository + MessageRepository> {
    repo: Arc<R>,
}

impl<R: ChatRepository + MessageRepository> ChatService<R> {
    pub fn neu(repo: Arc<R>) -> Arc<Self> {
        Arc::new(Self { repo })
    }

    /// Prueft ob `user_id` Teilnehmer von `chat_id` ist
    ///
    /// Unbekannter Chat ergibt `ChatNichtGefunden`, fehlende Teilnahme
    /// `KeineBerechtigung`.
    pub async fn teilnahme_pruefen(&self, chat_id: ChatId, user_id: UserId) -> ChatResult<()> {
        if ChatRepository::get_by_id(self.repo.as_ref(), chat_id)
            .await?
            .is_none()
        {
            return Err(ChatError::ChatNichtGefunden(chat_id.to_string()));
        }
        if !self.repo.ist_teilnehmer(chat_id, user_id).await? {
            return Err(ChatError::KeineBerechtigung(format!(
                "{user_id} ist kein Teilnehmer von {chat_id}"
            )));
        }
        Ok(())
    }

    /// Teilnehmerliste eines Chats (fuer die direkte Zustellung von Anruf-Einladungen)
    pub async fn teilnehmer(&self, chat_id: ChatId) -> ChatResult<Vec<UserId>> {
        Ok(self.repo.teilnehmer(chat_id).await?)
    }

    /// Legt eine neue Nachricht mit Status `sent` an
    pub async fn nachricht_erstellen(
        &self,
        sender_id: UserId,
        entwurf: NachrichtEntwurf,
    ) -> ChatResult<Nachricht> {
        entwurf_pruefen(&entwurf)?;
        self.teilnahme_pruefen(entwurf.chat_id, sender_id).await?;

        if let Some(reply_to) = entwurf.reply_to {
            let bezug = MessageRepository::get_by_id(self.repo.as_ref(), reply_to).await?;
            if bezug.map(|b| b.chat_id) != Some(entwurf.chat_id) {
                return Err(ChatError::UngueltigeEingabe(format!(
                    "reply_to {reply_to} gehoert nicht zu diesem Chat"
                )));
            }
        }

        let nachricht = MessageRepository::create(
            self.repo.as_ref(),
            NeueNachricht {
                chat_id: entwurf.chat_id,
                sender_id,
                content: &entwurf.content,
                message_type: entwurf.message_type,
                file_url: entwurf.file_url.as_deref(),
                file_name: entwurf.file_name.as_deref(),
                file_size: entwurf.file_size,
                reply_to: entwurf.reply_to,
            },
        )
        .await?;

        tracing::debug!(
            message_id = %nachricht.id,
            chat_id = %nachricht.chat_id,
            sender_id = %sender_id,
            "Nachricht angelegt"
        );
        Ok(nachricht)
    }

    /// `sent -> delivered`, ausgeloest durch einen Empfaenger
    pub async fn als_zugestellt_markieren(
        &self,
        message_id: MessageId,
        empfaenger: UserId,
    ) -> ChatResult<Option<StatusAenderung>> {
        let nachricht = self.nachricht_laden(message_id).await?;
        self.teilnahme_pruefen(nachricht.chat_id, empfaenger).await?;

        if nachricht.sender_id == empfaenger || nachricht.status != NachrichtenStatus::Sent {
            return Ok(None);
        }

        if !self.repo.als_zugestellt_markieren(message_id).await? {
            // Ein paralleler Aufruf war schneller
            return Ok(None);
        }

        Ok(Some(StatusAenderung {
            message_id,
            chat_id: nachricht.chat_id,
            status: NachrichtenStatus::Delivered,
            read_by: None,
        }))
    }

    /// Traegt `leser` in `read_by` ein und hebt den Status auf `seen`
    ///
    /// Ist `chat_id` angegeben, muss die Nachricht zu diesem Chat gehoeren.
    pub async fn als_gelesen_markieren(
        &self,
        message_id: MessageId,
        leser: UserId,
        chat_id: Option<ChatId>,
    ) -> ChatResult<Option<StatusAenderung>> {
        let nachricht = self.nachricht_laden(message_id).await?;
        if chat_id.is_some_and(|c| c != nachricht.chat_id) {
            return Err(ChatError::NachrichtNichtGefunden(format!(
                "{message_id} im angegebenen Chat"
            )));
        }
        self.teilnahme_pruefen(nachricht.chat_id, leser).await?;
        self.lesen_ohne_pruefung(&nachricht, leser).await
    }

    /// Markiert alle ungelesenen fremden Nachrichten eines Chats als gelesen
    ///
    /// Jede Aenderung wird einzeln zurueckgegeben, in Chat-Reihenfolge.
    /// Scheitert eine Nachricht, bricht die Schleife ab; die bis dahin
    /// persistierten Aenderungen bleiben im Ergebnis.
    pub async fn chat_als_gelesen_markieren(
        &self,
        chat_id: ChatId,
        leser: UserId,
    ) -> ChatResult<ChatGelesen> {
        self.teilnahme_pruefen(chat_id, leser).await?;

        let offen = self.repo.ungelesene_fuer(chat_id, leser).await?;
        let mut ergebnis = ChatGelesen {
            aenderungen: Vec::with_capacity(offen.len()),
            fehler: None,
        };
        for message_id in offen {
            match self.einzeln_lesen(message_id, leser).await {
                Ok(Some(aenderung)) => ergebnis.aenderungen.push(aenderung),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat_id,
                        message_id = %message_id,
                        fehler = %e,
                        "Chat nur teilweise als gelesen markiert"
                    );
                    ergebnis.fehler = Some(e);
                    break;
                }
            }
        }

        tracing::debug!(
            chat_id = %chat_id,
            leser = %leser,
            anzahl = ergebnis.aenderungen.len(),
            "Chat als gelesen markiert"
        );
        Ok(ergebnis)
    }

    async fn einzeln_lesen(
        &self,
        message_id: MessageId,
        leser: UserId,
    ) -> ChatResult<Option<StatusAenderung>> {
        match MessageRepository::get_by_id(self.repo.as_ref(), message_id).await? {
            Some(nachricht) => self.lesen_ohne_pruefung(&nachricht, leser).await,
            None => Ok(None),
        }
    }

    async fn nachricht_laden(&self, message_id: MessageId) -> ChatResult<Nachricht> {
        MessageRepository::get_by_id(self.repo.as_ref(), message_id)
            .await?
            .ok_or_else(|| ChatError::NachrichtNichtGefunden(message_id.to_string()))
    }

    async fn lesen_ohne_pruefung(
        &self,
        nachricht: &Nachricht,
        leser: UserId,
    ) -> ChatResult<Option<StatusAenderung>> {
        // Nur fremde Leser zaehlen fuer read_by
        if nachricht.sender_id == leser {
            return Ok(None);
        }

        match self
            .repo
            .gelesen_markieren(nachricht.id, leser, Utc::now())
            .await?
        {
            LeseErgebnis::BereitsGelesen => Ok(None),
            LeseErgebnis::Neu => {
                let aktuell = self.nachricht_laden(nachricht.id).await?;
                Ok(Some(StatusAenderung {
                    message_id: aktuell.id,
                    chat_id: aktuell.chat_id,
                    status: aktuell.status,
                    read_by: Some(aktuell.read_by),
                }))
            }
        }
    }
}

fn entwurf_pruefen(entwurf: &NachrichtEntwurf) -> ChatResult<()> {
    let zeichen = entwurf.content.chars().count();
    if zeichen > MAX_NACHRICHTEN_LAENGE {
        return Err(ChatError::UngueltigeEingabe(format!(
            "Nachricht zu lang: {zeichen} Zeichen (Maximum: {MAX_NACHRICHTEN_LAENGE})"
        )));
    }

    if entwurf.message_type.ist_medium() {
        if entwurf.file_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
            return Err(ChatError::UngueltigeEingabe(format!(
                "Nachrichtentyp '{}' braucht eine file_url",
                entwurf.message_type.als_str()
            )));
        }
    } else if entwurf.content.trim().is_empty() {
        return Err(ChatError::UngueltigeEingabe(
            "Nachrichteninhalt darf nicht leer sein".into(),
        ));
    }

    Ok(())
}
