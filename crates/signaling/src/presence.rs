//! Presence-Tracker – Online-Status und last_seen aus dem Verbindungs-Lebenszyklus
//!
//! Der Tracker haelt keinen eigenen Zustand: online ist, wer in der
//! `ConnectionRegistry` steht; `last_seen` steht im Benutzer-Datensatz und im
//! `user_offline`-Ereignis. Jeder Uebergang geht sofort an alle
//! Verbindungen, die eigene eingeschlossen, ohne Entprellung.
//!
//! Das Zurueckschreiben in den Benutzer-Datensatz ist best effort: ein
//! Fehler wird geloggt, die Verbindung bleibt davon unberuehrt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use schnack_core::UserId;
use schnack_db::UserRepository;
use schnack_protocol::control::{ControlPayload, UserOffline, UserOnline};
use schnack_protocol::ControlMessage;

use crate::registry::ConnectionRegistry;

pub struct PresenceTracker<U: UserRepository> {
    registry: Arc<ConnectionRegistry>,
    repo: Arc<U>,
}

impl<U: UserRepository> PresenceTracker<U> {
    pub fn neu(registry: Arc<ConnectionRegistry>, repo: Arc<U>) -> Self {
        Self {
            registry,
            repo,
        }
    }

    pub fn ist_online(&self, user_id: &UserId) -> bool {
        self.registry.ist_online(user_id)
    }

    /// Verteilt `user_online` an alle Verbindungen
    ///
    /// Wird nach erfolgreicher Registrierung aufgerufen.
    pub async fn online(&self, user_id: UserId) -> usize {
        let ereignis = ControlMessage::ereignis(ControlPayload::UserOnline(UserOnline { user_id }));
        let gesendet = self.registry.an_alle_senden(&ereignis);
        tracing::info!(user_id = %user_id, empfaenger = gesendet, "Benutzer online");

        self.speichern(user_id, true, None).await;
        gesendet
    }

    /// Verteilt `user_offline` mit `last_seen` und schreibt beides zurueck
    ///
    /// Wird nur aufgerufen, wenn die Registry die Identitaet wirklich
    /// entfernt hat (nicht bei verdraengten Handles).
    pub async fn offline(&self, user_id: UserId, zeitpunkt: DateTime<Utc>) -> usize {
        let ereignis = ControlMessage::ereignis(ControlPayload::UserOffline(UserOffline {
            user_id,
            last_seen: zeitpunkt,
        }));
        let gesendet = self.registry.an_alle_senden(&ereignis);
        tracing::info!(user_id = %user_id, empfaenger = gesendet, "Benutzer offline");

        // Zwischenzeitlich neu verbunden: Datensatz nicht auf offline setzen
        if !self.registry.ist_online(&user_id) {
            self.speichern(user_id, false, Some(zeitpunkt)).await;
        }
        gesendet
    }

    async fn speichern(&self, user_id: UserId, is_online: bool, last_seen: Option<DateTime<Utc>>) {
        if let Err(e) = self
            .repo
            .presence_speichern(user_id, is_online, last_seen)
            .await
        {
            tracing::warn!(user_id = %user_id, fehler = %e, "Presence konnte nicht gespeichert werden");
        }
    }
}
