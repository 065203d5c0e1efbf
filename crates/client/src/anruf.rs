//! Anruf-Zustand pro Endpunkt
//!
//! Der Relay haelt keinen Anruf-Zustand. Jeder Client fuehrt pro Chat
//! seinen eigenen Automaten aus den weitergeleiteten Signalen:
//!
//! ```text
//! idle --invite--> ringing --offer/answer--> connecting --verbunden--> active
//!                     |                          |                       |
//!                     +------- reject / end -----+-----------------------+--> ended
//! ```
//!
//! `call_reject` und `call_end` beenden den Anruf bedingungslos, egal von
//! wem sie kommen. Ein klingelnder Anruf ohne Antwort laeuft nie ab; das
//! Zeitlimit setzt die Oberflaeche.

use std::collections::HashMap;

use schnack_core::{ChatId, UserId};
use schnack_protocol::{CallSignalArt, ControlPayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnrufPhase {
    Idle,
    Ringing,
    Connecting,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndeGrund {
    Abgelehnt,
    Aufgelegt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnrufSitzung {
    pub chat_id: ChatId,
    pub initiator: UserId,
    pub phase: AnrufPhase,
    pub ende: Option<EndeGrund>,
}

impl AnrufSitzung {
    fn laeuft(&self) -> bool {
        matches!(
            self.phase,
            AnrufPhase::Ringing | AnrufPhase::Connecting | AnrufPhase::Active
        )
    }
}

pub struct AnrufTracker {
    eigene_id: UserId,
    sitzungen: HashMap<ChatId, AnrufSitzung>,
}

impl AnrufTracker {
    pub fn neu(eigene_id: UserId) -> Self {
        Self {
            eigene_id,
            sitzungen: HashMap::new(),
        }
    }

    pub fn phase(&self, chat_id: ChatId) -> AnrufPhase {
        self.sitzungen
            .get(&chat_id)
            .map(|s| s.phase)
            .unwrap_or(AnrufPhase::Idle)
    }

    pub fn sitzung(&self, chat_id: ChatId) -> Option<&AnrufSitzung> {
        self.sitzungen.get(&chat_id)
    }

    /// Klingelnde Anrufe, die ein anderer gestartet hat
    pub fn eingehende(&self) -> Vec<&AnrufSitzung> {
        self.sitzungen
            .values()
            .filter(|s| s.phase == AnrufPhase::Ringing && s.initiator != self.eigene_id)
            .collect()
    }

    /// Wendet ein vom Relay empfangenes Anruf-Signal an
    ///
    /// Gibt die neue Phase zurueck, wenn es einen Uebergang gab.
    pub fn ereignis_anwenden(&mut self, payload: &ControlPayload) -> Option<AnrufPhase> {
        let (art, signal) = payload.als_call_signal()?;
        let von = signal.from_user?;
        self.uebergang(signal.chat_id, art, von)
    }

    /// Vermerkt ein selbst gesendetes Anruf-Signal
    pub fn lokal_gesendet(&mut self, art: CallSignalArt, chat_id: ChatId) -> Option<AnrufPhase> {
        self.uebergang(chat_id, art, self.eigene_id)
    }

    /// Eingehenden Anruf annehmen: `ringing -> connecting`
    pub fn annehmen(&mut self, chat_id: ChatId) -> bool {
        match self.sitzungen.get_mut(&chat_id) {
            Some(s) if s.phase == AnrufPhase::Ringing && s.initiator != self.eigene_id => {
                s.phase = AnrufPhase::Connecting;
                true
            }
            _ => false,
        }
    }

    /// Medienverbindung steht: `connecting -> active`
    pub fn verbunden(&mut self, chat_id: ChatId) -> bool {
        match self.sitzungen.get_mut(&chat_id) {
            Some(s) if s.phase == AnrufPhase::Connecting => {
                s.phase = AnrufPhase::Active;
                true
            }
            _ => false,
        }
    }

    /// Beendeten Anruf vergessen, der Chat ist wieder `idle`
    pub fn zuruecksetzen(&mut self, chat_id: ChatId) -> bool {
        match self.sitzungen.get(&chat_id) {
            Some(s) if s.phase == AnrufPhase::Ended => {
                self.sitzungen.remove(&chat_id);
                true
            }
            _ => false,
        }
    }

    fn uebergang(&mut self, chat_id: ChatId, art: CallSignalArt, von: UserId) -> Option<AnrufPhase> {
        let aktuell = self.sitzungen.get_mut(&chat_id).filter(|s| s.laeuft());

        let neu = match (aktuell, art) {
            (None, CallSignalArt::Invite) => {
                self.sitzungen.insert(
                    chat_id,
                    AnrufSitzung {
                        chat_id,
                        initiator: von,
                        phase: AnrufPhase::Ringing,
                        ende: None,
                    },
                );
                AnrufPhase::Ringing
            }
            // Ohne laufenden Anruf gibt es nichts zu verhandeln oder zu beenden
            (None, _) => return None,

            (Some(s), CallSignalArt::Reject) => {
                s.phase = AnrufPhase::Ended;
                s.ende = Some(EndeGrund::Abgelehnt);
                AnrufPhase::Ended
            }
            (Some(s), CallSignalArt::End) => {
                s.phase = AnrufPhase::Ended;
                s.ende = Some(EndeGrund::Aufgelegt);
                AnrufPhase::Ended
            }
            (Some(s), CallSignalArt::Offer | CallSignalArt::Answer)
                if s.phase == AnrufPhase::Ringing =>
            {
                s.phase = AnrufPhase::Connecting;
                AnrufPhase::Connecting
            }
            // Doppelte Einladung, ICE-Kandidaten, Neuverhandlung
            (Some(_), _) => return None,
        };

        tracing::debug!(chat_id = %chat_id, art = art.als_str(), phase = ?neu, "Anruf-Uebergang");
        Some(neu)
    }
}
