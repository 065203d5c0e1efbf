//! Abgleich-Store – lokaler Zustand eines Clients
//!
//! Haelt die Chat-Liste, pro Chat die Nachrichten in Ankunftsreihenfolge,
//! den aktuellen Chat, die Tipp-Anzeigen und eine Presence-Ansicht.
//!
//! Server-Ereignisse koennen doppelt oder in falscher Reihenfolge ankommen.
//! Der Store wendet sie idempotent an und laesst den Zustellstatus einer
//! Nachricht nie zurueckfallen.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use schnack_core::{
    ChatId, Lesebestaetigung, MessageId, Nachricht, NachrichtenStatus, NachrichtenTyp, UserId,
};
use schnack_protocol::control::{
    ConnectResponse, MessageSent, SendMessageRequest, StatusUpdated, UserOffline, UserTyping,
};
use schnack_protocol::ControlPayload;

/// Chat wie ihn die Chat-Liste des Clients zeigt
#[derive(Debug, Clone, PartialEq)]
pub struct ChatUebersicht {
    pub id: ChatId,
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: Vec<UserId>,
    pub last_message: Option<Nachricht>,
}

/// Presence eines anderen Benutzers aus Sicht des Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEintrag {
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Optimistisch eingefuegte Nachricht, wartet auf `message_sent`
#[derive(Debug, Clone, Copy)]
struct Ausstehend {
    chat_id: ChatId,
    lokale_id: MessageId,
}

#[derive(Debug, Default)]
pub struct ChatStore {
    chats: Vec<ChatUebersicht>,
    aktueller_chat: Option<ChatUebersicht>,
    nachrichten: HashMap<ChatId, Vec<Nachricht>>,
    tippend: HashMap<ChatId, HashSet<UserId>>,
    presence: HashMap<UserId, PresenceEintrag>,
    ausstehend: HashMap<String, Ausstehend>,
}

impl ChatStore {
    pub fn neu() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Chats
    // -----------------------------------------------------------------------

    pub fn chats(&self) -> &[ChatUebersicht] {
        &self.chats
    }

    pub fn chats_setzen(&mut self, chats: Vec<ChatUebersicht>) {
        self.chats = chats;
    }

    /// Stellt einen Chat an den Anfang der Liste; ein bekannter Chat wird ersetzt
    pub fn chat_hinzufuegen(&mut self, chat: ChatUebersicht) {
        self.chats.retain(|c| c.id != chat.id);
        self.chats.insert(0, chat);
    }

    /// Aendert einen Chat in der Liste und, falls er aktuell ist, auch den aktuellen Chat
    pub fn chat_aktualisieren(
        &mut self,
        chat_id: ChatId,
        aenderung: impl Fn(&mut ChatUebersicht),
    ) -> bool {
        let mut gefunden = false;
        if let Some(chat) = self.chats.iter_mut().find(|c| c.id == chat_id) {
            aenderung(chat);
            gefunden = true;
        }
        if let Some(aktuell) = self.aktueller_chat.as_mut().filter(|c| c.id == chat_id) {
            aenderung(aktuell);
            gefunden = true;
        }
        gefunden
    }

    pub fn aktueller_chat(&self) -> Option<&ChatUebersicht> {
        self.aktueller_chat.as_ref()
    }

    pub fn aktuellen_chat_setzen(&mut self, chat: Option<ChatUebersicht>) {
        self.aktueller_chat = chat;
    }

    // -----------------------------------------------------------------------
    // Nachrichten
    // -----------------------------------------------------------------------

    pub fn nachrichten(&self, chat_id: ChatId) -> &[Nachricht] {
        self.nachrichten
            .get(&chat_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn nachricht(&self, chat_id: ChatId, message_id: MessageId) -> Option<&Nachricht> {
        self.nachrichten(chat_id).iter().find(|n| n.id == message_id)
    }

    /// Ersetzt die Nachrichtenliste eines Chats (z.B. nach dem Laden des Verlaufs)
    pub fn nachrichten_setzen(&mut self, chat_id: ChatId, nachrichten: Vec<Nachricht>) {
        self.ausstehend.retain(|_, a| a.chat_id != chat_id);
        self.nachrichten.insert(chat_id, nachrichten);
    }

    /// `new_message`: haengt an, wenn die ID noch unbekannt ist
    pub fn neue_nachricht_anwenden(&mut self, nachricht: Nachricht) -> bool {
        let liste = self.nachrichten.entry(nachricht.chat_id).or_default();
        if liste.iter().any(|n| n.id == nachricht.id) {
            return false;
        }

        let chat_id = nachricht.chat_id;
        liste.push(nachricht.clone());
        self.chat_aktualisieren(chat_id, |c| c.last_message = Some(nachricht.clone()));
        true
    }

    /// `status_updated`: uebernimmt nur Fortschritte
    ///
    /// Der Status steigt nur; `read_by` waechst nur (ein Eintrag pro Leser).
    /// Gibt `true` zurueck wenn sich etwas geaendert hat.
    pub fn status_anwenden(&mut self, update: &StatusUpdated) -> bool {
        let Some(nachricht) = self
            .nachrichten
            .get_mut(&update.chat_id)
            .and_then(|l| l.iter_mut().find(|n| n.id == update.message_id))
        else {
            return false;
        };

        let mut geaendert = false;
        if nachricht.status.ist_fortschritt(update.status) {
            nachricht.status = update.status;
            geaendert = true;
        }
        if let Some(read_by) = &update.read_by {
            geaendert |= lesebestaetigungen_mergen(&mut nachricht.read_by, read_by);
        }
        geaendert
    }

    /// Lokale Aenderung einer Nachricht (z.B. nach einer Bearbeitung)
    pub fn nachricht_aktualisieren(
        &mut self,
        chat_id: ChatId,
        message_id: MessageId,
        aenderung: impl FnOnce(&mut Nachricht),
    ) -> bool {
        match self
            .nachrichten
            .get_mut(&chat_id)
            .and_then(|l| l.iter_mut().find(|n| n.id == message_id))
        {
            Some(nachricht) => {
                aenderung(nachricht);
                true
            }
            None => false,
        }
    }

    /// Entfernt eine Nachricht nur lokal
    pub fn nachricht_entfernen(&mut self, chat_id: ChatId, message_id: MessageId) -> bool {
        let Some(liste) = self.nachrichten.get_mut(&chat_id) else {
            return false;
        };
        let vorher = liste.len();
        liste.retain(|n| n.id != message_id);
        vorher != liste.len()
    }

    // -----------------------------------------------------------------------
    // Optimistisches Senden
    // -----------------------------------------------------------------------

    /// Fuegt eine eigene Nachricht vor der Server-Bestaetigung ein
    ///
    /// Die Nachricht bekommt eine lokale ID und Status `sent`; sie wird ueber
    /// `temp_id` mit `message_sent` abgeglichen.
    pub fn optimistisch_einfuegen(
        &mut self,
        eigene_id: UserId,
        temp_id: impl Into<String>,
        anfrage: &SendMessageRequest,
    ) -> MessageId {
        let lokale_id = MessageId::new();
        let nachricht = Nachricht {
            id: lokale_id,
            chat_id: anfrage.chat_id,
            sender_id: eigene_id,
            content: anfrage.content.clone(),
            message_type: anfrage.message_type,
            file_url: anfrage.file_url.clone(),
            file_name: anfrage.file_name.clone(),
            file_size: anfrage.file_size,
            reply_to: anfrage.reply_to,
            status: NachrichtenStatus::Sent,
            read_by: Vec::new(),
            created_at: Utc::now(),
        };
        self.nachrichten
            .entry(anfrage.chat_id)
            .or_default()
            .push(nachricht);
        self.ausstehend.insert(
            temp_id.into(),
            Ausstehend {
                chat_id: anfrage.chat_id,
                lokale_id,
            },
        );
        lokale_id
    }

    /// `message_sent`: ersetzt die optimistische Nachricht durch die des Servers
    ///
    /// Ohne passende `temp_id` wird die Nachricht wie `new_message` behandelt.
    pub fn bestaetigung_anwenden(&mut self, bestaetigung: &MessageSent) -> bool {
        let server = bestaetigung.message.clone();
        let Some(ausstehend) = bestaetigung
            .temp_id
            .as_ref()
            .and_then(|t| self.ausstehend.remove(t))
        else {
            return self.neue_nachricht_anwenden(server);
        };

        let liste = self.nachrichten.entry(ausstehend.chat_id).or_default();
        let schon_da = liste.iter().any(|n| n.id == server.id);
        match liste.iter().position(|n| n.id == ausstehend.lokale_id) {
            Some(pos) if schon_da => {
                liste.remove(pos);
            }
            Some(pos) => liste[pos] = server.clone(),
            None if !schon_da => liste.push(server.clone()),
            None => {}
        }
        let chat_id = server.chat_id;
        self.chat_aktualisieren(chat_id, |c| c.last_message = Some(server.clone()));
        true
    }

    /// Server hat die Nachricht abgelehnt: optimistischen Eintrag entfernen
    pub fn optimistisch_verwerfen(&mut self, temp_id: &str) -> Option<Nachricht> {
        let ausstehend = self.ausstehend.remove(temp_id)?;
        let liste = self.nachrichten.get_mut(&ausstehend.chat_id)?;
        let pos = liste.iter().position(|n| n.id == ausstehend.lokale_id)?;
        Some(liste.remove(pos))
    }

    pub fn ist_ausstehend(&self, message_id: MessageId) -> bool {
        self.ausstehend.values().any(|a| a.lokale_id == message_id)
    }

    // -----------------------------------------------------------------------
    // Tippen und Presence
    // -----------------------------------------------------------------------

    /// `user_typing`; ohne TTL, erst `is_typing: false` entfernt den Eintrag
    pub fn tippen_anwenden(&mut self, tippen: &UserTyping) -> bool {
        let menge = self.tippend.entry(tippen.chat_id).or_default();
        if tippen.is_typing {
            menge.insert(tippen.user_id)
        } else {
            menge.remove(&tippen.user_id)
        }
    }

    /// Tippende Benutzer eines Chats, sortiert
    pub fn tippende(&self, chat_id: ChatId) -> Vec<UserId> {
        let mut liste: Vec<UserId> = self
            .tippend
            .get(&chat_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        liste.sort();
        liste
    }

    /// Startzustand aus `connect_response`
    pub fn presence_initialisieren(&mut self, online: &[UserId]) {
        for eintrag in self.presence.values_mut() {
            eintrag.is_online = false;
        }
        for user_id in online {
            self.presence
                .entry(*user_id)
                .and_modify(|e| e.is_online = true)
                .or_insert(PresenceEintrag {
                    is_online: true,
                    last_seen: None,
                });
        }
    }

    pub fn online_anwenden(&mut self, user_id: UserId) {
        self.presence
            .entry(user_id)
            .and_modify(|e| e.is_online = true)
            .or_insert(PresenceEintrag {
                is_online: true,
                last_seen: None,
            });
    }

    pub fn offline_anwenden(&mut self, offline: &UserOffline) {
        self.presence.insert(
            offline.user_id,
            PresenceEintrag {
                is_online: false,
                last_seen: Some(offline.last_seen),
            },
        );
    }

    pub fn presence(&self, user_id: UserId) -> Option<PresenceEintrag> {
        self.presence.get(&user_id).copied()
    }

    pub fn ist_online(&self, user_id: UserId) -> bool {
        self.presence.get(&user_id).is_some_and(|p| p.is_online)
    }

    // -----------------------------------------------------------------------
    // Ereignisse
    // -----------------------------------------------------------------------

    /// Wendet ein Server-Ereignis an; gibt `true` zurueck wenn sich der Zustand geaendert hat
    ///
    /// Ereignisse ohne Bezug zum Store (Anrufe, Pings, Acks) werden ignoriert.
    pub fn ereignis_anwenden(&mut self, payload: &ControlPayload) -> bool {
        match payload {
            ControlPayload::ConnectResponse(ConnectResponse { online_users, .. }) => {
                self.presence_initialisieren(online_users);
                true
            }
            ControlPayload::NewMessage(n) => self.neue_nachricht_anwenden(n.clone()),
            ControlPayload::MessageSent(s) => self.bestaetigung_anwenden(s),
            ControlPayload::StatusUpdated(s) => self.status_anwenden(s),
            ControlPayload::UserTyping(t) => self.tippen_anwenden(t),
            ControlPayload::UserOnline(u) => {
                self.online_anwenden(u.user_id);
                true
            }
            ControlPayload::UserOffline(u) => {
                self.offline_anwenden(u);
                true
            }
            ControlPayload::Error(e) => {
                // Abgelehnte Nachricht: die temp_id steht in den Details
                let temp_id = e
                    .details
                    .as_ref()
                    .and_then(|d| d.get("temp_id"))
                    .and_then(|t| t.as_str());
                match temp_id {
                    Some(t) => self.optimistisch_verwerfen(t).is_some(),
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Setzt den gesamten Zustand zurueck (Abmelden)
    pub fn leeren(&mut self) {
        *self = Self::default();
    }
}

/// Vereinigt `neu` in `bestehend`, ein Eintrag pro Leser
fn lesebestaetigungen_mergen(
    bestehend: &mut Vec<Lesebestaetigung>,
    neu: &[Lesebestaetigung],
) -> bool {
    let mut geaendert = false;
    for eintrag in neu {
        if !bestehend.iter().any(|b| b.user_id == eintrag.user_id) {
            bestehend.push(eintrag.clone());
            geaendert = true;
        }
    }
    geaendert
}

/// Baut eine Textnachricht-Anfrage
pub fn textnachricht(chat_id: ChatId, content: impl Into<String>, temp_id: Option<String>) -> SendMessageRequest {
    SendMessageRequest {
        chat_id,
        content: content.into(),
        message_type: NachrichtenTyp::Text,
        file_url: None,
        file_name: None,
        file_size: None,
        reply_to: None,
        temp_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schnack_protocol::control::ErrorResponse;
    use schnack_protocol::ErrorCode;

    fn nachricht(chat_id: ChatId, sender: UserId) -> Nachricht {
        Nachricht {
            id: MessageId::new(),
            chat_id,
            sender_id: sender,
            content: "hallo".into(),
            message_type: NachrichtenTyp::Text,
            file_url: None,
            file_name: None,
            file_size: None,
            reply_to: None,
            status: NachrichtenStatus::Sent,
            read_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn chat(id: ChatId) -> ChatUebersicht {
        ChatUebersicht {
            id,
            name: None,
            is_group: false,
            participants: Vec::new(),
            last_message: None,
        }
    }

    fn status(n: &Nachricht, status: NachrichtenStatus, read_by: Option<Vec<Lesebestaetigung>>) -> StatusUpdated {
        StatusUpdated {
            message_id: n.id,
            chat_id: n.chat_id,
            status,
            read_by,
        }
    }

    #[test]
    fn neue_nachricht_ist_idempotent() {
        let mut store = ChatStore::neu();
        let n = nachricht(ChatId::new(), UserId::new());

        assert!(store.neue_nachricht_anwenden(n.clone()));
        assert!(!store.neue_nachricht_anwenden(n.clone()));
        assert_eq!(store.nachrichten(n.chat_id).len(), 1);
    }

    #[test]
    fn status_faellt_nie_zurueck() {
        let mut store = ChatStore::neu();
        let n = nachricht(ChatId::new(), UserId::new());
        store.neue_nachricht_anwenden(n.clone());
        let leser = Lesebestaetigung {
            user_id: UserId::new(),
            read_at: Utc::now(),
        };

        assert!(store.status_anwenden(&status(&n, NachrichtenStatus::Seen, Some(vec![leser.clone()]))));
        // Verspaetetes delivered nach seen
        assert!(!store.status_anwenden(&status(&n, NachrichtenStatus::Delivered, None)));

        let aktuell = store.nachricht(n.chat_id, n.id).unwrap();
        assert_eq!(aktuell.status, NachrichtenStatus::Seen);
        assert_eq!(aktuell.read_by, vec![leser]);
    }

    #[test]
    fn read_by_waechst_ohne_duplikate() {
        let mut store = ChatStore::neu();
        let n = nachricht(ChatId::new(), UserId::new());
        store.neue_nachricht_anwenden(n.clone());
        let a = Lesebestaetigung {
            user_id: UserId::new(),
            read_at: Utc::now(),
        };
        let b = Lesebestaetigung {
            user_id: UserId::new(),
            read_at: Utc::now(),
        };

        store.status_anwenden(&status(&n, NachrichtenStatus::Seen, Some(vec![a.clone()])));
        assert!(!store.status_anwenden(&status(&n, NachrichtenStatus::Seen, Some(vec![a.clone()]))));
        assert!(store.status_anwenden(&status(&n, NachrichtenStatus::Seen, Some(vec![a, b]))));
        assert_eq!(store.nachricht(n.chat_id, n.id).unwrap().read_by.len(), 2);
    }

    #[test]
    fn status_fuer_unbekannte_nachricht_wird_ignoriert() {
        let mut store = ChatStore::neu();
        let n = nachricht(ChatId::new(), UserId::new());
        assert!(!store.status_anwenden(&status(&n, NachrichtenStatus::Delivered, None)));
        assert!(store.nachrichten(n.chat_id).is_empty());
    }

    #[test]
    fn optimistische_nachricht_wird_abgeglichen() {
        let mut store = ChatStore::neu();
        let ich = UserId::new();
        let chat_id = ChatId::new();
        store.chats_setzen(vec![chat(chat_id)]);

        let anfrage = textnachricht(chat_id, "hallo", Some("t1".into()));
        let lokale_id = store.optimistisch_einfuegen(ich, "t1", &anfrage);
        assert!(store.ist_ausstehend(lokale_id));
        assert_eq!(store.nachrichten(chat_id).len(), 1);

        let mut server = nachricht(chat_id, ich);
        server.content = "hallo".into();
        assert!(store.bestaetigung_anwenden(&MessageSent {
            temp_id: Some("t1".into()),
            message: server.clone(),
        }));

        assert!(!store.ist_ausstehend(lokale_id));
        assert_eq!(store.nachrichten(chat_id), &[server.clone()]);
        assert_eq!(store.chats()[0].last_message.as_ref(), Some(&server));

        // Doppelte Zustellung derselben ID aendert nichts
        assert!(!store.neue_nachricht_anwenden(server));
    }

    #[test]
    fn abgelehnte_nachricht_wird_verworfen() {
        let mut store = ChatStore::neu();
        let chat_id = ChatId::new();
        let anfrage = textnachricht(chat_id, "x", Some("t2".into()));
        store.optimistisch_einfuegen(UserId::new(), "t2", &anfrage);

        let fehler = ControlPayload::Error(ErrorResponse {
            code: ErrorCode::Unauthorized,
            message: "nein".into(),
            details: Some(serde_json::json!({ "temp_id": "t2" })),
        });
        assert!(store.ereignis_anwenden(&fehler));
        assert!(store.nachrichten(chat_id).is_empty());
    }

    #[test]
    fn tippen_ohne_ttl() {
        let mut store = ChatStore::neu();
        let chat_id = ChatId::new();
        let (a, b) = (UserId::new(), UserId::new());
        let tippen = |user_id, is_typing| UserTyping {
            user_id,
            chat_id,
            is_typing,
        };

        assert!(store.tippen_anwenden(&tippen(a, true)));
        assert!(!store.tippen_anwenden(&tippen(a, true)));
        store.tippen_anwenden(&tippen(b, true));
        // false ohne vorheriges true ist ein No-op
        assert!(!store.tippen_anwenden(&tippen(UserId::new(), false)));

        let mut erwartet = vec![a, b];
        erwartet.sort();
        assert_eq!(store.tippende(chat_id), erwartet);

        store.tippen_anwenden(&tippen(a, false));
        assert_eq!(store.tippende(chat_id), vec![b]);
    }

    #[test]
    fn chat_liste_und_aktueller_chat() {
        let mut store = ChatStore::neu();
        let (c1, c2) = (ChatId::new(), ChatId::new());
        store.chats_setzen(vec![chat(c1)]);
        store.chat_hinzufuegen(chat(c2));
        store.chat_hinzufuegen(chat(c1));
        let ids: Vec<_> = store.chats().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![c1, c2]);

        store.aktuellen_chat_setzen(Some(chat(c2)));
        assert!(store.chat_aktualisieren(c2, |c| c.name = Some("Team".into())));
        assert_eq!(store.aktueller_chat().unwrap().name.as_deref(), Some("Team"));
        assert_eq!(store.chats()[1].name.as_deref(), Some("Team"));
        assert!(!store.chat_aktualisieren(ChatId::new(), |c| c.is_group = true));
    }

    #[test]
    fn nachrichten_setzen_aendern_entfernen() {
        let mut store = ChatStore::neu();
        let chat_id = ChatId::new();
        let n1 = nachricht(chat_id, UserId::new());
        let n2 = nachricht(chat_id, UserId::new());
        store.nachrichten_setzen(chat_id, vec![n1.clone(), n2.clone()]);

        assert!(store.nachricht_aktualisieren(chat_id, n1.id, |n| n.content = "neu".into()));
        assert_eq!(store.nachricht(chat_id, n1.id).unwrap().content, "neu");
        assert!(store.nachricht_entfernen(chat_id, n2.id));
        assert!(!store.nachricht_entfernen(chat_id, n2.id));
        assert_eq!(store.nachrichten(chat_id).len(), 1);
    }

    #[test]
    fn presence_ansicht() {
        let mut store = ChatStore::neu();
        let (a, b) = (UserId::new(), UserId::new());
        store.presence_initialisieren(&[a]);
        assert!(store.ist_online(a));
        assert!(!store.ist_online(b));

        store.online_anwenden(b);
        let jetzt = Utc::now();
        store.offline_anwenden(&UserOffline {
            user_id: a,
            last_seen: jetzt,
        });
        assert!(store.ist_online(b));
        assert_eq!(
            store.presence(a),
            Some(PresenceEintrag {
                is_online: false,
                last_seen: Some(jetzt)
            })
        );

        store.leeren();
        assert!(store.presence(b).is_none());
        assert!(store.chats().is_empty());
    }
}
