//! Control-Protokoll (TCP)
//!
//! Definiert den vollstaendigen Ereigniskatalog der zwischen Client und Relay
//! ueber die persistente Verbindung ausgetauscht wird.
//!
//! ## Design
//! - Request/Response Pattern: jede Nachricht hat eine `request_id: u32`.
//!   Server-initiierte Ereignisse (Broadcasts) tragen `request_id = 0`.
//! - JSON-Serialisierung via serde
//! - Geschlossenes Tagged Enum: jede Ereignisart ist eine Variante,
//!   der Dispatcher matcht erschoepfend darauf

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use schnack_core::{
    ChatId, ConnectionId, Lesebestaetigung, MessageId, Nachricht, NachrichtenStatus,
    NachrichtenTyp, SchnackError, UserId,
};

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Kein oder ungueltiges Token, Verbindung wird abgelehnt
    AuthRequired,
    /// Unbekannte Nachricht oder unbekannter Chat
    NotFound,
    /// Akteur ist kein Teilnehmer des Ziel-Raums
    Unauthorized,
    InvalidRequest,
    /// Schreiben in den Store fehlgeschlagen, es wurde nichts verteilt
    PersistenceFailed,
    InternalError,
}

impl From<&SchnackError> for ErrorCode {
    fn from(e: &SchnackError) -> Self {
        match e {
            SchnackError::AuthErforderlich(_) => Self::AuthRequired,
            SchnackError::NichtGefunden(_) => Self::NotFound,
            SchnackError::NichtBerechtigt(_) => Self::Unauthorized,
            SchnackError::UngueltigeAnfrage(_) => Self::InvalidRequest,
            SchnackError::Persistenz(_) => Self::PersistenceFailed,
        }
    }
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    /// Optionale maschinenlesbare Details (z.B. die temp_id einer fehlgeschlagenen Nachricht)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Verbindungsaufbau
// ---------------------------------------------------------------------------

/// Erste Nachricht jeder Verbindung: Bearer-Token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub token: String,
    #[serde(default)]
    pub client_version: Option<String>,
}

/// Erfolgreicher Verbindungsaufbau
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    /// Momentan verbundene Benutzer (Startzustand fuer die Presence-Ansicht)
    pub online_users: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Raeume
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRef {
    pub chat_id: ChatId,
}

/// Bestaetigung des Raum-Beitritts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinChatResponse {
    pub chat_id: ChatId,
    /// Benutzer die den Raum gerade abonniert haben
    pub occupants: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Nachrichten und Zustellstatus
// ---------------------------------------------------------------------------

/// Neue Nachricht senden
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: ChatId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: NachrichtenTyp,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    /// Temporaere Client-ID der optimistisch eingefuegten Nachricht
    #[serde(default)]
    pub temp_id: Option<String>,
}

/// Quittung an den Absender mit der vom Server vergebenen ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSent {
    #[serde(default)]
    pub temp_id: Option<String>,
    pub message: Nachricht,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeliveredRequest {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSeenRequest {
    pub message_id: MessageId,
    pub chat_id: ChatId,
}

/// Antwort auf `mark_chat_read`: Anzahl der tatsaechlich geaenderten Nachrichten
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkChatReadResponse {
    pub chat_id: ChatId,
    pub updated: u32,
}

/// Statusaenderung einer Nachricht (an den ganzen Raum)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdated {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub status: NachrichtenStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_by: Option<Vec<Lesebestaetigung>>,
}

// ---------------------------------------------------------------------------
// Typing und Presence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingRequest {
    pub chat_id: ChatId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTyping {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOnline {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOffline {
    pub user_id: UserId,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Anruf-Signalisierung
// ---------------------------------------------------------------------------

/// Ein Anruf-Signal (Invite, Offer, Answer, ICE, Reject, End)
///
/// Der Relay interpretiert `data` nicht. `from_user` wird serverseitig
/// mit der authentifizierten Identitaet des Absenders ueberschrieben.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSignal {
    pub chat_id: ChatId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user: Option<UserId>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Art eines Anruf-Signals, fuer Logging und Metriken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSignalArt {
    Invite,
    Offer,
    Answer,
    IceCandidate,
    Reject,
    End,
}

impl CallSignalArt {
    pub fn als_str(self) -> &'static str {
        match self {
            Self::Invite => "call_invite",
            Self::Offer => "call_offer",
            Self::Answer => "call_answer",
            Self::IceCandidate => "call_ice_candidate",
            Self::Reject => "call_reject",
            Self::End => "call_end",
        }
    }

    /// Baut die passende Payload-Variante fuer diese Signalart
    pub fn payload(self, signal: CallSignal) -> ControlPayload {
        match self {
            Self::Invite => ControlPayload::CallInvite(signal),
            Self::Offer => ControlPayload::CallOffer(signal),
            Self::Answer => ControlPayload::CallAnswer(signal),
            Self::IceCandidate => ControlPayload::CallIceCandidate(signal),
            Self::Reject => ControlPayload::CallReject(signal),
            Self::End => ControlPayload::CallEnd(signal),
        }
    }
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Ping (Client -> Server oder Server -> Client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub echo_timestamp_ms: u64,
    pub server_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Haupt-Enum
// ---------------------------------------------------------------------------

/// Alle moeglichen Ereignisse (typsicher via Tagged Enum)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPayload {
    // Verbindungsaufbau
    Connect(ConnectRequest),
    ConnectResponse(ConnectResponse),

    // Raeume (C->S)
    JoinChat(ChatRef),
    JoinChatResponse(JoinChatResponse),
    LeaveChat(ChatRef),

    // Nachrichten
    SendMessage(SendMessageRequest),
    MessageSent(MessageSent),
    NewMessage(Nachricht),
    MessageDelivered(MessageDeliveredRequest),
    MessageSeen(MessageSeenRequest),
    MarkChatRead(ChatRef),
    MarkChatReadResponse(MarkChatReadResponse),
    StatusUpdated(StatusUpdated),

    // Typing / Presence
    Typing(TypingRequest),
    UserTyping(UserTyping),
    UserOnline(UserOnline),
    UserOffline(UserOffline),

    // Anrufe (bidirektional)
    CallInvite(CallSignal),
    CallOffer(CallSignal),
    CallAnswer(CallSignal),
    CallIceCandidate(CallSignal),
    CallReject(CallSignal),
    CallEnd(CallSignal),

    /// Generische Bestaetigung fuer Befehle ohne eigene Antwort
    Ack,

    // Keepalive
    Ping(PingMessage),
    Pong(PongMessage),

    Error(ErrorResponse),
}

impl ControlPayload {
    /// Zerlegt ein Anruf-Signal in Art und Inhalt
    pub fn als_call_signal(&self) -> Option<(CallSignalArt, &CallSignal)> {
        match self {
            Self::CallInvite(s) => Some((CallSignalArt::Invite, s)),
            Self::CallOffer(s) => Some((CallSignalArt::Offer, s)),
            Self::CallAnswer(s) => Some((CallSignalArt::Answer, s)),
            Self::CallIceCandidate(s) => Some((CallSignalArt::IceCandidate, s)),
            Self::CallReject(s) => Some((CallSignalArt::Reject, s)),
            Self::CallEnd(s) => Some((CallSignalArt::End, s)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Control-Frame (Umschlag fuer alle Nachrichten)
// ---------------------------------------------------------------------------

/// Request-ID fuer serverinitiierte Ereignisse
pub const EREIGNIS_REQUEST_ID: u32 = 0;

/// Protokoll-Nachricht mit Request/Response-Zuordnung
///
/// Der Client vergibt die `request_id`, der Server kopiert sie in die
/// Antwort. Broadcasts tragen [`EREIGNIS_REQUEST_ID`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    pub request_id: u32,
    pub payload: ControlPayload,
}

impl ControlMessage {
    pub fn new(request_id: u32, payload: ControlPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Serverinitiiertes Ereignis ohne Bezug zu einer Anfrage
    pub fn ereignis(payload: ControlPayload) -> Self {
        Self::new(EREIGNIS_REQUEST_ID, payload)
    }

    pub fn ping(request_id: u32, timestamp_ms: u64) -> Self {
        Self::new(request_id, ControlPayload::Ping(PingMessage { timestamp_ms }))
    }

    pub fn pong(request_id: u32, echo_timestamp_ms: u64, server_timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            ControlPayload::Pong(PongMessage {
                echo_timestamp_ms,
                server_timestamp_ms,
            }),
        )
    }

    pub fn ack(request_id: u32) -> Self {
        Self::new(request_id, ControlPayload::Ack)
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ControlPayload::Error(ErrorResponse {
                code,
                message: message.into(),
                details: None,
            }),
        )
    }

    /// Erstellt eine Fehler-Antwort aus einem Relay-Fehler
    pub fn fehler(request_id: u32, e: &SchnackError) -> Self {
        Self::error(request_id, ErrorCode::from(e), e.to_string())
    }

    /// Haengt maschinenlesbare Details an eine Fehler-Antwort
    pub fn mit_details(mut self, details: serde_json::Value) -> Self {
        if let ControlPayload::Error(ref mut e) = self.payload {
            e.details = Some(details);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ereignisnamen_auf_dem_draht() {
        let chat_id = ChatId::new();
        let faelle = [
            (ControlPayload::JoinChat(ChatRef { chat_id }), "join_chat"),
            (ControlPayload::LeaveChat(ChatRef { chat_id }), "leave_chat"),
            (ControlPayload::MarkChatRead(ChatRef { chat_id }), "mark_chat_read"),
            (
                ControlPayload::Typing(TypingRequest {
                    chat_id,
                    is_typing: true,
                }),
                "typing",
            ),
            (
                ControlPayload::CallIceCandidate(CallSignal {
                    chat_id,
                    from_user: None,
                    data: serde_json::Value::Null,
                }),
                "call_ice_candidate",
            ),
            (ControlPayload::Ack, "ack"),
        ];
        for (payload, name) in faelle {
            let json = serde_json::to_value(ControlMessage::new(1, payload)).unwrap();
            assert_eq!(json["payload"]["type"], name);
        }
    }

    #[test]
    fn send_message_vom_client_mit_minimalen_feldern() {
        let chat_id = ChatId::new();
        let json = serde_json::json!({
            "request_id": 7,
            "payload": {
                "type": "send_message",
                "chat_id": chat_id,
                "content": "hi",
                "temp_id": "t1"
            }
        });
        let msg: ControlMessage = serde_json::from_value(json).unwrap();
        match msg.payload {
            ControlPayload::SendMessage(req) => {
                assert_eq!(req.chat_id, chat_id);
                assert_eq!(req.content, "hi");
                assert_eq!(req.message_type, NachrichtenTyp::Text);
                assert_eq!(req.temp_id.as_deref(), Some("t1"));
                assert!(req.reply_to.is_none());
            }
            andere => panic!("Erwartet SendMessage, erhalten {andere:?}"),
        }
    }

    #[test]
    fn new_message_traegt_nachricht_flach() {
        let n = Nachricht {
            id: MessageId::new(),
            chat_id: ChatId::new(),
            sender_id: UserId::new(),
            content: "hallo".into(),
            message_type: NachrichtenTyp::Image,
            file_url: Some("https://cdn/x.png".into()),
            file_name: None,
            file_size: None,
            reply_to: None,
            status: NachrichtenStatus::Sent,
            read_by: vec![],
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(ControlMessage::ereignis(ControlPayload::NewMessage(
            n.clone(),
        )))
        .unwrap();
        assert_eq!(json["request_id"], 0);
        assert_eq!(json["payload"]["type"], "new_message");
        assert_eq!(json["payload"]["status"], "sent");
        assert_eq!(json["payload"]["message_type"], "image");

        let zurueck: ControlMessage = serde_json::from_value(json).unwrap();
        match zurueck.payload {
            ControlPayload::NewMessage(m) => assert_eq!(m, n),
            andere => panic!("Erwartet NewMessage, erhalten {andere:?}"),
        }
    }

    #[test]
    fn status_updated_ohne_read_by_laesst_feld_weg() {
        let update = StatusUpdated {
            message_id: MessageId::new(),
            chat_id: ChatId::new(),
            status: NachrichtenStatus::Delivered,
            read_by: None,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("read_by").is_none());
        assert_eq!(json["status"], "delivered");
    }

    #[test]
    fn fehlercodes_aus_relay_fehlern() {
        let msg = ControlMessage::fehler(3, &SchnackError::NichtGefunden("msg".into()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"]["type"], "error");
        assert_eq!(json["payload"]["code"], "NOT_FOUND");

        assert_eq!(
            ErrorCode::from(&SchnackError::AuthErforderlich("x".into())),
            ErrorCode::AuthRequired
        );
        assert_eq!(
            ErrorCode::from(&SchnackError::Persistenz("x".into())),
            ErrorCode::PersistenceFailed
        );
    }

    #[test]
    fn fehler_details_werden_angehaengt() {
        let msg = ControlMessage::error(9, ErrorCode::InvalidRequest, "leer")
            .mit_details(serde_json::json!({ "temp_id": "t9" }));
        match msg.payload {
            ControlPayload::Error(e) => {
                assert_eq!(e.details.unwrap()["temp_id"], "t9");
            }
            andere => panic!("Erwartet Error, erhalten {andere:?}"),
        }
    }

    #[test]
    fn call_signal_art_baut_richtige_variante() {
        let signal = CallSignal {
            chat_id: ChatId::new(),
            from_user: Some(UserId::new()),
            data: serde_json::json!({ "sdp": "v=0" }),
        };
        let payload = CallSignalArt::Answer.payload(signal.clone());
        let (art, inhalt) = payload.als_call_signal().unwrap();
        assert_eq!(art, CallSignalArt::Answer);
        assert_eq!(inhalt, &signal);
        assert!(ControlPayload::Ack.als_call_signal().is_none());
    }
}
