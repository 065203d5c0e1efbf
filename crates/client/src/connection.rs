//! Client-seitige TCP-Verbindung zum Schnack-Relay
//!
//! Nutzt den FrameCodec aus schnack-protocol fuer das Wire-Format
//! (u32 BE length + JSON payload). Alle Operationen sind async.
//!
//! Antworten und Ereignisse teilen sich eine Verbindung. Waehrend auf die
//! Antwort zu einer Anfrage gewartet wird, landen Ereignisse in einem
//! Puffer und werden spaeter von `ereignis_empfangen` geliefert. Pings des
//! Servers werden automatisch beantwortet.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use schnack_core::{ChatId, ConnectionId, MessageId, UserId};
use schnack_protocol::control::{
    CallSignal, ChatRef, ConnectRequest, ConnectResponse, ErrorResponse, JoinChatResponse,
    MessageDeliveredRequest, MessageSeenRequest, MessageSent, SendMessageRequest, TypingRequest,
};
use schnack_protocol::{CallSignalArt, ControlMessage, ControlPayload, FrameCodec};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use crate::error::{ClientError, ClientResult};
use crate::store::ChatStore;

// ---------------------------------------------------------------------------
// ServerConnection
// ---------------------------------------------------------------------------

/// Authentifizierte TCP-Verbindung zum Relay
pub struct ServerConnection {
    framed: Framed<TcpStream, FrameCodec>,
    /// Ereignisse, die waehrend einer Anfrage eingetroffen sind
    ereignisse: VecDeque<ControlMessage>,
    /// Monoton steigender Request-ID Zaehler (0 ist fuer Ereignisse reserviert)
    next_request_id: AtomicU32,
    user_id: UserId,
    connection_id: ConnectionId,
}

impl ServerConnection {
    /// Baut die Verbindung auf und authentifiziert sie mit dem Bearer-Token
    ///
    /// Ein ungueltiges Token ergibt `ClientError::Server` mit `AUTH_REQUIRED`.
    pub async fn verbinden(
        addr: impl ToSocketAddrs,
        token: &str,
    ) -> ClientResult<(Self, ConnectResponse)> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        tracing::info!(server = %peer, "TCP-Verbindung hergestellt");

        let mut verbindung = Self {
            framed: Framed::new(stream, FrameCodec::new()),
            ereignisse: VecDeque::new(),
            next_request_id: AtomicU32::new(1),
            user_id: UserId::default(),
            connection_id: ConnectionId::default(),
        };

        let antwort = verbindung
            .anfrage(ControlPayload::Connect(ConnectRequest {
                token: token.to_string(),
                client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }))
            .await?;

        match antwort {
            ControlPayload::ConnectResponse(r) => {
                verbindung.user_id = r.user_id;
                verbindung.connection_id = r.connection_id;
                tracing::info!(user_id = %r.user_id, "Verbindung authentifiziert");
                Ok((verbindung, r))
            }
            other => Err(unerwartet("ConnectResponse", &other)),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Generiert die naechste Request-ID
    pub fn next_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sendet einen Befehl ohne auf eine Antwort zu warten
    ///
    /// Fuer Befehle ohne Antwort bei Erfolg (Tippen, Anruf-Signale). Ein
    /// spaeterer Fehler kommt als Ereignis mit der zurueckgegebenen Request-ID.
    pub async fn senden(&mut self, payload: ControlPayload) -> ClientResult<u32> {
        let request_id = self.next_id();
        self.framed
            .send(ControlMessage::new(request_id, payload))
            .await?;
        Ok(request_id)
    }

    /// Sendet einen Befehl und wartet auf die zugehoerige Antwort
    ///
    /// Fehler-Antworten werden zu `ClientError::Server`.
    pub async fn anfrage(&mut self, payload: ControlPayload) -> ClientResult<ControlPayload> {
        let request_id = self.senden(payload).await?;

        loop {
            let nachricht = self.frame_lesen().await?;
            if nachricht.request_id == request_id {
                return match nachricht.payload {
                    ControlPayload::Error(ErrorResponse {
                        code,
                        message,
                        details,
                    }) => Err(ClientError::Server {
                        code,
                        message,
                        details,
                    }),
                    payload => Ok(payload),
                };
            }
            self.ereignisse.push_back(nachricht);
        }
    }

    /// Naechstes Ereignis (zuerst aus dem Puffer)
    pub async fn ereignis_empfangen(&mut self) -> ClientResult<ControlMessage> {
        if let Some(nachricht) = self.ereignisse.pop_front() {
            return Ok(nachricht);
        }
        self.frame_lesen().await
    }

    /// Wie `ereignis_empfangen`, aber `None` wenn in `dauer` nichts eintrifft
    pub async fn ereignis_mit_timeout(
        &mut self,
        dauer: Duration,
    ) -> ClientResult<Option<ControlMessage>> {
        match tokio::time::timeout(dauer, self.ereignis_empfangen()).await {
            Ok(ergebnis) => ergebnis.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Empfaengt das naechste Ereignis und wendet es auf den Store an
    pub async fn ereignis_in_store(&mut self, store: &mut ChatStore) -> ClientResult<ControlMessage> {
        let nachricht = self.ereignis_empfangen().await?;
        store.ereignis_anwenden(&nachricht.payload);
        Ok(nachricht)
    }

    /// Liest ein Frame; Server-Pings werden beantwortet und uebersprungen
    async fn frame_lesen(&mut self) -> ClientResult<ControlMessage> {
        loop {
            match self.framed.next().await {
                Some(Ok(nachricht)) => {
                    if let ControlPayload::Ping(ref ping) = nachricht.payload {
                        let pong =
                            ControlMessage::pong(nachricht.request_id, ping.timestamp_ms, jetzt_ms());
                        self.framed.send(pong).await?;
                        continue;
                    }
                    return Ok(nachricht);
                }
                Some(Err(e)) => return Err(ClientError::Io(e)),
                None => return Err(ClientError::VerbindungGetrennt),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Befehle
    // -----------------------------------------------------------------------

    pub async fn chat_beitreten(&mut self, chat_id: ChatId) -> ClientResult<JoinChatResponse> {
        match self
            .anfrage(ControlPayload::JoinChat(ChatRef { chat_id }))
            .await?
        {
            ControlPayload::JoinChatResponse(r) => Ok(r),
            other => Err(unerwartet("JoinChatResponse", &other)),
        }
    }

    pub async fn chat_verlassen(&mut self, chat_id: ChatId) -> ClientResult<()> {
        self.ack_erwarten(ControlPayload::LeaveChat(ChatRef { chat_id }))
            .await
    }

    pub async fn nachricht_senden(&mut self, anfrage: SendMessageRequest) -> ClientResult<MessageSent> {
        match self.anfrage(ControlPayload::SendMessage(anfrage)).await? {
            ControlPayload::MessageSent(s) => Ok(s),
            other => Err(unerwartet("MessageSent", &other)),
        }
    }

    pub async fn zugestellt_melden(&mut self, message_id: MessageId) -> ClientResult<()> {
        self.ack_erwarten(ControlPayload::MessageDelivered(MessageDeliveredRequest {
            message_id,
        }))
        .await
    }

    pub async fn gelesen_melden(&mut self, message_id: MessageId, chat_id: ChatId) -> ClientResult<()> {
        self.ack_erwarten(ControlPayload::MessageSeen(MessageSeenRequest {
            message_id,
            chat_id,
        }))
        .await
    }

    /// Markiert den ganzen Chat als gelesen; gibt die Anzahl der Aenderungen zurueck
    pub async fn chat_gelesen_melden(&mut self, chat_id: ChatId) -> ClientResult<u32> {
        match self
            .anfrage(ControlPayload::MarkChatRead(ChatRef { chat_id }))
            .await?
        {
            ControlPayload::MarkChatReadResponse(r) => Ok(r.updated),
            other => Err(unerwartet("MarkChatReadResponse", &other)),
        }
    }

    pub async fn tippen(&mut self, chat_id: ChatId, is_typing: bool) -> ClientResult<u32> {
        self.senden(ControlPayload::Typing(TypingRequest { chat_id, is_typing }))
            .await
    }

    /// Sendet ein Anruf-Signal; `from_user` setzt der Relay
    pub async fn anruf_signal(
        &mut self,
        art: CallSignalArt,
        chat_id: ChatId,
        data: serde_json::Value,
    ) -> ClientResult<u32> {
        self.senden(art.payload(CallSignal {
            chat_id,
            from_user: None,
            data,
        }))
        .await
    }

    /// Schliesst die Verbindung sauber
    pub async fn trennen(mut self) -> ClientResult<()> {
        self.framed.close().await?;
        tracing::info!(user_id = %self.user_id, "Verbindung getrennt");
        Ok(())
    }

    async fn ack_erwarten(&mut self, payload: ControlPayload) -> ClientResult<()> {
        match self.anfrage(payload).await? {
            ControlPayload::Ack => Ok(()),
            other => Err(unerwartet("Ack", &other)),
        }
    }
}

fn unerwartet(erwartet: &str, erhalten: &ControlPayload) -> ClientError {
    ClientError::UnerwarteteAntwort(format!("Erwartet {erwartet}, erhalten: {erhalten:?}"))
}

fn jetzt_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
