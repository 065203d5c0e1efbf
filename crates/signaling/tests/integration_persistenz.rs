//! Integration-Tests: Verhalten des Relays wenn der Store Schreibzugriffe ablehnt
//!
//! `StoerStore` reicht alles an eine In-Memory-SQLite weiter und laesst
//! gezielt `create` fuer Nachrichten oder `gelesen_markieren` scheitern.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use schnack_auth::SessionStore;
use schnack_core::{ChatId, MessageId, Nachricht, NachrichtenStatus, UserId};
use schnack_db::{
    BenutzerRecord, ChatRecord, ChatRepository, DbError, DbResult, LeseErgebnis,
    MessageRepository, NeueNachricht, NeuerBenutzer, NeuerChat, SqliteDb, UserRepository,
};
use schnack_observability::SchnackMetrics;
use schnack_protocol::control::{ChatRef, MessageSeenRequest, SendMessageRequest};
use schnack_protocol::{ControlMessage, ControlPayload, ErrorCode};
use schnack_signaling::{ClientHandle, MessageDispatcher, SchnackState, SignalingConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// StoerStore
// ---------------------------------------------------------------------------

struct StoerStore {
    db: SqliteDb,
    nachrichten_ablehnen: AtomicBool,
    lesen_begrenzt: AtomicBool,
    /// Verbleibende erfolgreiche `gelesen_markieren`-Aufrufe wenn begrenzt
    lesen_rest: AtomicU32,
}

impl StoerStore {
    fn neu(db: SqliteDb) -> Self {
        Self {
            db,
            nachrichten_ablehnen: AtomicBool::new(false),
            lesen_begrenzt: AtomicBool::new(false),
            lesen_rest: AtomicU32::new(0),
        }
    }

    fn nachrichten_ablehnen(&self, ablehnen: bool) {
        self.nachrichten_ablehnen.store(ablehnen, Ordering::SeqCst);
    }

    /// Nach `erfolge` weiteren Lesebestaetigungen scheitert jede folgende
    fn lesen_begrenzen(&self, erfolge: Option<u32>) {
        self.lesen_rest.store(erfolge.unwrap_or(0), Ordering::SeqCst);
        self.lesen_begrenzt.store(erfolge.is_some(), Ordering::SeqCst);
    }

    fn lesen_erlaubt(&self) -> bool {
        if !self.lesen_begrenzt.load(Ordering::SeqCst) {
            return true;
        }
        self.lesen_rest
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl UserRepository for StoerStore {
    async fn create(&self, data: NeuerBenutzer<'_>) -> DbResult<BenutzerRecord> {
        UserRepository::create(&self.db, data).await
    }

    async fn get_by_id(&self, id: UserId) -> DbResult<Option<BenutzerRecord>> {
        UserRepository::get_by_id(&self.db, id).await
    }

    async fn presence_speichern(
        &self,
        id: UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        self.db.presence_speichern(id, is_online, last_seen).await
    }
}

impl ChatRepository for StoerStore {
    async fn create(&self, data: NeuerChat<'_>) -> DbResult<ChatRecord> {
        ChatRepository::create(&self.db, data).await
    }

    async fn get_by_id(&self, id: ChatId) -> DbResult<Option<ChatRecord>> {
        ChatRepository::get_by_id(&self.db, id).await
    }

    async fn ist_teilnehmer(&self, chat_id: ChatId, user_id: UserId) -> DbResult<bool> {
        self.db.ist_teilnehmer(chat_id, user_id).await
    }

    async fn teilnehmer(&self, chat_id: ChatId) -> DbResult<Vec<UserId>> {
        self.db.teilnehmer(chat_id).await
    }
}

impl MessageRepository for StoerStore {
    async fn create(&self, data: NeueNachricht<'_>) -> DbResult<Nachricht> {
        if self.nachrichten_ablehnen.load(Ordering::SeqCst) {
            return Err(DbError::intern("Schreibzugriff abgelehnt"));
        }
        MessageRepository::create(&self.db, data).await
    }

    async fn get_by_id(&self, id: MessageId) -> DbResult<Option<Nachricht>> {
        MessageRepository::get_by_id(&self.db, id).await
    }

    async fn als_zugestellt_markieren(&self, id: MessageId) -> DbResult<bool> {
        self.db.als_zugestellt_markieren(id).await
    }

    async fn gelesen_markieren(
        &self,
        id: MessageId,
        leser: UserId,
        zeitpunkt: DateTime<Utc>,
    ) -> DbResult<LeseErgebnis> {
        if !self.lesen_erlaubt() {
            return Err(DbError::intern("Lesebestaetigung abgelehnt"));
        }
        self.db.gelesen_markieren(id, leser, zeitpunkt).await
    }

    async fn ungelesene_fuer(&self, chat_id: ChatId, leser: UserId) -> DbResult<Vec<MessageId>> {
        self.db.ungelesene_fuer(chat_id, leser).await
    }
}

// ---------------------------------------------------------------------------
// Hilfen
// ---------------------------------------------------------------------------

struct Umgebung {
    store: Arc<StoerStore>,
    state: Arc<SchnackState<StoerStore>>,
    dispatcher: MessageDispatcher<StoerStore>,
    chat: ChatId,
    alice: UserId,
    bob: UserId,
}

async fn umgebung() -> Umgebung {
    let db = SqliteDb::in_memory().await.expect("DB");
    let alice = UserRepository::create(&db, NeuerBenutzer { username: "alice" })
        .await
        .expect("Benutzer")
        .id;
    let bob = UserRepository::create(&db, NeuerBenutzer { username: "bob" })
        .await
        .expect("Benutzer")
        .id;
    let chat = ChatRepository::create(
        &db,
        NeuerChat {
            name: None,
            is_group: false,
            admin_id: None,
            participants: &[alice, bob],
        },
    )
    .await
    .expect("Chat")
    .id;

    let store = Arc::new(StoerStore::neu(db));
    let state = SchnackState::neu(
        SignalingConfig::default(),
        Arc::clone(&store),
        SessionStore::neu(),
        SchnackMetrics::neu().expect("Metriken"),
    );
    Umgebung {
        dispatcher: MessageDispatcher::neu(Arc::clone(&state)),
        store,
        state,
        chat,
        alice,
        bob,
    }
}

/// Registriert eine Verbindung und laesst sie dem Chat-Raum beitreten
async fn im_raum(u: &Umgebung, user_id: UserId) -> (ClientHandle, mpsc::Receiver<ControlMessage>) {
    let (tx, rx) = mpsc::channel(32);
    let handle = ClientHandle::neu(
        user_id,
        tx,
        CancellationToken::new(),
        u.state.metriken.clone(),
    );
    u.state.registry.registrieren(handle.clone());
    let antwort = senden(u, &handle, ControlPayload::JoinChat(ChatRef { chat_id: u.chat })).await;
    assert!(matches!(
        antwort.map(|a| a.payload),
        Some(ControlPayload::JoinChatResponse(_))
    ));
    (handle, rx)
}

async fn senden(u: &Umgebung, handle: &ClientHandle, payload: ControlPayload) -> Option<ControlMessage> {
    u.dispatcher
        .dispatch(ControlMessage::new(11, payload), handle)
        .await
}

fn text(chat_id: ChatId, temp_id: Option<&str>) -> ControlPayload {
    ControlPayload::SendMessage(SendMessageRequest {
        chat_id,
        content: "hallo".into(),
        message_type: Default::default(),
        file_url: None,
        file_name: None,
        file_size: None,
        reply_to: None,
        temp_id: temp_id.map(str::to_string),
    })
}

async fn nachricht_von(u: &Umgebung, handle: &ClientHandle) -> MessageId {
    match senden(u, handle, text(u.chat, None)).await.map(|a| a.payload) {
        Some(ControlPayload::MessageSent(s)) => s.message.id,
        anderes => panic!("message_sent erwartet, erhalten: {anderes:?}"),
    }
}

fn leeren(rx: &mut mpsc::Receiver<ControlMessage>) {
    while rx.try_recv().is_ok() {}
}

fn status_ereignisse(rx: &mut mpsc::Receiver<ControlMessage>) -> Vec<MessageId> {
    let mut ids = Vec::new();
    while let Ok(ereignis) = rx.try_recv() {
        if let ControlPayload::StatusUpdated(s) = ereignis.payload {
            assert_eq!(s.status, NachrichtenStatus::Seen);
            ids.push(s.message_id);
        }
    }
    ids
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gescheiterte_nachricht_wird_nicht_verteilt() {
    let u = umgebung().await;
    let (ha, mut rxa) = im_raum(&u, u.alice).await;
    let (_hb, mut rxb) = im_raum(&u, u.bob).await;
    leeren(&mut rxa);
    leeren(&mut rxb);

    u.store.nachrichten_ablehnen(true);
    let antwort = senden(&u, &ha, text(u.chat, Some("tmp-db"))).await;
    match antwort.map(|a| a.payload) {
        Some(ControlPayload::Error(e)) => {
            assert_eq!(e.code, ErrorCode::PersistenceFailed);
            assert_eq!(e.details, Some(serde_json::json!({ "temp_id": "tmp-db" })));
        }
        anderes => panic!("Fehler erwartet, erhalten: {anderes:?}"),
    }

    assert!(rxb.try_recv().is_err(), "ohne Persistenz kein new_message");
    assert!(rxa.try_recv().is_err());
    assert_eq!(u.state.metriken.messages_total.get(), 0);

    // Nach Erholung des Stores geht es normal weiter
    u.store.nachrichten_ablehnen(false);
    nachricht_von(&u, &ha).await;
    assert!(matches!(
        rxb.try_recv().map(|e| e.payload),
        Ok(ControlPayload::NewMessage(_))
    ));
}

#[tokio::test]
async fn gescheitertes_seen_wird_nicht_verteilt() {
    let u = umgebung().await;
    let (ha, mut rxa) = im_raum(&u, u.alice).await;
    let (hb, mut rxb) = im_raum(&u, u.bob).await;
    let message_id = nachricht_von(&u, &ha).await;
    leeren(&mut rxa);
    leeren(&mut rxb);

    u.store.lesen_begrenzen(Some(0));
    let antwort = senden(
        &u,
        &hb,
        ControlPayload::MessageSeen(MessageSeenRequest {
            message_id,
            chat_id: u.chat,
        }),
    )
    .await;
    match antwort.map(|a| a.payload) {
        Some(ControlPayload::Error(e)) => assert_eq!(e.code, ErrorCode::PersistenceFailed),
        anderes => panic!("Fehler erwartet, erhalten: {anderes:?}"),
    }
    assert!(rxa.try_recv().is_err(), "ohne Persistenz kein status_updated");
    assert!(rxb.try_recv().is_err());
}

#[tokio::test]
async fn chat_als_gelesen_verteilt_bereits_persistierte_aenderungen() {
    let u = umgebung().await;
    let (ha, mut rxa) = im_raum(&u, u.alice).await;
    let (hb, mut rxb) = im_raum(&u, u.bob).await;
    let m1 = nachricht_von(&u, &ha).await;
    let m2 = nachricht_von(&u, &ha).await;
    leeren(&mut rxa);
    leeren(&mut rxb);

    // Die erste Lesebestaetigung gelingt, die zweite scheitert
    u.store.lesen_begrenzen(Some(1));
    let antwort = senden(&u, &hb, ControlPayload::MarkChatRead(ChatRef { chat_id: u.chat })).await;
    match antwort.map(|a| a.payload) {
        Some(ControlPayload::Error(e)) => {
            assert_eq!(e.code, ErrorCode::PersistenceFailed);
            assert_eq!(e.details, Some(serde_json::json!({ "updated": 1 })));
        }
        anderes => panic!("Fehler erwartet, erhalten: {anderes:?}"),
    }

    let verteilt = status_ereignisse(&mut rxa);
    assert_eq!(verteilt.len(), 1, "die persistierte Aenderung erreicht den Raum");
    assert!(verteilt[0] == m1 || verteilt[0] == m2);
    assert_eq!(status_ereignisse(&mut rxb), verteilt);

    // Erneuter Versuch erledigt nur noch den Rest
    u.store.lesen_begrenzen(None);
    match senden(&u, &hb, ControlPayload::MarkChatRead(ChatRef { chat_id: u.chat }))
        .await
        .map(|a| a.payload)
    {
        Some(ControlPayload::MarkChatReadResponse(r)) => assert_eq!(r.updated, 1),
        anderes => panic!("mark_chat_read_response erwartet, erhalten: {anderes:?}"),
    }
    let rest = status_ereignisse(&mut rxa);
    assert_eq!(rest.len(), 1);
    assert_ne!(rest[0], verteilt[0]);
    assert_eq!(
        u.state
            .metriken
            .status_transitions_total
            .with_label_values(&["seen"])
            .get(),
        2
    );
}
