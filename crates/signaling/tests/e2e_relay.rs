//! End-to-End-Tests: Relay auf 127.0.0.1:0, Clients ueber schnack-client
//!
//! Relay und Clients laufen im selben Test-Task. Der Relay-Future (mit
//! seiner LocalSet) und das Szenario werden gemeinsam in einem
//! `tokio::select!` gepollt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use schnack_auth::SessionStore;
use schnack_client::{textnachricht, ChatStore, ClientError, ServerConnection};
use schnack_core::{ChatId, NachrichtenStatus, UserId};
use schnack_db::{ChatRepository, NeuerBenutzer, NeuerChat, SqliteDb, UserRepository};
use schnack_observability::SchnackMetrics;
use schnack_protocol::{ControlPayload, ErrorCode};
use schnack_signaling::{SchnackState, SignalingConfig, SignalingServer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

const WARTEZEIT: Duration = Duration::from_secs(5);
const STILLE: Duration = Duration::from_millis(300);

struct Relay {
    state: Arc<SchnackState<SqliteDb>>,
    listener: TcpListener,
    chat: ChatId,
    alice: UserId,
    bob: UserId,
}

async fn relay() -> Relay {
    relay_mit(SignalingConfig::default()).await
}

async fn relay_mit(config: SignalingConfig) -> Relay {
    let db = Arc::new(SqliteDb::in_memory().await.expect("DB"));
    let alice = UserRepository::create(db.as_ref(), NeuerBenutzer { username: "alice" })
        .await
        .unwrap()
        .id;
    let bob = UserRepository::create(db.as_ref(), NeuerBenutzer { username: "bob" })
        .await
        .unwrap()
        .id;
    let chat = ChatRepository::create(
        db.as_ref(),
        NeuerChat {
            name: None,
            is_group: false,
            admin_id: None,
            participants: &[alice, bob],
        },
    )
    .await
    .unwrap()
    .id;

    let state = SchnackState::neu(
        config,
        db,
        SessionStore::neu(),
        SchnackMetrics::neu().unwrap(),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    Relay {
        state,
        listener,
        chat,
        alice,
        bob,
    }
}

async fn token(relay: &Relay, user_id: UserId) -> String {
    relay
        .state
        .auth_service
        .sitzung_erstellen(user_id)
        .await
        .expect("Session")
        .token
}

/// Laesst den Relay laufen, bis das Szenario fertig ist
async fn mit_relay(relay: Relay, szenario: impl Future<Output = ()>) {
    let addr = relay.listener.local_addr().unwrap();
    let server = SignalingServer::neu(relay.state, addr);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::select! {
        ergebnis = server.mit_listener_starten(relay.listener, shutdown_rx) => {
            panic!("Relay vorzeitig beendet: {ergebnis:?}")
        }
        _ = szenario => {}
    }
}

/// Liest Ereignisse bis eines passt
async fn warten_auf(
    verbindung: &mut ServerConnection,
    mut passt: impl FnMut(&ControlPayload) -> bool,
) -> ControlPayload {
    loop {
        let nachricht = verbindung
            .ereignis_mit_timeout(WARTEZEIT)
            .await
            .expect("Verbindung verloren")
            .expect("kein passendes Ereignis innerhalb der Wartezeit");
        if passt(&nachricht.payload) {
            return nachricht.payload;
        }
    }
}

/// Sammelt alle Ereignisse bis fuer `STILLE` nichts mehr kommt
async fn restliche_ereignisse(verbindung: &mut ServerConnection) -> Vec<ControlPayload> {
    let mut rest = Vec::new();
    while let Some(nachricht) = verbindung.ereignis_mit_timeout(STILLE).await.expect("Verbindung") {
        rest.push(nachricht.payload);
    }
    rest
}

#[tokio::test]
async fn nachricht_zustellung_und_lesebestaetigung() {
    let r = relay().await;
    let (chat, alice_id, bob_id) = (r.chat, r.alice, r.bob);
    let (token_a, token_b) = (token(&r, r.alice).await, token(&r, r.bob).await);
    let addr = r.listener.local_addr().unwrap();

    mit_relay(r, async move {
        let (mut alice, verbunden) = ServerConnection::verbinden(addr, &token_a).await.unwrap();
        assert_eq!(verbunden.user_id, alice_id);
        assert_eq!(verbunden.online_users, vec![alice_id]);
        let (mut bob, _) = ServerConnection::verbinden(addr, &token_b).await.unwrap();

        alice.chat_beitreten(chat).await.unwrap();
        let beitritt = bob.chat_beitreten(chat).await.unwrap();
        assert_eq!(beitritt.occupants.len(), 2);

        // Optimistisch einfuegen, dann mit der Server-Bestaetigung abgleichen
        let mut store = ChatStore::neu();
        let anfrage = textnachricht(chat, "hi", Some("t1".into()));
        store.optimistisch_einfuegen(alice_id, "t1", &anfrage);
        let gesendet = alice.nachricht_senden(anfrage).await.unwrap();
        assert_eq!(gesendet.temp_id.as_deref(), Some("t1"));
        assert!(store.bestaetigung_anwenden(&gesendet));
        let message_id = gesendet.message.id;
        assert_eq!(store.nachrichten(chat)[0].id, message_id);

        match warten_auf(&mut bob, |p| matches!(p, ControlPayload::NewMessage(_))).await {
            ControlPayload::NewMessage(n) => {
                assert_eq!(n.id, message_id);
                assert_eq!(n.status, NachrichtenStatus::Sent);
                assert_eq!(n.content, "hi");
            }
            _ => unreachable!(),
        }

        bob.zugestellt_melden(message_id).await.unwrap();
        bob.gelesen_melden(message_id, chat).await.unwrap();
        bob.gelesen_melden(message_id, chat).await.unwrap();

        let seen = warten_auf(&mut alice, |p| {
            store.ereignis_anwenden(p);
            matches!(p, ControlPayload::StatusUpdated(s) if s.status == NachrichtenStatus::Seen)
        })
        .await;
        match seen {
            ControlPayload::StatusUpdated(s) => {
                let read_by = s.read_by.expect("read_by");
                assert_eq!(read_by.len(), 1);
                assert_eq!(read_by[0].user_id, bob_id);
            }
            _ => unreachable!(),
        }

        let weitere: Vec<_> = restliche_ereignisse(&mut alice)
            .await
            .into_iter()
            .filter(|p| matches!(p, ControlPayload::StatusUpdated(_)))
            .collect();
        assert!(weitere.is_empty(), "zweites seen darf nichts verteilen: {weitere:?}");

        let nachricht = store.nachricht(chat, message_id).unwrap();
        assert_eq!(nachricht.status, NachrichtenStatus::Seen);
        assert_eq!(nachricht.read_by.len(), 1);
    })
    .await;
}

#[tokio::test]
async fn ungueltiges_token_wird_abgelehnt() {
    let r = relay().await;
    let addr = r.listener.local_addr().unwrap();

    mit_relay(r, async move {
        let ergebnis = ServerConnection::verbinden(addr, "kein-gueltiges-token").await;
        match ergebnis {
            Err(e) => assert_eq!(e.code(), Some(ErrorCode::AuthRequired)),
            Ok(_) => panic!("Verbindung haette abgelehnt werden muessen"),
        }
    })
    .await;
}

#[tokio::test]
async fn trennen_beendet_tippen_und_meldet_offline() {
    let r = relay().await;
    let (chat, bob_id) = (r.chat, r.bob);
    let (token_a, token_b) = (token(&r, r.alice).await, token(&r, r.bob).await);
    let addr = r.listener.local_addr().unwrap();

    mit_relay(r, async move {
        let (mut alice, _) = ServerConnection::verbinden(addr, &token_a).await.unwrap();
        let (mut bob, _) = ServerConnection::verbinden(addr, &token_b).await.unwrap();
        alice.chat_beitreten(chat).await.unwrap();
        bob.chat_beitreten(chat).await.unwrap();

        let mut store = ChatStore::neu();
        warten_auf(&mut alice, |p| {
            store.ereignis_anwenden(p);
            matches!(p, ControlPayload::UserOnline(u) if u.user_id == bob_id)
        })
        .await;
        assert!(store.ist_online(bob_id));

        bob.tippen(chat, true).await.unwrap();
        warten_auf(&mut alice, |p| {
            store.ereignis_anwenden(p);
            matches!(p, ControlPayload::UserTyping(t) if t.is_typing)
        })
        .await;
        assert_eq!(store.tippende(chat), vec![bob_id]);

        bob.trennen().await.unwrap();

        warten_auf(&mut alice, |p| {
            store.ereignis_anwenden(p);
            matches!(p, ControlPayload::UserOffline(u) if u.user_id == bob_id)
        })
        .await;
        assert!(store.tippende(chat).is_empty(), "Trennen setzt die Tipp-Anzeige zurueck");
        assert!(!store.ist_online(bob_id));
        assert!(store.presence(bob_id).unwrap().last_seen.is_some());
    })
    .await;
}

#[tokio::test]
async fn erneute_anmeldung_verdraengt_alte_verbindung() {
    let r = relay().await;
    let bob_id = r.bob;
    let (token_a, token_b) = (token(&r, r.alice).await, token(&r, r.bob).await);
    let addr = r.listener.local_addr().unwrap();
    let state = Arc::clone(&r.state);

    mit_relay(r, async move {
        let (mut alice, _) = ServerConnection::verbinden(addr, &token_a).await.unwrap();
        let (mut bob_alt, _) = ServerConnection::verbinden(addr, &token_b).await.unwrap();
        let (_bob_neu, antwort) = ServerConnection::verbinden(addr, &token_b).await.unwrap();

        // Die alte Verbindung wird vom Relay geschlossen
        loop {
            match bob_alt.ereignis_mit_timeout(WARTEZEIT).await {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("alte Verbindung wurde nicht getrennt"),
                Err(ClientError::VerbindungGetrennt) | Err(ClientError::Io(_)) => break,
                Err(e) => panic!("unerwarteter Fehler: {e}"),
            }
        }

        let handle = state.registry.lookup(&bob_id).expect("bob ist registriert");
        assert_eq!(handle.connection_id, antwort.connection_id);
        assert_eq!(state.registry.anzahl(), 2);

        let offline: Vec<_> = restliche_ereignisse(&mut alice)
            .await
            .into_iter()
            .filter(|p| matches!(p, ControlPayload::UserOffline(_)))
            .collect();
        assert!(offline.is_empty(), "Verdraengung ist kein Offline-Wechsel: {offline:?}");
    })
    .await;
}

#[tokio::test]
async fn shutdown_beendet_accept_loop() {
    let r = relay().await;
    let token_a = token(&r, r.alice).await;
    let addr = r.listener.local_addr().unwrap();
    let server = SignalingServer::neu(r.state, addr);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let relay_lauf = server.mit_listener_starten(r.listener, shutdown_rx);
    tokio::pin!(relay_lauf);

    let verbunden = tokio::select! {
        _ = &mut relay_lauf => panic!("Relay vorzeitig beendet"),
        v = ServerConnection::verbinden(addr, &token_a) => v,
    };
    assert!(verbunden.is_ok());

    shutdown_tx.send(true).unwrap();
    let ergebnis = tokio::time::timeout(WARTEZEIT, relay_lauf)
        .await
        .expect("Relay hat nicht auf Shutdown reagiert");
    assert!(ergebnis.is_ok());
}

#[tokio::test]
async fn offener_handshake_belegt_einen_platz() {
    let r = relay_mit(SignalingConfig {
        max_clients: 1,
        ..SignalingConfig::default()
    })
    .await;
    let token_a = token(&r, r.alice).await;
    let addr = r.listener.local_addr().unwrap();

    mit_relay(r, async move {
        // Nur der Socket, kein connect-Frame
        let roh = TcpStream::connect(addr).await.unwrap();

        match ServerConnection::verbinden(addr, &token_a).await {
            Err(ClientError::VerbindungGetrennt) | Err(ClientError::Io(_)) => {}
            Err(e) => panic!("unerwarteter Fehler: {e}"),
            Ok(_) => panic!("Server war voll, Verbindung haette abgelehnt werden muessen"),
        }

        // Der Platz wird frei, sobald der Relay das Schliessen bemerkt
        drop(roh);
        let mut verbunden = None;
        for _ in 0..50 {
            if let Ok((verbindung, _)) = ServerConnection::verbinden(addr, &token_a).await {
                verbunden = Some(verbindung);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(verbunden.is_some(), "freier Platz wurde nicht wieder vergeben");
    })
    .await;
}
