//! Anruf-Signaling-Relay
//!
//! Zustandslos: Der Relay merkt sich keine Anrufe. Jedes Signal wird
//! hoechstens einmal an den Raum weitergereicht, ohne Quittung und ohne
//! Wiederholung. `call_invite` geht zusaetzlich direkt an jeden erreichbaren
//! Chat-Teilnehmer, auch wenn er den Raum noch nicht betreten hat. Jeder
//! Empfaenger erhaelt ein Signal hoechstens einmal.

use std::collections::HashSet;
use std::sync::Arc;

use schnack_core::UserId;
use schnack_observability::SchnackMetrics;
use schnack_protocol::{CallSignal, CallSignalArt, ControlMessage};

use crate::registry::{ClientHandle, ConnectionRegistry};
use crate::rooms::RoomMultiplexer;

pub struct CallRelay {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomMultiplexer>,
    metriken: SchnackMetrics,
}

impl CallRelay {
    pub fn neu(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomMultiplexer>,
        metriken: SchnackMetrics,
    ) -> Self {
        Self {
            registry,
            rooms,
            metriken,
        }
    }

    /// Leitet ein Signal an alle Empfaenger ausser dem Absender weiter
    ///
    /// `from_user` wird mit der Identitaet des Absenders ueberschrieben.
    /// `teilnehmer` wird nur fuer `Invite` ausgewertet. Gibt die Anzahl der
    /// eingereihten Zustellungen zurueck.
    pub fn weiterleiten(
        &self,
        art: CallSignalArt,
        absender: &ClientHandle,
        mut signal: CallSignal,
        teilnehmer: &[UserId],
    ) -> usize {
        signal.from_user = Some(absender.user_id);
        let chat_id = signal.chat_id;
        let nachricht = ControlMessage::ereignis(art.payload(signal));

        let mut empfaenger: Vec<ClientHandle> = self
            .rooms
            .teilnehmer_handles(chat_id)
            .into_iter()
            .filter(|h| h.connection_id != absender.connection_id)
            .collect();

        if art == CallSignalArt::Invite {
            let mut bekannt: HashSet<_> = empfaenger.iter().map(|h| h.connection_id).collect();
            for user_id in teilnehmer.iter().filter(|u| **u != absender.user_id) {
                if let Some(handle) = self.registry.lookup(user_id) {
                    if bekannt.insert(handle.connection_id) {
                        empfaenger.push(handle);
                    }
                }
            }
        }

        let gesendet = empfaenger
            .iter()
            .filter(|h| h.senden(nachricht.clone()))
            .count();

        self.metriken
            .call_signals_total
            .with_label_values(&[art.als_str()])
            .inc();
        tracing::debug!(
            art = art.als_str(),
            chat_id = %chat_id,
            von = %absender.user_id,
            empfaenger = gesendet,
            "Anruf-Signal weitergeleitet"
        );
        gesendet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::test_handle;
    use schnack_core::ChatId;
    use schnack_protocol::ControlPayload;

    struct Aufbau {
        relay: CallRelay,
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<RoomMultiplexer>,
        m: SchnackMetrics,
    }

    fn aufbau() -> Aufbau {
        let m = SchnackMetrics::neu().unwrap();
        let registry = ConnectionRegistry::neu(m.clone());
        let rooms = RoomMultiplexer::neu(m.clone());
        Aufbau {
            relay: CallRelay::neu(Arc::clone(&registry), Arc::clone(&rooms), m.clone()),
            registry,
            rooms,
            m,
        }
    }

    fn signal(chat_id: ChatId) -> CallSignal {
        CallSignal {
            chat_id,
            from_user: None,
            data: serde_json::json!({ "sdp": "v=0" }),
        }
    }

    #[test]
    fn einladung_erreicht_teilnehmer_ausserhalb_des_raums() {
        let a = aufbau();
        let chat = ChatId::new();
        let (alice, _rxa) = test_handle(UserId::new(), 8, &a.m);
        let (bob, mut rxb) = test_handle(UserId::new(), 8, &a.m);
        let (carol, mut rxc) = test_handle(UserId::new(), 8, &a.m);
        let dave = UserId::new(); // nicht verbunden
        for h in [&alice, &bob, &carol] {
            a.registry.registrieren(h.clone());
        }
        a.rooms.beitreten(&alice, chat);
        a.rooms.beitreten(&bob, chat);

        let teilnehmer = [alice.user_id, bob.user_id, carol.user_id, dave];
        let gesendet = a
            .relay
            .weiterleiten(CallSignalArt::Invite, &alice, signal(chat), &teilnehmer);

        // bob ueber den Raum und die Registry, aber nur einmal
        assert_eq!(gesendet, 2);
        let einladung = rxb.try_recv().unwrap();
        assert!(rxb.try_recv().is_err());
        match einladung.payload {
            ControlPayload::CallInvite(s) => assert_eq!(s.from_user, Some(alice.user_id)),
            anderes => panic!("call_invite erwartet, erhalten: {anderes:?}"),
        }
        assert!(matches!(
            rxc.try_recv().unwrap().payload,
            ControlPayload::CallInvite(_)
        ));
    }

    #[test]
    fn folgesignale_nur_an_den_raum() {
        let a = aufbau();
        let chat = ChatId::new();
        let (alice, mut rxa) = test_handle(UserId::new(), 8, &a.m);
        let (bob, mut rxb) = test_handle(UserId::new(), 8, &a.m);
        let (carol, mut rxc) = test_handle(UserId::new(), 8, &a.m);
        for h in [&alice, &bob, &carol] {
            a.registry.registrieren(h.clone());
        }
        a.rooms.beitreten(&alice, chat);
        a.rooms.beitreten(&bob, chat);

        let teilnehmer = [alice.user_id, bob.user_id, carol.user_id];
        assert_eq!(
            a.relay
                .weiterleiten(CallSignalArt::Offer, &alice, signal(chat), &teilnehmer),
            1
        );
        assert!(matches!(
            rxb.try_recv().unwrap().payload,
            ControlPayload::CallOffer(_)
        ));
        assert!(rxc.try_recv().is_err());
        assert!(rxa.try_recv().is_err());

        // Jeder im Raum darf auflegen
        a.relay
            .weiterleiten(CallSignalArt::End, &bob, signal(chat), &[]);
        match rxa.try_recv().unwrap().payload {
            ControlPayload::CallEnd(s) => assert_eq!(s.from_user, Some(bob.user_id)),
            anderes => panic!("call_end erwartet, erhalten: {anderes:?}"),
        }
        assert_eq!(
            a.m.call_signals_total.with_label_values(&["call_end"]).get(),
            1
        );
    }

    #[test]
    fn gefaelschter_absender_wird_ueberschrieben() {
        let a = aufbau();
        let chat = ChatId::new();
        let (alice, _rxa) = test_handle(UserId::new(), 8, &a.m);
        let (bob, mut rxb) = test_handle(UserId::new(), 8, &a.m);
        a.rooms.beitreten(&alice, chat);
        a.rooms.beitreten(&bob, chat);

        let mut gefaelscht = signal(chat);
        gefaelscht.from_user = Some(bob.user_id);
        a.relay
            .weiterleiten(CallSignalArt::IceCandidate, &alice, gefaelscht, &[]);

        match rxb.try_recv().unwrap().payload {
            ControlPayload::CallIceCandidate(s) => assert_eq!(s.from_user, Some(alice.user_id)),
            anderes => panic!("call_ice_candidate erwartet, erhalten: {anderes:?}"),
        }
    }
}
