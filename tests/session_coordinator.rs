use meshlobby_lib::coordinator::{SessionCoordinator, SessionOptions};
use meshlobby_lib::peer::{IceCandidate, SessionDescription, TransportState};
use meshlobby_lib::relay::RelaySender;
use meshlobby_lib::router::Signal;
use meshlobby_lib::signaling::{decode_frame, Envelope, MessageType};
use meshlobby_lib::testing::{next_event, settle, FakeChannelFactory, FakeMediaEngine};
use meshlobby_lib::{AnswerPolicy, CallState, Error, LobbyEvent, Peer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    coordinator: SessionCoordinator,
    outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedReceiver<LobbyEvent>,
    media: Arc<FakeMediaEngine>,
    channels: Arc<FakeChannelFactory>,
}

impl Harness {
    fn new(options: SessionOptions) -> Self {
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let media = FakeMediaEngine::new();
        let channels = FakeChannelFactory::new();
        let coordinator = SessionCoordinator::new(
            me(),
            RelaySender::fixed(out_tx),
            media.clone(),
            channels.clone(),
            options,
            events_tx,
        );
        Self {
            coordinator,
            outbound,
            events,
            media,
            channels,
        }
    }

    fn sent(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(text) = self.outbound.try_recv() {
            out.push(decode_frame(&text).unwrap());
        }
        out
    }

    /// Events emitted so far, without waiting
    fn emitted(&mut self) -> Vec<LobbyEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    async fn wait_state(&mut self, peer_id: &str, state: CallState) {
        let peer_id = peer_id.to_string();
        next_event(&mut self.events, |e| {
            matches!(e, LobbyEvent::CallStateChanged { peer_id: p, state: s } if *p == peer_id && *s == state)
        })
        .await;
    }

    /// Calls `peer`, has them accept and answer; ends `Active`
    async fn establish(&mut self, peer: &Peer) {
        self.coordinator.initiate_call(&peer.peer_id).await.unwrap();
        self.wait_state(&peer.peer_id, CallState::Calling).await;
        self.coordinator
            .handle_signal(&peer.peer_id, Signal::AcceptCall(peer.clone()))
            .await;
        self.wait_state(&peer.peer_id, CallState::Negotiating).await;
        self.coordinator
            .handle_signal(&peer.peer_id, Signal::Answer(SessionDescription::answer("v=0 remote")))
            .await;
        self.wait_state(&peer.peer_id, CallState::Active).await;
    }
}

fn me() -> Peer {
    Peer::new("p1", "ann")
}

fn bob() -> Peer {
    Peer::new("p2", "bob")
}

fn cat() -> Peer {
    Peer::new("p3", "cat")
}

fn host_candidate() -> IceCandidate {
    IceCandidate {
        candidate: "candidate:7 1 udp 2130706431 10.0.0.2 40000 typ host".into(),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

fn kinds(sent: &[Envelope]) -> Vec<MessageType> {
    sent.iter().map(|e| e.kind).collect()
}

#[tokio::test(start_paused = true)]
async fn test_second_call_rejected_while_first_in_flight() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator.initiate_call("p3").await.unwrap();
    h.wait_state("p3", CallState::Calling).await;

    let err = h.coordinator.initiate_call("p2").await.unwrap_err();
    assert!(matches!(err, Error::StateConflict(_)));
    settle().await;

    let calls: Vec<_> = h
        .sent()
        .into_iter()
        .filter(|e| e.kind == MessageType::Call)
        .collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].to.as_deref(), Some("p3"));
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Idle);
    assert_eq!(h.coordinator.outgoing_call_in_flight().await.as_deref(), Some("p3"));
}

#[tokio::test(start_paused = true)]
async fn test_cannot_call_self_or_existing_session() {
    let mut h = Harness::new(SessionOptions::default());
    assert!(matches!(
        h.coordinator.initiate_call("p1").await,
        Err(Error::StateConflict(_))
    ));

    h.coordinator
        .handle_signal("p2", Signal::Call(bob()))
        .await;
    h.wait_state("p2", CallState::Ringing).await;
    assert!(matches!(
        h.coordinator.initiate_call("p2").await,
        Err(Error::StateConflict(_))
    ));
    assert!(h.coordinator.outgoing_call_in_flight().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_offer_sent_after_accept_and_answer_clears_flag() {
    let mut h = Harness::new(SessionOptions::default());
    h.establish(&bob()).await;

    let sent = h.sent();
    let offers: Vec<_> = sent.iter().filter(|e| e.kind == MessageType::Offer).collect();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].from.as_deref(), Some("p1"));
    assert_eq!(offers[0].to.as_deref(), Some("p2"));
    assert!(sent.iter().any(|e| e.kind == MessageType::IceCandidate));
    assert_eq!(h.coordinator.outgoing_call_in_flight().await, None);
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Active);
    assert_eq!(
        h.coordinator.active_calls().await,
        vec![("p2".to_string(), CallState::Active)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_reject_from_calling_closes_and_clears_flag() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator.initiate_call("p2").await.unwrap();
    h.wait_state("p2", CallState::Calling).await;

    h.coordinator
        .handle_signal("p2", Signal::RejectCall(bob()))
        .await;
    next_event(&mut h.events, |e| matches!(e, LobbyEvent::CallRejected(p) if p.peer_id == "p2")).await;
    h.wait_state("p2", CallState::Closed).await;

    assert_eq!(h.coordinator.state_of("p2").await, CallState::Idle);
    assert_eq!(h.coordinator.outgoing_call_in_flight().await, None);
    assert_eq!(h.media.release_count(), 1);
    h.coordinator.initiate_call("p3").await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reject_from_ringing_closes() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator.handle_signal("p2", Signal::Call(bob())).await;
    next_event(&mut h.events, |e| matches!(e, LobbyEvent::IncomingCall(p) if p.peer_id == "p2")).await;

    h.coordinator
        .handle_signal("p2", Signal::RejectCall(bob()))
        .await;
    h.wait_state("p2", CallState::Closed).await;
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_local_accept_and_reject() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator.handle_signal("p2", Signal::Call(bob())).await;
    h.coordinator.handle_signal("p3", Signal::Call(cat())).await;
    settle().await;
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Ringing);
    assert_eq!(h.coordinator.state_of("p3").await, CallState::Ringing);

    h.coordinator.answer_call("p2", true).await.unwrap();
    h.coordinator.answer_call("p3", false).await.unwrap();
    h.wait_state("p3", CallState::Closed).await;
    settle().await;

    let sent = h.sent();
    assert!(sent
        .iter()
        .any(|e| e.kind == MessageType::AcceptCall && e.to.as_deref() == Some("p2")));
    assert!(sent
        .iter()
        .any(|e| e.kind == MessageType::RejectCall && e.to.as_deref() == Some("p3")));
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Accepted);
    assert!(matches!(
        h.coordinator.answer_call("p2", true).await,
        Err(Error::StateConflict(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_answer_policy_auto_reject() {
    let mut h = Harness::new(SessionOptions {
        answer_policy: AnswerPolicy::AutoReject,
        ..Default::default()
    });
    h.coordinator.handle_signal("p2", Signal::Call(bob())).await;
    h.wait_state("p2", CallState::Closed).await;
    assert!(kinds(&h.sent()).contains(&MessageType::RejectCall));
    assert_eq!(h.media.acquire_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_answerer_replies_to_offer() {
    let mut h = Harness::new(SessionOptions {
        answer_policy: AnswerPolicy::AutoAccept,
        ..Default::default()
    });
    h.coordinator.handle_signal("p2", Signal::Call(bob())).await;
    h.wait_state("p2", CallState::Accepted).await;

    h.coordinator
        .handle_signal("p2", Signal::Offer(SessionDescription::offer("v=0 remote offer")))
        .await;
    h.wait_state("p2", CallState::Active).await;

    let sent = h.sent();
    assert_eq!(
        kinds(&sent)
            .into_iter()
            .filter(|k| *k == MessageType::Answer)
            .count(),
        1
    );
    assert!(!kinds(&sent).contains(&MessageType::Offer));
    assert_eq!(h.media.acquire_count(), 1);
    assert_eq!(h.media.sinks(), vec!["local-preview".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_offer_creates_session() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator
        .handle_signal("p2", Signal::Offer(SessionDescription::offer("v=0 remote offer")))
        .await;
    h.wait_state("p2", CallState::Active).await;
    assert!(kinds(&h.sent()).contains(&MessageType::Answer));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_offer_closes_session() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator
        .handle_signal("p2", Signal::Offer(SessionDescription::offer("malformed")))
        .await;
    h.wait_state("p2", CallState::Closed).await;
    assert!(!kinds(&h.sent()).contains(&MessageType::Answer));
    assert_eq!(h.media.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_answer_out_of_state_is_dropped() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator.initiate_call("p2").await.unwrap();
    h.wait_state("p2", CallState::Calling).await;

    h.coordinator
        .handle_signal("p2", Signal::Answer(SessionDescription::answer("v=0")))
        .await;
    settle().await;
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Calling);
    assert_eq!(h.coordinator.outgoing_call_in_flight().await.as_deref(), Some("p2"));
}

#[tokio::test(start_paused = true)]
async fn test_signal_without_session_is_dropped() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator
        .handle_signal("p2", Signal::AcceptCall(bob()))
        .await;
    h.coordinator
        .handle_signal("p2", Signal::IceCandidate(host_candidate()))
        .await;
    settle().await;
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Idle);
    assert!(h.sent().is_empty());
    assert_eq!(h.channels.opened_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_early_candidates_dropped_by_default() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator.initiate_call("p2").await.unwrap();
    h.wait_state("p2", CallState::Calling).await;
    h.coordinator
        .handle_signal("p2", Signal::AcceptCall(bob()))
        .await;
    h.wait_state("p2", CallState::Negotiating).await;

    // Offer is out, the answer is not: no remote description yet
    h.coordinator
        .handle_signal("p2", Signal::IceCandidate(host_candidate()))
        .await;
    h.coordinator
        .handle_signal("p2", Signal::Answer(SessionDescription::answer("v=0")))
        .await;
    h.wait_state("p2", CallState::Active).await;

    let channel = h.channels.channel_for("p2").unwrap();
    assert!(channel.snapshot().candidates.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_early_candidates_queued_when_enabled() {
    let mut h = Harness::new(SessionOptions {
        queue_early_candidates: true,
        ..Default::default()
    });
    h.coordinator.initiate_call("p2").await.unwrap();
    h.coordinator
        .handle_signal("p2", Signal::AcceptCall(bob()))
        .await;
    h.wait_state("p2", CallState::Negotiating).await;

    h.coordinator
        .handle_signal("p2", Signal::IceCandidate(host_candidate()))
        .await;
    h.coordinator
        .handle_signal("p2", Signal::Answer(SessionDescription::answer("v=0")))
        .await;
    h.wait_state("p2", CallState::Active).await;

    let channel = h.channels.channel_for("p2").unwrap();
    assert_eq!(channel.snapshot().candidates, vec![host_candidate()]);
}

#[tokio::test(start_paused = true)]
async fn test_bad_candidate_aborts_session() {
    let mut h = Harness::new(SessionOptions::default());
    h.establish(&bob()).await;

    let mut bad = host_candidate();
    bad.candidate = "not a candidate".into();
    h.coordinator
        .handle_signal("p2", Signal::IceCandidate(bad))
        .await;
    h.wait_state("p2", CallState::Closed).await;
    assert!(h.channels.channel_for("p2").unwrap().snapshot().closed);
}

#[tokio::test(start_paused = true)]
async fn test_media_failure_on_dial() {
    let mut h = Harness::new(SessionOptions::default());
    h.media.set_failing(true);
    h.coordinator.initiate_call("p2").await.unwrap();

    let failed = next_event(&mut h.events, |e| matches!(e, LobbyEvent::CallFailed { .. })).await;
    assert!(matches!(failed, LobbyEvent::CallFailed { peer_id, .. } if peer_id == "p2"));
    h.wait_state("p2", CallState::Closed).await;

    assert_eq!(h.coordinator.state_of("p2").await, CallState::Idle);
    assert_eq!(h.coordinator.outgoing_call_in_flight().await, None);
    assert!(!kinds(&h.sent()).contains(&MessageType::Call));
}

#[tokio::test(start_paused = true)]
async fn test_media_failure_on_accept_sends_reject() {
    let mut h = Harness::new(SessionOptions::default());
    h.media.set_failing(true);
    h.coordinator.handle_signal("p2", Signal::Call(bob())).await;
    h.wait_state("p2", CallState::Ringing).await;

    h.coordinator.answer_call("p2", true).await.unwrap();
    next_event(&mut h.events, |e| matches!(e, LobbyEvent::CallFailed { .. })).await;
    h.wait_state("p2", CallState::Closed).await;
    assert!(kinds(&h.sent()).contains(&MessageType::RejectCall));
}

#[tokio::test(start_paused = true)]
async fn test_media_released_once_after_last_close() {
    let mut h = Harness::new(SessionOptions::default());
    h.establish(&bob()).await;
    h.coordinator.close("p2").await;
    h.wait_state("p2", CallState::Closed).await;
    assert_eq!(h.media.release_count(), 1);

    h.establish(&cat()).await;
    h.coordinator.handle_signal("p2", Signal::Offer(SessionDescription::offer("v=0"))).await;
    h.wait_state("p2", CallState::Active).await;
    assert_eq!(h.media.acquire_count(), 2);

    h.coordinator.close("p3").await;
    h.wait_state("p3", CallState::Closed).await;
    assert_eq!(h.media.release_count(), 1);
    assert!(h.coordinator.media_held().await);

    h.coordinator.close("p2").await;
    h.wait_state("p2", CallState::Closed).await;
    assert_eq!(h.media.release_count(), 2);

    h.coordinator.close("p2").await;
    h.coordinator.close_all().await;
    assert_eq!(h.media.release_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_all_tears_everything_down() {
    let mut h = Harness::new(SessionOptions::default());
    h.establish(&bob()).await;
    h.coordinator.handle_signal("p3", Signal::Call(cat())).await;
    h.wait_state("p3", CallState::Ringing).await;

    h.coordinator.close_all().await;
    assert!(h.coordinator.active_calls().await.is_empty());
    assert!(h.channels.channel_for("p2").unwrap().snapshot().closed);
    assert_eq!(h.media.release_count(), 1);
    assert!(!h.coordinator.media_held().await);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_recovers_within_grace() {
    let mut h = Harness::new(SessionOptions::default());
    h.establish(&bob()).await;
    let channel = h.channels.channel_for("p2").unwrap();

    channel.report(TransportState::Disconnected);
    tokio::time::sleep(Duration::from_secs(5)).await;
    channel.report(TransportState::Connected);
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(h.coordinator.state_of("p2").await, CallState::Active);
    assert!(!channel.snapshot().closed);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_after_grace() {
    let mut h = Harness::new(SessionOptions::default());
    h.establish(&bob()).await;
    let channel = h.channels.channel_for("p2").unwrap();

    let start = tokio::time::Instant::now();
    channel.report(TransportState::Disconnected);
    h.wait_state("p2", CallState::Closed).await;
    assert!(tokio::time::Instant::now() - start >= Duration::from_secs(10));
    assert!(channel.snapshot().closed);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_closes_immediately() {
    let mut h = Harness::new(SessionOptions::default());
    h.establish(&bob()).await;
    let start = tokio::time::Instant::now();

    h.channels
        .channel_for("p2")
        .unwrap()
        .report(TransportState::Failed);
    h.wait_state("p2", CallState::Closed).await;
    assert!(tokio::time::Instant::now() - start < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_remote_track_is_reported() {
    let mut h = Harness::new(SessionOptions::default());
    h.establish(&bob()).await;
    h.channels
        .channel_for("p2")
        .unwrap()
        .remote_track("audio", "bob-mic");

    let event = next_event(&mut h.events, |e| matches!(e, LobbyEvent::RemoteTrack { .. })).await;
    assert_eq!(
        event,
        LobbyEvent::RemoteTrack {
            peer_id: "p2".into(),
            kind: "audio".into(),
            track_id: "bob-mic".into(),
        }
    );
}

fn closed(peer_id: &str) -> LobbyEvent {
    LobbyEvent::CallStateChanged {
        peer_id: peer_id.into(),
        state: CallState::Closed,
    }
}

#[tokio::test(start_paused = true)]
async fn test_repeated_call_is_ignored() {
    let mut h = Harness::new(SessionOptions::default());
    h.coordinator.handle_signal("p2", Signal::Call(bob())).await;
    h.coordinator.handle_signal("p2", Signal::Call(bob())).await;
    settle().await;

    let rings = h
        .emitted()
        .into_iter()
        .filter(|e| matches!(e, LobbyEvent::IncomingCall(p) if p.peer_id == "p2"))
        .count();
    assert_eq!(rings, 1);
    assert_eq!(
        h.coordinator.active_calls().await,
        vec![("p2".to_string(), CallState::Ringing)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_answer_keeps_negotiating() {
    let mut h = Harness::new(SessionOptions::default());
    h.channels.set_manual_connect(true);
    h.coordinator.initiate_call("p2").await.unwrap();
    h.wait_state("p2", CallState::Calling).await;
    h.coordinator
        .handle_signal("p2", Signal::AcceptCall(bob()))
        .await;
    h.wait_state("p2", CallState::Negotiating).await;

    let answer = SessionDescription::answer("v=0 remote");
    h.coordinator
        .handle_signal("p2", Signal::Answer(answer.clone()))
        .await;
    h.coordinator
        .handle_signal("p2", Signal::Answer(answer))
        .await;
    settle().await;

    assert!(!h.emitted().contains(&closed("p2")));
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Negotiating);
    let channel = h.channels.channel_for("p2").unwrap();
    assert!(!channel.snapshot().closed);

    channel.report(TransportState::Connected);
    h.wait_state("p2", CallState::Active).await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_offer_is_answered_once() {
    let mut h = Harness::new(SessionOptions {
        answer_policy: AnswerPolicy::AutoAccept,
        ..Default::default()
    });
    h.channels.set_manual_connect(true);
    h.coordinator.handle_signal("p2", Signal::Call(bob())).await;
    h.wait_state("p2", CallState::Accepted).await;

    let offer = SessionDescription::offer("v=0 remote offer");
    h.coordinator
        .handle_signal("p2", Signal::Offer(offer.clone()))
        .await;
    h.coordinator
        .handle_signal("p2", Signal::Offer(offer))
        .await;
    settle().await;

    let answers = kinds(&h.sent())
        .into_iter()
        .filter(|k| *k == MessageType::Answer)
        .count();
    assert_eq!(answers, 1);
    assert!(!h.emitted().contains(&closed("p2")));
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Negotiating);
}

#[tokio::test(start_paused = true)]
async fn test_offer_while_awaiting_answer_is_dropped() {
    let mut h = Harness::new(SessionOptions::default());
    h.channels.set_manual_connect(true);
    h.coordinator.initiate_call("p2").await.unwrap();
    h.wait_state("p2", CallState::Calling).await;
    h.coordinator
        .handle_signal("p2", Signal::AcceptCall(bob()))
        .await;
    h.wait_state("p2", CallState::Negotiating).await;
    h.sent();

    h.coordinator
        .handle_signal("p2", Signal::Offer(SessionDescription::offer("v=0 crossing offer")))
        .await;
    settle().await;

    assert!(!kinds(&h.sent()).contains(&MessageType::Answer));
    assert!(!h.emitted().contains(&closed("p2")));
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Negotiating);

    // Our own offer still completes
    h.coordinator
        .handle_signal("p2", Signal::Answer(SessionDescription::answer("v=0 remote")))
        .await;
    h.channels
        .channel_for("p2")
        .unwrap()
        .report(TransportState::Connected);
    h.wait_state("p2", CallState::Active).await;
}

#[tokio::test(start_paused = true)]
async fn test_active_call_renegotiates_on_new_offer_only() {
    let mut h = Harness::new(SessionOptions::default());
    let first = SessionDescription::offer("v=0 remote offer");
    h.coordinator
        .handle_signal("p2", Signal::Offer(first.clone()))
        .await;
    h.wait_state("p2", CallState::Active).await;
    h.sent();

    h.coordinator.handle_signal("p2", Signal::Offer(first)).await;
    settle().await;
    assert!(!kinds(&h.sent()).contains(&MessageType::Answer));

    h.coordinator
        .handle_signal("p2", Signal::Offer(SessionDescription::offer("v=0 new tracks")))
        .await;
    settle().await;
    assert_eq!(kinds(&h.sent()), vec![MessageType::Answer, MessageType::IceCandidate]);
    assert_eq!(h.coordinator.state_of("p2").await, CallState::Active);
}
