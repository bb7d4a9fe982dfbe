mod common;

use common::*;
use peercall_lib::client::GAVE_UP_MESSAGE;
use peercall_lib::event::{ChannelEvent, Event, NegotiationEvent, RelayEvent, UserCommand};
use peercall_lib::logger::UiEvent;
use peercall_lib::peer::types::{SdpKind, SessionDescription};
use peercall_lib::session::{Role, SessionState};
use peercall_lib::transport::LinkState;
use std::sync::atomic::Ordering;
use std::time::Duration;

/// Registered, `SESSION 99` sent and acknowledged as offerer.
async fn offering() -> Harness {
    let mut h = Harness::registered(config());
    h.command(UserCommand::Call(REMOTE_ID.into()));
    h.inbound("SESSION_OK");
    h.settle().await;
    h
}

#[tokio::test]
async fn registers_and_offers_after_session_ok() {
    let mut h = Harness::new(config());
    h.client.start();
    assert_eq!(h.client.state(), SessionState::Connecting);
    h.relay(RelayEvent::Opened);
    assert_eq!(h.frames(), vec!["HELLO 42"]);
    assert!(h.ui_events().contains(&UiEvent::PeerId(LOCAL_ID.into())));

    h.inbound("HELLO");
    assert_eq!(h.client.state(), SessionState::Registered);
    assert_eq!(
        h.client.notifier().status(),
        "Registered with server, waiting for call"
    );

    h.command(UserCommand::Call(REMOTE_ID.into()));
    assert_eq!(h.frames(), vec!["SESSION 99"]);
    assert_eq!(h.client.state(), SessionState::SessionRequested);

    h.inbound("SESSION_OK");
    assert_eq!(h.client.session().role(), Role::Offerer);
    assert!(h.client.negotiation().is_active());
    h.settle().await;

    let frames = h.frames();
    assert_eq!(frames.len(), 2, "{frames:?}");
    let sdp = json(&frames[0]);
    assert_eq!(sdp["sdp"]["type"], "offer");
    assert_eq!(sdp["sdp"]["sdp"], "v=0 local-offer");
    // candidates gathered during set-local go out after the description
    assert!(json(&frames[1])["ice"]["candidate"].is_string());
    assert_eq!(h.client.state(), SessionState::Negotiating);
    assert_eq!(h.script.count("create_offer"), 1);
}

#[tokio::test]
async fn calls_configured_peer_once_registered() {
    let mut cfg = config();
    cfg.call = Some(REMOTE_ID.into());
    let h = Harness::registered(cfg);
    assert_eq!(h.frames(), vec!["HELLO 42", "SESSION 99"]);
    assert_eq!(h.client.state(), SessionState::SessionRequested);
}

#[tokio::test]
async fn empty_peer_id_never_reaches_relay() {
    let mut h = Harness::registered(config());
    h.frames();
    for peer in ["", "   "] {
        h.command(UserCommand::Call(peer.into()));
    }
    assert!(h.frames().is_empty());
    assert_eq!(h.client.notifier().status(), "Peer id must be filled out");
    assert_eq!(h.client.state(), SessionState::Registered);
    assert_eq!(h.client.link().state(), LinkState::Open);
}

#[tokio::test]
async fn rejected_peer_id_does_not_hide_later_status() {
    let mut h = Harness::registered(config());
    h.command(UserCommand::Call("".into()));
    assert!(!h.client.notifier().is_error());
    h.command(UserCommand::Call(REMOTE_ID.into()));
    h.inbound("SESSION_OK");
    h.settle().await;
    h.inbound(REMOTE_ANSWER);
    h.settle().await;
    h.script.channel(0).fire(ChannelEvent::Open);
    h.settle().await;
    assert_eq!(h.client.state(), SessionState::Connected);
    assert_eq!(h.client.notifier().status(), "Connected");
    assert!(!h.client.notifier().is_error());
}

#[tokio::test]
async fn remote_offerer_preference_requests_offer() {
    let mut cfg = config();
    cfg.remote_offerer = true;
    let mut h = Harness::registered(cfg);
    h.command(UserCommand::Call(REMOTE_ID.into()));
    h.inbound("SESSION_OK");
    assert_eq!(h.frames(), vec!["HELLO 42", "SESSION 99", "OFFER_REQUEST"]);
    assert_eq!(h.client.session().role(), Role::Answerer);
    assert!(!h.client.negotiation().is_active());

    // role is already answerer, so the peer cannot turn us into the offerer
    h.inbound("OFFER_REQUEST");
    assert!(!h.client.negotiation().is_active());
    assert_eq!(h.client.session().role(), Role::Answerer);

    h.inbound(REMOTE_OFFER);
    h.settle().await;
    let frames = h.frames();
    assert_eq!(json(&frames[0])["sdp"]["type"], "answer");
    let remote_set = h.script.position("set_remote:offer").unwrap();
    let media = h.script.position("media").unwrap();
    let answer = h.script.position("create_answer").unwrap();
    assert!(remote_set < answer && media < answer);
}

#[tokio::test]
async fn offer_request_after_offering_changes_nothing() {
    let mut h = offering().await;
    h.frames();
    h.inbound("OFFER_REQUEST");
    h.settle().await;
    assert_eq!(h.client.session().role(), Role::Offerer);
    assert_eq!(h.script.count("create"), 1);
    assert_eq!(h.script.count("create_offer"), 1);
    assert!(h.frames().is_empty());
}

#[tokio::test]
async fn offer_request_without_session_starts_offer() {
    let mut h = Harness::registered(config());
    h.frames();
    h.inbound("OFFER_REQUEST");
    assert_eq!(h.client.session().role(), Role::Offerer);
    h.settle().await;
    let frames = h.frames();
    assert_eq!(json(&frames[0])["sdp"]["type"], "offer");
}

#[tokio::test]
async fn candidate_before_description_is_discarded() {
    let mut h = Harness::registered(config());
    h.inbound(REMOTE_ICE);
    // the first payload still starts the call
    assert!(h.client.negotiation().is_active());
    assert_eq!(h.client.candidates().discarded(), 1);
    h.settle().await;
    assert_eq!(h.script.count("candidate"), 0);
    assert!(!h.client.notifier().is_error());
    assert_eq!(h.client.link().state(), LinkState::Open);

    h.inbound(REMOTE_OFFER);
    h.inbound(REMOTE_ICE);
    h.settle().await;
    assert_eq!(h.script.count("candidate"), 1);
    assert!(h.script.position("set_remote:offer") < h.script.position("candidate"));
    assert_eq!(h.client.candidates().forwarded(), 1);
    assert_eq!(h.client.session().role(), Role::Answerer);
}

#[tokio::test]
async fn answer_and_open_channel_connect_the_call() {
    let mut h = offering().await;
    h.inbound(REMOTE_ANSWER);
    h.settle().await;
    assert!(h.client.negotiation().descriptions_complete());
    assert_eq!(h.client.state(), SessionState::Negotiating);

    let channel = h.script.channel(0);
    channel.fire(ChannelEvent::Open);
    h.settle().await;
    assert_eq!(h.client.state(), SessionState::Connected);
    assert_eq!(h.client.notifier().status(), "Connected");
    assert!(h.ui_events().contains(&UiEvent::CallActive(true)));

    channel.fire(ChannelEvent::Text("hello".into()));
    h.settle().await;
    h.command(UserCommand::SendText("hi back".into()));
    h.settle().await;
    let sent = channel.sent();
    assert!(sent.contains(&"hi back".to_string()));
    assert_eq!(sent.len(), 2);
    let transcript = h.client.channels().transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].text, "hello");
}

#[tokio::test]
async fn unexpected_close_tears_down_and_retries_soon() {
    let mut h = offering().await;
    let channel = h.script.channel(0);
    h.relay(RelayEvent::Closed);

    assert_eq!(h.client.notifier().status(), "Disconnected from server");
    assert!(!h.client.negotiation().is_active());
    assert_eq!(h.client.state(), SessionState::Closed);
    assert_eq!(h.client.link().pending_retry(), Some(Duration::from_secs(1)));
    assert_eq!(h.client.link().attempts(), 1);
    h.settle().await;
    assert_eq!(h.script.count("close"), 1);
    assert!(channel.is_closed());
}

#[tokio::test]
async fn connection_error_uses_longer_delay() {
    let mut h = Harness::new(config());
    h.client.start();
    h.relay(RelayEvent::Error("connection refused".into()));
    h.relay(RelayEvent::Closed);
    assert_eq!(h.client.notifier().status(), "Unable to connect to server");
    assert_eq!(h.client.link().pending_retry(), Some(Duration::from_secs(3)));
}

#[tokio::test]
async fn four_failures_give_three_retries_then_stop() {
    let mut h = Harness::new(config());
    h.client.start();
    for _ in 0..4 {
        let epoch = h.client.link().epoch();
        h.relay(RelayEvent::Closed);
        if h.client.link().pending_retry().is_some() {
            h.client.handle(Event::RetryDue { epoch });
        }
    }
    assert_eq!(h.client.link().retries_scheduled(), 3);
    assert_eq!(h.client.link().state(), LinkState::Failed);
    assert_eq!(h.relay.opened(), 4);
    assert_eq!(h.client.notifier().status(), GAVE_UP_MESSAGE);
}

#[tokio::test]
async fn registration_resets_failure_count() {
    let mut h = Harness::new(config());
    h.client.start();
    for _ in 0..3 {
        let epoch = h.client.link().epoch();
        h.relay(RelayEvent::Closed);
        h.client.handle(Event::RetryDue { epoch });
    }
    assert_eq!(h.client.link().attempts(), 3);
    h.relay(RelayEvent::Opened);
    h.inbound("HELLO");
    assert_eq!(h.client.link().attempts(), 0);
}

#[tokio::test]
async fn server_error_resets_session() {
    let mut h = offering().await;
    h.inbound("ERROR peer '99' not found");
    assert_eq!(h.client.notifier().status(), "ERROR peer '99' not found");
    assert!(h.client.notifier().is_error());
    assert!(!h.client.negotiation().is_active());
    assert_eq!(h.client.state(), SessionState::Closed);
    assert!(h.client.link().pending_retry().is_some());
}

#[tokio::test]
async fn malformed_and_unknown_json_are_fatal() {
    let mut h = Harness::registered(config());
    h.inbound("{not json");
    assert!(h
        .client
        .notifier()
        .status()
        .starts_with("Error parsing incoming JSON"));
    assert_eq!(h.client.link().state(), LinkState::Closed);

    let mut h = Harness::registered(config());
    h.inbound(r#"{"candidate":"x"}"#);
    assert!(h.client.notifier().status().starts_with("Unknown incoming JSON"));
    assert!(h.client.link().pending_retry().is_some());
}

#[tokio::test]
async fn offer_while_offering_is_rejected() {
    let mut h = offering().await;
    h.inbound(REMOTE_OFFER);
    assert!(h.client.notifier().is_error());
    assert!(!h.client.negotiation().is_active());
    assert_eq!(h.script.count("set_remote:offer"), 0);
}

#[tokio::test]
async fn stale_completions_are_ignored() {
    let mut h = offering().await;
    let old = h.client.negotiation().generation().unwrap();
    h.command(UserCommand::Disconnect);
    h.frames();
    h.client.handle(Event::Negotiation {
        generation: old,
        event: NegotiationEvent::LocalDescription(SessionDescription::new(
            SdpKind::Offer,
            "late",
        )),
    });
    assert!(h.frames().is_empty());
    assert_eq!(h.client.notifier().status(), "Disconnected from server");
    assert_eq!(h.client.link().attempts(), 1);
}

#[tokio::test]
async fn media_failure_degrades_without_ending_call() {
    let mut h = Harness::registered(config());
    h.script.fail_media.store(true, Ordering::SeqCst);
    h.inbound(REMOTE_OFFER);
    h.settle().await;
    assert!(h.client.negotiation().is_active());
    assert!(!h.client.notifier().is_error());
    let frames = h.frames();
    assert!(frames.iter().any(|f| f.contains(r#""type":"answer""#)));
}
