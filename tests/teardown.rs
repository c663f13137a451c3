//! Integration tests for link teardown (DISC / DISC / UA).
//!
//! Same harness as the transfer tests: a `tokio::io::duplex` pipe, tapped
//! [`Simulator`] ends, paused time.

use serial_link::{
    frame::Address,
    simulator::{Fault, Simulator, WireTap},
    supervision::{recv_supervision, send_supervision},
    Control, Link, LinkConfig, LinkError, LinkState, Role, StreamTransport,
};
use tokio::io::{duplex, AsyncReadExt, DuplexStream};

type End = Simulator<StreamTransport<DuplexStream>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(role: Role) -> LinkConfig {
    LinkConfig::new(role, "pipe")
        .with_timeout_secs(1)
        .with_retransmissions(3)
}

fn wire(tap: &WireTap) -> (End, End) {
    let (a, b) = duplex(64 * 1024);
    (
        Simulator::passthrough(StreamTransport::new(a)).with_tap(tap.clone(), Role::Initiator),
        Simulator::passthrough(StreamTransport::new(b)).with_tap(tap.clone(), Role::Responder),
    )
}

/// Establish a pair of links over `ends`.
async fn establish(
    (initiator_end, responder_end): (End, End),
    responder_config: LinkConfig,
) -> (Link<End>, Link<End>) {
    let responder = tokio::spawn(Link::open(responder_config, responder_end));
    let initiator = Link::open(config(Role::Initiator), initiator_end)
        .await
        .expect("initiator open");
    (initiator, responder.await.unwrap().expect("responder open"))
}

/// Drive the responder side of a teardown: see DISC in `receive`, then close.
async fn responder_teardown(mut link: Link<End>) -> (Link<End>, Result<(), LinkError>) {
    let err = link.receive().await.unwrap_err();
    assert!(matches!(err, LinkError::PeerDisconnected));
    assert_eq!(link.state(), LinkState::PeerClosing);
    let result = link.close().await;
    (link, result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Closing twice is harmless; operations after close are refused.
#[tokio::test(start_paused = true)]
async fn close_is_idempotent() {
    let tap = WireTap::new();
    let (mut initiator, responder) = establish(wire(&tap), config(Role::Responder)).await;
    let responder = tokio::spawn(responder_teardown(responder));

    initiator.close().await.unwrap();
    initiator.close().await.unwrap();
    assert_eq!(initiator.state(), LinkState::Closed);
    assert!(matches!(
        initiator.send(b"late").await,
        Err(LinkError::NotEstablished)
    ));
    assert!(matches!(
        initiator.receive().await,
        Err(LinkError::NotEstablished)
    ));

    let (responder, result) = responder.await.unwrap();
    result.unwrap();
    assert_eq!(responder.state(), LinkState::Closed);
    assert_eq!(
        tap.controls(),
        vec![
            Control::Set,
            Control::Ua,
            Control::Disc,
            Control::Disc,
            Control::Ua,
        ]
    );
}

/// The initiator's final UA is lost: the responder re-sends DISC until its
/// budget runs out, then gives up and releases the channel.
#[tokio::test(start_paused = true)]
async fn lost_final_ua_is_bounded_on_the_responder() {
    let tap = WireTap::new();
    let (initiator_end, responder_end) = wire(&tap);
    // Initiator writes: 0 = SET, 1 = DISC, 2 = UA.
    let ends = (initiator_end.with_fault(2, Fault::Drop), responder_end);
    let (mut initiator, responder) = establish(ends, config(Role::Responder)).await;
    let responder = tokio::spawn(responder_teardown(responder));

    initiator.close().await.unwrap();

    let (responder, result) = responder.await.unwrap();
    assert!(matches!(
        result,
        Err(LinkError::BudgetExhausted { attempts: 3 })
    ));
    assert_eq!(responder.state(), LinkState::Closed);
    assert_eq!(responder.stats().timeouts, 3);
    assert_eq!(
        tap.controls_from(Role::Responder),
        vec![Control::Ua, Control::Disc, Control::Disc, Control::Disc]
    );
    // `initiator` stays alive until here so the responder's retries land.
    drop(initiator);
}

/// The responder's DISC is lost: the initiator repeats DISC and the
/// responder answers it again.
#[tokio::test(start_paused = true)]
async fn repeated_disc_is_answered_again() {
    let tap = WireTap::new();
    let (initiator_end, responder_end) = wire(&tap);
    // Responder writes: 0 = UA, 1 = DISC.
    let ends = (initiator_end, responder_end.with_fault(1, Fault::Drop));
    // A longer responder timeout lets the initiator's retry arrive first.
    let (mut initiator, responder) =
        establish(ends, config(Role::Responder).with_timeout_secs(5)).await;
    let responder = tokio::spawn(responder_teardown(responder));

    initiator.close().await.unwrap();

    let (responder, result) = responder.await.unwrap();
    result.unwrap();
    assert_eq!(responder.stats().retransmissions, 1);
    assert_eq!(responder.stats().timeouts, 0);
    assert_eq!(initiator.stats().timeouts, 1);
    assert_eq!(
        tap.controls_from(Role::Initiator),
        vec![Control::Set, Control::Disc, Control::Disc, Control::Ua]
    );
    assert_eq!(
        tap.controls_from(Role::Responder),
        vec![Control::Ua, Control::Disc, Control::Disc]
    );
}

/// A silent peer cannot keep the initiator's transport open.
#[tokio::test(start_paused = true)]
async fn initiator_close_releases_transport_when_peer_is_silent() {
    let tap = WireTap::new();
    let (a, b) = duplex(64 * 1024);
    let initiator_end =
        Simulator::passthrough(StreamTransport::new(a)).with_tap(tap.clone(), Role::Initiator);
    let mut peer = StreamTransport::new(b);

    let opening = tokio::spawn(Link::open(config(Role::Initiator), initiator_end));
    let set = recv_supervision(&mut peer, Address::Initiator, None)
        .await
        .unwrap();
    assert_eq!(set, Some(Control::Set));
    send_supervision(&mut peer, Address::Responder, Control::Ua)
        .await
        .unwrap();
    let mut link = opening.await.unwrap().unwrap();

    let err = link.close().await.unwrap_err();
    assert!(matches!(err, LinkError::BudgetExhausted { attempts: 3 }));
    assert_eq!(link.state(), LinkState::Closed);

    // Three DISC frames, then end-of-stream: the write half was shut down.
    let mut rest = Vec::new();
    peer.into_inner().read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest.len(), 3 * 5);
    assert_eq!(
        tap.controls(),
        vec![Control::Set, Control::Disc, Control::Disc, Control::Disc]
    );
}
