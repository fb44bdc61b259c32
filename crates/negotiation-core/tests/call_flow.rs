//! Start / call / hang-up through the call controller

use std::sync::Arc;
use std::time::Duration;

use rvoip_negotiation_core::prelude::*;
use rvoip_negotiation_core::LoopbackFactory;

async fn wait_for(check: impl Fn() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_loopback_call_renders_caller_stream() {
    let source = Arc::new(SyntheticMediaSource::new());
    let sink = Arc::new(CollectingMediaSink::new());
    let (call, transports) = CallController::loopback(&CallConfig::default(), source.clone(), sink.clone()).unwrap();

    let stream = call.start().await.unwrap();
    assert_eq!(call.state().await, CallState::MediaReady);

    call.call().await.unwrap();
    assert_eq!(call.state().await, CallState::InCall);

    let caller = call.caller().await.unwrap();
    let callee = call.callee().await.unwrap();
    assert_eq!(caller.phase().await, Phase::Stable);
    assert_eq!(callee.phase().await, Phase::Stable);

    // The offer advertises the caller's stream and the callee renders it
    let offer = callee.remote_description().await.unwrap();
    assert!(offer.payload.contains(&format!("a=msid:{} audio", stream.id)));
    assert!(wait_for(|| sink.attached().len() == 1).await);
    assert_eq!(sink.attached()[0].id, stream.id);

    let caller_transport = transports.transport(caller.id()).unwrap();
    assert_eq!(caller_transport.local_stream(), Some(stream));

    call.hang_up().await.unwrap();
    assert_eq!(call.state().await, CallState::Idle);
    assert!(caller.is_closed().await);
    assert!(callee.is_closed().await);
    assert!(caller_transport.is_closed());
    assert_eq!(source.outstanding(), 0);
    assert_eq!(call.coordinator().session_count(), 0);
    assert!(transports.transport(caller.id()).is_none());
    assert!(transports.is_empty());
}

#[tokio::test]
async fn test_hang_up_twice_is_harmless() {
    let source = Arc::new(SyntheticMediaSource::new());
    let (call, _) =
        CallController::loopback(&CallConfig::default(), source.clone(), Arc::new(CollectingMediaSink::new())).unwrap();
    call.start().await.unwrap();
    call.call().await.unwrap();
    let caller = call.caller().await.unwrap();

    call.hang_up().await.unwrap();
    call.hang_up().await.unwrap();
    assert_eq!(source.outstanding(), 0);
    assert!(matches!(
        caller.create_offer().await,
        Err(NegotiationError::SessionClosed { .. })
    ));
}

#[tokio::test]
async fn test_failed_negotiation_returns_to_media_ready() {
    let factory = Arc::new(LoopbackFactory::new(
        LoopbackConfig::default().with_offer_failure("transport unavailable"),
    ));
    let source = Arc::new(SyntheticMediaSource::new());
    let call = CallController::new(
        NegotiationConfig::default(),
        factory.clone(),
        source.clone(),
        Arc::new(CollectingMediaSink::new()),
    );

    call.start().await.unwrap();
    let err = call.call().await.unwrap_err();
    assert!(matches!(err, NegotiationError::NegotiationFailed { .. }));
    assert_eq!(call.state().await, CallState::MediaReady);
    assert!(call.caller().await.is_none());
    assert_eq!(call.coordinator().stats().negotiations_failed, 1);
    assert!(factory.is_empty());

    call.hang_up().await.unwrap();
    assert_eq!(call.state().await, CallState::Idle);
    assert_eq!(source.outstanding(), 0);
}

#[tokio::test]
async fn test_attach_failure_discards_both_sessions() {
    let factory = Arc::new(LoopbackFactory::new(
        LoopbackConfig::default().with_attach_failure("no encoder"),
    ));
    let call = CallController::new(
        NegotiationConfig::default(),
        factory.clone(),
        Arc::new(SyntheticMediaSource::new()),
        Arc::new(CollectingMediaSink::new()),
    );
    let mut events = call.coordinator().subscribe();

    call.start().await.unwrap();
    let err = call.call().await.unwrap_err();
    assert!(matches!(err, NegotiationError::Transport { .. }));
    assert_eq!(call.state().await, CallState::MediaReady);
    assert!(call.caller().await.is_none());
    assert!(call.callee().await.is_none());

    // Nothing was registered, started or left behind
    assert!(factory.is_empty());
    assert_eq!(call.coordinator().session_count(), 0);
    assert_eq!(call.coordinator().stats().negotiations_started, 0);
    assert!(events.try_recv().is_err());

    // Retrying fails the same way without accumulating transports
    assert!(call.call().await.is_err());
    assert!(factory.is_empty());
}

#[tokio::test]
async fn test_slow_transport_still_connects() {
    let config = CallConfig::default()
        .with_creation_delay(Duration::from_millis(20))
        .with_host_candidates(4);
    let (call, transports) = CallController::loopback(
        &config,
        Arc::new(SyntheticMediaSource::new()),
        Arc::new(CollectingMediaSink::new()),
    )
    .unwrap();

    call.start().await.unwrap();
    call.call().await.unwrap();

    let callee = call.callee().await.unwrap();
    let callee_transport = transports.transport(callee.id()).unwrap();
    assert!(wait_for(|| callee_transport.remote_candidates().len() == 4).await);
    let sequences: Vec<u64> = callee_transport.remote_candidates().iter().map(|c| c.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
}
