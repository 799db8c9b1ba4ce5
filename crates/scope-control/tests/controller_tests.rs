//! Connection lifecycle against a scripted negotiator

mod common;

use common::{
    fail_stream, wait_for_state, wait_until, FakeNegotiator, Observed, RecordingObserver, Script,
};
use scope_control::error::{ConnectionError, ParameterSendError};
use scope_control::webrtc::PeerEvent;
use scope_control::{
    ConnectionConfig, ConnectionController, ConnectionState, DisconnectReason, ReconnectPolicy,
};
use scope_core::parameters::ScopeParameters;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn controller(negotiator: &Arc<FakeNegotiator>, reconnect: ReconnectPolicy) -> ConnectionController {
    ConnectionController::new(
        negotiator.clone(),
        ConnectionConfig {
            reconnect,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_connect_reaches_connected() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());

    controller.connect().await;

    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(controller.session_id().as_deref(), Some("session-1"));
    assert!(controller.error().is_none());
    assert_eq!(
        observer.events(),
        vec![
            Observed::State(ConnectionState::Idle, ConnectionState::Connecting),
            Observed::State(ConnectionState::Connecting, ConnectionState::Connected),
        ]
    );
    assert_eq!(
        negotiator.options.lock()[0].control_channel.as_deref(),
        Some("parameters")
    );
}

#[tokio::test]
async fn test_stream_and_channel_events_reach_observers() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());

    controller.connect().await;
    let peer = negotiator.last_peer().unwrap();
    peer.emit(PeerEvent::Track(common::FakeTrack::video("video-0")));
    peer.emit(PeerEvent::Track(common::FakeTrack::video("video-1")));
    peer.emit(PeerEvent::ChannelOpen);

    wait_until(|| observer.count(|e| matches!(e, Observed::ChannelOpen(_))) == 1).await;
    assert_eq!(observer.count(|e| matches!(e, Observed::Stream(1))), 1);
    assert!(observer
        .events()
        .contains(&Observed::ChannelOpen("parameters".to_string())));
}

#[tokio::test]
async fn test_connect_ignored_while_connecting() {
    let negotiator = FakeNegotiator::new([Script::Hang]);
    let controller = controller(&negotiator, ReconnectPolicy::default());

    let first = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.connect().await })
    };
    negotiator.started.notified().await;
    assert_eq!(controller.state(), ConnectionState::Connecting);

    controller.connect().await;
    controller.retry().await;
    assert_eq!(negotiator.call_count(), 1);

    controller.disconnect().await;
    first.await.unwrap();
    assert_eq!(controller.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_from_idle_is_noop() {
    let negotiator = FakeNegotiator::new([]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());

    controller.disconnect().await;

    assert_eq!(controller.state(), ConnectionState::Idle);
    assert!(observer.events().is_empty());
    assert_eq!(negotiator.call_count(), 0);
}

#[tokio::test]
async fn test_disconnect_while_connecting_cancels() {
    let negotiator = FakeNegotiator::new([Script::Hang]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let mut states = controller.subscribe();

    let connect = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.connect().await })
    };
    negotiator.started.notified().await;

    controller.disconnect().await;
    tokio::time::timeout(Duration::from_secs(5), connect)
        .await
        .unwrap()
        .unwrap();

    wait_for_state(&mut states, ConnectionState::Disconnected).await;
    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert!(controller.error().is_none());
    assert!(controller.session_id().is_none());
}

#[tokio::test]
async fn test_failed_connect_records_error_then_retry() {
    let negotiator = FakeNegotiator::new([Script::Fail, Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());

    controller.connect().await;
    assert_eq!(controller.state(), ConnectionState::Error);
    assert!(matches!(
        controller.error(),
        Some(ConnectionError::Negotiation(_))
    ));

    controller.clear_error();
    assert!(controller.error().is_none());
    assert_eq!(controller.state(), ConnectionState::Error);

    controller.retry().await;
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(negotiator.call_count(), 2);
}

#[tokio::test]
async fn test_disconnect_tears_down_session() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());

    controller.connect().await;
    let peer = negotiator.last_peer().unwrap();

    controller.disconnect().await;

    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert!(peer.is_closed());
    assert!(!peer.channels.lock()[0].open.load(Ordering::SeqCst));
    assert_eq!(observer.count(|e| *e == Observed::ChannelClose), 1);
    assert_eq!(observer.count(|e| matches!(e, Observed::Disconnect(_))), 0);

    // A second disconnect changes nothing
    controller.disconnect().await;
    assert_eq!(observer.count(|e| *e == Observed::ChannelClose), 1);
}

#[tokio::test]
async fn test_send_parameters_requires_open_channel() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let params = ScopeParameters::default();

    let result = controller.send_parameters(&params).await;
    assert!(matches!(result, Err(ParameterSendError::ChannelNotOpen)));
    assert_eq!(controller.state(), ConnectionState::Idle);

    controller.connect().await;
    controller.send_parameters(&params).await.unwrap();
    let peer = negotiator.last_peer().unwrap();
    let channel = peer.channels.lock()[0].clone();
    assert_eq!(channel.sent.lock().len(), 1);

    channel.open.store(false, Ordering::SeqCst);
    let result = controller.send_parameters(&params).await;
    assert!(matches!(result, Err(ParameterSendError::ChannelNotOpen)));
    assert_eq!(controller.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_stream_loss() {
    let negotiator = FakeNegotiator::new([Script::Succeed, Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());
    let mut states = controller.subscribe();

    controller.connect().await;
    let first_peer = negotiator.last_peer().unwrap();
    fail_stream(&first_peer);

    wait_for_state(&mut states, ConnectionState::Reconnecting).await;
    wait_for_state(&mut states, ConnectionState::Connected).await;

    assert!(first_peer.is_closed());
    assert_eq!(negotiator.call_count(), 2);
    assert_eq!(controller.session_id().as_deref(), Some("session-2"));
    assert_eq!(controller.reconnect_attempt(), 0);
    assert_eq!(
        observer.count(|e| *e == Observed::Disconnect(DisconnectReason::StreamStopped)),
        1
    );
    assert_eq!(observer.count(|e| *e == Observed::ChannelClose), 1);
    let events = observer.events();
    let close = events.iter().position(|e| *e == Observed::ChannelClose);
    let lost = events
        .iter()
        .position(|e| matches!(e, Observed::Disconnect(_)));
    assert!(close < lost);

    let times = negotiator.call_times();
    assert!(times[1] - times[0] >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_peer_event_stream_end_triggers_reconnect() {
    let negotiator = FakeNegotiator::new([Script::Succeed, Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());
    let mut states = controller.subscribe();

    controller.connect().await;
    let first_peer = negotiator.last_peer().unwrap();
    first_peer.end_events();

    wait_for_state(&mut states, ConnectionState::Reconnecting).await;
    wait_for_state(&mut states, ConnectionState::Connected).await;

    assert!(first_peer.is_closed());
    assert_eq!(negotiator.call_count(), 2);
    assert_eq!(controller.session_id().as_deref(), Some("session-2"));
    assert_eq!(
        observer.count(|e| *e == Observed::Disconnect(DisconnectReason::StreamStopped)),
        1
    );
    assert_eq!(observer.count(|e| *e == Observed::ChannelClose), 1);
}

#[tokio::test]
async fn test_event_stream_end_after_disconnect_is_ignored() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());

    controller.connect().await;
    let peer = negotiator.last_peer().unwrap();
    controller.disconnect().await;
    peer.end_events();
    tokio::task::yield_now().await;

    assert_eq!(controller.state(), ConnectionState::Disconnected);
    assert_eq!(negotiator.call_count(), 1);
    assert_eq!(observer.count(|e| matches!(e, Observed::Disconnect(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_exhaustion_then_retry() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let mut states = controller.subscribe();

    controller.connect().await;
    fail_stream(&negotiator.last_peer().unwrap());

    wait_for_state(&mut states, ConnectionState::Error).await;
    assert_eq!(negotiator.call_count(), 4);
    assert_eq!(
        controller.error(),
        Some(ConnectionError::ReconnectExhausted(3))
    );

    let times = negotiator.call_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps[0] >= Duration::from_secs(1));
    assert!(gaps[1] >= Duration::from_secs(2) && gaps[1] < Duration::from_secs(4));
    assert!(gaps[2] >= Duration::from_secs(4) && gaps[2] < Duration::from_secs(8));

    // No further automatic attempts
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(negotiator.call_count(), 4);

    negotiator.push(Script::Succeed);
    controller.retry().await;
    assert_eq!(controller.state(), ConnectionState::Connected);
    assert_eq!(negotiator.call_count(), 5);
    assert!(controller.error().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_double() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let mut states = controller.subscribe();

    controller.connect().await;
    let lost_at = tokio::time::Instant::now();
    fail_stream(&negotiator.last_peer().unwrap());
    wait_for_state(&mut states, ConnectionState::Error).await;

    let times = negotiator.call_times();
    let offsets: Vec<Duration> = times[1..].iter().map(|t| *t - lost_at).collect();
    // 1s, then +2s, then +4s
    assert_eq!(offsets.len(), 3);
    assert!(offsets[0] >= Duration::from_secs(1) && offsets[0] < Duration::from_millis(1100));
    assert!(offsets[1] >= Duration::from_secs(3) && offsets[1] < Duration::from_millis(3100));
    assert!(offsets[2] >= Duration::from_secs(7) && offsets[2] < Duration::from_millis(7100));
}

#[tokio::test]
async fn test_channel_close_without_reconnect_is_error() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(
        &negotiator,
        ReconnectPolicy {
            on_channel_close: false,
            ..Default::default()
        },
    );
    let observer = Arc::new(RecordingObserver::default());
    controller.add_observer(observer.clone());
    let mut states = controller.subscribe();

    controller.connect().await;
    negotiator.last_peer().unwrap().emit(PeerEvent::ChannelClosed);

    wait_for_state(&mut states, ConnectionState::Error).await;
    assert_eq!(controller.error(), Some(ConnectionError::ChannelClosed));
    assert_eq!(negotiator.call_count(), 1);
    assert_eq!(
        observer.count(|e| *e == Observed::Disconnect(DisconnectReason::ChannelClosed)),
        1
    );
    assert_eq!(observer.count(|e| *e == Observed::ChannelClose), 1);
}

#[tokio::test]
async fn test_predicate_vetoes_reconnect() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    controller.set_reconnect_predicate(|reason| reason != DisconnectReason::StreamStopped);
    let mut states = controller.subscribe();

    controller.connect().await;
    fail_stream(&negotiator.last_peer().unwrap());

    wait_for_state(&mut states, ConnectionState::Error).await;
    assert_eq!(controller.error(), Some(ConnectionError::StreamStopped));
    assert_eq!(negotiator.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff_stops_reconnecting() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let mut states = controller.subscribe();

    controller.connect().await;
    fail_stream(&negotiator.last_peer().unwrap());
    wait_for_state(&mut states, ConnectionState::Reconnecting).await;

    controller.disconnect().await;
    assert_eq!(controller.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(negotiator.call_count(), 1);
    assert_eq!(controller.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_zero_attempts_goes_straight_to_error() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(
        &negotiator,
        ReconnectPolicy {
            max_attempts: 0,
            ..Default::default()
        },
    );
    let mut states = controller.subscribe();

    controller.connect().await;
    fail_stream(&negotiator.last_peer().unwrap());

    wait_for_state(&mut states, ConnectionState::Error).await;
    assert_eq!(
        controller.error(),
        Some(ConnectionError::ReconnectExhausted(0))
    );
    assert_eq!(negotiator.call_count(), 1);
}

#[tokio::test]
async fn test_initial_parameters_passed_to_negotiation() {
    let negotiator = FakeNegotiator::new([Script::Succeed]);
    let controller = controller(&negotiator, ReconnectPolicy::default());
    let params = ScopeParameters {
        noise_scale: 0.42,
        ..Default::default()
    };
    controller.set_initial_parameters(Some(params.clone()));

    controller.connect().await;

    assert_eq!(
        negotiator.options.lock()[0].initial_parameters,
        Some(params)
    );
}
