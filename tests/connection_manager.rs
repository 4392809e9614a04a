mod common;

use common::{ConnectCall, MockClock, MockDelay, MockTransport, MockWatchdog};
use nodehelper::network::session::{
    ConnectionManager, Error, MAX_MESSAGES_PER_CALL, ManagerConfig, SessionOptions, State,
};
use nodehelper::network::{Credentials, DisconnectReason};
use nodehelper::system::{Clock, Identity};
use std::sync::atomic::AtomicBool;

const BACKOFF_MS: u64 = 5_000;

fn identity() -> Identity {
    Identity::from_chip_id("esp8266", 1_234_567).unwrap()
}

fn topics(names: &[&str]) -> SessionOptions {
    let mut options = SessionOptions::new();
    for name in names {
        options.add_topic(name).unwrap();
    }
    options
}

fn ignore(_: &str, _: &[u8]) {}

fn anonymous(client_id: &str) -> ConnectCall {
    ConnectCall {
        client_id: client_id.to_string(),
        credentials: None,
    }
}

#[test]
fn test_initial_state() {
    let identity = identity();
    let manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
    assert_eq!(manager.state(), State::Disconnected);
    assert_eq!(manager.last_failure(), None);
    assert_eq!(manager.backoff_remaining_ms(), 0);
    assert_eq!(manager.identity(), &identity);
}

#[test]
fn test_first_reconnect_runs_full_handshake() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());

    manager
        .reconnect(&topics(&["/raw/esp8266/1234567/in"]), &mut ignore)
        .unwrap();

    assert_eq!(manager.state(), State::Connected);
    let transport = manager.transport();
    assert_eq!(transport.connects, [anonymous("esp8266-1234567")]);
    assert_eq!(
        transport.published,
        [(
            "/raw/esp8266/register".to_string(),
            br#"{"id":"1234567","ip":"0.0.0.0"}"#.to_vec()
        )]
    );
    assert_eq!(transport.subscribed, ["/raw/esp8266/1234567/in"]);
    // Inbound I/O is serviced once the session is up
    assert_eq!(transport.polls, 1);
}

#[test]
fn test_registration_reports_local_address() {
    let identity = identity();
    let mut transport = MockTransport::new();
    transport.address = Some("192.168.1.42".to_string());
    let mut manager = ConnectionManager::new(&identity, transport, MockClock::default());

    manager.reconnect(&SessionOptions::default(), &mut ignore).unwrap();

    assert_eq!(
        manager.transport().published[0].1,
        br#"{"id":"1234567","ip":"192.168.1.42"}"#.to_vec()
    );
}

#[test]
fn test_connected_after_n_plus_one_attempts() {
    for failures in 0..4 {
        let identity = identity();
        let clock = MockClock::default();
        let transport = MockTransport::failing(failures, DisconnectReason::ConnectionTimeout);
        let mut manager = ConnectionManager::new(&identity, transport, clock.clone());
        let options = topics(&["a", "b"]);

        let mut calls = 0;
        while manager.state() != State::Connected {
            calls += 1;
            let result = manager.reconnect(&options, &mut ignore);
            if calls <= failures {
                assert_eq!(
                    result,
                    Err(Error::HandshakeFailed(DisconnectReason::ConnectionTimeout))
                );
                assert_eq!(manager.state(), State::Disconnected);
                assert_eq!(
                    manager.last_failure(),
                    Some(DisconnectReason::ConnectionTimeout)
                );
            } else {
                assert_eq!(result, Ok(()));
            }
            clock.advance(BACKOFF_MS);
            assert!(calls <= failures + 1, "too many attempts");
        }

        assert_eq!(calls, failures + 1);
        let transport = manager.transport();
        assert_eq!(transport.connects.len(), failures + 1);
        assert_eq!(transport.subscribed, ["a", "b"]);
    }
}

#[test]
fn test_backoff_window_makes_no_attempt() {
    let identity = identity();
    let clock = MockClock::default();
    let transport = MockTransport::failing(1, DisconnectReason::Unavailable);
    let mut manager = ConnectionManager::new(&identity, transport, clock.clone());
    let options = SessionOptions::default();

    assert_eq!(
        manager.reconnect(&options, &mut ignore),
        Err(Error::HandshakeFailed(DisconnectReason::Unavailable))
    );
    assert_eq!(manager.backoff_remaining_ms(), BACKOFF_MS);

    clock.advance(1_000);
    assert_eq!(
        manager.reconnect(&options, &mut ignore),
        Err(Error::RetryPending { remaining_ms: 4_000 })
    );
    clock.advance(3_999);
    assert_eq!(
        manager.reconnect(&options, &mut ignore),
        Err(Error::RetryPending { remaining_ms: 1 })
    );
    assert_eq!(manager.transport().connects.len(), 1);

    clock.advance(1);
    assert_eq!(manager.reconnect(&options, &mut ignore), Ok(()));
    assert_eq!(manager.transport().connects.len(), 2);
    assert_eq!(manager.backoff_remaining_ms(), 0);
}

#[test]
fn test_custom_backoff() {
    let identity = identity();
    let clock = MockClock::default();
    let config = ManagerConfig {
        backoff_ms: 250,
        ..ManagerConfig::default()
    };
    let transport = MockTransport::failing(1, DisconnectReason::ConnectFailed);
    let mut manager = ConnectionManager::with_config(&identity, transport, clock.clone(), config);

    assert!(manager.reconnect(&SessionOptions::default(), &mut ignore).is_err());
    assert_eq!(manager.backoff_remaining_ms(), 250);
    clock.advance(250);
    assert_eq!(manager.reconnect(&SessionOptions::default(), &mut ignore), Ok(()));
}

#[test]
fn test_reconnect_while_connected_makes_no_attempt() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
    let options = topics(&["a"]);

    manager.reconnect(&options, &mut ignore).unwrap();
    for _ in 0..10 {
        manager.reconnect(&options, &mut ignore).unwrap();
    }

    let transport = manager.transport();
    assert_eq!(transport.connects.len(), 1);
    assert_eq!(transport.subscribed, ["a"]);
    assert_eq!(transport.polls, 11);
}

#[test]
fn test_publish_before_reconnect_is_not_ready() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());

    assert_eq!(manager.publish("/t", b"x"), Err(Error::NotReady));
    assert_eq!(manager.transport().calls.get(), 0);
}

#[test]
fn test_publish_while_disconnected_touches_nothing() {
    let identity = identity();
    let transport = MockTransport::failing(1, DisconnectReason::ConnectFailed);
    let mut manager = ConnectionManager::new(&identity, transport, MockClock::default());
    let _ = manager.reconnect(&SessionOptions::default(), &mut ignore);

    let calls = manager.transport().calls.get();
    assert_eq!(manager.publish("/t", b"x"), Err(Error::NotConnected));
    assert_eq!(manager.publish_status("position", b"x"), Err(Error::NotConnected));
    assert_eq!(manager.transport().calls.get(), calls);
}

#[test]
fn test_publish_when_connected() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
    manager.reconnect(&SessionOptions::default(), &mut ignore).unwrap();

    manager.publish("/custom", b"1").unwrap();
    manager.publish_status("position", b"42").unwrap();

    let published = &manager.transport().published;
    assert_eq!(published[1], ("/custom".to_string(), b"1".to_vec()));
    assert_eq!(
        published[2],
        ("/raw/esp8266/1234567/position".to_string(), b"42".to_vec())
    );
    assert_eq!(
        manager.topic("status").unwrap().as_str(),
        "/raw/esp8266/1234567/status"
    );
}

#[test]
fn test_publish_rejected_by_transport() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
    manager.reconnect(&SessionOptions::default(), &mut ignore).unwrap();

    manager.transport_mut().reject_publish = true;
    assert_eq!(manager.publish("/t", b"x"), Err(Error::PublishFailed));
    assert_eq!(manager.state(), State::Connected);
}

#[test]
fn test_status_topic_too_long() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
    manager.reconnect(&SessionOptions::default(), &mut ignore).unwrap();

    let suffix = "s".repeat(200);
    assert_eq!(manager.publish_status(&suffix, b"x"), Err(Error::TopicTooLong));
}

#[test]
fn test_full_credentials_are_passed() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
    let options = SessionOptions::new().with_credentials(Credentials::new("user", "secret").unwrap());

    manager.reconnect(&options, &mut ignore).unwrap();

    assert_eq!(
        manager.transport().connects[0].credentials,
        Some(("user".to_string(), "secret".to_string()))
    );
}

#[test]
fn test_one_sided_credentials_connect_anonymously() {
    for (user, password) in [(Some("user"), None), (None, Some("secret")), (Some(""), Some("secret"))] {
        let identity = identity();
        let mut manager =
            ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
        let mut options = SessionOptions::new();
        options.credentials = Credentials::from_parts(user, password);

        manager.reconnect(&options, &mut ignore).unwrap();

        assert_eq!(manager.transport().connects[0].credentials, None);
    }
}

#[test]
fn test_empty_topic_set_subscribes_nothing() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());

    manager.reconnect(&SessionOptions::default(), &mut ignore).unwrap();

    assert_eq!(manager.state(), State::Connected);
    assert!(manager.transport().subscribed.is_empty());
}

#[test]
fn test_topics_resubscribed_after_drop() {
    let identity = identity();
    let clock = MockClock::default();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), clock.clone());
    let options = topics(&["a", "b"]);

    manager.reconnect(&options, &mut ignore).unwrap();
    assert_eq!(manager.transport().subscribed, ["a", "b"]);

    manager
        .transport_mut()
        .drop_connection(DisconnectReason::ConnectionLost);

    // No backoff after a drop: the same call reconnects
    manager.reconnect(&options, &mut ignore).unwrap();
    assert_eq!(manager.state(), State::Connected);
    assert_eq!(manager.last_failure(), Some(DisconnectReason::ConnectionLost));

    let transport = manager.transport();
    assert_eq!(transport.connects.len(), 2);
    assert_eq!(transport.subscribed, ["a", "b", "a", "b"]);
    assert_eq!(transport.published.len(), 2, "one registration per handshake");
}

#[test]
fn test_drop_then_failed_handshake_backs_off() {
    let identity = identity();
    let clock = MockClock::default();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), clock.clone());
    let options = SessionOptions::default();
    manager.reconnect(&options, &mut ignore).unwrap();

    let transport = manager.transport_mut();
    transport.drop_connection(DisconnectReason::ConnectionLost);
    transport.fail_connects = 1;
    transport.failure = DisconnectReason::BadCredentials;

    assert_eq!(
        manager.reconnect(&options, &mut ignore),
        Err(Error::HandshakeFailed(DisconnectReason::BadCredentials))
    );
    assert_eq!(manager.last_failure().map(DisconnectReason::code), Some(4));
    assert!(matches!(
        manager.reconnect(&options, &mut ignore),
        Err(Error::RetryPending { .. })
    ));
}

#[test]
fn test_failed_registration_does_not_abort() {
    let identity = identity();
    let mut transport = MockTransport::new();
    transport.reject_publish = true;
    let mut manager = ConnectionManager::new(&identity, transport, MockClock::default());

    manager.reconnect(&topics(&["a"]), &mut ignore).unwrap();

    assert_eq!(manager.state(), State::Connected);
    assert_eq!(manager.transport().subscribed, ["a"]);
}

#[test]
fn test_failed_subscriptions_do_not_abort() {
    let identity = identity();
    let mut transport = MockTransport::new();
    transport.reject_subscribe = true;
    let mut manager = ConnectionManager::new(&identity, transport, MockClock::default());

    manager.reconnect(&topics(&["a", "b"]), &mut ignore).unwrap();

    assert_eq!(manager.state(), State::Connected);
    assert_eq!(manager.transport().subscribed, ["a", "b"]);
}

#[test]
fn test_inbound_messages_are_delivered() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
    let options = SessionOptions::default();
    manager.reconnect(&options, &mut ignore).unwrap();

    for i in 0..MAX_MESSAGES_PER_CALL + 2 {
        manager
            .transport_mut()
            .push_inbound("/raw/esp8266/1234567/in", format!("{i}").as_bytes());
    }

    let mut received = Vec::new();
    let mut handler = |topic: &str, payload: &[u8]| {
        received.push((topic.to_string(), String::from_utf8(payload.to_vec()).unwrap()));
    };
    manager.reconnect(&options, &mut handler).unwrap();
    assert_eq!(received_len(&manager), 2);
    manager.reconnect(&options, &mut handler).unwrap();

    assert_eq!(received.len(), MAX_MESSAGES_PER_CALL + 2);
    assert_eq!(received[0], ("/raw/esp8266/1234567/in".to_string(), "0".to_string()));
    assert_eq!(received[9].1, "9");
}

fn received_len(manager: &ConnectionManager<'_, MockTransport, MockClock>) -> usize {
    manager.transport().inbound.len()
}

#[test]
fn test_poll_failure_disconnects() {
    let identity = identity();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), MockClock::default());
    let options = SessionOptions::default();
    manager.reconnect(&options, &mut ignore).unwrap();

    manager.transport_mut().poll_error = Some(DisconnectReason::ConnectionLost);
    assert_eq!(manager.reconnect(&options, &mut ignore), Err(Error::NotConnected));
    assert_eq!(manager.state(), State::Disconnected);
    assert_eq!(manager.last_failure(), Some(DisconnectReason::ConnectionLost));
    assert_eq!(manager.publish("/t", b"x"), Err(Error::NotConnected));

    // Reconnects right away
    manager.reconnect(&options, &mut ignore).unwrap();
    assert_eq!(manager.state(), State::Connected);
    assert_eq!(manager.transport().connects.len(), 2);
}

#[test]
fn test_adopts_already_connected_transport() {
    let identity = identity();
    let mut transport = MockTransport::new();
    transport.connected = true;
    let mut manager = ConnectionManager::new(&identity, transport, MockClock::default());

    manager.reconnect(&topics(&["a"]), &mut ignore).unwrap();

    assert_eq!(manager.state(), State::Connected);
    assert!(manager.transport().connects.is_empty());
    manager.publish("/t", b"x").unwrap();
}

// ========================
// Blocking wrapper
// ========================

#[test]
fn test_run_until_connected_waits_out_backoff() {
    let identity = identity();
    let clock = MockClock::default();
    let transport = MockTransport::failing(2, DisconnectReason::ConnectFailed);
    let mut manager = ConnectionManager::new(&identity, transport, clock.clone());
    let mut delay = MockDelay::new(&clock);
    let mut watchdog = MockWatchdog::default();
    let cancel = AtomicBool::new(false);

    manager
        .run_until_connected(
            &topics(&["a"]),
            &mut ignore,
            &mut delay,
            &mut watchdog,
            &cancel,
        )
        .unwrap();

    assert_eq!(manager.state(), State::Connected);
    assert_eq!(manager.transport().connects.len(), 3);
    assert_eq!(clock.now_ms(), 2 * BACKOFF_MS);
    assert!(delay.waits.iter().all(|ms| *ms <= 100));
    // One feed per slice plus one per failed attempt
    assert_eq!(watchdog.feeds, delay.waits.len() + 2);
    assert_eq!(delay.waits.len(), 100);
}

#[test]
fn test_run_until_connected_stops_on_cancel() {
    let identity = identity();
    let clock = MockClock::default();
    let transport = MockTransport::failing(usize::MAX, DisconnectReason::ConnectFailed);
    let mut manager = ConnectionManager::new(&identity, transport, clock.clone());
    let mut delay = MockDelay::new(&clock);
    let cancel = AtomicBool::new(false);
    let mut watchdog = MockWatchdog {
        feeds: 0,
        cancel_after: Some((10, &cancel)),
    };

    let result = manager.run_until_connected(
        &SessionOptions::default(),
        &mut ignore,
        &mut delay,
        &mut watchdog,
        &cancel,
    );

    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(manager.transport().connects.len(), 1);
    assert_eq!(watchdog.feeds, 10);
    assert!(clock.now_ms() < BACKOFF_MS);
}

#[test]
fn test_run_until_connected_cancelled_up_front() {
    let identity = identity();
    let clock = MockClock::default();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), clock.clone());
    let mut delay = MockDelay::new(&clock);
    let mut watchdog = MockWatchdog::default();
    let cancel = AtomicBool::new(true);

    let result = manager.run_until_connected(
        &SessionOptions::default(),
        &mut ignore,
        &mut delay,
        &mut watchdog,
        &cancel,
    );

    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(manager.transport().calls.get(), 0);
}

#[test]
fn test_run_until_connected_returns_at_once_when_connected() {
    let identity = identity();
    let clock = MockClock::default();
    let mut manager = ConnectionManager::new(&identity, MockTransport::new(), clock.clone());
    let mut delay = MockDelay::new(&clock);
    let mut watchdog = MockWatchdog::default();
    let cancel = AtomicBool::new(false);

    manager
        .run_until_connected(
            &SessionOptions::default(),
            &mut ignore,
            &mut delay,
            &mut watchdog,
            &cancel,
        )
        .unwrap();

    assert!(delay.waits.is_empty());
    assert_eq!(manager.transport().connects.len(), 1);
}
