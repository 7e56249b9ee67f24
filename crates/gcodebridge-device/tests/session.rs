//! Device session behaviour against the dry-run transport.

use gcodebridge_core::{HandlerChain, SessionError};
use gcodebridge_device::transport::dry_run::DRY_RUN_STATUS;
use gcodebridge_device::{DeviceSession, DryRunTransport, LineTransport, SessionConfig};
use gcodebridge_triggers::TriggerEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

fn client() -> SocketAddr {
    "127.0.0.1:50000".parse().unwrap()
}

fn start_session(
    transport: Arc<DryRunTransport>,
    config: SessionConfig,
) -> Arc<DeviceSession> {
    Arc::new(DeviceSession::start(
        transport,
        Arc::new(TriggerEngine::empty()),
        Arc::new(HandlerChain::new()),
        config,
    ))
}

fn no_probing() -> SessionConfig {
    SessionConfig {
        liveness_period: Duration::ZERO,
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn test_single_command_echo() {
    let transport = Arc::new(DryRunTransport::new());
    let session = start_session(transport.clone(), no_probing());

    let response = session.submit("G28".to_string(), client()).await.unwrap();
    assert_eq!(response.terminal, "ok");
    assert!(response.preamble.is_empty());
    assert_eq!(transport.writes(), vec!["G28"]);

    session.stop().await;
}

#[tokio::test]
async fn test_same_submitter_sees_fifo_responses() {
    let transport = Arc::new(DryRunTransport::new());
    let session = start_session(transport.clone(), no_probing());

    for line in ["G0 X10", "G0 Y10", "G0 Z10"] {
        let response = session.submit(line.to_string(), client()).await.unwrap();
        assert_eq!(response.terminal, "ok");
    }
    assert_eq!(transport.writes(), vec!["G0 X10", "G0 Y10", "G0 Z10"]);

    session.stop().await;
}

#[tokio::test]
async fn test_concurrent_submitters_are_serialised() {
    let transport = Arc::new(DryRunTransport::new());
    let session = start_session(transport.clone(), no_probing());

    let mut handles = Vec::new();
    for i in 0..8 {
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            session.submit(format!("G1 X{}", i), client()).await
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.terminal, "ok");
    }

    // Every write is a complete line of its own; nothing interleaved.
    let writes = transport.writes();
    assert_eq!(writes.len(), 8);
    for write in writes {
        assert!(write.starts_with("G1 X"), "unexpected write: {}", write);
    }

    session.stop().await;
}

#[tokio::test]
async fn test_command_timeout_yields_synthetic_error() {
    let transport = Arc::new(DryRunTransport::unresponsive());
    let config = SessionConfig {
        response_timeout: Duration::from_millis(100),
        ..no_probing()
    };
    let session = start_session(transport.clone(), config);

    let response = session.submit("G28".to_string(), client()).await.unwrap();
    assert_eq!(response.terminal, "error:timeout");

    // Still silent: the next command completes with its own timeout
    // instead of hanging.
    let response = session.submit("G0 X1".to_string(), client()).await.unwrap();
    assert_eq!(response.terminal, "error:timeout");

    // The device comes back but never answers the dropped commands. The
    // first fresh acknowledgement is reconciled against the timed-out
    // command; after that one-off, command/response pairing is clean again.
    transport.set_responding(true);
    let reconciled = session.submit("G0 X2".to_string(), client()).await.unwrap();
    assert_eq!(reconciled.terminal, "error:timeout");
    let response = session.submit("G0 X3".to_string(), client()).await.unwrap();
    assert_eq!(response.terminal, "ok");

    session.stop().await;
}

#[tokio::test]
async fn test_late_terminal_of_timed_out_command_is_not_misattributed() {
    let transport = Arc::new(DryRunTransport::unresponsive());
    let config = SessionConfig {
        response_timeout: Duration::from_millis(150),
        ..no_probing()
    };
    let session = start_session(transport.clone(), config);

    let first = session.submit("G28".to_string(), client()).await.unwrap();
    assert_eq!(first.terminal, "error:timeout");

    let second = {
        let session = session.clone();
        tokio::spawn(async move { session.submit("G0 X1".to_string(), client()).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The device finally answers the timed-out command while the next one
    // is in flight, then answers the in-flight one.
    transport.inject_line("error:9");
    tokio::time::sleep(Duration::from_millis(10)).await;
    transport.inject_line("ok");

    let response = second.await.unwrap().unwrap();
    assert_eq!(
        response.terminal, "ok",
        "late answer to the timed-out command leaked into the next reply"
    );

    session.stop().await;
}

#[tokio::test]
async fn test_client_status_query_gets_status_frame() {
    let transport = Arc::new(DryRunTransport::new());
    let session = start_session(transport.clone(), no_probing());

    let response = session.submit("?".to_string(), client()).await.unwrap();
    assert_eq!(response.terminal, DRY_RUN_STATUS);

    session.stop().await;
}

#[tokio::test]
async fn test_probes_fire_while_idle_and_stay_internal() {
    let transport = Arc::new(DryRunTransport::new());
    let config = SessionConfig {
        liveness_period: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let session = start_session(transport.clone(), config);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let writes = transport.writes();
    assert!(
        writes.len() >= 3,
        "expected several probes over the idle period, saw {:?}",
        writes
    );
    assert!(writes.iter().all(|w| w == "?"));
    assert!(session.is_healthy());
    assert_eq!(session.last_status().as_deref(), Some(DRY_RUN_STATUS));

    // No probe ok was banked against the next real command.
    let response = session.submit("G28".to_string(), client()).await.unwrap();
    assert_eq!(response.terminal, "ok");

    session.stop().await;
}

#[tokio::test]
async fn test_probes_interleave_with_commands_without_stealing_responses() {
    let transport = Arc::new(DryRunTransport::new());
    let config = SessionConfig {
        liveness_period: Duration::from_millis(20),
        ..SessionConfig::default()
    };
    let session = start_session(transport.clone(), config);

    let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
    let mut commands = 0;
    while tokio::time::Instant::now() < deadline {
        let response = session
            .submit(format!("G1 X{}", commands), client())
            .await
            .unwrap();
        assert_eq!(response.terminal, "ok", "status frame leaked to a client");
        commands += 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let writes = transport.writes();
    let probes = writes.iter().filter(|w| *w == "?").count();
    assert_eq!(writes.len() - probes, commands, "every command written once");
    assert!(probes > 0, "expected probes interleaved with traffic");

    session.stop().await;
}

#[tokio::test]
async fn test_unhealthy_after_silent_probe_then_recovers() {
    let transport = Arc::new(DryRunTransport::unresponsive());
    let config = SessionConfig {
        liveness_period: Duration::from_millis(40),
        ..SessionConfig::default()
    };
    let session = start_session(transport.clone(), config);

    // First probe waits 2x the period before giving up.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!session.is_healthy());

    transport.set_responding(true);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(session.is_healthy());

    session.stop().await;
}

#[tokio::test]
async fn test_informational_lines_ride_in_the_preamble() {
    let transport = Arc::new(DryRunTransport::unresponsive());
    let session = start_session(transport.clone(), no_probing());

    let submit = {
        let session = session.clone();
        tokio::spawn(async move { session.submit("$I".to_string(), client()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.inject_line("[VER:1.1h.20190825:]");
    transport.inject_line("ok");

    let response = submit.await.unwrap().unwrap();
    assert_eq!(response.preamble, vec!["[VER:1.1h.20190825:]"]);
    assert_eq!(response.terminal, "ok");

    session.stop().await;
}

#[tokio::test]
async fn test_alarm_is_terminal() {
    let transport = Arc::new(DryRunTransport::unresponsive());
    let session = start_session(transport.clone(), no_probing());

    let submit = {
        let session = session.clone();
        tokio::spawn(async move { session.submit("$H".to_string(), client()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.inject_line("ALARM:6");

    let response = submit.await.unwrap().unwrap();
    assert_eq!(response.terminal, "ALARM:6");

    session.stop().await;
}

#[tokio::test]
async fn test_submit_after_stop_is_refused() {
    let transport = Arc::new(DryRunTransport::new());
    let session = start_session(transport, no_probing());

    session.stop().await;

    let err = session.submit("G28".to_string(), client()).await.unwrap_err();
    assert_eq!(err, SessionError::ServiceStopped);
}

#[tokio::test]
async fn test_transport_closure_ends_the_session() {
    let transport = Arc::new(DryRunTransport::new());
    let session = start_session(transport.clone(), no_probing());
    let mut running = session.running();

    transport.close();

    // The dispatcher notices the closed reader and winds down.
    tokio::time::timeout(Duration::from_secs(2), async {
        while *running.borrow() {
            if running.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("session did not observe transport closure");

    assert!(session.submit("G28".to_string(), client()).await.is_err());
}

#[tokio::test]
async fn test_stop_is_bounded() {
    let transport = Arc::new(DryRunTransport::new());
    let config = SessionConfig {
        liveness_period: Duration::from_millis(10),
        ..SessionConfig::default()
    };
    let session = start_session(transport.clone(), config);

    tokio::time::timeout(Duration::from_secs(5), session.stop())
        .await
        .expect("stop did not finish in bounded time");

    // No probe is emitted after shutdown.
    let writes_at_stop = transport.writes().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.writes().len(), writes_at_stop);
}
