//! Contract: shutdown is prompt and never strands the port
//!
//! Every suspension point observes the shutdown signal. If shutdown
//! arrives while the WAN port is disabled mid-episode, the port is
//! re-enabled before the monitor exits; it is never left down with no
//! re-enable in flight.

mod common;

use std::sync::Arc;

use common::*;
use tokio::sync::watch;
use wanmon_core::traits::DeviceBackend;
use wanmon_core::{EpisodeOutcome, MonitorEvent, RemediationState, WanMonitor};

#[tokio::test(start_paused = true)]
async fn shutdown_during_hold_down_reenables_the_port() {
    let backend = ScriptedBackend::new();
    backend.set_default_query("192.168.1.50");

    let (monitor, mut events) = WanMonitor::new(
        Arc::clone(&backend) as Arc<dyn DeviceBackend>,
        test_config(),
        None,
    )
    .expect("monitor construction succeeds");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { monitor.run_with_shutdown(shutdown_rx).await });

    // Wait until the port is down and the machine is in its hold-down wait
    loop {
        let event = events.recv().await.expect("monitor emits events");
        if matches!(
            event,
            MonitorEvent::RemediationStateChanged {
                state: RemediationState::Waiting,
                ..
            }
        ) {
            break;
        }
    }
    shutdown_tx.send(true).unwrap();

    let mut aborted = false;
    while let Some(event) = events.recv().await {
        if let MonitorEvent::EpisodeFinished { outcome } = event {
            aborted = matches!(outcome, EpisodeOutcome::Aborted);
        }
    }
    handle.await.unwrap().unwrap();

    assert!(aborted, "episode reports the abort");
    let log = backend.control_log();
    assert_eq!(log, vec![false, true], "disconnect followed by the abort re-enable");
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_poll_sleep_stops_promptly() {
    let backend = ScriptedBackend::new();
    backend.set_default_query("203.0.113.45");

    let (monitor, mut events) = WanMonitor::new(
        Arc::clone(&backend) as Arc<dyn DeviceBackend>,
        test_config(),
        None,
    )
    .expect("monitor construction succeeds");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { monitor.run_with_shutdown(shutdown_rx).await });

    // First successful poll, then the monitor sleeps for the interval
    loop {
        let event = events.recv().await.expect("monitor emits events");
        if matches!(event, MonitorEvent::PollSucceeded { .. }) {
            break;
        }
    }
    shutdown_tx.send(true).unwrap();

    let mut stopped = false;
    while let Some(event) = events.recv().await {
        if matches!(event, MonitorEvent::Stopped { .. }) {
            stopped = true;
        }
    }
    handle.await.unwrap().unwrap();

    assert!(stopped, "clean stop event emitted");
    assert_eq!(backend.disconnects(), 0, "no control action on a healthy address");
}
