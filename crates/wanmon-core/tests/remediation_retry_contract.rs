//! Contract: the remediation attempt budget is exact
//!
//! The episode performs exactly `max_reconnect_attempts` disconnect/
//! reconnect cycles when the problem persists, never one more, and stops
//! early the moment verification sees a public address. Control failures
//! and verification-query failures consume budget the same way an
//! explicit private observation does.
//!
//! Tests run under paused virtual time, so the real-world waits (5 s hold,
//! 30 s stabilize, 180 s poll interval) elapse instantly.

mod common;

use std::sync::Arc;

use common::*;
use tokio::sync::watch;
use wanmon_core::traits::DeviceBackend;
use wanmon_core::{AttemptOutcome, EpisodeOutcome, MonitorEvent, WanMonitor};

/// Drive the monitor until an episode finishes, then shut it down
///
/// Returns the events observed up to and including the episode end.
async fn run_until_episode_end(
    backend: Arc<ScriptedBackend>,
) -> (Vec<MonitorEvent>, EpisodeOutcome) {
    let (monitor, mut events) =
        WanMonitor::new(backend as Arc<dyn DeviceBackend>, test_config(), None)
            .expect("monitor construction succeeds");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { monitor.run_with_shutdown(shutdown_rx).await });

    let mut seen = Vec::new();
    let outcome = loop {
        let event = events.recv().await.expect("monitor emits events");
        seen.push(event.clone());
        if let MonitorEvent::EpisodeFinished { outcome } = event {
            break outcome;
        }
    };

    shutdown_tx.send(true).unwrap();
    // Drain so the channel never fills while the monitor winds down
    while events.recv().await.is_some() {}
    handle.await.unwrap().unwrap();

    (seen, outcome)
}

fn attempt_outcomes(events: &[MonitorEvent]) -> Vec<AttemptOutcome> {
    events
        .iter()
        .filter_map(|e| match e {
            MonitorEvent::AttemptFinished { attempt } => Some(attempt.outcome),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_performs_exactly_three_cycles() {
    let backend = ScriptedBackend::new();
    // Private on every poll and every verification
    backend.set_default_query("192.168.1.50");

    let (events, outcome) = run_until_episode_end(Arc::clone(&backend)).await;

    assert!(matches!(outcome, EpisodeOutcome::Exhausted));
    assert_eq!(backend.disconnects(), 3, "exactly 3 disconnects, never a 4th");
    assert_eq!(backend.reconnects(), 3);
    assert_eq!(
        attempt_outcomes(&events),
        vec![
            AttemptOutcome::StillPrivate,
            AttemptOutcome::StillPrivate,
            AttemptOutcome::StillPrivate,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn success_on_second_attempt_stops_the_episode() {
    let backend = ScriptedBackend::new();
    backend.push_query("192.168.1.50"); // detection poll
    backend.push_query("192.168.1.50"); // verification, attempt 1
    backend.push_query("203.0.113.10"); // verification, attempt 2
    backend.set_default_query("203.0.113.10");

    let (events, outcome) = run_until_episode_end(Arc::clone(&backend)).await;

    match outcome {
        EpisodeOutcome::Succeeded(addr) => {
            assert_eq!(addr.ip.to_string(), "203.0.113.10");
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(backend.disconnects(), 2, "2 disconnect/reconnect pairs total");
    assert_eq!(backend.reconnects(), 2);
    assert_eq!(
        attempt_outcomes(&events),
        vec![AttemptOutcome::StillPrivate, AttemptOutcome::Succeeded]
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_failure_consumes_an_attempt() {
    let backend = ScriptedBackend::new();
    backend.set_default_query("192.168.1.50");
    // First control call (the attempt-1 disconnect) fails
    backend.push_control_err(wanmon_core::Error::control("controller rejected patch"));

    let (events, outcome) = run_until_episode_end(Arc::clone(&backend)).await;

    assert!(matches!(outcome, EpisodeOutcome::Exhausted));
    let outcomes = attempt_outcomes(&events);
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], AttemptOutcome::ControlFailed);
    assert_eq!(outcomes[1], AttemptOutcome::StillPrivate);
    assert_eq!(outcomes[2], AttemptOutcome::StillPrivate);
    // The failed disconnect skipped its wait/reconnect leg
    assert_eq!(backend.reconnects(), 2);
}

#[tokio::test(start_paused = true)]
async fn verification_query_failure_counts_against_the_budget() {
    let backend = ScriptedBackend::new();
    backend.push_query("192.168.1.50"); // detection poll
    // No further scripted responses: every verification query fails

    let (events, outcome) = run_until_episode_end(Arc::clone(&backend)).await;

    assert!(matches!(outcome, EpisodeOutcome::Exhausted));
    assert_eq!(backend.disconnects(), 3);
    assert_eq!(
        attempt_outcomes(&events),
        vec![
            AttemptOutcome::QueryFailed,
            AttemptOutcome::QueryFailed,
            AttemptOutcome::QueryFailed,
        ]
    );
}
