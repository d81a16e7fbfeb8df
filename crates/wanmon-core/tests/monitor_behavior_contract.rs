//! Contract: per-cycle failures never crash the loop, and detection
//! without built-in remediation behaves as configured
//!
//! - An unusable address (query failure or unparseable string) is logged,
//!   counted, and skipped; the next cycle proceeds normally.
//! - In `external` mode a private detection fires the hook exactly once
//!   per detection and touches no port control.
//! - A Private → Public flip outside an episode is reported as an
//!   external fix.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::*;
use tokio::sync::watch;
use wanmon_core::traits::DeviceBackend;
use wanmon_core::{MonitorEvent, RemediationMode, WanMonitor};

async fn collect_until<F>(backend: Arc<ScriptedBackend>, config: wanmon_core::MonitorConfig, hook: Option<Box<dyn wanmon_core::RemediationHook>>, mut done: F) -> Vec<MonitorEvent>
where
    F: FnMut(&MonitorEvent) -> bool,
{
    let (monitor, mut events) =
        WanMonitor::new(backend as Arc<dyn DeviceBackend>, config, hook)
            .expect("monitor construction succeeds");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { monitor.run_with_shutdown(shutdown_rx).await });

    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.expect("monitor emits events");
        let finished = done(&event);
        seen.push(event);
        if finished {
            break;
        }
    }

    shutdown_tx.send(true).unwrap();
    while events.recv().await.is_some() {}
    handle.await.unwrap().unwrap();
    seen
}

#[tokio::test(start_paused = true)]
async fn unusable_address_skips_the_cycle_and_recovers() {
    let backend = ScriptedBackend::new();
    backend.push_query("not.an.ip");
    backend.push_query("999.1.1.1");
    backend.set_default_query("203.0.113.45");

    let events = collect_until(Arc::clone(&backend), test_config(), None, |e| {
        matches!(e, MonitorEvent::PollSucceeded { .. })
    })
    .await;

    let failures = events
        .iter()
        .filter(|e| matches!(e, MonitorEvent::PollFailed { .. }))
        .count();
    assert_eq!(failures, 2, "both bad cycles reported, neither fatal");
    assert_eq!(backend.disconnects(), 0, "classification failures never remediate");
}

#[tokio::test(start_paused = true)]
async fn external_mode_fires_the_hook_once_per_detection() {
    let backend = ScriptedBackend::read_only();
    backend.push_query("192.168.1.50");
    backend.set_default_query("203.0.113.45");

    let (hook, calls) = RecordingHook::new();
    let events = collect_until(
        Arc::clone(&backend),
        snmp_config(),
        Some(Box::new(hook)),
        |e| matches!(e, MonitorEvent::ExternalFixObserved { .. }),
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1, "one detection, one hook run");
    assert!(
        events
            .iter()
            .any(|e| matches!(e, MonitorEvent::HookInvoked { result: Ok(()), .. })),
        "hook invocation reported"
    );
    assert_eq!(backend.control_log().len(), 0, "read-only backend never controlled");
}

#[tokio::test(start_paused = true)]
async fn detection_only_mode_reports_external_fix() {
    let backend = ScriptedBackend::new();
    backend.push_query("192.168.1.50");
    backend.set_default_query("203.0.113.45");

    let mut config = test_config();
    config.remediation = RemediationMode::Off;

    let events = collect_until(Arc::clone(&backend), config, None, |e| {
        matches!(e, MonitorEvent::ExternalFixObserved { .. })
    })
    .await;

    assert!(
        events
            .iter()
            .any(|e| matches!(e, MonitorEvent::PrivateDetected { .. })),
        "detection still reported"
    );
    assert_eq!(backend.disconnects(), 0, "off mode never touches the port");
}
