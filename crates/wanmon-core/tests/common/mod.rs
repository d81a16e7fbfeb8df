//! Test doubles and common utilities for contract tests
//!
//! Provides a scripted backend that replays canned query/control results
//! and records every action, so tests can assert exact call sequences
//! without any real protocol code.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wanmon_core::config::{BackendConfig, MonitorConfig, RemediationMode};
use wanmon_core::error::{Error, Result};
use wanmon_core::traits::{DeviceBackend, PortId, RemediationHook};

/// A backend that replays scripted responses and records control actions
pub struct ScriptedBackend {
    /// Queued query results, consumed front to back
    queries: Mutex<VecDeque<Result<String>>>,
    /// Returned once the queue is drained
    default_query: Mutex<Option<String>>,
    /// Every set_port_enabled call, in order (the `enabled` argument)
    control_log: Mutex<Vec<bool>>,
    /// Queued control results; Ok once drained
    control_results: Mutex<VecDeque<Result<()>>>,
    /// Queued authenticate results; Ok once drained
    auth_results: Mutex<VecDeque<Result<()>>>,
    auth_calls: AtomicUsize,
    query_calls: AtomicUsize,
    read_only: bool,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Self::with_read_only(false)
    }

    pub fn read_only() -> Arc<Self> {
        Self::with_read_only(true)
    }

    fn with_read_only(read_only: bool) -> Arc<Self> {
        Arc::new(Self {
            queries: Mutex::new(VecDeque::new()),
            default_query: Mutex::new(None),
            control_log: Mutex::new(Vec::new()),
            control_results: Mutex::new(VecDeque::new()),
            auth_results: Mutex::new(VecDeque::new()),
            auth_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            read_only,
        })
    }

    /// Queue a successful query result
    pub fn push_query(&self, raw: &str) {
        self.queries
            .lock()
            .unwrap()
            .push_back(Ok(raw.to_string()));
    }

    /// Queue a failing query result
    pub fn push_query_err(&self, err: Error) {
        self.queries.lock().unwrap().push_back(Err(err));
    }

    /// Result returned for every query after the queue drains
    pub fn set_default_query(&self, raw: &str) {
        *self.default_query.lock().unwrap() = Some(raw.to_string());
    }

    /// Queue a failing control result
    pub fn push_control_err(&self, err: Error) {
        self.control_results.lock().unwrap().push_back(Err(err));
    }

    /// Queue an authenticate result
    pub fn push_auth_result(&self, result: Result<()>) {
        self.auth_results.lock().unwrap().push_back(result);
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn control_log(&self) -> Vec<bool> {
        self.control_log.lock().unwrap().clone()
    }

    /// Number of set_port_enabled(false) calls
    pub fn disconnects(&self) -> usize {
        self.control_log().iter().filter(|e| !**e).count()
    }

    /// Number of set_port_enabled(true) calls
    pub fn reconnects(&self) -> usize {
        self.control_log().iter().filter(|e| **e).count()
    }
}

#[async_trait]
impl DeviceBackend for ScriptedBackend {
    async fn authenticate(&self) -> Result<()> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        match self.auth_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn query_wan_address(&self, _port: PortId) -> Result<String> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.queries.lock().unwrap().pop_front() {
            return result;
        }
        match self.default_query.lock().unwrap().as_ref() {
            Some(raw) => Ok(raw.clone()),
            None => Err(Error::query("no scripted response")),
        }
    }

    async fn set_port_enabled(&self, _port: PortId, enabled: bool) -> Result<()> {
        if self.read_only {
            return Err(Error::unsupported("scripted backend is read-only"));
        }
        self.control_log.lock().unwrap().push(enabled);
        match self.control_results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    fn supports_port_control(&self) -> bool {
        !self.read_only
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// A hook that only counts invocations
pub struct RecordingHook {
    pub calls: Arc<AtomicUsize>,
}

impl RecordingHook {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl RemediationHook for RecordingHook {
    async fn run(&self, _port: PortId) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn hook_name(&self) -> &'static str {
        "recording"
    }
}

/// A minimal valid config for monitor tests
///
/// The backend section only matters for config-level validation; the
/// actual backend object is the scripted double.
pub fn test_config() -> MonitorConfig {
    let mut config = MonitorConfig::new(BackendConfig::Ssh {
        host: "192.168.50.1".to_string(),
        port: 22,
        username: "admin".to_string(),
        password: "test".to_string(),
        wan_interface: "wan1".to_string(),
    });
    // Real-world defaults stay, virtual time makes them instant in tests.
    config.monitoring.check_interval_secs = 180;
    config
}

/// Same config pointed at a read-only backend section
pub fn snmp_config() -> MonitorConfig {
    let mut config = MonitorConfig::new(BackendConfig::Snmp {
        host: "192.168.50.1".to_string(),
        port: 161,
        community: "public".to_string(),
        wan_if_index: 2,
    });
    config.remediation = RemediationMode::External;
    config
}
