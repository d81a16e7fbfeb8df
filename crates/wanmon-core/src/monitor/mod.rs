//! Monitor scheduler
//!
//! The WanMonitor is responsible for:
//! - Polling the WAN address through the SessionManager
//! - Classifying the result
//! - Handing control to the remediation state machine on a private address
//! - Sleeping until the next tick, interruptibly
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐        ┌────────────────┐
//! │  WanMonitor    │──────► │ SessionManager │──────► DeviceBackend
//! └────────────────┘        └────────────────┘
//!         │                         ▲
//!         │ private detected        │ port control + verify
//!         ▼                         │
//! ┌────────────────────┐            │
//! │ RemediationEpisode │────────────┘
//! └────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! Single logical thread of control per monitored device/port: polling,
//! classification, and remediation are strictly sequential. A remediation
//! episode blocks the poll loop until it resolves, which is acceptable
//! because checks are minutes apart and an episode is bounded to under a
//! minute. A tick that would have fired during an episode is simply late,
//! never dropped or double-fired, and a second episode can never start
//! while one is in flight.
//!
//! Every suspension point (inter-poll sleep, in-episode waits) selects
//! against the shutdown signal, so a shutdown request is observed within
//! a short bounded grace period rather than after the current sleep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::classify::{AddrClass, Address, ClassifierOptions, classify};
use crate::config::{MonitorConfig, RemediationMode};
use crate::error::{Error, Result};
use crate::remediation::{
    EpisodeOutcome, RemediationAttempt, RemediationEpisode, RemediationState, RemediationTiming,
};
use crate::session::SessionManager;
use crate::traits::{DeviceBackend, PortId, RemediationHook};

/// Events emitted by the monitor
///
/// The event channel is the core's externally observable output besides
/// tracing; the daemon (or a test) consumes it for monitoring.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// Monitor started
    Started {
        backend: &'static str,
        port: PortId,
    },

    /// Poll observed an address (any class)
    PollSucceeded { address: Address },

    /// Poll could not determine the WAN address
    PollFailed { error: String },

    /// Session establishment or renewal failed
    SessionError { error: String },

    /// A private address was detected
    PrivateDetected { address: Address },

    /// Remediation state machine transition
    RemediationStateChanged {
        state: RemediationState,
        attempt: u32,
    },

    /// A remediation attempt was finalized
    AttemptFinished { attempt: RemediationAttempt },

    /// A remediation episode ended
    EpisodeFinished { outcome: EpisodeOutcome },

    /// The external remediation hook was invoked
    HookInvoked {
        hook: &'static str,
        result: std::result::Result<(), String>,
    },

    /// Address went Private → Public outside an episode (external fix)
    ExternalFixObserved { address: Address },

    /// Monitor stopped
    Stopped { reason: String },
}

/// Process-wide, single-owner scheduler state
///
/// Rebuilt from scratch on every startup; nothing persists.
#[derive(Debug, Default)]
struct MonitorState {
    last_known_address: Option<Address>,
    last_classification: Option<AddrClass>,
    consecutive_query_failures: u32,
}

/// The monitor scheduler
///
/// ## Lifecycle
///
/// 1. Create with [`WanMonitor::new()`]; this is where backend/mode
///    pairing is checked, before any polling
/// 2. Start with [`WanMonitor::run()`]
/// 3. Runs until the shutdown signal fires
pub struct WanMonitor {
    session: Arc<SessionManager>,
    port: PortId,
    classifier: ClassifierOptions,
    check_interval: Duration,
    timing: RemediationTiming,
    mode: RemediationMode,
    hook: Option<Box<dyn RemediationHook>>,
    event_tx: mpsc::Sender<MonitorEvent>,
}

impl WanMonitor {
    /// Create a new monitor around a backend
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperation`] when built-in remediation is
    ///   configured against a backend that cannot control the port
    /// - [`Error::Config`] when external remediation is configured but no
    ///   hook was supplied, or the configuration fails validation
    ///
    /// # Returns
    ///
    /// A tuple of (monitor, event_receiver).
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        config: MonitorConfig,
        hook: Option<Box<dyn RemediationHook>>,
    ) -> Result<(Self, mpsc::Receiver<MonitorEvent>)> {
        config.validate()?;

        // The config-level pairing check covers the known backend kinds;
        // this covers any DeviceBackend implementation, including embedded
        // and test ones.
        if config.remediation == RemediationMode::Builtin && !backend.supports_port_control() {
            return Err(Error::unsupported(format!(
                "backend '{}' is read-only and cannot drive the built-in \
                 remediation sequence",
                backend.backend_name()
            )));
        }
        if config.remediation == RemediationMode::External && hook.is_none() {
            return Err(Error::config(
                "external remediation mode requires a remediation hook",
            ));
        }

        let (tx, rx) = mpsc::channel(config.monitoring.event_channel_capacity);

        let session = Arc::new(SessionManager::new(
            backend,
            config.monitoring.session_failure_threshold,
        ));

        let monitor = Self {
            session,
            port: PortId(config.device.wan_port_id),
            classifier: config.classifier,
            check_interval: Duration::from_secs(config.monitoring.check_interval_secs),
            timing: RemediationTiming {
                reconnect_wait: Duration::from_secs(config.monitoring.reconnect_wait_secs),
                stabilize_wait: Duration::from_secs(config.monitoring.stabilize_wait_secs),
                max_attempts: config.monitoring.max_reconnect_attempts,
            },
            mode: config.remediation,
            hook,
            event_tx: tx,
        };

        Ok((monitor, rx))
    }

    /// Run the monitor until SIGINT
    ///
    /// # Returns
    ///
    /// - `Ok(())`: clean shutdown
    /// - `Err(Error)`: fatal error (startup only; per-cycle errors never
    ///   propagate here)
    pub async fn run(&self) -> Result<()> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(true);
            }
        });
        self.run_internal(rx).await
    }

    /// Run the monitor with an external shutdown signal
    ///
    /// The daemon wires SIGTERM/SIGINT to the watch channel; tests drive
    /// it directly. Sending `true` stops the monitor at the next
    /// suspension point.
    pub async fn run_with_shutdown(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.run_internal(shutdown).await
    }

    async fn run_internal(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut state = MonitorState::default();

        info!(
            backend = self.session.backend_name(),
            port = %self.port,
            interval_secs = self.check_interval.as_secs(),
            "starting WAN address monitoring"
        );
        self.emit(MonitorEvent::Started {
            backend: self.session.backend_name(),
            port: self.port,
        });

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_cycle(&mut state, &shutdown).await {
                CycleResult::Continue => {}
                CycleResult::ShutdownRequested => break,
            }

            if sleep_or_shutdown(self.check_interval, &mut shutdown).await {
                break;
            }
        }

        info!("shutdown signal received, monitor stopping");
        self.emit(MonitorEvent::Stopped {
            reason: "shutdown signal".to_string(),
        });
        Ok(())
    }

    /// One poll → classify → (remediate) cycle
    ///
    /// All per-cycle errors are absorbed here; nothing short of a
    /// shutdown request escapes.
    async fn poll_cycle(&self, state: &mut MonitorState, shutdown: &watch::Receiver<bool>) -> CycleResult {
        if let Err(err) = self.session.ensure_session().await {
            error!(error = %err, "session establishment failed, retrying next cycle");
            self.emit(MonitorEvent::SessionError {
                error: err.to_string(),
            });
            return CycleResult::Continue;
        }

        let raw = match self.session.query_wan_address(self.port).await {
            Ok(raw) => raw,
            Err(err) => {
                state.consecutive_query_failures += 1;
                // Parse failures are query failures for retry purposes,
                // but their message makes the pattern drift diagnosable.
                warn!(
                    error = %err,
                    failures = state.consecutive_query_failures,
                    "could not determine WAN address"
                );
                self.emit(MonitorEvent::PollFailed {
                    error: err.to_string(),
                });
                return CycleResult::Continue;
            }
        };

        let address = match classify(&raw, &self.classifier) {
            Ok(address) => address,
            Err(err) => {
                state.consecutive_query_failures += 1;
                warn!(raw, error = %err, "backend reported an unusable address");
                self.emit(MonitorEvent::PollFailed {
                    error: err.to_string(),
                });
                return CycleResult::Continue;
            }
        };

        state.consecutive_query_failures = 0;
        self.emit(MonitorEvent::PollSucceeded { address });

        if address.is_private() {
            self.emit(MonitorEvent::PrivateDetected { address });
            state.last_classification = Some(AddrClass::Private);
            return self.handle_private(state, address, shutdown).await;
        }

        self.handle_public(state, address);
        CycleResult::Continue
    }

    fn handle_public(&self, state: &mut MonitorState, address: Address) {
        let previous = state.last_known_address;

        if state.last_classification == Some(AddrClass::Private) {
            // The address recovered without us doing anything this cycle.
            info!(address = %address, "public address restored externally");
            self.emit(MonitorEvent::ExternalFixObserved { address });
        } else if previous.map(|p| p.ip) != Some(address.ip) {
            info!(address = %address, "public address confirmed");
        } else {
            debug!(address = %address, "public address stable");
        }

        state.last_known_address = Some(address);
        state.last_classification = Some(AddrClass::Public);
    }

    /// Private address detected: remediate per the configured mode
    async fn handle_private(
        &self,
        state: &mut MonitorState,
        address: Address,
        shutdown: &watch::Receiver<bool>,
    ) -> CycleResult {
        warn!(address = %address, "private WAN address detected");

        match self.mode {
            RemediationMode::Off => {
                warn!("remediation disabled, detection only");
                CycleResult::Continue
            }
            RemediationMode::External => {
                // Fire the out-of-band hook; verification happens on the
                // next natural poll tick.
                let hook = self
                    .hook
                    .as_ref()
                    .expect("external mode checked at construction");
                let result = hook.run(self.port).await;
                match &result {
                    Ok(()) => info!(hook = hook.hook_name(), "remediation hook invoked"),
                    Err(err) => error!(hook = hook.hook_name(), error = %err, "remediation hook failed"),
                }
                self.emit(MonitorEvent::HookInvoked {
                    hook: hook.hook_name(),
                    result: result.map_err(|e| e.to_string()),
                });
                CycleResult::Continue
            }
            RemediationMode::Builtin => {
                let episode = RemediationEpisode::new(
                    Arc::clone(&self.session),
                    self.port,
                    self.classifier,
                    self.timing,
                    self.event_tx.clone(),
                    shutdown.clone(),
                );
                let (outcome, _attempts) = episode.run().await;
                self.emit(MonitorEvent::EpisodeFinished {
                    outcome: outcome.clone(),
                });
                // Control returns to the scheduler.
                self.emit(MonitorEvent::RemediationStateChanged {
                    state: RemediationState::Idle,
                    attempt: 0,
                });

                match outcome {
                    EpisodeOutcome::Succeeded(addr) => {
                        state.last_known_address = Some(addr);
                        state.last_classification = Some(AddrClass::Public);
                        CycleResult::Continue
                    }
                    // Not fatal: the problem persists until the next
                    // detection; normal polling resumes.
                    EpisodeOutcome::Exhausted => CycleResult::Continue,
                    EpisodeOutcome::Aborted => CycleResult::ShutdownRequested,
                }
            }
        }
    }

    fn emit(&self, event: MonitorEvent) {
        emit_event(&self.event_tx, event);
    }
}

/// What a poll cycle decided about the loop
enum CycleResult {
    Continue,
    ShutdownRequested,
}

/// Send an event, dropping it with a warning if the channel is full
///
/// Dropping is deliberate: event consumers are observational and must not
/// be able to stall the monitor.
pub(crate) fn emit_event(tx: &mpsc::Sender<MonitorEvent>, event: MonitorEvent) {
    if tx.try_send(event).is_err() {
        warn!("event channel full or closed, dropping event");
    }
}

/// Sleep for `duration` unless shutdown fires first
///
/// Returns `true` when shutdown was observed. A dropped shutdown sender
/// counts as a shutdown request.
pub(crate) async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => match changed {
            Ok(()) => *shutdown.borrow(),
            Err(_) => true,
        },
    }
}
