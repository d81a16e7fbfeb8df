//! Remediation state machine
//!
//! One remediation episode is a bounded run of the
//! disconnect → wait → reconnect → stabilize → verify sequence:
//!
//! ```text
//! Idle → Detecting → Disconnecting → Waiting → Reconnecting
//!                         ▲                        │
//!                         │                        ▼
//!                         │                   Stabilizing
//!                         │                        │
//!                         └──── next attempt ◄── Verifying ──► Succeeded
//!                                                  │
//!                                        budget exhausted
//!                                                  ▼
//!                                               Failed
//! ```
//!
//! The episode owns exclusive control of the port while it runs; the
//! scheduler invokes it synchronously, so a second episode can never
//! overlap the first for the same device/port.
//!
//! ## Retry accounting
//!
//! Every attempt is finalized with a distinct outcome so observability can
//! tell "fixed the symptom but still private" from "could not even execute
//! the remediation". A failed verification query counts against the retry
//! budget exactly like an explicit private observation: the episode stays
//! bounded either way, and the next poll tick re-detects if the problem
//! persists.
//!
//! ## Shutdown safety
//!
//! Every sleep selects against the shutdown signal. If shutdown arrives
//! while the port is disabled, the machine re-enables it before aborting;
//! it never exits leaving the WAN port down with no re-enable in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::classify::{Address, ClassifierOptions, classify};
use crate::monitor::{MonitorEvent, emit_event, sleep_or_shutdown};
use crate::session::SessionManager;
use crate::traits::PortId;

/// States of the remediation machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationState {
    Idle,
    Detecting,
    Disconnecting,
    Waiting,
    Reconnecting,
    Stabilizing,
    Verifying,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RemediationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Disconnecting => "disconnecting",
            Self::Waiting => "waiting",
            Self::Reconnecting => "reconnecting",
            Self::Stabilizing => "stabilizing",
            Self::Verifying => "verifying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Final outcome of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Attempt in progress
    Pending,
    /// Verification observed a public address
    Succeeded,
    /// Verification still observed a private address
    StillPrivate,
    /// A port enable/disable call failed; remediation never executed
    ControlFailed,
    /// Verification query failed; effect unknown
    QueryFailed,
}

/// One disconnect/reconnect cycle within an episode
#[derive(Debug, Clone)]
pub struct RemediationAttempt {
    /// 1-based attempt number
    pub number: u32,
    /// When the attempt began
    pub started_at: DateTime<Utc>,
    /// How the attempt ended
    pub outcome: AttemptOutcome,
    /// Address observed at verification, when the query succeeded
    pub observed_address: Option<Address>,
}

impl RemediationAttempt {
    fn begin(number: u32) -> Self {
        Self {
            number,
            started_at: Utc::now(),
            outcome: AttemptOutcome::Pending,
            observed_address: None,
        }
    }
}

/// How an episode ended
#[derive(Debug, Clone)]
pub enum EpisodeOutcome {
    /// A public address was re-acquired
    Succeeded(Address),
    /// The attempt budget ran out with the problem unresolved
    Exhausted,
    /// Shutdown was requested mid-episode; the port was left enabled
    Aborted,
}

/// Timing parameters for one episode
#[derive(Debug, Clone, Copy)]
pub struct RemediationTiming {
    /// Hold-down time between disconnect and reconnect
    pub reconnect_wait: Duration,
    /// Settle time after reconnect, before verification
    pub stabilize_wait: Duration,
    /// Maximum disconnect/reconnect cycles
    pub max_attempts: u32,
}

/// A single remediation episode, driven to completion by the scheduler
pub(crate) struct RemediationEpisode {
    session: Arc<SessionManager>,
    port: PortId,
    classifier: ClassifierOptions,
    timing: RemediationTiming,
    events: mpsc::Sender<MonitorEvent>,
    shutdown: watch::Receiver<bool>,
    attempts: Vec<RemediationAttempt>,
    /// Whether our last successful control action left the port disabled
    port_down: bool,
}

impl RemediationEpisode {
    pub(crate) fn new(
        session: Arc<SessionManager>,
        port: PortId,
        classifier: ClassifierOptions,
        timing: RemediationTiming,
        events: mpsc::Sender<MonitorEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            port,
            classifier,
            timing,
            events,
            shutdown,
            attempts: Vec::with_capacity(timing.max_attempts as usize),
            port_down: false,
        }
    }

    /// Run the episode to completion
    ///
    /// Performs at most `max_attempts` disconnect/reconnect cycles and
    /// returns the outcome plus the finalized attempt log. The attempt
    /// log is discarded by the caller after the episode; nothing persists.
    pub(crate) async fn run(mut self) -> (EpisodeOutcome, Vec<RemediationAttempt>) {
        self.transition(RemediationState::Detecting, 0);
        warn!(port = %self.port, "private WAN address detected, starting remediation");

        for number in 1..=self.timing.max_attempts {
            let mut attempt = RemediationAttempt::begin(number);
            info!(
                attempt = number,
                max = self.timing.max_attempts,
                "remediation attempt"
            );

            match self.run_attempt(&mut attempt).await {
                AttemptStep::Continue => {}
                AttemptStep::Abort => {
                    self.attempts.push(attempt);
                    self.ensure_port_enabled().await;
                    return (EpisodeOutcome::Aborted, self.attempts);
                }
                AttemptStep::Success(addr) => {
                    attempt.outcome = AttemptOutcome::Succeeded;
                    attempt.observed_address = Some(addr);
                    self.finish_attempt(attempt);
                    self.transition(RemediationState::Succeeded, number);
                    info!(address = %addr, "remediation successful, public address obtained");
                    return (EpisodeOutcome::Succeeded(addr), self.attempts);
                }
            }

            self.finish_attempt(attempt);

            if number < self.timing.max_attempts {
                // Verifying → Detecting: loop repeats from Disconnecting
                self.transition(RemediationState::Detecting, number + 1);
            }
        }

        self.transition(RemediationState::Failed, self.timing.max_attempts);
        self.ensure_port_enabled().await;
        error!(
            attempts = self.timing.max_attempts,
            "all remediation attempts failed, private address persists"
        );
        (EpisodeOutcome::Exhausted, self.attempts)
    }

    /// One disconnect/wait/reconnect/stabilize/verify cycle
    async fn run_attempt(&mut self, attempt: &mut RemediationAttempt) -> AttemptStep {
        let number = attempt.number;

        // Disconnecting. A failure here advances straight to retry
        // accounting; the port was never taken down, so there is nothing
        // to wait for or undo.
        self.transition(RemediationState::Disconnecting, number);
        if let Err(err) = self.session.set_port_enabled(self.port, false).await {
            error!(attempt = number, error = %err, "disconnect failed");
            attempt.outcome = AttemptOutcome::ControlFailed;
            return AttemptStep::Continue;
        }
        self.port_down = true;

        // Waiting: let the far-end DHCP lease state clear. The port is
        // down here, so a shutdown must re-enable it before aborting.
        self.transition(RemediationState::Waiting, number);
        if sleep_or_shutdown(self.timing.reconnect_wait, &mut self.shutdown).await {
            warn!("shutdown requested mid-episode, re-enabling port before abort");
            return AttemptStep::Abort;
        }

        // Reconnecting
        self.transition(RemediationState::Reconnecting, number);
        if let Err(err) = self.session.set_port_enabled(self.port, true).await {
            error!(attempt = number, error = %err, "reconnect failed, port may be down");
            attempt.outcome = AttemptOutcome::ControlFailed;
            // One immediate best-effort retry; beyond that the next
            // attempt's cycle (or the episode-end re-enable) covers it.
            self.ensure_port_enabled().await;
            return AttemptStep::Continue;
        }
        self.port_down = false;

        // Stabilizing: link and DHCP negotiation settle time. Not part of
        // the retry budget; elapses even on the final attempt.
        self.transition(RemediationState::Stabilizing, number);
        if sleep_or_shutdown(self.timing.stabilize_wait, &mut self.shutdown).await {
            return AttemptStep::Abort;
        }

        // Verifying
        self.transition(RemediationState::Verifying, number);
        match self.session.query_wan_address(self.port).await {
            Ok(raw) => match classify(&raw, &self.classifier) {
                Ok(addr) if !addr.is_private() => AttemptStep::Success(addr),
                Ok(addr) => {
                    warn!(attempt = number, address = %addr, "still private after reconnect");
                    attempt.outcome = AttemptOutcome::StillPrivate;
                    attempt.observed_address = Some(addr);
                    AttemptStep::Continue
                }
                Err(err) => {
                    warn!(attempt = number, error = %err, "could not classify verification result");
                    attempt.outcome = AttemptOutcome::QueryFailed;
                    AttemptStep::Continue
                }
            },
            Err(err) => {
                warn!(attempt = number, error = %err, "could not verify address after reconnect");
                attempt.outcome = AttemptOutcome::QueryFailed;
                AttemptStep::Continue
            }
        }
    }

    /// Best-effort re-enable on abort or exhaustion paths
    async fn ensure_port_enabled(&mut self) {
        if !self.port_down {
            return;
        }
        match self.session.set_port_enabled(self.port, true).await {
            Ok(()) => {
                self.port_down = false;
                info!(port = %self.port, "port re-enabled");
            }
            Err(err) => {
                error!(port = %self.port, error = %err, "could not re-enable port");
            }
        }
    }

    fn transition(&self, state: RemediationState, attempt: u32) {
        tracing::debug!(state = %state, attempt, "remediation state transition");
        emit_event(
            &self.events,
            MonitorEvent::RemediationStateChanged { state, attempt },
        );
    }

    fn finish_attempt(&mut self, attempt: RemediationAttempt) {
        emit_event(
            &self.events,
            MonitorEvent::AttemptFinished {
                attempt: attempt.clone(),
            },
        );
        self.attempts.push(attempt);
    }
}

/// Control-flow result of a single attempt
enum AttemptStep {
    /// Attempt finished without success; retry accounting decides next
    Continue,
    /// Shutdown observed; abandon the episode
    Abort,
    /// Public address verified
    Success(Address),
}
