//! Session manager
//!
//! Owns backend credential state: when the backend was last
//! authenticated, and how many consecutive calls have failed with a
//! credential-expiry signature. The scheduler and the remediation state
//! machine never touch the backend directly; every call goes through the
//! manager so failure accounting cannot be forgotten at a call site.
//!
//! ## Renewal policy
//!
//! Failures whose error signature plausibly indicates credential expiry
//! (per [`DeviceBackend::is_credential_expiry`]) are counted. Once the
//! counter crosses the configured threshold (default 3), the current
//! credential is invalidated and the next call re-authenticates before
//! attempting its operation. A successful re-authentication resets the
//! counter to zero.
//!
//! Re-authentication itself can fail; the resulting [`Error::Auth`] is
//! propagated and retried on the scheduler's normal poll cadence, never
//! in a tight loop, so a controller outage is not hammered.
//!
//! One manager per monitored device; there is no shared credential store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::traits::{DeviceBackend, PortId};

/// Backend-specific credential/connection state
#[derive(Debug, Default)]
struct SessionState {
    /// Whether the current credential is believed valid
    authenticated: bool,
    /// When the current credential was issued
    issued_at: Option<DateTime<Utc>>,
    /// Consecutive expiry-signatured failures since the last success
    consecutive_failures: u32,
}

/// Mediates all backend access, maintaining session validity
pub struct SessionManager {
    backend: Arc<dyn DeviceBackend>,
    failure_threshold: u32,
    state: Mutex<SessionState>,
}

impl SessionManager {
    /// Create a manager around a backend
    ///
    /// `failure_threshold` is the number of consecutive expiry-signatured
    /// failures that triggers proactive re-authentication.
    pub fn new(backend: Arc<dyn DeviceBackend>, failure_threshold: u32) -> Self {
        Self {
            backend,
            failure_threshold,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// The wrapped backend's name, for logging
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Whether the wrapped backend can control the WAN port
    pub fn supports_port_control(&self) -> bool {
        self.backend.supports_port_control()
    }

    /// Ensure a valid session exists, authenticating if needed
    ///
    /// For backends with no session concept the backend's `authenticate`
    /// is a no-op and this returns immediately.
    ///
    /// # Errors
    ///
    /// [`Error::Auth`] when the handshake fails. The caller retries on the
    /// next poll tick.
    pub async fn ensure_session(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.authenticated && state.consecutive_failures >= self.failure_threshold {
            warn!(
                backend = self.backend.backend_name(),
                failures = state.consecutive_failures,
                "failure threshold crossed, invalidating session"
            );
            state.authenticated = false;
        }

        if !state.authenticated {
            self.backend.authenticate().await?;
            state.authenticated = true;
            state.issued_at = Some(Utc::now());
            state.consecutive_failures = 0;
            info!(
                backend = self.backend.backend_name(),
                "session established"
            );
        }

        Ok(())
    }

    /// Query the WAN address through the backend
    pub async fn query_wan_address(&self, port: PortId) -> Result<String> {
        self.ensure_session().await?;
        match self.backend.query_wan_address(port).await {
            Ok(raw) => {
                self.record_success().await;
                Ok(raw)
            }
            Err(err) => {
                self.record_failure(&err).await;
                Err(err)
            }
        }
    }

    /// Enable or disable the WAN port through the backend
    pub async fn set_port_enabled(&self, port: PortId, enabled: bool) -> Result<()> {
        self.ensure_session().await?;
        match self.backend.set_port_enabled(port, enabled).await {
            Ok(()) => {
                self.record_success().await;
                Ok(())
            }
            Err(err) => {
                self.record_failure(&err).await;
                Err(err)
            }
        }
    }

    /// When the current credential was issued, if any
    pub async fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.issued_at
    }

    /// Current consecutive expiry-signatured failure count
    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.consecutive_failures > 0 {
            debug!(
                backend = self.backend.backend_name(),
                "backend call succeeded, resetting failure counter"
            );
        }
        state.consecutive_failures = 0;
    }

    async fn record_failure(&self, err: &Error) {
        if !self.backend.is_credential_expiry(err) {
            return;
        }
        let mut state = self.state.lock().await;
        state.consecutive_failures += 1;
        debug!(
            backend = self.backend.backend_name(),
            failures = state.consecutive_failures,
            threshold = self.failure_threshold,
            "expiry-signatured failure recorded"
        );
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("backend", &self.backend.backend_name())
            .field("failure_threshold", &self.failure_threshold)
            .finish()
    }
}
