// # Device Backend Trait
//
// Defines the capability interface for talking to the monitored gateway:
// query the WAN address, and flip the WAN port on or off.
//
// ## Implementations
//
// - Controller-mediated API (Omada-style): `wanmon-backend-omada` crate
// - Direct CLI over SSH: `wanmon-backend-ssh` crate
// - Read-only SNMP: `wanmon-backend-snmp` crate
//
// All three present the same interface so the scheduler and the
// remediation state machine are backend-agnostic. Backend selection is a
// static configuration choice resolved once at startup through the
// registry; call sites never branch on backend kind.
//
// ## Trust Boundaries
//
// Backends are protocol plumbing only. They must not:
//
// - Implement retry logic (owned by `RemediationEpisode` / `WanMonitor`)
// - Classify addresses (owned by `classify`)
// - Track session failure counters (owned by `SessionManager`)
// - Spawn background tasks that outlive a call
//
// A backend call is single-shot: it performs its protocol exchange and
// returns success or a taxonomy error. The caller decides what happens
// next.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Identity of the WAN port being monitored and controlled
///
/// Concrete meaning is backend-specific: a port index for the controller
/// API, an interface name lookup for the CLI backend, an interface index
/// for SNMP. The newtype keeps call sites honest about which integer they
/// are passing around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(pub u32);

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for device backend implementations
///
/// # Thread Safety
///
/// Implementations must be thread-safe; the session manager calls them
/// from a single async task but holds them behind an `Arc`.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Perform the backend's authentication handshake
    ///
    /// Called by the [`SessionManager`](crate::session::SessionManager) on
    /// first use and again whenever it decides the credential has expired.
    /// Backends with no session concept keep the default no-op.
    ///
    /// # Errors
    ///
    /// [`Error::Auth`] when the handshake fails.
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    /// Query the current WAN address of the given port
    ///
    /// Returns the raw address string as reported by the device; the
    /// caller classifies it. Backends must not pre-filter "bad" values;
    /// a private address is exactly what the monitor is looking for.
    ///
    /// # Errors
    ///
    /// - [`Error::Query`] when the read fails or no address is present
    /// - [`Error::Parse`] when device output exists but does not match the
    ///   backend's documented pattern (CLI backend)
    /// - [`Error::Auth`] when the failure carries a credential-expiry
    ///   signature
    async fn query_wan_address(&self, port: PortId) -> Result<String>;

    /// Enable or disable the given WAN port
    ///
    /// # Errors
    ///
    /// - [`Error::Control`] when the write fails
    /// - [`Error::UnsupportedOperation`] on read-only backends (this is a
    ///   configuration bug: the pairing check at startup should have
    ///   prevented the call)
    async fn set_port_enabled(&self, port: PortId, enabled: bool) -> Result<()>;

    /// Whether this backend can control the port at all
    ///
    /// Checked once at monitor construction; a backend answering `false`
    /// can only be paired with an external remediation hook.
    fn supports_port_control(&self) -> bool;

    /// Whether an error plausibly indicates credential expiry
    ///
    /// The session manager counts these toward its renewal threshold.
    /// The default recognizes the explicit auth signature only; backends
    /// with richer error channels (HTTP status codes, SSH disconnect
    /// reasons) override this.
    fn is_credential_expiry(&self, err: &Error) -> bool {
        matches!(err, Error::Auth(_))
    }

    /// Short name for logging (e.g. "omada", "ssh", "snmp")
    fn backend_name(&self) -> &'static str;
}

/// Helper trait for constructing backends from configuration
pub trait BackendFactory: Send + Sync {
    /// Create a backend instance from configuration
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn DeviceBackend>>;
}
