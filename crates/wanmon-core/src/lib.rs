// # wanmon-core
//
// Core library for the WAN IP monitor and auto-remediation system.
//
// ## Architecture Overview
//
// This library provides the core functionality for detecting and fixing a
// known edge-gateway failure mode: the upstream ISP gateway occasionally
// hands the monitored device a private (RFC 1918) address instead of a
// routable public one. The fix is to bounce the WAN port and verify that a
// public address was re-acquired.
//
// - **classify**: Pure RFC 1918 address classification
// - **DeviceBackend**: Trait for querying and controlling the device
//   (controller API, direct CLI session, or read-only SNMP)
// - **SessionManager**: Owns backend credential state and renewal
// - **RemediationEpisode**: Bounded disconnect/wait/reconnect/verify retry
//   state machine
// - **WanMonitor**: Single-task cooperative poll loop that ties it together
// - **BackendRegistry**: Plugin-based registry for backend implementations
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from protocol code
// 2. **Backend-Agnostic**: The scheduler and state machine only see the
//    `DeviceBackend` capability, never a concrete protocol
// 3. **Single Thread of Control**: One monitor, one device/port, strictly
//    sequential polling and remediation; multiple devices run as
//    independent monitor instances
// 4. **Non-Fatal Errors**: Per-cycle failures are logged and retried on the
//    next tick; only configuration-time contract violations abort startup

pub mod classify;
pub mod config;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod remediation;
pub mod session;
pub mod traits;

// Re-export core types for convenience
pub use classify::{AddrClass, Address, ClassifierOptions, classify};
pub use config::{BackendConfig, MonitorConfig, RemediationMode};
pub use error::{Error, Result};
pub use monitor::{MonitorEvent, WanMonitor};
pub use registry::BackendRegistry;
pub use remediation::{AttemptOutcome, EpisodeOutcome, RemediationAttempt, RemediationState};
pub use session::SessionManager;
pub use traits::{DeviceBackend, PortId, RemediationHook};
