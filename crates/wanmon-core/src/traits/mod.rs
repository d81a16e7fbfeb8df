//! Core traits for the WAN monitor
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DeviceBackend`]: Query and control the monitored gateway device
//! - [`RemediationHook`]: Out-of-band remediation for read-only backends
//! - [`BackendFactory`]: Construct backends from configuration

pub mod backend;
pub mod hook;

pub use backend::{BackendFactory, DeviceBackend, PortId};
pub use hook::RemediationHook;
