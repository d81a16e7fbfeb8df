//! Configuration types for the WAN monitor
//!
//! This module defines all configuration structures used throughout the
//! crate. The core treats configuration as an opaque validated struct
//! supplied at startup; populating it (env vars, files) is the daemon's
//! job.

use serde::{Deserialize, Serialize};

use crate::classify::ClassifierOptions;
use crate::error::{Error, Result};

/// Main monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Backend selection and connection target
    pub backend: BackendConfig,

    /// WAN port to monitor and control
    #[serde(default)]
    pub device: DeviceConfig,

    /// Polling and remediation timing
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Explicit classifier exclusions (loopback, link-local)
    #[serde(default)]
    pub classifier: ClassifierOptions,

    /// How a private-address detection is remediated
    #[serde(default)]
    pub remediation: RemediationMode,
}

impl MonitorConfig {
    /// Create a configuration with defaults around the given backend
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            device: DeviceConfig::default(),
            monitoring: MonitoringConfig::default(),
            classifier: ClassifierOptions::default(),
            remediation: RemediationMode::default(),
        }
    }

    /// Validate the configuration
    ///
    /// All configuration-time contract checks live here so they fail
    /// before any polling begins. In particular, pairing a read-only
    /// backend with the built-in remediation sequence is rejected with
    /// [`Error::UnsupportedOperation`].
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.monitoring.validate()?;

        if matches!(self.backend, BackendConfig::Snmp { .. })
            && self.remediation == RemediationMode::Builtin
        {
            return Err(Error::unsupported(
                "snmp backend is read-only and cannot drive the built-in \
                 disconnect/reconnect sequence; configure an external \
                 remediation command or disable remediation",
            ));
        }

        Ok(())
    }
}

/// Backend selection
///
/// Resolved once at startup, never re-selected at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Controller-mediated API backend (Omada-style controller)
    Omada {
        /// Controller URL (e.g. "https://192.168.1.10:8043")
        controller_url: String,
        /// Controller admin username
        username: String,
        /// Controller admin password
        password: String,
        /// Site name in the controller
        #[serde(default = "default_site_name")]
        site_name: String,
        /// MAC address of the monitored gateway
        device_mac: String,
        /// Verify controller TLS certificates
        #[serde(default = "default_verify_ssl")]
        verify_ssl: bool,
    },

    /// Direct CLI backend over SSH
    Ssh {
        /// Device address or hostname
        host: String,
        /// SSH port
        #[serde(default = "default_ssh_port")]
        port: u16,
        /// SSH username
        username: String,
        /// SSH password
        password: String,
        /// WAN interface name on the device CLI
        #[serde(default = "default_wan_interface")]
        wan_interface: String,
    },

    /// Read-only SNMP backend
    Snmp {
        /// Device address or hostname
        host: String,
        /// SNMP UDP port
        #[serde(default = "default_snmp_port")]
        port: u16,
        /// SNMPv2c community string
        community: String,
        /// ifIndex of the WAN interface in the device's IP address table
        wan_if_index: i32,
    },
}

impl BackendConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<()> {
        match self {
            BackendConfig::Omada {
                controller_url,
                username,
                device_mac,
                ..
            } => {
                if controller_url.is_empty() {
                    return Err(Error::config("controller URL cannot be empty"));
                }
                if !controller_url.starts_with("http://") && !controller_url.starts_with("https://")
                {
                    return Err(Error::config(format!(
                        "controller URL must be http(s), got: {controller_url}"
                    )));
                }
                if username.is_empty() {
                    return Err(Error::config("controller username cannot be empty"));
                }
                if device_mac.is_empty() {
                    return Err(Error::config("device MAC address cannot be empty"));
                }
                Ok(())
            }
            BackendConfig::Ssh {
                host,
                username,
                wan_interface,
                ..
            } => {
                if host.is_empty() {
                    return Err(Error::config("ssh host cannot be empty"));
                }
                if username.is_empty() {
                    return Err(Error::config("ssh username cannot be empty"));
                }
                if wan_interface.is_empty() {
                    return Err(Error::config("wan interface name cannot be empty"));
                }
                Ok(())
            }
            BackendConfig::Snmp {
                host, community, ..
            } => {
                if host.is_empty() {
                    return Err(Error::config("snmp host cannot be empty"));
                }
                if community.is_empty() {
                    return Err(Error::config("snmp community string cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Get the backend type name
    pub fn type_name(&self) -> &'static str {
        match self {
            BackendConfig::Omada { .. } => "omada",
            BackendConfig::Ssh { .. } => "ssh",
            BackendConfig::Snmp { .. } => "snmp",
        }
    }
}

/// Identity of the monitored WAN port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// WAN port ID (0 = WAN1 on Omada-managed gateways)
    #[serde(default)]
    pub wan_port_id: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { wan_port_id: 0 }
    }
}

/// Polling cadence and remediation timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between poll cycles
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Seconds to hold the port down between disconnect and reconnect,
    /// letting the far-end DHCP lease state clear
    #[serde(default = "default_reconnect_wait_secs")]
    pub reconnect_wait_secs: u64,

    /// Seconds to let the link and DHCP negotiation settle after
    /// reconnect, before verifying; not part of the retry budget
    #[serde(default = "default_stabilize_wait_secs")]
    pub stabilize_wait_secs: u64,

    /// Maximum disconnect/reconnect cycles per remediation episode
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Consecutive expiry-signatured failures before the session manager
    /// proactively re-authenticates
    #[serde(default = "default_session_failure_threshold")]
    pub session_failure_threshold: u32,

    /// Capacity of the monitor event channel; events are dropped with a
    /// warning when full
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl MonitoringConfig {
    /// Validate timing parameters
    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            return Err(Error::config("check_interval_secs must be > 0"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(Error::config("max_reconnect_attempts must be > 0"));
        }
        if self.session_failure_threshold == 0 {
            return Err(Error::config("session_failure_threshold must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            reconnect_wait_secs: default_reconnect_wait_secs(),
            stabilize_wait_secs: default_stabilize_wait_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            session_failure_threshold: default_session_failure_threshold(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// How a private-address detection is remediated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationMode {
    /// Built-in disconnect/wait/reconnect/verify state machine
    #[default]
    Builtin,
    /// Invoke the configured external remediation hook
    External,
    /// Detect and log only
    Off,
}

fn default_site_name() -> String {
    "Default".to_string()
}

fn default_verify_ssl() -> bool {
    true
}

fn default_ssh_port() -> u16 {
    22
}

fn default_wan_interface() -> String {
    "wan1".to_string()
}

fn default_snmp_port() -> u16 {
    161
}

fn default_check_interval_secs() -> u64 {
    180
}

fn default_reconnect_wait_secs() -> u64 {
    5
}

fn default_stabilize_wait_secs() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_session_failure_threshold() -> u32 {
    3
}

fn default_event_channel_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snmp_backend() -> BackendConfig {
        BackendConfig::Snmp {
            host: "192.168.50.1".to_string(),
            port: 161,
            community: "public".to_string(),
            wan_if_index: 2,
        }
    }

    #[test]
    fn snmp_with_builtin_remediation_is_rejected() {
        let config = MonitorConfig::new(snmp_backend());
        assert!(matches!(
            config.validate(),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn snmp_with_external_remediation_is_accepted() {
        let mut config = MonitorConfig::new(snmp_backend());
        config.remediation = RemediationMode::External;
        config.validate().unwrap();

        config.remediation = RemediationMode::Off;
        config.validate().unwrap();
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let mut config = MonitorConfig::new(snmp_backend());
        config.remediation = RemediationMode::Off;
        config.monitoring.check_interval_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn backend_defaults_round_trip() {
        let json = r#"{"type":"ssh","host":"192.168.50.1","username":"admin","password":"pw"}"#;
        let backend: BackendConfig = serde_json::from_str(json).unwrap();
        match backend {
            BackendConfig::Ssh {
                port,
                wan_interface,
                ..
            } => {
                assert_eq!(port, 22);
                assert_eq!(wan_interface, "wan1");
            }
            _ => panic!("expected ssh backend"),
        }
    }
}
