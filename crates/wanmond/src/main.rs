// # wanmond - WAN Monitor Daemon
//
// Thin integration layer around wanmon-core: reads configuration from
// environment variables, initializes the runtime, registers the device
// backends, and runs the monitor until SIGTERM/SIGINT. All monitoring,
// classification, and remediation logic lives in wanmon-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Backend selection
// - `WANMON_BACKEND`: Backend type (omada, ssh, snmp)
//
// ### Omada backend
// - `WANMON_CONTROLLER_URL`: Controller URL (e.g. https://192.168.1.10:8043)
// - `WANMON_USERNAME` / `WANMON_PASSWORD`: Controller credentials
// - `WANMON_SITE_NAME`: Site name (default "Default")
// - `WANMON_DEVICE_MAC`: MAC of the monitored gateway
// - `WANMON_VERIFY_SSL`: Verify controller TLS certs (default true)
//
// ### SSH backend
// - `WANMON_HOST`: Device address
// - `WANMON_SSH_PORT`: SSH port (default 22)
// - `WANMON_USERNAME` / `WANMON_PASSWORD`: Device credentials
// - `WANMON_WAN_INTERFACE`: WAN interface name (default wan1)
//
// ### SNMP backend
// - `WANMON_HOST`: Device address
// - `WANMON_SNMP_PORT`: SNMP UDP port (default 161)
// - `WANMON_COMMUNITY`: SNMPv2c community string
// - `WANMON_WAN_IF_INDEX`: ifIndex of the WAN interface
//
// ### Monitoring
// - `WANMON_WAN_PORT`: WAN port id to control (default 0)
// - `WANMON_CHECK_INTERVAL_SECS`: Seconds between polls (default 180)
// - `WANMON_RECONNECT_WAIT_SECS`: Port hold-down seconds (default 5)
// - `WANMON_STABILIZE_WAIT_SECS`: Post-reconnect settle seconds (default 30)
// - `WANMON_MAX_RECONNECT_ATTEMPTS`: Retry budget per episode (default 3)
//
// ### Remediation
// - `WANMON_REMEDIATION`: builtin, command, or off (default builtin)
// - `WANMON_REMEDIATION_COMMAND`: Shell command for command mode; the
//   affected port id is passed as `WANMON_PORT` in its environment
//
// ### Logging
// - `WANMON_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export WANMON_BACKEND=omada
// export WANMON_CONTROLLER_URL=https://192.168.1.10:8043
// export WANMON_USERNAME=admin
// export WANMON_PASSWORD=secret
// export WANMON_DEVICE_MAC=AA-BB-CC-DD-EE-FF
//
// wanmond
// ```

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use wanmon_core::config::{BackendConfig, MonitorConfig, RemediationMode};
use wanmon_core::traits::{DeviceBackend, PortId, RemediationHook};
use wanmon_core::{BackendRegistry, Error, MonitorEvent, WanMonitor};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum WanmonExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<WanmonExitCode> for ExitCode {
    fn from(code: WanmonExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    backend: String,
    controller_url: Option<String>,
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
    site_name: String,
    device_mac: Option<String>,
    verify_ssl: bool,
    ssh_port: u16,
    wan_interface: String,
    snmp_port: u16,
    community: Option<String>,
    wan_if_index: Option<i32>,
    wan_port: u32,
    check_interval_secs: u64,
    reconnect_wait_secs: u64,
    stabilize_wait_secs: u64,
    max_reconnect_attempts: u32,
    remediation: String,
    remediation_command: Option<String>,
    log_level: String,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Ok(Self {
            backend: env::var("WANMON_BACKEND").unwrap_or_else(|_| "omada".to_string()),
            controller_url: env::var("WANMON_CONTROLLER_URL").ok(),
            host: env::var("WANMON_HOST").ok(),
            username: env::var("WANMON_USERNAME").ok(),
            password: env::var("WANMON_PASSWORD").ok(),
            site_name: env::var("WANMON_SITE_NAME").unwrap_or_else(|_| "Default".to_string()),
            device_mac: env::var("WANMON_DEVICE_MAC").ok(),
            verify_ssl: env_parse("WANMON_VERIFY_SSL", true)?,
            ssh_port: env_parse("WANMON_SSH_PORT", 22)?,
            wan_interface: env::var("WANMON_WAN_INTERFACE").unwrap_or_else(|_| "wan1".to_string()),
            snmp_port: env_parse("WANMON_SNMP_PORT", 161)?,
            community: env::var("WANMON_COMMUNITY").ok(),
            wan_if_index: match env::var("WANMON_WAN_IF_INDEX") {
                Ok(raw) => Some(raw.parse().map_err(|_| {
                    anyhow::anyhow!("WANMON_WAN_IF_INDEX has an invalid value: '{}'", raw)
                })?),
                Err(_) => None,
            },
            wan_port: env_parse("WANMON_WAN_PORT", 0)?,
            check_interval_secs: env_parse("WANMON_CHECK_INTERVAL_SECS", 180)?,
            reconnect_wait_secs: env_parse("WANMON_RECONNECT_WAIT_SECS", 5)?,
            stabilize_wait_secs: env_parse("WANMON_STABILIZE_WAIT_SECS", 30)?,
            max_reconnect_attempts: env_parse("WANMON_MAX_RECONNECT_ATTEMPTS", 3)?,
            remediation: env::var("WANMON_REMEDIATION").unwrap_or_else(|_| "builtin".to_string()),
            remediation_command: env::var("WANMON_REMEDIATION_COMMAND").ok(),
            log_level: env::var("WANMON_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate daemon-level settings
    ///
    /// Backend and timing values get a second, authoritative validation
    /// pass inside wanmon-core; this catches the daemon-only concerns
    /// early with actionable messages.
    fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "omada" | "ssh" | "snmp" => {}
            other => anyhow::bail!(
                "WANMON_BACKEND '{}' is not supported. Supported backends: omada, ssh, snmp",
                other
            ),
        }

        match self.remediation.as_str() {
            "builtin" | "off" => {}
            "command" => {
                if self
                    .remediation_command
                    .as_ref()
                    .is_none_or(|c| c.is_empty())
                {
                    anyhow::bail!(
                        "WANMON_REMEDIATION_COMMAND is required when WANMON_REMEDIATION=command"
                    );
                }
            }
            other => anyhow::bail!(
                "WANMON_REMEDIATION '{}' is not valid. Valid modes: builtin, command, off",
                other
            ),
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!(
                "WANMON_LOG_LEVEL '{}' is not valid. Valid levels: trace, debug, info, warn, error",
                other
            ),
        }

        if !(10..=86400).contains(&self.check_interval_secs) {
            anyhow::bail!(
                "WANMON_CHECK_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                self.check_interval_secs
            );
        }

        if self.max_reconnect_attempts == 0 || self.max_reconnect_attempts > 10 {
            anyhow::bail!(
                "WANMON_MAX_RECONNECT_ATTEMPTS must be between 1 and 10. Got: {}",
                self.max_reconnect_attempts
            );
        }

        Ok(())
    }

    fn require(&self, value: &Option<String>, var: &str) -> Result<String> {
        value.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "{} is required for the {} backend. Set it via: export {}=...",
                var,
                self.backend,
                var
            )
        })
    }

    /// Assemble the core backend configuration
    fn backend_config(&self) -> Result<BackendConfig> {
        match self.backend.as_str() {
            "omada" => Ok(BackendConfig::Omada {
                controller_url: self.require(&self.controller_url, "WANMON_CONTROLLER_URL")?,
                username: self.require(&self.username, "WANMON_USERNAME")?,
                password: self.require(&self.password, "WANMON_PASSWORD")?,
                site_name: self.site_name.clone(),
                device_mac: self.require(&self.device_mac, "WANMON_DEVICE_MAC")?,
                verify_ssl: self.verify_ssl,
            }),
            "ssh" => Ok(BackendConfig::Ssh {
                host: self.require(&self.host, "WANMON_HOST")?,
                port: self.ssh_port,
                username: self.require(&self.username, "WANMON_USERNAME")?,
                password: self.require(&self.password, "WANMON_PASSWORD")?,
                wan_interface: self.wan_interface.clone(),
            }),
            "snmp" => Ok(BackendConfig::Snmp {
                host: self.require(&self.host, "WANMON_HOST")?,
                port: self.snmp_port,
                community: self.require(&self.community, "WANMON_COMMUNITY")?,
                wan_if_index: self.wan_if_index.ok_or_else(|| {
                    anyhow::anyhow!(
                        "WANMON_WAN_IF_INDEX is required for the snmp backend. \
                        Set it via: export WANMON_WAN_IF_INDEX=2"
                    )
                })?,
            }),
            other => anyhow::bail!("unknown backend type: {}", other),
        }
    }

    /// Assemble the full core monitor configuration
    fn monitor_config(&self) -> Result<MonitorConfig> {
        let mut config = MonitorConfig::new(self.backend_config()?);
        config.device.wan_port_id = self.wan_port;
        config.monitoring.check_interval_secs = self.check_interval_secs;
        config.monitoring.reconnect_wait_secs = self.reconnect_wait_secs;
        config.monitoring.stabilize_wait_secs = self.stabilize_wait_secs;
        config.monitoring.max_reconnect_attempts = self.max_reconnect_attempts;
        config.remediation = match self.remediation.as_str() {
            "command" => RemediationMode::External,
            "off" => RemediationMode::Off,
            _ => RemediationMode::Builtin,
        };
        Ok(config)
    }
}

/// Remediation hook that runs a configured shell command
///
/// The command runs via `sh -c` with the affected port id exported as
/// `WANMON_PORT`. A non-zero exit status is a hook failure.
struct CommandHook {
    command: String,
}

#[async_trait]
impl RemediationHook for CommandHook {
    async fn run(&self, port: PortId) -> wanmon_core::Result<()> {
        let status = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("WANMON_PORT", port.to_string())
            .status()
            .await
            .map_err(|e| Error::control(format!("remediation command failed to start: {e}")))?;

        if !status.success() {
            return Err(Error::control(format!(
                "remediation command exited with {status}"
            )));
        }
        Ok(())
    }

    fn hook_name(&self) -> &'static str {
        "command"
    }
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return WanmonExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return WanmonExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return WanmonExitCode::ConfigError.into();
    }

    info!("Starting wanmond daemon");

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return WanmonExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => WanmonExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {}", e);
                if e.is_startup_fatal() {
                    WanmonExitCode::ConfigError
                } else {
                    WanmonExitCode::RuntimeError
                }
            }
        }
    })
    .into()
}

/// Run the daemon
async fn run_daemon(config: Config) -> wanmon_core::Result<()> {
    // Create backend registry and register built-in backends
    let registry = BackendRegistry::new();
    wanmon_backend_omada::register(&registry);
    wanmon_backend_ssh::register(&registry);
    wanmon_backend_snmp::register(&registry);

    let monitor_config = config
        .monitor_config()
        .map_err(|e| Error::config(e.to_string()))?;

    info!("Backend type: {}", monitor_config.backend.type_name());
    info!("Remediation mode: {}", config.remediation);

    let backend: Arc<dyn DeviceBackend> = registry.create_backend(&monitor_config.backend)?.into();

    let hook: Option<Box<dyn RemediationHook>> = match monitor_config.remediation {
        RemediationMode::External => {
            let command = config
                .remediation_command
                .clone()
                .ok_or_else(|| Error::config("remediation command is not set"))?;
            Some(Box::new(CommandHook { command }))
        }
        _ => None,
    };

    let (monitor, events) = WanMonitor::new(backend, monitor_config, hook)?;

    // Event consumer: surfaces the monitor's event stream in the logs
    let event_task = tokio::spawn(log_events(events));

    // Wire SIGTERM/SIGINT to the monitor's shutdown channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(sig) => info!("Received shutdown signal: {}", sig),
            Err(e) => error!("Shutdown signal error: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    monitor.run_with_shutdown(shutdown_rx).await?;

    // The monitor dropped its event sender; the consumer drains and ends.
    let _ = event_task.await;

    info!("Shutting down daemon");
    Ok(())
}

/// Consume monitor events until the channel closes
async fn log_events(mut events: tokio::sync::mpsc::Receiver<MonitorEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            MonitorEvent::Started { backend, port } => {
                info!(backend, %port, "monitor started");
            }
            MonitorEvent::PollSucceeded { address } => {
                debug!(%address, "poll succeeded");
            }
            MonitorEvent::PollFailed { error } => {
                debug!(error, "poll failed");
            }
            MonitorEvent::SessionError { error } => {
                warn!(error, "session error");
            }
            MonitorEvent::PrivateDetected { address } => {
                warn!(%address, "private WAN address detected");
            }
            MonitorEvent::RemediationStateChanged { state, attempt } => {
                debug!(%state, attempt, "remediation state changed");
            }
            MonitorEvent::AttemptFinished { attempt } => {
                info!(
                    number = attempt.number,
                    outcome = ?attempt.outcome,
                    "remediation attempt finished"
                );
            }
            MonitorEvent::EpisodeFinished { outcome } => {
                info!(?outcome, "remediation episode finished");
            }
            MonitorEvent::HookInvoked { hook, result } => match result {
                Ok(()) => info!(hook, "remediation hook invoked"),
                Err(error) => warn!(hook, error, "remediation hook failed"),
            },
            MonitorEvent::ExternalFixObserved { address } => {
                info!(%address, "public address restored externally");
            }
            MonitorEvent::Stopped { reason } => {
                info!(reason, "monitor stopped");
            }
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let sig = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(sig)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
