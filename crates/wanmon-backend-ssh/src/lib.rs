// # SSH CLI Backend
//
// Talks to the gateway directly over SSH and scrapes the WAN address out
// of CLI output. Firmware revisions disagree on which status command
// exists and how its output is shaped, so the query walks a ladder of
// known commands and stops at the first one whose output matches the
// pattern set.
//
// ## Session model
//
// One persistent SSH session per backend, established by `authenticate`
// and reused across operations. A failure to open a channel on it is
// treated as a dead connection: the session is dropped and surfaced as
// `Error::Auth`, which carries the credential-expiry signature the core
// session manager reacts to by re-authenticating.
//
// libssh2 is a blocking library; every operation runs on the blocking
// thread pool, and the session slot uses a std mutex that is only ever
// locked inside those blocking tasks.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use ssh2::Session;
use tokio::task;
use tracing::{debug, info, trace};
use wanmon_core::config::BackendConfig;
use wanmon_core::traits::{BackendFactory, DeviceBackend, PortId};
use wanmon_core::{BackendRegistry, Error, Result};

/// TCP connect and SSH read timeout
const SSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between lines fed to the interactive config shell
const SHELL_SETTLE: Duration = Duration::from_millis(500);

/// Pattern set v1, tried in order against each command's output
///
/// Covers the labeled address notations seen across these gateways' CLI
/// dialects: the explicit `IP address:` field, iproute2's `inet`, and
/// labeled `ipv4:`/`ip:`/`address:` fields. Versioned so a firmware
/// update that breaks scraping shows up as a diagnosable pattern-set
/// mismatch, not a silent wrong value.
static PATTERNS_V1: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"IP [Aa]ddress[:\s]+(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"inet (\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"ipv4[:\s]+(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"\bip[:\s]+(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"address[:\s]+(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("pattern is valid"))
    .collect()
});

/// Last-resort bare dotted quad with a prefix length (v1)
///
/// Only trusted on a line that names the target interface: multi-row
/// listings like `show ip interface brief` carry every interface's
/// address in this shape, and an unscoped match could return a LAN
/// neighbor's address.
static BARE_QUAD_V1: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})/\d{1,2}").expect("pattern is valid")
});

/// Connection parameters, cloned into blocking tasks
#[derive(Clone)]
struct ConnectParams {
    host: String,
    port: u16,
    username: String,
    password: String,
}

/// Direct-to-device backend using the gateway's SSH CLI
pub struct SshBackend {
    params: ConnectParams,
    wan_interface: String,
    /// Persistent session; None until authenticated or after a drop.
    /// Only locked from blocking tasks, never across an await.
    session: Arc<Mutex<Option<Session>>>,
}

// The Debug implementation intentionally does NOT expose credentials.
impl std::fmt::Debug for SshBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshBackend")
            .field("host", &self.params.host)
            .field("port", &self.params.port)
            .field("username", &self.params.username)
            .field("password", &"<REDACTED>")
            .field("wan_interface", &self.wan_interface)
            .finish()
    }
}

impl SshBackend {
    pub fn new(
        host: String,
        port: u16,
        username: String,
        password: String,
        wan_interface: String,
    ) -> Self {
        Self {
            params: ConnectParams {
                host,
                port,
                username,
                password,
            },
            wan_interface,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Status commands to try, most specific first
    fn query_commands(&self) -> Vec<String> {
        vec![
            format!("show interface {}", self.wan_interface),
            "show ip interface brief".to_string(),
            "show interface".to_string(),
            format!("ip addr show {}", self.wan_interface),
        ]
    }
}

fn connect(params: &ConnectParams) -> Result<Session> {
    let addr = format!("{}:{}", params.host, params.port);
    // Connection setup failures share the handshake's Auth signature so
    // the session manager's renewal accounting sees them uniformly.
    let stream = TcpStream::connect(&addr)
        .map_err(|e| Error::auth(format!("ssh connect to {addr} failed: {e}")))?;
    stream
        .set_read_timeout(Some(SSH_TIMEOUT))
        .map_err(|e| Error::auth(format!("ssh socket setup failed: {e}")))?;
    stream
        .set_write_timeout(Some(SSH_TIMEOUT))
        .map_err(|e| Error::auth(format!("ssh socket setup failed: {e}")))?;

    let mut session =
        Session::new().map_err(|e| Error::auth(format!("ssh session setup failed: {e}")))?;
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|e| Error::auth(format!("ssh handshake with {addr} failed: {e}")))?;
    session
        .userauth_password(&params.username, &params.password)
        .map_err(|e| Error::auth(format!("ssh authentication failed: {e}")))?;

    debug!(addr, "ssh session established");
    Ok(session)
}

/// Open a channel on the held session, connecting first if needed
///
/// A channel-open failure on an existing session means the connection is
/// dead; the slot is cleared and the failure is reported with the
/// credential-expiry signature so the session manager re-authenticates.
fn open_channel(
    params: &ConnectParams,
    slot: &Mutex<Option<Session>>,
) -> Result<ssh2::Channel> {
    let mut guard = slot.lock().unwrap();
    if guard.is_none() {
        *guard = Some(connect(params)?);
    }
    let session = guard.as_ref().expect("session present after connect");
    match session.channel_session() {
        Ok(channel) => Ok(channel),
        Err(e) => {
            *guard = None;
            Err(Error::auth(format!("ssh session lost: {e}")))
        }
    }
}

fn run_command(channel: &mut ssh2::Channel, command: &str) -> Result<String> {
    channel
        .exec(command)
        .map_err(|e| Error::query(format!("ssh exec '{command}' failed: {e}")))?;

    let mut output = String::new();
    channel.read_to_string(&mut output)?;
    channel
        .wait_close()
        .map_err(|e| Error::query(format!("ssh channel close failed: {e}")))?;

    Ok(output)
}

/// Apply the v1 pattern set to one command's output
///
/// Labeled patterns match anywhere; the bare dotted-quad fallback only
/// matches on lines naming `interface`. `0.0.0.0` (unconfigured
/// interface) and `127.*` (an occasional loopback row in combined
/// listings) are skipped rather than returned for the classifier to
/// choke on.
fn parse_wan_address(output: &str, interface: &str) -> Option<String> {
    let usable = |ip: &str| ip != "0.0.0.0" && !ip.starts_with("127.");

    for pattern in PATTERNS_V1.iter() {
        for captures in pattern.captures_iter(output) {
            let ip = &captures[1];
            if usable(ip) {
                return Some(ip.to_string());
            }
        }
    }

    for line in output.lines().filter(|l| l.contains(interface)) {
        for captures in BARE_QUAD_V1.captures_iter(line) {
            let ip = &captures[1];
            if usable(ip) {
                return Some(ip.to_string());
            }
        }
    }

    None
}

/// Feed a line to the interactive shell and give the CLI time to act
fn shell_line(channel: &mut ssh2::Channel, line: &str) -> Result<()> {
    channel
        .write_all(format!("{line}\n").as_bytes())
        .map_err(|e| Error::control(format!("ssh shell write failed: {e}")))?;
    std::thread::sleep(SHELL_SETTLE);
    Ok(())
}

fn set_interface_state(channel: &mut ssh2::Channel, interface: &str, enabled: bool) -> Result<()> {
    channel
        .request_pty("vt100", None, None)
        .map_err(|e| Error::control(format!("ssh pty request failed: {e}")))?;
    channel
        .shell()
        .map_err(|e| Error::control(format!("ssh shell request failed: {e}")))?;

    let state_cmd = if enabled { "no shutdown" } else { "shutdown" };
    shell_line(channel, "configure terminal")?;
    shell_line(channel, &format!("interface {interface}"))?;
    shell_line(channel, state_cmd)?;
    shell_line(channel, "exit")?;
    shell_line(channel, "exit")?;

    channel.send_eof().ok();
    channel.close().ok();
    Ok(())
}

#[async_trait]
impl DeviceBackend for SshBackend {
    async fn authenticate(&self) -> Result<()> {
        let params = self.params.clone();
        let slot = Arc::clone(&self.session);
        task::spawn_blocking(move || {
            let session = connect(&params)?;
            *slot.lock().unwrap() = Some(session);
            Ok(())
        })
        .await
        .map_err(|e| Error::other(format!("ssh task failed: {e}")))?
    }

    async fn query_wan_address(&self, _port: PortId) -> Result<String> {
        let params = self.params.clone();
        let slot = Arc::clone(&self.session);
        let commands = self.query_commands();
        let interface = self.wan_interface.clone();

        task::spawn_blocking(move || {
            let mut saw_output = false;
            for command in &commands {
                let mut channel = open_channel(&params, &slot)?;
                let output = match run_command(&mut channel, command) {
                    Ok(output) => output,
                    Err(e) => {
                        trace!(command, error = %e, "status command failed, trying next");
                        continue;
                    }
                };
                saw_output = saw_output || !output.trim().is_empty();
                if let Some(ip) = parse_wan_address(&output, &interface) {
                    debug!(command, ip, "WAN address scraped from CLI output");
                    return Ok(ip);
                }
            }
            if saw_output {
                // Output existed but the pattern set did not match it,
                // which is how a firmware-side format change presents.
                Err(Error::parse(
                    "CLI output matched no pattern in set v1; firmware \
                     output format may have changed",
                ))
            } else {
                Err(Error::query("no status command produced output"))
            }
        })
        .await
        .map_err(|e| Error::other(format!("ssh task failed: {e}")))?
    }

    async fn set_port_enabled(&self, _port: PortId, enabled: bool) -> Result<()> {
        let params = self.params.clone();
        let slot = Arc::clone(&self.session);
        let interface = self.wan_interface.clone();

        task::spawn_blocking(move || {
            let mut channel = open_channel(&params, &slot)?;
            set_interface_state(&mut channel, &interface, enabled)?;
            info!(interface, enabled, "interface state changed via CLI");
            Ok(())
        })
        .await
        .map_err(|e| Error::other(format!("ssh task failed: {e}")))?
    }

    fn supports_port_control(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "ssh"
    }
}

/// Factory for creating SSH backends from configuration
pub struct SshFactory;

impl BackendFactory for SshFactory {
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn DeviceBackend>> {
        match config {
            BackendConfig::Ssh {
                host,
                port,
                username,
                password,
                wan_interface,
            } => Ok(Box::new(SshBackend::new(
                host.clone(),
                *port,
                username.clone(),
                password.clone(),
                wan_interface.clone(),
            ))),
            _ => Err(Error::config("invalid config for ssh backend")),
        }
    }
}

/// Register the SSH backend with a registry
pub fn register(registry: &BackendRegistry) {
    registry.register_backend("ssh", Box::new(SshFactory));
}
