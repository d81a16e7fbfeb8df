// # SNMP Backend
//
// Read-only backend for gateways that expose SNMPv2c but no usable API
// or CLI. The WAN address comes out of the standard ipAddrTable: walking
// ipAdEntIfIndex yields one row per configured address, keyed by the
// address itself in the OID suffix, with the owning interface index as
// the value. The row whose value matches the configured WAN ifIndex is
// the WAN address.
//
// SNMP write access to interface adminStatus is disabled on every
// consumer gateway worth mentioning, so this backend reports no port
// control and the monitor pairs it with an external hook or
// detection-only mode.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use csnmp::{ObjectIdentifier, Snmp2cClient};
use tracing::{debug, trace};
use wanmon_core::config::BackendConfig;
use wanmon_core::traits::{BackendFactory, DeviceBackend, PortId};
use wanmon_core::{BackendRegistry, Error, Result};

/// ipAdEntIfIndex (RFC 1213 ipAddrTable): value is the ifIndex owning
/// the address encoded in the OID suffix
const IP_AD_ENT_IF_INDEX: &str = "1.3.6.1.2.1.4.20.1.2";

/// Per-request timeout for the agent
const SNMP_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only SNMPv2c backend
#[derive(Debug)]
pub struct SnmpBackend {
    host: String,
    port: u16,
    community: Vec<u8>,
    wan_if_index: i32,
}

impl SnmpBackend {
    pub fn new(host: String, port: u16, community: String, wan_if_index: i32) -> Self {
        Self {
            host,
            port,
            community: community.into_bytes(),
            wan_if_index,
        }
    }

    async fn resolve_target(&self) -> Result<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| Error::query(format!("host '{}' did not resolve", self.host)))
    }
}

/// Recover the address a row describes from its OID suffix
///
/// Rows of ipAdEntIfIndex are indexed by the four octets of the address
/// appended to the column OID.
fn address_from_row(base_len: usize, row: &ObjectIdentifier) -> Option<Ipv4Addr> {
    let suffix = &row.as_slice()[base_len..];
    if suffix.len() != 4 {
        return None;
    }
    let octets: Vec<u8> = suffix
        .iter()
        .map(|&part| u8::try_from(part).ok())
        .collect::<Option<_>>()?;
    Some(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
}

#[async_trait]
impl DeviceBackend for SnmpBackend {
    // Community-string auth rides along with every request; there is no
    // session to establish, so the default no-op authenticate stands.

    async fn query_wan_address(&self, _port: PortId) -> Result<String> {
        let target = self.resolve_target().await?;
        let client = Snmp2cClient::new(
            target,
            self.community.clone(),
            None,
            Some(SNMP_TIMEOUT),
            0,
        )
        .await
        .map_err(|e| Error::query(format!("snmp client setup failed: {e}")))?;

        let base: ObjectIdentifier = IP_AD_ENT_IF_INDEX
            .parse()
            .map_err(|e| Error::other(format!("bad base OID: {e}")))?;
        let rows = client
            .walk(base)
            .await
            .map_err(|e| Error::query(format!("snmp walk of ipAdEntIfIndex failed: {e}")))?;

        let base_len = base.as_slice().len();
        for (oid, value) in &rows {
            let Some(if_index) = value.as_i32() else {
                continue;
            };
            let Some(addr) = address_from_row(base_len, oid) else {
                trace!(%oid, "skipping malformed ipAddrTable row");
                continue;
            };
            if if_index == self.wan_if_index {
                debug!(%addr, if_index, "WAN address found in ipAddrTable");
                return Ok(addr.to_string());
            }
        }

        Err(Error::query(format!(
            "no ipAddrTable row for ifIndex {} ({} rows walked)",
            self.wan_if_index,
            rows.len()
        )))
    }

    async fn set_port_enabled(&self, _port: PortId, _enabled: bool) -> Result<()> {
        Err(Error::unsupported(
            "snmp backend is read-only and cannot control ports",
        ))
    }

    fn supports_port_control(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "snmp"
    }
}

/// Factory for creating SNMP backends from configuration
pub struct SnmpFactory;

impl BackendFactory for SnmpFactory {
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn DeviceBackend>> {
        match config {
            BackendConfig::Snmp {
                host,
                port,
                community,
                wan_if_index,
            } => Ok(Box::new(SnmpBackend::new(
                host.clone(),
                *port,
                community.clone(),
                *wan_if_index,
            ))),
            _ => Err(Error::config("invalid config for snmp backend")),
        }
    }
}

/// Register the SNMP backend with a registry
pub fn register(registry: &BackendRegistry) {
    registry.register_backend("snmp", Box::new(SnmpFactory));
}
