//! RFC 1918 address classification
//!
//! Pure, deterministic classification of a raw address string into
//! `Private` or `Public`. Unparseable input fails with
//! [`Error::InvalidAddress`]; there is no third class.
//!
//! The private partition is exactly the three RFC 1918 ranges:
//! 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16. Anything else, including
//! loopback and link-local, is Public unless explicitly excluded via
//! [`ClassifierOptions`]. The partition is never widened silently because
//! the whole point of the monitor is to react to these three ranges and
//! nothing else.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Classification of a WAN address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddrClass {
    /// RFC 1918 private address (the failure mode we remediate)
    Private,
    /// Anything else; assumed globally routable
    Public,
}

/// A validated address plus its derived class
///
/// Immutable once classified; a fresh value is created on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    /// The parsed address
    pub ip: IpAddr,
    /// Derived classification
    pub class: AddrClass,
}

impl Address {
    /// Whether this address is in the RFC 1918 private space
    pub fn is_private(&self) -> bool {
        self.class == AddrClass::Private
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.ip)
    }
}

/// Optional, explicit exclusions on top of the RFC 1918 partition
///
/// Both default to `false`: by default loopback and link-local addresses
/// classify as Public, mirroring the bare three-range rule. Excluded
/// addresses are rejected as invalid rather than reported Public, since a
/// WAN interface holding 127.0.0.1 is a sensor problem, not a DHCP one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierOptions {
    /// Reject 127.0.0.0/8 and ::1
    #[serde(default)]
    pub exclude_loopback: bool,

    /// Reject 169.254.0.0/16 and fe80::/10
    #[serde(default)]
    pub exclude_link_local: bool,
}

/// Classify a raw address string
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] when `raw` is not a well-formed IPv4
/// dotted-quad or IPv6 literal, or when it falls in a range explicitly
/// excluded by `opts`.
pub fn classify(raw: &str, opts: &ClassifierOptions) -> Result<Address> {
    let raw = raw.trim();
    let ip: IpAddr = raw
        .parse()
        .map_err(|_| Error::invalid_address(format!("'{raw}' is not an IP address")))?;

    if opts.exclude_loopback && ip.is_loopback() {
        return Err(Error::invalid_address(format!("'{raw}' is a loopback address")));
    }

    let link_local = match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    };
    if opts.exclude_link_local && link_local {
        return Err(Error::invalid_address(format!("'{raw}' is a link-local address")));
    }

    let class = match ip {
        IpAddr::V4(v4) if is_rfc1918(v4) => AddrClass::Private,
        _ => AddrClass::Public,
    };

    Ok(Address { ip, class })
}

/// The exact RFC 1918 three-range partition, first match wins
fn is_rfc1918(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    if a == 10 {
        return true;
    }
    if a == 172 && (16..=31).contains(&b) {
        return true;
    }
    if a == 192 && b == 168 {
        return true;
    }
    false
}
