//! Per-client class id derivation.
//!
//! A client's class id is a pure function of its virtual address, so the
//! same id can be recomputed on disconnect without keeping any state. Only
//! the low 13 bits of the trailing 16-bit group are used; addresses that
//! differ elsewhere alias onto the same id.

use std::fmt;
use std::net::IpAddr;

use crate::error::ThrottleError;

/// Ids below this value are left for rules that are not per-client.
pub const CLASSID_OFFSET: u16 = 10;

/// Mask applied to the trailing 16 bits of the address.
pub const CLASSID_MASK: u16 = 0x1fff;

/// Largest id the allocator can produce.
pub const CLASSID_MAX: u16 = CLASSID_MASK + CLASSID_OFFSET;

/// Priority offset separating mark-based filters from address filters.
pub const UPSTREAM_PRIO_OFFSET: u32 = 10_000;

/// Class/filter identifier of one client inside the root HTB qdisc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(u16);

impl ClassId {
    /// Derive the class id for a virtual address.
    pub fn for_address(addr: &IpAddr) -> Self {
        let trailing = match addr {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                u16::from_be_bytes([o[2], o[3]])
            }
            IpAddr::V6(v6) => {
                let o = v6.octets();
                u16::from_be_bytes([o[14], o[15]])
            }
        };
        ClassId((trailing & CLASSID_MASK) + CLASSID_OFFSET)
    }

    /// Parse a textual address and derive its class id.
    pub fn parse_address(addr: &str) -> Result<Self, ThrottleError> {
        let ip = parse_ip(addr)?;
        Ok(Self::for_address(&ip))
    }

    /// Wrap a raw id read back from the filter table.
    pub fn from_raw(id: u16) -> Self {
        ClassId(id)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Filter priority of the address filter.
    pub fn prio(self) -> u32 {
        u32::from(self.0)
    }

    /// Filter priority of the mark-based (upstream) filter.
    pub fn upstream_prio(self) -> u32 {
        u32::from(self.0) + UPSTREAM_PRIO_OFFSET
    }

    /// Class handle under the root qdisc, e.g. `1:525`.
    pub fn handle(self) -> String {
        format!("1:{}", self.0)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse an IP address, mapping failures to [`ThrottleError::AddressParse`].
pub fn parse_ip(addr: &str) -> Result<IpAddr, ThrottleError> {
    addr.trim()
        .parse()
        .map_err(|_| ThrottleError::AddressParse(addr.to_string()))
}
