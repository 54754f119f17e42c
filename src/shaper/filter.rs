//! Parser for `tc filter show` output.
//!
//! The u32 classifier prints each match key as `match <value>/<mask> at <off>`.
//! An address filter shows up as one (IPv4) or four (IPv6) keys with a full
//! mask, and the optional NAT-T port qualifier as a key masked to its low 16
//! bits. A typical IPv4 dump:
//!
//! ```text
//! filter parent 1: protocol ip pref 525 u32 fh 800::800 order 2048 key ht 800 bkt 0 flowid 1:525
//!   match 01020305/ffffffff at 16
//!   match 00001194/0000ffff at 20
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;

use super::classid::ClassId;
use crate::error::ThrottleError;

static FLOWID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"flowid 1:(\d+)").expect("valid flowid regex"));
static ADDR_MATCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"match ([0-9a-f]+)/ffffffff").expect("valid address regex"));
static PORT_MATCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"match ([0-9a-f]+)/0000ffff").expect("valid port regex"));

/// tc protocol selector of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ip,
    Ipv6,
}

impl Protocol {
    pub fn for_address(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Protocol::Ip,
            IpAddr::V6(_) => Protocol::Ipv6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Ip => "ip",
            Protocol::Ipv6 => "ipv6",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client's address filter as currently installed on the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapingRule {
    pub class_id: ClassId,
    pub address: IpAddr,
    pub port: Option<u16>,
    pub protocol: Protocol,
}

/// Parse the output of `tc filter show dev <dev> prio <id>`.
///
/// Empty output means no filter exists at that priority. Non-empty output
/// without a `flowid` or with an address that is neither 4 nor 16 bytes
/// long is rejected rather than guessed at.
pub fn parse_filter(raw: &str) -> Result<Option<ShapingRule>, ThrottleError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let flowid = FLOWID_RE
        .captures(raw)
        .and_then(|c| c.get(1))
        .ok_or_else(|| ThrottleError::Parse(format!("no flowid in filter output: {:?}", raw)))?;
    let class_id = flowid
        .as_str()
        .parse::<u16>()
        .map(ClassId::from_raw)
        .map_err(|_| ThrottleError::Parse(format!("flowid out of range: {}", flowid.as_str())))?;

    let mut addr_bytes = Vec::with_capacity(16);
    for caps in ADDR_MATCH_RE.captures_iter(raw) {
        addr_bytes.extend(decode_key(&caps[1])?);
    }
    let address = match addr_bytes.len() {
        4 => {
            let octets: [u8; 4] = addr_bytes[..].try_into().expect("length checked");
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = addr_bytes[..].try_into().expect("length checked");
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        n => {
            return Err(ThrottleError::Parse(format!(
                "expected a 4 or 16 byte address match for flowid {}, got {} bytes",
                class_id, n
            )))
        }
    };

    let port = match PORT_MATCH_RE.captures(raw) {
        Some(caps) => {
            let key = decode_key(&caps[1])?;
            if key.len() < 2 {
                return Err(ThrottleError::Parse(format!("short port match: {}", &caps[1])));
            }
            let n = key.len();
            Some(u16::from_be_bytes([key[n - 2], key[n - 1]]))
        }
        None => None,
    };

    Ok(Some(ShapingRule {
        class_id,
        address,
        port,
        protocol: Protocol::for_address(&address),
    }))
}

fn decode_key(hex_str: &str) -> Result<Vec<u8>, ThrottleError> {
    hex::decode(hex_str)
        .map_err(|e| ThrottleError::Parse(format!("bad match key {:?}: {}", hex_str, e)))
}
