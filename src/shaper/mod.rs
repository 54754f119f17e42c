//! Traffic shaping engine (tc HTB classes, u32/fw filters, iptables marks).
//!
//! All shaping state lives in the kernel. Installing a limit creates, under
//! the root HTB qdisc `1:` of the configured device:
//!
//! - an HTB class `1:<id>` capped at the client's rate,
//! - a u32 filter at priority `<id>` matching the client's public address
//!   (and NAT-T port for IPv4) to that class,
//! - with upstream throttling, an iptables MARK rule for traffic from the
//!   client's virtual address and a fw filter at priority `<id> + 10000`
//!   sending marked packets to the same class.
//!
//! Removal reads the u32 filter back from `tc filter show` and deletes the
//! same resources, filters before the class they point to.

mod classid;
mod filter;

pub use classid::{parse_ip, ClassId, CLASSID_MAX, CLASSID_OFFSET, UPSTREAM_PRIO_OFFSET};
pub use filter::{parse_filter, Protocol, ShapingRule};

use anyhow::{Context, Result};
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::cmd_abstraction::{args_to_strings, CommandExecutor};
use crate::config::Config;
use crate::error::ThrottleError;

const TC: &str = "tc";
const IPTABLES: &str = "iptables";
const IP6TABLES: &str = "ip6tables";

/// Marker printed by `tc qdisc show` once the root HTB qdisc is in place.
const HTB_ROOT_MARKER: &str = "qdisc htb 1:";

/// Device-level settings the shaper needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaperSettings {
    /// Interface carrying traffic towards the clients
    pub device: String,
    /// Rate of the top-level class, in tc syntax (e.g. "1gbit")
    pub max_bandwidth: String,
    /// Also throttle traffic sent by clients, via firewall marks
    pub throttle_upstream: bool,
}

impl From<&Config> for ShaperSettings {
    fn from(config: &Config) -> Self {
        Self {
            device: config.device.clone(),
            max_bandwidth: config.max_bandwidth.clone(),
            throttle_upstream: config.throttle_upstream,
        }
    }
}

/// Installs and removes per-client rate limits through an injected executor.
pub struct Shaper<E: CommandExecutor> {
    executor: E,
    settings: ShaperSettings,
}

impl<E: CommandExecutor> Shaper<E> {
    pub fn new(executor: E, settings: ShaperSettings) -> Self {
        Self { executor, settings }
    }

    pub fn settings(&self) -> &ShaperSettings {
        &self.settings
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Make sure the root HTB qdisc and its top-level class exist.
    ///
    /// Returns `true` if they had to be created.
    pub async fn ensure_initialized(&self) -> Result<bool> {
        let dev = self.settings.device.as_str();
        let current = self.tc(&["qdisc", "show", "dev", dev]).await?;
        if current.contains(HTB_ROOT_MARKER) {
            debug!("HTB qdisc already present on {}", dev);
            return Ok(false);
        }

        self.tc(&["qdisc", "add", "dev", dev, "root", "handle", "1:", "htb", "default", "1"])
            .await?;
        self.tc(&[
            "class", "add", "dev", dev, "parent", "1:", "classid", "1:1",
            "htb", "rate", &self.settings.max_bandwidth,
        ])
        .await?;

        info!(
            "Initialized HTB qdisc on {} (max {})",
            dev, self.settings.max_bandwidth
        );
        Ok(true)
    }

    /// Install a rate limit for a client.
    ///
    /// `client_ip`/`client_port` identify the tunnel endpoint that downstream
    /// traffic is sent to; `virtual_ip` is the address assigned inside the
    /// tunnel and determines the class id.
    pub async fn install(
        &self,
        client_ip: IpAddr,
        client_port: Option<u16>,
        virtual_ip: IpAddr,
        rate_kbps: u32,
    ) -> Result<ClassId> {
        if rate_kbps == 0 {
            return Err(ThrottleError::InvalidRate(rate_kbps).into());
        }

        let id = ClassId::for_address(&virtual_ip);
        info!("Throttling client {} at {} kbps (class {})", client_ip, rate_kbps, id);

        self.add_class(id, rate_kbps).await?;
        self.add_address_filter(client_ip, client_port, id).await?;
        if self.settings.throttle_upstream {
            self.add_mark(virtual_ip, id).await?;
            self.add_mark_filter(virtual_ip, id).await?;
        }
        Ok(id)
    }

    /// Remove whatever limit is installed for a client.
    ///
    /// Returns `false` when no filter was found, in which case the lookup
    /// was the only command issued.
    pub async fn remove(
        &self,
        client_ip: IpAddr,
        client_port: Option<u16>,
        virtual_ip: IpAddr,
    ) -> Result<bool> {
        let expected = ClassId::for_address(&virtual_ip);
        let rule = match self.discover(expected).await? {
            Some(rule) => rule,
            None => {
                debug!("No filter for {} (class {}), nothing to remove", client_ip, expected);
                return Ok(false);
            }
        };

        if rule.class_id != expected {
            warn!(
                "Filter at prio {} points to class {}, removing that one",
                expected, rule.class_id
            );
        }
        if rule.address != client_ip || rule.port != client_port {
            debug!(
                "Installed filter matches {}:{:?}, event reported {}:{:?}",
                rule.address, rule.port, client_ip, client_port
            );
        }

        let id = rule.class_id;
        self.remove_filter(id.prio(), rule.protocol).await?;
        if self.settings.throttle_upstream {
            self.remove_filter(id.upstream_prio(), Protocol::for_address(&virtual_ip))
                .await?;
            self.remove_mark(virtual_ip, id).await?;
        }
        self.remove_class(id).await?;

        info!("Removed throttling for {} (class {})", client_ip, id);
        Ok(true)
    }

    /// Look up the address filter installed at the given class id's priority.
    pub async fn discover(&self, id: ClassId) -> Result<Option<ShapingRule>> {
        let prio = id.prio().to_string();
        let raw = self
            .tc(&["filter", "show", "dev", &self.settings.device, "prio", &prio])
            .await?;
        let rule = parse_filter(&raw)
            .with_context(|| format!("Failed to parse filter at prio {}", prio))?;
        Ok(rule)
    }

    async fn add_class(&self, id: ClassId, rate_kbps: u32) -> Result<()> {
        self.tc(&[
            "class", "add", "dev", &self.settings.device, "parent", "1:",
            "classid", &id.handle(), "htb", "rate", &format!("{}kbit", rate_kbps),
        ])
        .await?;
        Ok(())
    }

    async fn add_address_filter(&self, client_ip: IpAddr, client_port: Option<u16>, id: ClassId) -> Result<()> {
        let dev = self.settings.device.as_str();
        let prio = id.prio().to_string();
        let dst = IpNet::from(client_ip).to_string();
        let flowid = id.handle();
        let port = client_port.map(|p| p.to_string());

        let mut args = vec!["filter", "add", "dev", dev];
        match client_ip {
            IpAddr::V4(_) => {
                args.extend(["protocol", "ip", "parent", "1:", "prio", prio.as_str()]);
                args.extend(["u32", "match", "ip", "dst", dst.as_str()]);
                // NAT-T encapsulated: only match the client's UDP port
                if let Some(port) = port.as_deref() {
                    args.extend(["match", "ip", "dport", port, "0xffff"]);
                }
                args.extend(["flowid", flowid.as_str()]);
                self.tc(&args).await?;
            }
            IpAddr::V6(_) => {
                if client_port.is_some() {
                    debug!("Ignoring UDP port for IPv6 client {}", client_ip);
                }
                args.extend(["protocol", "ipv6", "parent", "1:", "prio", prio.as_str()]);
                args.extend(["u32", "match", "ip6", "dst", dst.as_str(), "flowid", flowid.as_str()]);
                self.tc(&args).await?;
            }
        }
        Ok(())
    }

    async fn add_mark_filter(&self, virtual_ip: IpAddr, id: ClassId) -> Result<()> {
        self.tc(&[
            "filter", "add", "dev", &self.settings.device,
            "protocol", Protocol::for_address(&virtual_ip).as_str(),
            "parent", "1:", "prio", &id.upstream_prio().to_string(),
            "handle", &id.to_string(), "fw", "flowid", &id.handle(),
        ])
        .await?;
        Ok(())
    }

    async fn add_mark(&self, virtual_ip: IpAddr, id: ClassId) -> Result<()> {
        self.mark_rule("-A", virtual_ip, id).await
    }

    async fn remove_mark(&self, virtual_ip: IpAddr, id: ClassId) -> Result<()> {
        self.mark_rule("-D", virtual_ip, id).await
    }

    async fn mark_rule(&self, op: &str, virtual_ip: IpAddr, id: ClassId) -> Result<()> {
        let program = match virtual_ip {
            IpAddr::V4(_) => IPTABLES,
            IpAddr::V6(_) => IP6TABLES,
        };
        let src = IpNet::from(virtual_ip).to_string();
        self.run(
            program,
            &[op, "FORWARD", "--src", &src, "-j", "MARK", "--set-mark", &id.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn remove_filter(&self, prio: u32, protocol: Protocol) -> Result<()> {
        self.tc(&[
            "filter", "del", "dev", &self.settings.device,
            "protocol", protocol.as_str(), "prio", &prio.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove_class(&self, id: ClassId) -> Result<()> {
        self.tc(&["class", "del", "dev", &self.settings.device, "classid", &id.handle()])
            .await?;
        Ok(())
    }

    async fn tc(&self, args: &[&str]) -> Result<String> {
        self.run(TC, args).await
    }

    /// Run a command and return its stdout; any non-zero exit is fatal.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", program, args.join(" "));
        debug!("EXEC: {}", command);

        let output = self
            .executor
            .execute(program, &args_to_strings(args))
            .await
            .with_context(|| format!("Failed to execute {}", command))?;

        if !output.success {
            return Err(ThrottleError::Command {
                command,
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(output.stdout)
    }
}
