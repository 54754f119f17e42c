//! strongSwan updown hook handling.
//!
//! charon runs the updown script for every CHILD_SA state change and
//! describes the connection in `PLUTO_*` environment variables. `up-*` verbs
//! install a client's rate limit, `down-*` verbs remove it, and everything
//! else (`prepare-*`, `route-*`, ...) is left to the stock script.

use anyhow::Result;
use std::net::IpAddr;
use tracing::{debug, error, info, warn};

use crate::cmd_abstraction::CommandExecutor;
use crate::error::ThrottleError;
use crate::rate_limit::RateLimitSource;
use crate::shaper::{parse_ip, ClassId, Shaper};

pub const ENV_VERB: &str = "PLUTO_VERB";
pub const ENV_PEER: &str = "PLUTO_PEER";
pub const ENV_UDP_ENC: &str = "PLUTO_UDP_ENC";
pub const ENV_PEER_SOURCEIP: &str = "PLUTO_PEER_SOURCEIP";
pub const ENV_PEER_ID: &str = "PLUTO_PEER_ID";

/// What a lifecycle verb asks us to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Remove,
}

impl Action {
    /// Map a `PLUTO_VERB` value to an action; unrelated verbs yield `None`.
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "up-host" | "up-client" | "up-host-v6" | "up-client-v6" => Some(Action::Install),
            "down-host" | "down-client" | "down-host-v6" | "down-client-v6" => {
                Some(Action::Remove)
            }
            _ => None,
        }
    }
}

/// Connection attributes taken from the hook environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Public address of the remote peer
    pub client_ip: IpAddr,
    /// NAT-T UDP encapsulation port, if any
    pub client_port: Option<u16>,
    /// Virtual IP assigned to the peer inside the tunnel
    pub virtual_ip: IpAddr,
    /// Peer identity with any leading `CN=` removed
    pub peer_id: Option<String>,
}

impl ConnectionEvent {
    pub fn from_env<F>(lookup: F) -> Result<Self, ThrottleError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_ip = parse_ip(&require(&lookup, ENV_PEER)?)?;
        let virtual_ip = parse_ip(&require(&lookup, ENV_PEER_SOURCEIP)?)?;
        let client_port = match lookup(ENV_UDP_ENC) {
            Some(port) => parse_port(&port)?,
            None => None,
        };
        let peer_id = lookup(ENV_PEER_ID).map(|id| strip_cn(&id).to_string());

        Ok(Self {
            client_ip,
            client_port,
            virtual_ip,
            peer_id,
        })
    }
}

/// What handling an event ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Verb is not one we act on
    Ignored,
    /// The service has no limit for this peer
    Unlimited,
    /// The rate lookup failed; the client was left unthrottled
    LookupFailed,
    Throttled(ClassId),
    Removed,
    /// Nothing was installed for this client
    NotInstalled,
}

/// Handle one hook invocation for the given verb.
pub async fn handle_event<E, F>(
    shaper: &Shaper<E>,
    limits: &dyn RateLimitSource,
    verb: &str,
    lookup: F,
) -> Result<Outcome>
where
    E: CommandExecutor,
    F: Fn(&str) -> Option<String>,
{
    let action = match Action::from_verb(verb) {
        Some(action) => action,
        None => {
            debug!("Ignoring verb {}", verb);
            return Ok(Outcome::Ignored);
        }
    };

    let event = ConnectionEvent::from_env(lookup)?;
    debug!("{} {:?}", verb, event);

    match action {
        Action::Install => {
            let peer_id = event
                .peer_id
                .as_deref()
                .ok_or(ThrottleError::MissingEnv(ENV_PEER_ID))?;
            let rate = match limits.rate_limit(peer_id).await {
                Ok(Some(rate)) => rate,
                Ok(None) => return Ok(Outcome::Unlimited),
                Err(e) => {
                    error!("Not throttling {}: {}", peer_id, e);
                    return Ok(Outcome::LookupFailed);
                }
            };
            let id = shaper
                .install(event.client_ip, event.client_port, event.virtual_ip, rate)
                .await?;
            Ok(Outcome::Throttled(id))
        }
        Action::Remove => {
            if shaper
                .remove(event.client_ip, event.client_port, event.virtual_ip)
                .await?
            {
                Ok(Outcome::Removed)
            } else {
                Ok(Outcome::NotInstalled)
            }
        }
    }
}

/// Run the stock updown script so its firewall handling still happens.
///
/// Failures are logged and otherwise ignored.
pub async fn run_default_updown<E: CommandExecutor>(executor: &E, script: &str, left_firewall: bool) {
    let args: Vec<String> = if left_firewall {
        vec!["iptables".to_string()]
    } else {
        Vec::new()
    };

    match executor.execute(script, &args).await {
        Ok(output) => {
            if !output.stdout.trim().is_empty() {
                info!("{}", output.stdout.trim_end());
            }
            if !output.success {
                warn!(
                    "{} exited with {:?}: {}",
                    script,
                    output.code,
                    output.stderr.trim()
                );
            }
        }
        Err(e) => warn!("Failed to run {}: {:#}", script, e),
    }
}

fn require<F>(lookup: &F, name: &'static str) -> Result<String, ThrottleError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ThrottleError::MissingEnv(name))
}

/// `PLUTO_UDP_ENC` is empty or `0` when the tunnel is not UDP-encapsulated.
fn parse_port(value: &str) -> Result<Option<u16>, ThrottleError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<u16>() {
        Ok(0) => Ok(None),
        Ok(port) => Ok(Some(port)),
        Err(_) => Err(ThrottleError::InvalidPort(value.to_string())),
    }
}

fn strip_cn(peer_id: &str) -> &str {
    peer_id.strip_prefix("CN=").unwrap_or(peer_id)
}
