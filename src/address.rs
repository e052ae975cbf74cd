//! Target addressing: parse or resolve the destination once, up front.
//!
//! Every run works against a single [`Target`] resolved before any worker
//! spawns. Hostnames go through the system resolver first and fall back to a
//! DNS resolver chain, so steady-state probing never waits on DNS.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use log::debug;
use tokio::{fs, io};

/// How the destination was named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A literal IP address, no DNS involved.
    Ip,
    /// A hostname resolved through DNS.
    Hostname,
}

/// A resolved destination.
///
/// Templates produced by [`Target::template`] carry port 0 and are stamped
/// with a concrete port via [`Target::with_port`]; a port of 0 never reaches
/// a running engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The name as given, with any URL scheme and path already stripped.
    pub host: String,
    /// The address the probes connect or send to.
    pub addr: IpAddr,
    /// Destination port.
    pub port: u16,
    /// Whether `host` was an IP literal or went through DNS.
    pub kind: TargetKind,
}

impl Target {
    /// Builds a target with a concrete port.
    #[must_use]
    pub fn new(host: String, addr: IpAddr, port: u16) -> Self {
        let kind = if host.parse::<IpAddr>().is_ok() {
            TargetKind::Ip
        } else {
            TargetKind::Hostname
        };
        Self {
            host,
            addr,
            port,
            kind,
        }
    }

    /// Builds a portless template, stamped per port by [`with_port`](Self::with_port).
    #[must_use]
    pub fn template(host: String, addr: IpAddr) -> Self {
        Self::new(host, addr, 0)
    }

    /// A copy of this target aimed at the given port.
    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// The address-port pair probes actually dial.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TargetKind::Ip => write!(f, "{}", self.socket_addr()),
            TargetKind::Hostname => write!(f, "{} ({})", self.host, self.socket_addr()),
        }
    }
}

/// Resolves a command-line destination into a portless [`Target`] template.
///
/// Accepts an IP literal, a hostname, or a URL-ish string; schemes and paths
/// are stripped first. Hostname lookups try the OS resolver, then the
/// [`get_resolver`] chain, then once more with a `www.` prefix for apex
/// domains that only publish the prefixed record.
///
/// # Errors
///
/// Returns an error when no candidate name yields an address.
pub async fn resolve_target(spec: &str, resolver: &Option<String>) -> io::Result<Target> {
    let host = strip_scheme(spec);
    if host.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no host in {spec:?}"),
        ));
    }

    if let Ok(addr) = IpAddr::from_str(host) {
        return Ok(Target::template(host.to_string(), addr));
    }

    let backup = get_resolver(resolver).await;
    if let Some(addr) = lookup(host, &backup).await {
        return Ok(Target::template(host.to_string(), addr));
    }
    if let Some(www) = with_www(host) {
        debug!("{host} did not resolve, retrying as {www}");
        if let Some(addr) = lookup(&www, &backup).await {
            return Ok(Target::template(www, addr));
        }
    }

    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("host {host:?} could not be resolved"),
    ))
}

/// Single-name lookup: OS resolver first, the backup chain second.
///
/// A records win over AAAA so dual-stack hosts get probed over IPv4, which is
/// what their firewalls are usually configured for.
async fn lookup(host: &str, backup: &TokioAsyncResolver) -> Option<IpAddr> {
    if let Ok(addrs) = tokio::net::lookup_host((host, 0)).await {
        let addrs: Vec<IpAddr> = addrs.map(|sa| sa.ip()).collect();
        if let Some(addr) = pick_address(&addrs) {
            return Some(addr);
        }
    }
    if let Ok(response) = backup.lookup_ip(host).await {
        let addrs: Vec<IpAddr> = response.iter().collect();
        return pick_address(&addrs);
    }
    None
}

fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Drops a leading `scheme://` and anything after the first `/`.
fn strip_scheme(spec: &str) -> &str {
    let rest = spec
        .split_once("://")
        .map_or(spec, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

/// The `www.`-prefixed variant, when retrying with one makes sense.
fn with_www(host: &str) -> Option<String> {
    if host.starts_with("www.") || !host.contains('.') {
        return None;
    }
    Some(format!("www.{host}"))
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver (default
///       behaviour).
pub async fn get_resolver(resolver: &Option<String>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => r
                    .split(',')
                    .filter_map(|r| IpAddr::from_str(r).ok())
                    .collect::<Vec<_>>(),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

/// Parses an input file of IPs for use in DNS resolution.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}
