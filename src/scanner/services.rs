//! Best-effort service naming for scan reports.
//!
//! Two sources, banner first: a grabbed banner that matches a known
//! signature beats the port-number convention, since plenty of services
//! run on borrowed ports.
use std::collections::HashMap;

use once_cell::sync::Lazy;

static WELL_KNOWN: Lazy<HashMap<u16, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (20, "ftp-data"),
        (21, "ftp"),
        (22, "ssh"),
        (23, "telnet"),
        (25, "smtp"),
        (53, "domain"),
        (69, "tftp"),
        (80, "http"),
        (110, "pop3"),
        (111, "rpcbind"),
        (123, "ntp"),
        (135, "msrpc"),
        (139, "netbios-ssn"),
        (143, "imap"),
        (161, "snmp"),
        (389, "ldap"),
        (443, "https"),
        (445, "microsoft-ds"),
        (636, "ldaps"),
        (993, "imaps"),
        (995, "pop3s"),
        (1433, "ms-sql-s"),
        (1723, "pptp"),
        (3306, "mysql"),
        (3389, "ms-wbt-server"),
        (5432, "postgresql"),
        (5900, "vnc"),
        (6379, "redis"),
        (8080, "http-proxy"),
        (8443, "https-alt"),
        (9200, "elasticsearch"),
        (11211, "memcached"),
        (27017, "mongodb"),
    ])
});

/// The conventional service on a well-known port.
#[must_use]
pub fn service_name(port: u16) -> Option<&'static str> {
    WELL_KNOWN.get(&port).copied()
}

/// Recognizes a service from the first line it sends.
#[must_use]
pub fn identify(banner: &str) -> Option<&'static str> {
    if banner.starts_with("SSH-") {
        Some("ssh")
    } else if banner.contains("HTTP/") {
        Some("http")
    } else if banner.starts_with("220") && banner.to_ascii_uppercase().contains("FTP") {
        Some("ftp")
    } else if banner.starts_with("220") {
        Some("smtp")
    } else if banner.starts_with("+OK") {
        Some("pop3")
    } else if banner.starts_with("* OK") {
        Some("imap")
    } else if banner.contains("mysql") || banner.contains("MariaDB") {
        Some("mysql")
    } else if banner.starts_with("-ERR") {
        Some("redis")
    } else if banner.starts_with("RFB ") {
        Some("vnc")
    } else {
        None
    }
}
