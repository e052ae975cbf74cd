//! Pluggable probe operations.
//!
//! A probe is one discrete unit of network work against a target: attempt a
//! TCP connection, send one UDP datagram. Workers repeat whichever probe they
//! are handed; the engine never knows which variant it is running. Shipped
//! variants are [`ConnectProbe`] (port scanning) and [`DatagramProbe`]
//! (load generation); tests plug in their own.
use std::future::Future;
use std::time::Duration;

use tokio::io;

use crate::address::Target;

mod connect;
mod send;

pub use connect::ConnectProbe;
pub use send::DatagramProbe;

/// A probe variant: a factory of per-worker [`ProbeSession`]s.
///
/// The probe itself is shared across the pool; every worker acquires its own
/// session once at startup and keeps it for the life of the loop. A variant
/// whose sessions carry real resources (a bound socket, a payload buffer)
/// pays the acquisition cost once per worker, not once per call.
pub trait Probe: Send + Sync + 'static {
    /// Per-worker state reused across probe calls.
    type Session: ProbeSession;

    /// Acquires one worker's session for the given target.
    ///
    /// Failure here is fatal to that worker only; its siblings keep running.
    fn session(&self, target: &Target) -> impl Future<Output = io::Result<Self::Session>> + Send;
}

/// One worker's handle for issuing probes.
pub trait ProbeSession: Send + 'static {
    /// Performs one probe against the target, bounded by `timeout`.
    ///
    /// Never returns an error: every way a probe can go wrong is folded into
    /// the outcome classification.
    fn probe(
        &mut self,
        target: &Target,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send;
}

/// The three-way classification of one probe, carrying its evidence.
///
/// Reporting layers decide how to bucket these: the scan surface maps them to
/// open/closed/filtered, the flood surface counts `Failure` and `Timeout`
/// both as failed ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The operation completed against a responsive peer.
    Success {
        /// Payload or banner bytes moved by this probe.
        bytes: u64,
        /// Optional identification, e.g. the first banner line.
        detail: Option<String>,
    },
    /// The peer or the local stack answered with an error.
    Failure {
        /// The error text, when there is one worth keeping.
        detail: Option<String>,
    },
    /// No answer within the per-call timeout.
    Timeout,
}

impl ProbeOutcome {
    /// Whether this probe counts into the success bucket.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Bytes moved by this probe; zero unless successful.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        match self {
            Self::Success { bytes, .. } => *bytes,
            _ => 0,
        }
    }

    /// The attached detail string, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Success { detail, .. } | Self::Failure { detail } => detail.as_deref(),
            Self::Timeout => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_accessors() {
        let open = ProbeOutcome::Success {
            bytes: 12,
            detail: Some("SSH-2.0-OpenSSH_9.6".to_string()),
        };
        assert!(open.is_success());
        assert_eq!(open.bytes_transferred(), 12);
        assert_eq!(open.detail(), Some("SSH-2.0-OpenSSH_9.6"));

        let refused = ProbeOutcome::Failure {
            detail: Some("connection refused".to_string()),
        };
        assert!(!refused.is_success());
        assert_eq!(refused.bytes_transferred(), 0);

        assert_eq!(ProbeOutcome::Timeout.detail(), None);
    }
}
