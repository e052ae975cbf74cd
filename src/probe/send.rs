//! UDP send probe, the flood-mode workhorse.
use std::net::SocketAddr;
use std::num::NonZero;
use std::time::Duration;

use log::debug;
use rand::RngCore;
use tokio::io;
use tokio::net::UdpSocket;
use tokio::time;

use super::{Probe, ProbeOutcome, ProbeSession};
use crate::address::Target;

/// Sends one fixed-size datagram of random bytes per probe.
///
/// Each worker's session owns a bound socket and a payload generated once,
/// both reused for every call. A zero payload size is unrepresentable, so
/// misconfiguration is caught where the probe is built rather than per call.
#[derive(Debug, Clone, Copy)]
pub struct DatagramProbe {
    payload_size: NonZero<usize>,
}

impl DatagramProbe {
    /// Creates the probe with the per-datagram payload size.
    #[must_use]
    pub fn new(payload_size: NonZero<usize>) -> Self {
        Self { payload_size }
    }
}

impl Probe for DatagramProbe {
    type Session = DatagramSession;

    async fn session(&self, target: &Target) -> io::Result<DatagramSession> {
        // Bind in the target's address family; the OS picks the port.
        let local_addr: SocketAddr = match target.socket_addr() {
            SocketAddr::V4(_) => "0.0.0.0:0".parse().unwrap(),
            SocketAddr::V6(_) => "[::]:0".parse().unwrap(),
        };
        let socket = UdpSocket::bind(local_addr).await?;
        debug!("datagram session bound to {}", socket.local_addr()?);

        let mut payload = vec![0u8; self.payload_size.get()];
        rand::rng().fill_bytes(&mut payload);
        Ok(DatagramSession { socket, payload })
    }
}

/// Per-worker session for [`DatagramProbe`]: one socket, one payload.
#[derive(Debug)]
pub struct DatagramSession {
    socket: UdpSocket,
    payload: Vec<u8>,
}

impl ProbeSession for DatagramSession {
    async fn probe(&mut self, target: &Target, timeout: Duration) -> ProbeOutcome {
        match time::timeout(timeout, self.socket.send_to(&self.payload, target.socket_addr())).await
        {
            Ok(Ok(sent)) => ProbeOutcome::Success {
                bytes: sent as u64,
                detail: None,
            },
            Ok(Err(e)) => ProbeOutcome::Failure {
                detail: Some(e.to_string()),
            },
            Err(_) => ProbeOutcome::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_size(n: usize) -> NonZero<usize> {
        NonZero::new(n).unwrap()
    }

    #[tokio::test]
    async fn session_reuses_socket_and_payload() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let target =
            Target::template("127.0.0.1".to_string(), "127.0.0.1".parse().unwrap()).with_port(port);

        let probe = DatagramProbe::new(payload_size(128));
        let mut session = probe.session(&target).await.unwrap();

        for _ in 0..3 {
            let outcome = session.probe(&target, Duration::from_millis(500)).await;
            assert!(outcome.is_success());
            assert_eq!(outcome.bytes_transferred(), 128);
        }

        let mut buf = [0u8; 256];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, 128);
    }

    #[tokio::test]
    async fn ipv6_session_binds_in_family() {
        let receiver = UdpSocket::bind("[::1]:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let target = Target::template("::1".to_string(), "::1".parse().unwrap()).with_port(port);

        let probe = DatagramProbe::new(payload_size(32));
        let mut session = probe.session(&target).await.unwrap();
        let outcome = session.probe(&target, Duration::from_millis(500)).await;
        assert!(outcome.is_success());
    }
}
