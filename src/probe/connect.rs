//! TCP connect probe, the scan-mode workhorse.
use std::time::Duration;

use log::debug;
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use super::{Probe, ProbeOutcome, ProbeSession};
use crate::address::Target;

/// Banner reads stop after this many bytes.
const MAX_BANNER_BYTES: usize = 1024;
/// How long to wait for a peer to volunteer its banner.
const BANNER_WAIT: Duration = Duration::from_millis(500);

/// Attempts a full TCP connection per probe.
///
/// `Success` means the handshake completed (the port is open); with banner
/// grabbing enabled the probe then reads whatever the peer offers first,
/// capped at [`MAX_BANNER_BYTES`] and [`BANNER_WAIT`], and carries the first
/// line as the outcome detail. A connect error is `Failure` (the stack
/// answered, typically refused), an elapsed timeout is `Timeout`. The stream
/// is shut down on every path.
#[derive(Debug, Clone, Copy)]
pub struct ConnectProbe {
    grab_banner: bool,
}

impl ConnectProbe {
    /// Creates the probe; `grab_banner` enables the best-effort read on open
    /// ports.
    #[must_use]
    pub fn new(grab_banner: bool) -> Self {
        Self { grab_banner }
    }
}

impl Probe for ConnectProbe {
    type Session = ConnectSession;

    async fn session(&self, _target: &Target) -> io::Result<ConnectSession> {
        // Connections are per call, so the session carries configuration only.
        Ok(ConnectSession {
            grab_banner: self.grab_banner,
        })
    }
}

/// Stateless per-worker session for [`ConnectProbe`].
#[derive(Debug)]
pub struct ConnectSession {
    grab_banner: bool,
}

impl ProbeSession for ConnectSession {
    async fn probe(&mut self, target: &Target, timeout: Duration) -> ProbeOutcome {
        let addr = target.socket_addr();
        match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(mut stream)) => {
                let (bytes, detail) = if self.grab_banner {
                    read_banner(&mut stream).await
                } else {
                    (0, None)
                };
                if let Err(e) = stream.shutdown().await {
                    debug!("shutdown error for {addr}: {e}");
                }
                ProbeOutcome::Success { bytes, detail }
            }
            Ok(Err(e)) => ProbeOutcome::Failure {
                detail: Some(e.to_string()),
            },
            Err(_) => ProbeOutcome::Timeout,
        }
    }
}

/// Reads the first bytes a freshly opened peer offers, if any.
async fn read_banner(stream: &mut TcpStream) -> (u64, Option<String>) {
    let mut buf = [0u8; MAX_BANNER_BYTES];
    match time::timeout(BANNER_WAIT, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            let text = String::from_utf8_lossy(&buf[..n]);
            let line = text.lines().next().unwrap_or_default().trim().to_string();
            debug!("banner: {n} bytes, first line {line:?}");
            (n as u64, (!line.is_empty()).then_some(line))
        }
        // Silent peer, instant close or read error: an open port with no story.
        _ => (0, None),
    }
}
