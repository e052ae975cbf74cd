//! The TCP sweep: probe every selected port, classify, and report.
//!
//! A sweep keeps at most `batch_size` connects in flight through a
//! [`FuturesUnordered`] pump. New probes stop being queued the moment the
//! stop flag drops; probes already in flight run to their timeout, so a
//! cancelled sweep still ends within one probe timeout.
mod services;

use std::num::NonZero;
use std::sync::Arc;
use std::time::Duration;

use colored::Colorize;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::debug;
use serde_derive::Serialize;

use crate::address::Target;
use crate::engine::RunFlag;
use crate::port_strategy::PortStrategy;
use crate::probe::{ConnectProbe, Probe, ProbeOutcome, ProbeSession};
use crate::stats::{CountersView, StatsAggregator};

pub use services::{identify, service_name};

/// What one port turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    /// The connect succeeded.
    Open,
    /// The connect was answered with a refusal.
    Closed,
    /// Nothing came back before the timeout.
    Filtered,
}

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Open => write!(f, "open"),
            PortState::Closed => write!(f, "closed"),
            PortState::Filtered => write!(f, "filtered"),
        }
    }
}

/// One line of the sweep report.
#[derive(Debug, Clone, Serialize)]
pub struct PortReport {
    pub port: u16,
    pub state: PortState,
    /// Best-effort service name, banner signature first, port convention second.
    pub service: Option<&'static str>,
    /// First line the service sent, when banner grabbing is on.
    pub banner: Option<String>,
}

impl PortReport {
    fn classify(port: u16, outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Success { detail, .. } => {
                let service = detail
                    .as_deref()
                    .and_then(services::identify)
                    .or_else(|| services::service_name(port));
                Self {
                    port,
                    state: PortState::Open,
                    service,
                    banner: detail,
                }
            }
            ProbeOutcome::Failure { .. } => Self {
                port,
                state: PortState::Closed,
                service: None,
                banner: None,
            },
            ProbeOutcome::Timeout => Self {
                port,
                state: PortState::Filtered,
                service: None,
                banner: None,
            },
        }
    }
}

/// Sweeps one target across a port strategy with bounded concurrency.
pub struct PortScanner {
    target: Arc<Target>,
    port_strategy: PortStrategy,
    exclude_ports: Vec<u16>,
    batch_size: u16,
    probe: ConnectProbe,
    timeout: Duration,
    tries: NonZero<u8>,
    greppable: bool,
    accessible: bool,
    run: Arc<RunFlag>,
    stats: Arc<StatsAggregator>,
}

impl PortScanner {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        target: Target,
        port_strategy: PortStrategy,
        exclude_ports: Vec<u16>,
        batch_size: u16,
        timeout: Duration,
        tries: NonZero<u8>,
        grab_banners: bool,
        greppable: bool,
        accessible: bool,
    ) -> Self {
        let run = Arc::new(RunFlag::default());
        run.set(true);
        Self {
            target: Arc::new(target),
            port_strategy,
            exclude_ports,
            batch_size,
            probe: ConnectProbe::new(grab_banners),
            timeout,
            tries,
            greppable,
            accessible,
            run,
            stats: Arc::new(StatsAggregator::new()),
        }
    }

    /// The flag that cancels this sweep; hand it to a signal handler.
    #[must_use]
    pub fn stopper(&self) -> Arc<RunFlag> {
        Arc::clone(&self.run)
    }

    /// The sweep's live counters, for a progress display.
    #[must_use]
    pub fn stats(&self) -> Arc<StatsAggregator> {
        Arc::clone(&self.stats)
    }

    /// A consistent copy of the sweep counters, pollable at any time.
    #[must_use]
    pub fn snapshot(&self) -> CountersView {
        self.stats.snapshot()
    }

    /// Runs the sweep to completion or cancellation.
    ///
    /// Returns one report per probed port, sorted by port number. Open ports
    /// are announced as they are found so slow sweeps stay informative.
    pub async fn run(&self) -> Vec<PortReport> {
        let mut ports = self.port_strategy.order();
        ports.retain(|port| !self.exclude_ports.contains(port));
        debug!("sweeping {} ports on {}", ports.len(), self.target);

        let mut reports = Vec::with_capacity(ports.len());
        let mut port_iter = ports.into_iter();
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < usize::from(self.batch_size) && self.run.is_running() {
                match port_iter.next() {
                    Some(port) => in_flight.push(self.scan_port(port)),
                    None => break,
                }
            }

            let Some(report) = in_flight.next().await else {
                break;
            };
            let banner_bytes = report.banner.as_ref().map_or(0, |b| b.len() as u64);
            self.stats
                .update(1, banner_bytes, report.state == PortState::Open);
            if report.state == PortState::Open {
                self.announce(&report);
            }
            reports.push(report);
        }

        reports.sort_unstable_by_key(|report| report.port);
        reports
    }

    /// Probes a single port, retrying only when the answer was silence.
    async fn scan_port(&self, port: u16) -> PortReport {
        let target = self.target.with_port(port);
        let mut outcome = ProbeOutcome::Timeout;

        for attempt in 1..=self.tries.get() {
            outcome = match self.probe.session(&target).await {
                Ok(mut session) => session.probe(&target, self.timeout).await,
                Err(e) => ProbeOutcome::Failure {
                    detail: Some(e.to_string()),
                },
            };
            match outcome {
                ProbeOutcome::Timeout => debug!("{target} silent on attempt {attempt}"),
                _ => break,
            }
        }

        if let ProbeOutcome::Failure {
            detail: Some(detail),
        } = &outcome
        {
            assert!(
                !detail.to_lowercase().contains("too many open files"),
                "Too many open files. Please reduce batch size. The default is 3000. Try -b 2500."
            );
        }

        PortReport::classify(port, outcome)
    }

    fn announce(&self, report: &PortReport) {
        if self.greppable {
            return;
        }
        let socket = self.target.with_port(report.port).socket_addr();
        if self.accessible {
            println!("Open {socket}");
        } else {
            println!("Open {}", socket.to_string().purple());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ScanOrder;
    use std::net::IpAddr;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn local_template() -> Target {
        Target::template(
            "127.0.0.1".to_string(),
            "127.0.0.1".parse::<IpAddr>().unwrap(),
        )
    }

    fn scanner_for(ports: Vec<u16>, exclude: Vec<u16>, grab_banners: bool) -> PortScanner {
        PortScanner::new(
            local_template(),
            PortStrategy::pick(None, Some(ports), ScanOrder::Serial),
            exclude,
            10,
            Duration::from_millis(500),
            NonZero::new(1).unwrap(),
            grab_banners,
            true,
            false,
        )
    }

    /// An ephemeral port that nothing listens on once the probe runs.
    async fn vacant_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn classifies_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed_port = vacant_port().await;

        let scanner = scanner_for(vec![open_port, closed_port], vec![], false);
        let reports = scanner.run().await;

        assert_eq!(reports.len(), 2);
        let by_port = |port| {
            reports
                .iter()
                .find(|r: &&PortReport| r.port == port)
                .unwrap()
        };
        assert_eq!(by_port(open_port).state, PortState::Open);
        assert_eq!(by_port(closed_port).state, PortState::Closed);

        let view = scanner.stats().snapshot();
        assert_eq!(view.total_ops, 2);
        assert_eq!(view.success_ops, 1);
        assert_eq!(view.failed_ops, 1);
    }

    #[tokio::test]
    async fn grabs_banners_and_names_the_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"SSH-2.0-netpulse-test\r\n").await;
            }
        });

        let scanner = scanner_for(vec![port], vec![], true);
        let reports = scanner.run().await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].state, PortState::Open);
        assert_eq!(reports[0].banner.as_deref(), Some("SSH-2.0-netpulse-test"));
        assert_eq!(reports[0].service, Some("ssh"));
    }

    #[tokio::test]
    async fn excluded_ports_are_never_probed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let scanner = scanner_for(vec![port], vec![port], false);
        let reports = scanner.run().await;

        assert!(reports.is_empty());
        assert_eq!(scanner.stats().snapshot().total_ops, 0);
    }

    #[tokio::test]
    async fn cancelled_sweep_queues_nothing() {
        let scanner = scanner_for((8000..8100).collect(), vec![], false);
        scanner.stopper().set(false);
        let reports = scanner.run().await;

        assert!(reports.is_empty());
    }

    #[test]
    fn outcomes_map_to_the_three_states() {
        let open = PortReport::classify(
            2222,
            ProbeOutcome::Success {
                bytes: 21,
                detail: Some("SSH-2.0-OpenSSH_9.6".to_string()),
            },
        );
        assert_eq!(open.state, PortState::Open);
        assert_eq!(open.service, Some("ssh"));

        let open_quiet = PortReport::classify(
            443,
            ProbeOutcome::Success {
                bytes: 0,
                detail: None,
            },
        );
        assert_eq!(open_quiet.service, Some("https"));
        assert_eq!(open_quiet.banner, None);

        let closed = PortReport::classify(81, ProbeOutcome::Failure { detail: None });
        assert_eq!(closed.state, PortState::Closed);

        let filtered = PortReport::classify(82, ProbeOutcome::Timeout);
        assert_eq!(filtered.state, PortState::Filtered);
        assert_eq!(filtered.service, None);
    }
}
