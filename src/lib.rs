//! This crate exposes the internal functionality of the netpulse network
//! probing tool.
//!
//! netpulse is a concurrent probing engine with two faces: a fast TCP port
//! scanner that classifies every swept port as open, closed or filtered, and
//! a UDP flood generator for load-testing your own services. Both faces run
//! on the same machinery: a pool of async workers repeating a pluggable probe
//! operation, a shared statistics aggregator, and a live display loop.
//!
//! ## Key Features
//!
//! - **Three-way port classification**: Open, closed and filtered ports are
//!   kept apart instead of being folded into "not open"
//! - **Banner grabbing**: Open ports are read for a first banner line and
//!   matched against well-known service signatures
//! - **UDP load generation**: A worker pool streams datagrams at a target
//!   you control, with live rate and byte counters
//! - **Session reuse**: Each worker binds its sockets and builds its payload
//!   once, then reuses them for every probe
//! - **Lifecycle control**: Runs stop cleanly on a timer, on Ctrl-C, or on
//!   demand, and always produce a final report
//! - **Accessibility**: Output degrades to plain text under `--accessible`
//!
//! ## Architecture Overview
//!
//! The flood face is managed by [`Engine`](crate::engine::Engine), which owns
//! the worker pool and its lifecycle. The scan face is managed by
//! [`PortScanner`](crate::scanner::PortScanner), which pumps a bounded batch
//! of connect probes through a [`PortStrategy`](crate::port_strategy::PortStrategy).
//! A run flows like this:
//!
//! 1. **Input Processing**: The target is resolved and options are merged
//!    with the config file
//! 2. **Probe Selection**: Connect probes for scanning, datagram probes for
//!    flooding; anything implementing [`Probe`](crate::probe::Probe) plugs in
//! 3. **Worker Loop**: Workers probe, classify, update the shared counters,
//!    pause, and re-check the run flag
//! 4. **Display Loop**: A background task renders counter snapshots on a
//!    fixed cadence while the run flag stays up
//! 5. **Reporting**: The terminal snapshot becomes the final report, and
//!    scans can be exported as text, JSON, CSV or XML
//!
//! ## Basic Usage Example
//!
//! The following example floods a UDP echo service on localhost for five
//! seconds:
//!
//! ```rust,no_run
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! use netpulse::address::Target;
//! use netpulse::engine::{Engine, EngineConfig};
//! use netpulse::probe::DatagramProbe;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Only ever point this at infrastructure you are authorized to load.
//!     let localhost = "127.0.0.1";
//!     let target = Target::template(localhost.to_string(), localhost.parse()?).with_port(7);
//!
//!     let config = EngineConfig {
//!         threads: 4,                                // Worker pool size
//!         duration: Some(Duration::from_secs(5)),    // Stop on a timer
//!         ..EngineConfig::default()
//!     };
//!
//!     let engine = Engine::new(config, target);
//!     let payload = NonZeroUsize::new(512).unwrap();
//!     engine.start(DatagramProbe::new(payload)).await?;
//!     engine.wait_stopped().await;
//!
//!     // The final report is the frozen snapshot taken at shutdown.
//!     let report = engine.final_report()?;
//!     println!(
//!         "sent {} datagrams ({:.2} MB) at {:.0}/s peak",
//!         report.total_ops,
//!         report.megabytes(),
//!         report.peak_rate,
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Scanning Example
//!
//! ```rust,no_run
//! use std::num::NonZero;
//! use std::time::Duration;
//!
//! use netpulse::address::Target;
//! use netpulse::input::ScanOrder;
//! use netpulse::port_strategy::PortStrategy;
//! use netpulse::scanner::PortScanner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let localhost = "127.0.0.1";
//!     let target = Target::template(localhost.to_string(), localhost.parse()?);
//!     let strategy = PortStrategy::pick(None, Some(vec![22, 80, 443]), ScanOrder::Serial);
//!
//!     let scanner = PortScanner::new(
//!         target,
//!         strategy,
//!         vec![],                      // Ports to exclude from the sweep
//!         500,                         // Batch size (concurrent connects)
//!         Duration::from_millis(300),  // Per-connect timeout
//!         NonZero::<u8>::MIN,          // One try per port
//!         true,                        // Grab banners from open ports
//!         true,                        // Greppable (quiet) output
//!         false,                       // Accessibility mode
//!     );
//!
//!     for report in scanner.run().await {
//!         println!(
//!             "{} is {} ({})",
//!             report.port,
//!             report.state,
//!             report.service.unwrap_or("unknown"),
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Probes
//!
//! Both faces are instances of the same pattern, so new probe variants slot
//! in without touching the engine. Implement [`Probe`](crate::probe::Probe)
//! for the shared factory and [`ProbeSession`](crate::probe::ProbeSession)
//! for the per-worker handle, classify every call as success, failure or
//! timeout, and hand the probe to [`Engine::start`](crate::engine::Engine::start).
//!
//! ## Performance Tuning
//!
//! - **Batch Size**: Adjust to the open file limit; the binary clamps it
//!   automatically when the ulimit is too low
//! - **Timeout**: Balance between speed and catching slow services
//! - **Workers and delay**: Flood throughput is workers divided by per-call
//!   delay; raise workers or lower `--delay-ms` for more load
//! - **Port Strategy**: Random order spreads load across a target's ports,
//!   serial order keeps output progress predictable
#![allow(clippy::needless_doctest_main)]
#![warn(missing_docs)]
#![doc(html_root_url = "https://docs.rs/netpulse/0.3.0")]

pub mod tui;

pub mod input;

pub mod address;

pub mod stats;

pub mod probe;

pub mod engine;

pub mod scanner;

pub mod port_strategy;

pub mod report;
