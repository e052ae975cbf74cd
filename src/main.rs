//! The netpulse binary: option handling and run orchestration.
#![allow(clippy::module_name_repetitions)]

use std::num::NonZero;
use std::time::Duration;

use anyhow::{bail, Context};
use colorful::{Color, Colorful};
use log::{debug, info};

use netpulse::address::{resolve_target, Target, TargetKind};
use netpulse::engine::display::display_loop;
use netpulse::engine::{Engine, EngineConfig};
use netpulse::input::{self, Config, Opts, PortRanges};
use netpulse::port_strategy::PortStrategy;
use netpulse::probe::DatagramProbe;
use netpulse::report::{
    print_scan_results, render_flood_greppable, FloodDisplay, ScanDisplay, ScanDocument,
};
use netpulse::scanner::PortScanner;
use netpulse::{detail, output, warning};

#[cfg(unix)]
use rlimit::Resource;

const DEFAULT_FILE_DESCRIPTORS_LIMIT: u64 = 8000;
const AVERAGE_BATCH_SIZE: u64 = 1500;
const DISPLAY_INTERVAL: Duration = Duration::from_millis(500);

#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone());
    opts.merge(&config);
    debug!("main() `opts` arguments are {opts:?}");

    if !opts.greppable && !opts.accessible && !opts.no_banner {
        print_opening(&opts);
    }

    let Some(spec) = opts.target.clone() else {
        bail!("no target given; pass an IP, hostname or URL");
    };
    let target = resolve_target(&spec, &opts.resolver)
        .await
        .with_context(|| format!("could not resolve {spec:?}"))?;
    if target.kind == TargetKind::Hostname {
        detail!(
            format!("Resolved {} to {}", target.host, target.addr),
            opts.greppable,
            opts.accessible
        );
    }

    if opts.flood {
        run_flood(&opts, target).await
    } else {
        run_scan(&opts, target).await
    }
}

/// Drives a full port sweep and hands the results to the report layer.
#[cfg(not(tarpaulin_include))]
async fn run_scan(opts: &Opts, target: Target) -> anyhow::Result<()> {
    let ulimit = adjust_ulimit_size(opts);
    let batch_size = infer_batch_size(opts, ulimit);

    let ranges = opts.ports.is_none().then(PortRanges::default);
    let strategy = PortStrategy::pick(ranges, opts.ports.clone(), opts.scan_order);
    let exclude_ports = opts.exclude_ports.clone().unwrap_or_default();
    let planned = strategy
        .order()
        .iter()
        .filter(|port| !exclude_ports.contains(port))
        .count() as u64;

    let scanner = PortScanner::new(
        target.clone(),
        strategy,
        exclude_ports,
        batch_size,
        Duration::from_millis(u64::from(opts.timeout)),
        NonZero::new(opts.tries).unwrap_or(NonZero::<u8>::MIN),
        !opts.no_grab,
        opts.greppable,
        opts.accessible,
    );
    debug!("sweeping {planned} ports on {target} with batch size {batch_size}");

    let stopper = scanner.stopper();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.set(false);
        }
    });

    let display = (!opts.greppable).then(|| {
        tokio::spawn(display_loop(
            scanner.stopper(),
            scanner.stats(),
            DISPLAY_INTERVAL,
            Box::new(ScanDisplay::new(planned, opts.accessible)),
        ))
    });

    let reports = scanner.run().await;
    scanner.stopper().set(false);
    let view = scanner.snapshot();
    if let Some(task) = display {
        if let Ok(mut sink) = task.await {
            sink.finish(&view);
        }
    }

    print_scan_results(&target, &reports, &view, opts.greppable, opts.accessible);

    if let Some(path) = &opts.output {
        ScanDocument::new(&target, &reports, &view).save(path, opts.format)?;
        output!(
            format!("Report written to {}", path.display()),
            opts.greppable,
            opts.accessible
        );
    }

    Ok(())
}

/// Drives a UDP flood run until its duration elapses or Ctrl-C lands.
#[cfg(not(tarpaulin_include))]
async fn run_flood(opts: &Opts, target: Target) -> anyhow::Result<()> {
    let Some(port) = opts.port else {
        bail!("flood mode needs a destination port; pass --port");
    };
    let target = target.with_port(port);

    let config = EngineConfig {
        threads: opts.threads,
        probe_timeout: Duration::from_millis(u64::from(opts.timeout)),
        duration: (opts.duration > 0).then(|| Duration::from_secs(opts.duration)),
        inter_call_delay: Duration::from_millis(opts.delay_ms),
        startup_stagger: Duration::from_millis(opts.stagger_ms),
        display_interval: DISPLAY_INTERVAL,
    };
    let engine = Engine::new(config, target.clone());

    if !opts.greppable {
        engine.attach_display(Box::new(FloodDisplay::new(
            format!("udp://{target}"),
            opts.accessible,
        )));
    }

    let stopper = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop().await;
        }
    });

    output!(
        format!(
            "Flooding udp://{target} with {} workers, {} byte payloads",
            opts.threads, opts.payload_size
        ),
        opts.greppable,
        opts.accessible
    );
    if opts.duration == 0 {
        output!(
            "No duration set; press Ctrl-C to stop",
            opts.greppable,
            opts.accessible
        );
    }

    engine.start(DatagramProbe::new(opts.payload_size)).await?;
    engine.wait_stopped().await;

    let report = engine.final_report()?;
    if opts.greppable {
        println!("{}", render_flood_greppable(&report));
    }

    Ok(())
}

#[cfg(not(tarpaulin_include))]
fn print_opening(opts: &Opts) {
    debug!("Printing opening");
    let art = r#"             _               _
  _ __   ___| |_ _ __  _   _| |___  ___
 | '_ \ / _ \ __| '_ \| | | | / __|/ _ \
 | | | |  __/ |_| |_) | |_| | \__ \  __/
 |_| |_|\___|\__| .__/ \__,_|_|___/\___|
                |_|"#;
    println!("{}", art.gradient(Color::LightBlue).bold());
    println!(
        "{}",
        "Feel the pulse of the network.\n"
            .gradient(Color::LightCyan)
            .bold()
    );
    let config_path = opts
        .config_path
        .clone()
        .unwrap_or_else(input::default_config_path);
    detail!(
        format!("The config file is expected to be at {config_path:?}"),
        opts.greppable,
        opts.accessible
    );
}

#[cfg(unix)]
fn adjust_ulimit_size(opts: &Opts) -> u64 {
    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                opts.greppable,
                opts.accessible
            );
        } else {
            warning!(
                "ERROR. Failed to set ulimit value.",
                opts.greppable,
                opts.accessible
            );
        }
    }

    let (soft, _) = Resource::NOFILE
        .get()
        .unwrap_or((DEFAULT_FILE_DESCRIPTORS_LIMIT, DEFAULT_FILE_DESCRIPTORS_LIMIT));
    soft
}

#[cfg(not(unix))]
fn adjust_ulimit_size(_opts: &Opts) -> u64 {
    DEFAULT_FILE_DESCRIPTORS_LIMIT
}

/// Shrinks the requested batch size to something the open file limit can
/// actually sustain.
fn infer_batch_size(opts: &Opts, ulimit: u64) -> u16 {
    use std::convert::TryInto;

    let mut batch_size: u64 = opts.batch_size.into();

    // Adjust the batch size when the ulimit value is lower than the desired
    // batch size
    if ulimit < batch_size {
        warning!(
            "File limit is lower than default batch size. Consider upping with --ulimit. May cause harm to sensitive servers",
            opts.greppable,
            opts.accessible
        );

        // When the OS supports high file limits like 8000, but the user
        // selected a batch size higher than this we should reduce it to
        // a lower number.
        if ulimit < AVERAGE_BATCH_SIZE {
            warning!(
                "Your file limit is very small, which negatively impacts netpulse's speed. Up the Ulimit with '--ulimit 5000'.",
                opts.greppable,
                opts.accessible
            );
            info!("Halving batch_size because ulimit is smaller than average batch size");
            batch_size = ulimit / 2;
        } else if ulimit > DEFAULT_FILE_DESCRIPTORS_LIMIT {
            info!("Batch size is now average batch size");
            batch_size = AVERAGE_BATCH_SIZE;
        } else {
            batch_size = ulimit - 100;
        }
    }

    batch_size
        .try_into()
        .expect("Couldn't fit the batch size into a u16.")
}

#[cfg(test)]
mod tests {
    use super::{infer_batch_size, Opts};

    fn opts_with_batch(batch_size: u16) -> Opts {
        Opts {
            batch_size,
            ..Opts::default()
        }
    }

    #[test]
    fn batch_size_respects_a_generous_ulimit() {
        assert_eq!(infer_batch_size(&opts_with_batch(3000), 9000), 3000);
    }

    #[test]
    fn batch_size_halved_under_a_tiny_ulimit() {
        assert_eq!(infer_batch_size(&opts_with_batch(3000), 120), 60);
    }

    #[test]
    fn batch_size_capped_just_under_the_ulimit() {
        assert_eq!(infer_batch_size(&opts_with_batch(6000), 5000), 4900);
    }

    #[test]
    fn oversized_request_falls_back_to_average() {
        assert_eq!(infer_batch_size(&opts_with_batch(10_000), 9000), 1500);
    }
}
