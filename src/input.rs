//! Provides a means to read, parse and hold configuration options for runs.
use clap::{Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::PathBuf;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// The default sweep covers the well-known range plus the first registered
/// ports; anything wider is opt-in via `-p`.
pub const DEFAULT_SWEEP: (u16, u16) = (LOWEST_PORT_NUMBER, 1000);

/// Ports worth checking first: the services that answer on most hosts.
pub const COMMON_PORTS: [u16; 30] = [
    20, 21, 22, 23, 25, 53, 69, 80, 110, 111, 123, 135, 139, 143, 161, 389, 443, 445, 636, 993,
    995, 1433, 3306, 3389, 5432, 5900, 6379, 8080, 8443, 27017,
];

/// Represents the strategy in which the port sweep will run.
///   - Serial will run from start to end, for example 1 to 1_000.
///   - Random will randomize the order in which ports will be scanned.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

/// File formats the scan report can be exported to.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Txt,
    Json,
    Csv,
    Xml,
}

pub type Ports = Vec<u16>;

/// Inclusive port ranges, kept unexpanded until a sweep order is needed.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortRanges(pub Vec<(u16, u16)>);

impl Default for PortRanges {
    fn default() -> Self {
        Self(vec![DEFAULT_SWEEP])
    }
}

pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            ports.extend(parse_port_range(part)?);
        } else {
            ports.push(parse_single_port(part)?);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let range_parts: Vec<&str> = range_str.split('-').collect();
    if range_parts.len() != 2 {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    }

    let start: u16 = range_parts[0].parse().map_err(|_| {
        format!(
            "Invalid start port '{}' in range '{range_str}'",
            range_parts[0]
        )
    })?;
    let end: u16 = range_parts[1].parse().map_err(|_| {
        format!(
            "Invalid end port '{}' in range '{range_str}'",
            range_parts[1]
        )
    })?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "netpulse",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Concurrent port scanner and UDP load generator with live statistics.
/// WARNING Only run this program against hosts you are authorized to test;
/// flood mode produces sustained traffic for as long as it runs.
pub struct Opts {
    /// The IP, hostname or URL to work against.
    pub target: Option<String>,

    /// A list of ports and/or port ranges to sweep. Examples: 80,443,8080 or 1-1000 or 1-1000,8080
    #[arg(short, long, alias = "range", value_parser = parse_ports_and_ranges, conflicts_with = "top")]
    pub ports: Option<Ports>,

    /// Sweep only the common service ports instead of a range.
    #[arg(long)]
    pub top: bool,

    /// The order of sweeping to be performed. The "serial" option will
    /// sweep ports in ascending order while the "random" option will sweep
    /// ports randomly.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,

    /// The batch size for port scanning, it increases or slows the speed of
    /// scanning. Depends on the open file limit of your OS.
    #[arg(short, long, default_value = "3000")]
    pub batch_size: u16,

    /// The timeout in milliseconds before a probe is assumed to have failed.
    #[arg(short, long, default_value = "1500")]
    pub timeout: u32,

    /// The number of tries before a port is assumed to be closed.
    /// If set to 0, netpulse will correct it to 1.
    #[arg(long, default_value = "1")]
    pub tries: u8,

    /// A list of comma separated ports to be excluded from the sweep. Example: 80,443,8080.
    #[arg(short, long, value_delimiter = ',')]
    pub exclude_ports: Option<Vec<u16>>,

    /// Skip banner grabbing on open TCP ports.
    #[arg(long)]
    pub no_grab: bool,

    /// Flood mode: send UDP datagrams to one port instead of sweeping.
    #[arg(long)]
    pub flood: bool,

    /// The destination port for flood mode.
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// The number of concurrent workers in flood mode.
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u16).range(1..))]
    pub threads: u16,

    /// Bytes of random payload per datagram in flood mode.
    #[arg(long, default_value = "1024")]
    pub payload_size: NonZeroUsize,

    /// How long flood mode runs, in seconds. 0 runs until interrupted.
    #[arg(short, long, default_value = "30")]
    pub duration: u64,

    /// Pause in milliseconds between consecutive datagrams of one worker.
    #[arg(long, default_value = "1")]
    pub delay_ms: u64,

    /// Pause in milliseconds between starting consecutive workers.
    #[arg(long, default_value = "50")]
    pub stagger_ms: u64,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Greppable mode. Only output the results. Useful for grep or outputting to a file.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Hide the banner
    #[arg(long)]
    pub no_banner: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,

    /// Write the scan report to this file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Format of the written scan report.
    #[arg(long, value_enum, ignore_case = true, default_value = "txt")]
    pub format: OutputFormat,
}

#[cfg(not(tarpaulin_include))]
impl Opts {
    pub fn read() -> Self {
        let mut opts = Opts::parse();

        if opts.top && opts.ports.is_none() {
            opts.ports = Some(COMMON_PORTS.to_vec());
        }

        opts
    }

    /// Reads the command line arguments into an Opts struct and merge
    /// values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            greppable, accessible, batch_size, timeout, tries, scan_order, threads, payload_size,
            duration, delay_ms, stagger_ms
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(target, ports, port, resolver, ulimit, exclude_ports);
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            target: None,
            ports: None,
            top: false,
            scan_order: ScanOrder::Serial,
            batch_size: 0,
            timeout: 0,
            tries: 0,
            exclude_ports: None,
            no_grab: false,
            flood: false,
            port: None,
            threads: 0,
            payload_size: NonZeroUsize::MIN,
            duration: 0,
            delay_ms: 0,
            stagger_ms: 0,
            resolver: None,
            ulimit: None,
            greppable: true,
            accessible: false,
            no_banner: false,
            no_config: true,
            config_path: None,
            output: None,
            format: OutputFormat::Txt,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[cfg(not(tarpaulin_include))]
#[derive(Debug, Deserialize)]
pub struct Config {
    target: Option<String>,
    ports: Option<Vec<u16>>,
    port: Option<u16>,
    greppable: Option<bool>,
    accessible: Option<bool>,
    batch_size: Option<u16>,
    timeout: Option<u32>,
    tries: Option<u8>,
    threads: Option<u16>,
    payload_size: Option<NonZeroUsize>,
    duration: Option<u64>,
    delay_ms: Option<u64>,
    stagger_ms: Option<u64>,
    ulimit: Option<u64>,
    resolver: Option<String>,
    scan_order: Option<ScanOrder>,
    exclude_ports: Option<Vec<u16>>,
}

#[cfg(not(tarpaulin_include))]
#[allow(clippy::doc_link_with_quotes)]
impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct.
    ///
    /// # Format
    ///
    /// target = "10.0.0.1"
    /// ports = [80, 443, 8080]
    /// greppable = true
    /// scan_order = "Serial"
    /// threads = 20
    /// duration = 60
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> Self {
        let mut content = String::new();
        let config_path = custom_config_path.unwrap_or_else(default_config_path);
        if config_path.exists() {
            content = match fs::read_to_string(config_path) {
                Ok(content) => content,
                Err(_) => String::new(),
            }
        }

        let config: Config = match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                println!("Found {e} in configuration file.\nAborting run.\n");
                std::process::exit(1);
            }
        };

        config
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> PathBuf {
    let Some(mut config_path) = dirs::home_dir() else {
        panic!("Could not infer config file path.");
    };
    config_path.push(".netpulse.toml");
    config_path
}
