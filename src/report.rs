//! Rendering and export of run results.
//!
//! Everything user-visible about results funnels through here: the live
//! progress sinks for both surfaces, the end-of-run summaries, and the
//! writable report formats. Rendering is kept separate from writing so the
//! formats stay testable.

use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use serde_derive::Serialize;

use crate::address::Target;
use crate::engine::display::ProgressSink;
use crate::input::OutputFormat;
use crate::scanner::{PortReport, PortState};
use crate::stats::CountersView;
use crate::{detail, output};

/// A finished sweep in exportable form.
///
/// Carries every open port in detail and the closed and filtered
/// populations as counts, which keeps wide sweeps readable.
#[derive(Debug, Serialize)]
#[serde(rename = "scan")]
pub struct ScanDocument {
    pub target: String,
    pub addr: String,
    pub generated_at: DateTime<Utc>,
    pub open: usize,
    pub closed: usize,
    pub filtered: usize,
    pub stats: CountersView,
    #[serde(rename = "port")]
    pub ports: Vec<PortReport>,
}

impl ScanDocument {
    #[must_use]
    pub fn new(target: &Target, reports: &[PortReport], view: &CountersView) -> Self {
        let count = |state| reports.iter().filter(|r| r.state == state).count();
        Self {
            target: target.host.clone(),
            addr: target.addr.to_string(),
            generated_at: Utc::now(),
            open: count(PortState::Open),
            closed: count(PortState::Closed),
            filtered: count(PortState::Filtered),
            stats: *view,
            ports: reports
                .iter()
                .filter(|r| r.state == PortState::Open)
                .cloned()
                .collect(),
        }
    }

    /// The report in the requested format.
    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Txt => Ok(self.render_txt()),
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).context("could not render the report as JSON")
            }
            OutputFormat::Csv => Ok(self.render_csv()),
            OutputFormat::Xml => {
                quick_xml::se::to_string(self).context("could not render the report as XML")
            }
        }
    }

    /// Renders and writes the report in one go.
    pub fn save(&self, path: &Path, format: OutputFormat) -> anyhow::Result<()> {
        let rendered = self.render(format)?;
        fs::write(path, rendered)
            .with_context(|| format!("could not write report to {}", path.display()))
    }

    fn render_txt(&self) -> String {
        let mut lines = vec![
            format!("netpulse scan report for {} ({})", self.target, self.addr),
            format!("generated {}", self.generated_at.to_rfc3339()),
            format!(
                "{} ports swept in {:.1}s: {} open, {} closed, {} filtered",
                self.stats.total_ops, self.stats.elapsed_secs, self.open, self.closed, self.filtered
            ),
            String::new(),
        ];
        if self.ports.is_empty() {
            lines.push("no open ports".to_string());
        } else {
            lines.push(format!(
                "{:<10} {:<7} {:<15} {}",
                "PORT", "STATE", "SERVICE", "BANNER"
            ));
            for report in &self.ports {
                lines.push(format!(
                    "{:<10} {:<7} {:<15} {}",
                    format!("{}/tcp", report.port),
                    report.state,
                    report.service.unwrap_or("-"),
                    report.banner.as_deref().unwrap_or("")
                ));
            }
        }
        lines.join("\n")
    }

    fn render_csv(&self) -> String {
        let mut lines = vec!["port,state,service,banner".to_string()];
        for report in &self.ports {
            lines.push(format!(
                "{},{},{},{}",
                report.port,
                report.state,
                report.service.unwrap_or("-"),
                csv_field(report.banner.as_deref().unwrap_or(""))
            ));
        }
        lines.join("\n")
    }
}

/// Quotes a CSV field when it holds anything that would break a row.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Prints the end-of-sweep results to the terminal.
///
/// Greppable mode emits a single `addr -> [ports]` line and nothing else;
/// anything fancier belongs in a saved report.
pub fn print_scan_results(
    target: &Target,
    reports: &[PortReport],
    view: &CountersView,
    greppable: bool,
    accessible: bool,
) {
    let open: Vec<&PortReport> = reports
        .iter()
        .filter(|r| r.state == PortState::Open)
        .collect();

    if greppable {
        if !open.is_empty() {
            let ports = open.iter().map(|r| r.port.to_string()).join(",");
            println!("{} -> [{ports}]", target.addr);
        }
        return;
    }

    println!();
    output!(
        format!("Sweep of {target} finished in {:.1}s", view.elapsed_secs),
        greppable,
        accessible
    );
    for report in &open {
        detail!(
            format!(
                "{:<10} {:<15} {}",
                format!("{}/tcp", report.port),
                report.service.unwrap_or("-"),
                report.banner.as_deref().unwrap_or("")
            ),
            greppable,
            accessible
        );
    }
    let closed = reports.iter().filter(|r| r.state == PortState::Closed).count();
    let filtered = reports
        .iter()
        .filter(|r| r.state == PortState::Filtered)
        .count();
    output!(
        format!(
            "{} ports: {} open, {closed} closed, {filtered} filtered",
            view.total_ops,
            open.len()
        ),
        greppable,
        accessible
    );
}

/// Live progress bar for a sweep; hidden in accessible mode where the
/// open-port announcements already tell the story.
pub struct ScanDisplay {
    bar: ProgressBar,
}

impl ScanDisplay {
    #[must_use]
    pub fn new(total_ports: u64, accessible: bool) -> Self {
        let bar = if accessible {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(total_ports);
            bar.set_style(
                ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} ports {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        };
        Self { bar }
    }
}

impl ProgressSink for ScanDisplay {
    fn tick(&mut self, view: &CountersView) {
        self.bar.set_position(view.total_ops);
        self.bar.set_message(format!("{} open", view.success_ops));
    }

    fn finish(&mut self, _view: &CountersView) {
        self.bar.finish_and_clear();
    }
}

/// Live spinner for a flood run, summarizing on completion.
///
/// Accessible mode swaps the spinner redraws for plain status lines a
/// screen reader can follow.
pub struct FloodDisplay {
    target: String,
    bar: ProgressBar,
    accessible: bool,
}

impl FloodDisplay {
    #[must_use]
    pub fn new(target: String, accessible: bool) -> Self {
        let bar = if accessible {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar
        };
        Self {
            target,
            bar,
            accessible,
        }
    }
}

impl ProgressSink for FloodDisplay {
    fn tick(&mut self, view: &CountersView) {
        if self.accessible {
            println!("{}", flood_status_line(view));
        } else {
            self.bar.set_message(flood_status_line(view));
            self.bar.tick();
        }
    }

    fn finish(&mut self, view: &CountersView) {
        self.bar.finish_and_clear();
        println!("{}", render_flood_summary(&self.target, view, self.accessible));
    }
}

/// One line of live flood state.
#[must_use]
pub fn flood_status_line(view: &CountersView) -> String {
    format!(
        "{} sent | {:.2} MB | {:.0}/s now | {:.0}/s peak | {:.1}% delivered | {:.0}s",
        view.total_ops,
        view.megabytes(),
        view.current_rate,
        view.peak_rate,
        view.success_rate,
        view.elapsed_secs
    )
}

/// The human-readable end-of-flood block.
#[must_use]
pub fn render_flood_summary(target: &str, view: &CountersView, accessible: bool) -> String {
    let headline = format!("Flood of {target} complete");
    let headline = if accessible {
        headline
    } else {
        headline.bold().to_string()
    };
    [
        headline,
        format!(
            "  datagrams   {} sent, {} delivered ({:.1}%)",
            view.total_ops, view.success_ops, view.success_rate
        ),
        format!("  data        {:.2} MB", view.megabytes()),
        format!(
            "  rate        {:.0}/s average, {:.0}/s peak",
            view.ops_per_second, view.peak_rate
        ),
        format!("  duration    {:.1}s", view.elapsed_secs),
    ]
    .join("\n")
}

/// The single machine-readable line greppable flood runs end with.
#[must_use]
pub fn render_flood_greppable(view: &CountersView) -> String {
    format!(
        "sent={} delivered={} failed={} bytes={} peak_rate={:.0} avg_rate={:.0} elapsed={:.1}",
        view.total_ops,
        view.success_ops,
        view.failed_ops,
        view.total_bytes,
        view.peak_rate,
        view.ops_per_second,
        view.elapsed_secs
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::OutputFormat;
    use std::net::IpAddr;

    fn sample_target() -> Target {
        Target::template("scanme.local".to_string(), "10.1.2.3".parse::<IpAddr>().unwrap())
    }

    fn sample_reports() -> Vec<PortReport> {
        vec![
            PortReport {
                port: 22,
                state: PortState::Open,
                service: Some("ssh"),
                banner: Some("SSH-2.0-OpenSSH_9.6".to_string()),
            },
            PortReport {
                port: 23,
                state: PortState::Closed,
                service: None,
                banner: None,
            },
            PortReport {
                port: 24,
                state: PortState::Filtered,
                service: None,
                banner: None,
            },
            PortReport {
                port: 80,
                state: PortState::Open,
                service: Some("http"),
                banner: None,
            },
        ]
    }

    fn sample_view() -> CountersView {
        CountersView {
            total_ops: 4,
            success_ops: 2,
            failed_ops: 2,
            total_bytes: 19,
            current_rate: 4.0,
            peak_rate: 4.0,
            elapsed_secs: 1.0,
            ops_per_second: 4.0,
            success_rate: 50.0,
        }
    }

    #[test]
    fn document_counts_states_and_keeps_open_ports() {
        let doc = ScanDocument::new(&sample_target(), &sample_reports(), &sample_view());

        assert_eq!(doc.open, 2);
        assert_eq!(doc.closed, 1);
        assert_eq!(doc.filtered, 1);
        assert_eq!(doc.ports.len(), 2);
        assert!(doc.ports.iter().all(|r| r.state == PortState::Open));
    }

    #[test]
    fn txt_report_lists_open_ports_and_counts() {
        let doc = ScanDocument::new(&sample_target(), &sample_reports(), &sample_view());
        let txt = doc.render(OutputFormat::Txt).unwrap();

        assert!(txt.contains("scanme.local (10.1.2.3)"));
        assert!(txt.contains("2 open, 1 closed, 1 filtered"));
        assert!(txt.contains("22/tcp"));
        assert!(txt.contains("SSH-2.0-OpenSSH_9.6"));
        assert!(!txt.contains("23/tcp"));
    }

    #[test]
    fn json_report_round_trips_states_lowercase() {
        let doc = ScanDocument::new(&sample_target(), &sample_reports(), &sample_view());
        let json = doc.render(OutputFormat::Json).unwrap();

        assert!(json.contains("\"target\": \"scanme.local\""));
        assert!(json.contains("\"state\": \"open\""));
        assert!(!json.contains("\"state\": \"closed\""));
        assert!(json.contains("\"total_ops\": 4"));
    }

    #[test]
    fn csv_report_escapes_awkward_banners() {
        let mut reports = sample_reports();
        reports[0].banner = Some("hello, \"world\"".to_string());
        let doc = ScanDocument::new(&sample_target(), &reports, &sample_view());
        let csv = doc.render(OutputFormat::Csv).unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "port,state,service,banner");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with("\"hello, \"\"world\"\"\""));
    }

    #[test]
    fn xml_report_has_a_scan_root() {
        let doc = ScanDocument::new(&sample_target(), &sample_reports(), &sample_view());
        let xml = doc.render(OutputFormat::Xml).unwrap();

        assert!(xml.starts_with("<scan>"));
        assert!(xml.ends_with("</scan>"));
        assert!(xml.contains("<port>"));
    }

    #[test]
    fn flood_summary_reports_the_run() {
        let view = CountersView {
            total_ops: 1000,
            success_ops: 990,
            failed_ops: 10,
            total_bytes: 2_097_152,
            current_rate: 400.0,
            peak_rate: 800.0,
            elapsed_secs: 2.5,
            ops_per_second: 400.0,
            success_rate: 99.0,
        };
        let summary = render_flood_summary("udp://10.1.2.3:53", &view, true);

        assert!(summary.contains("Flood of udp://10.1.2.3:53 complete"));
        assert!(summary.contains("1000 sent, 990 delivered (99.0%)"));
        assert!(summary.contains("2.00 MB"));
        assert!(summary.contains("400/s average, 800/s peak"));
    }

    #[test]
    fn greppable_flood_line_is_stable() {
        let view = CountersView {
            total_ops: 10,
            success_ops: 9,
            failed_ops: 1,
            total_bytes: 1024,
            current_rate: 5.0,
            peak_rate: 6.0,
            elapsed_secs: 2.0,
            ops_per_second: 5.0,
            success_rate: 90.0,
        };

        assert_eq!(
            render_flood_greppable(&view),
            "sent=10 delivered=9 failed=1 bytes=1024 peak_rate=6 avg_rate=5 elapsed=2.0"
        );
    }
}
