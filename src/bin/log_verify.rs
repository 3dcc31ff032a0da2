//! log_verify - offline checker for the parking metrics log
//!
//! This tool checks:
//! - The header row is the metrics log header
//! - Every row parses and free_slots + occupied_slots == total_slots
//! - occupancy_percent agrees with the counts (one decimal)
//! - frame_number increases by exactly one per record (gaps are reported)

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use parking_occupancy::verify;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "log_verify", about = "Verify a parking metrics log")]
struct Args {
    /// Path to the metrics CSV log
    #[arg(long, default_value = "parking_data.csv")]
    log: PathBuf,

    /// Treat frame_number gaps as failures
    #[arg(long)]
    strict: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let ui = ui::Ui::from_args(
        &args.ui,
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );

    println!("log_verify: checking {}", args.log.display());
    println!();

    let report = {
        let mut stage = ui.stage("Verify metrics log");
        let report = verify::verify_metrics_log_with(&args.log, |line, record| {
            if args.verbose {
                println!(
                    "  line {}: frame {} free={} occupied={} total={} {:.1}% OK",
                    line,
                    record.frame_number,
                    record.free_slots,
                    record.occupied_slots,
                    record.total_slots,
                    record.occupancy_percent
                );
            }
        })?;
        stage.detail(format!("{} records", report.records));
        report
    };

    match (report.first_frame, report.last_frame) {
        (Some(first), Some(last)) => println!(
            "verified {} records (frames {}..={})",
            report.records, first, last
        ),
        _ => println!("verified 0 records (header only)"),
    }
    for gap in &report.gaps {
        println!("GAP: frame {} followed by frame {}", gap.after, gap.next);
    }
    for violation in &report.violations {
        println!("VIOLATION line {}: {}", violation.line, violation.message);
    }

    if !report.violations.is_empty() {
        return Err(anyhow!("{} violations found", report.violations.len()));
    }
    if args.strict && !report.gaps.is_empty() {
        return Err(anyhow!("{} frame_number gaps found", report.gaps.len()));
    }
    println!("OK: metrics log verified.");
    Ok(())
}
