//! parkwatch - parking occupancy monitor
//!
//! This daemon:
//! 1. Derives the session's parking spots from the mask image
//! 2. Loads the spot classifier
//! 3. Reads frames from the configured source (looping if configured)
//! 4. Classifies, gates and smooths every spot per frame
//! 5. Appends one synced aggregate record per processed frame to the metrics log
//!
//! Ctrl-C stops the loop between frames; the log is flushed and closed on exit.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_occupancy::spots::load_mask;
use parking_occupancy::{
    load_classifier, ClassificationPipeline, CsvMetricsSink, Monitor, MonitorConfig,
    MonitorSettings, VideoSource,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "parkwatch", version, about = "Parking lot occupancy monitor")]
struct Args {
    /// JSON config file (overrides PARKING_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Mask image path (overrides config)
    #[arg(long, value_name = "PATH")]
    mask: Option<PathBuf>,

    /// Metrics log path (overrides config)
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Stop after reading this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Cap the processing rate (frames per second)
    #[arg(long)]
    fps: Option<u32>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal(), false);

    let mut cfg = {
        let _stage = ui.stage("Load configuration");
        match &args.config {
            Some(path) => MonitorConfig::load_from(Some(path.as_path()))?,
            None => MonitorConfig::load()?,
        }
    };
    if let Some(mask) = args.mask {
        cfg.mask_path = mask;
    }
    if let Some(log_path) = args.log {
        cfg.log_path = log_path;
    }

    let spots = {
        let mut stage = ui.stage("Extract parking spots");
        let mask = load_mask(&cfg.mask_path)?;
        let spots = cfg.spot_list(&mask)?;
        stage.detail(format!("{} spots", spots.len()));
        spots
    };
    if spots.is_empty() {
        log::warn!(
            "mask {} yielded no spots; every record will report 0 slots",
            cfg.mask_path.display()
        );
    }

    let classifier = {
        let _stage = ui.stage("Load classifier");
        load_classifier(
            cfg.classifier.kind,
            cfg.classifier_path(),
            cfg.classifier.feature_shape,
        )?
    };
    let pipeline = ClassificationPipeline::new(spots, classifier, cfg.pipeline_settings())?;

    let sink = {
        let _stage = ui.stage("Open metrics log");
        CsvMetricsSink::open(&cfg.log_path)?
    };

    let source = {
        let _stage = ui.stage("Open video source");
        VideoSource::open(&cfg.source)?
    };

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let settings = MonitorSettings {
        max_frames: args.max_frames,
        frame_interval: args
            .fps
            .filter(|fps| *fps > 0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps as f64)),
        ..MonitorSettings::default()
    };
    let mut monitor = Monitor::new(source, pipeline, sink).with_settings(settings);

    log::info!(
        "parkwatch running. writing to {}",
        cfg.log_path.display()
    );
    let report = monitor.run(&stop)?;

    println!(
        "frames read={} recorded={} skipped={} write_failures={}",
        report.frames_read, report.frames_recorded, report.frames_skipped, report.write_failures
    );
    if let Some(last) = &report.last_record {
        println!(
            "last frame {}: {}/{} free, {:.1}% occupied",
            last.frame_number, last.free_slots, last.total_slots, last.occupancy_percent
        );
    }
    if report.stop_reason.is_failure() {
        return Err(anyhow!("monitor stopped: {:?}", report.stop_reason));
    }
    Ok(())
}
