//! spot_extract - print the parking spots a mask resolves to
//!
//! Runs the same extraction and overlap resolution as `parkwatch` and writes the
//! resulting spot list to stdout as JSON, for checking a mask before deployment.
//!
//! With `--frame` or `--source` it also loads the configured classifier and runs one
//! frame through the pipeline, printing every spot's state and the frame totals.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use parking_occupancy::ingest::read_frame;
use parking_occupancy::spots::{extract_spot_boxes, load_mask};
use parking_occupancy::{
    load_classifier, ClassificationPipeline, Frame, FrameOutcome, FrameSource, MonitorConfig,
    SourceSettings, VideoSource,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "spot_extract", about = "Resolve parking spots from a mask image")]
struct Args {
    /// Mask image (defaults to the configured mask_path)
    #[arg(long, value_name = "PATH")]
    mask: Option<PathBuf>,

    /// Overlap threshold (defaults to the configured value)
    #[arg(long)]
    overlap: Option<f64>,

    /// Classify this still image against the spots
    #[arg(long, value_name = "PATH", conflicts_with = "source")]
    frame: Option<PathBuf>,

    /// Classify the first frame of this source (stub://, frame directory or video file)
    #[arg(long, value_name = "URL")]
    source: Option<String>,

    /// Also list candidate boxes before overlap resolution
    #[arg(short, long)]
    verbose: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(
        &args.ui,
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );

    let mut cfg = MonitorConfig::load()?;
    if let Some(mask) = args.mask {
        cfg.mask_path = mask;
    }
    if let Some(overlap) = args.overlap {
        cfg.spots.overlap_threshold = overlap;
    }

    let mask = {
        let _stage = ui.stage("Read mask");
        load_mask(&cfg.mask_path)?
    };

    if args.verbose {
        let candidates = extract_spot_boxes(&mask, cfg.spots.binarize_threshold, &cfg.spots.bounds);
        eprintln!("{} candidate boxes:", candidates.len());
        for spot in &candidates {
            eprintln!(
                "  #{} x={} y={} w={} h={} area={}",
                spot.id,
                spot.x,
                spot.y,
                spot.width,
                spot.height,
                spot.area()
            );
        }
    }

    let spots = {
        let mut stage = ui.stage("Resolve spots");
        let spots = cfg.spot_list(&mask)?;
        stage.detail(format!("{} spots", spots.len()));
        spots
    };

    let frame = match (&args.frame, &args.source) {
        (Some(path), _) => {
            let _stage = ui.stage("Read frame");
            Some(read_frame(path, 1)?)
        }
        (None, Some(url)) => {
            let _stage = ui.stage("Read first frame");
            Some(first_frame(&cfg.source, url)?)
        }
        (None, None) => None,
    };
    let Some(frame) = frame else {
        println!("{}", serde_json::to_string_pretty(&spots)?);
        return Ok(());
    };

    let classifier = {
        let _stage = ui.stage("Load classifier");
        load_classifier(
            cfg.classifier.kind,
            cfg.classifier_path(),
            cfg.classifier.feature_shape,
        )?
    };
    let mut pipeline = ClassificationPipeline::new(spots, classifier, cfg.pipeline_settings())?;
    let summary = match pipeline.process_frame(&frame)? {
        FrameOutcome::Processed(summary) => summary,
        FrameOutcome::Skipped(reason) => return Err(anyhow!("frame not classified: {}", reason)),
    };

    for state in &summary.states {
        eprintln!(
            "  spot {}: {:?} ({:?}, mean intensity {:.1})",
            state.spot_id, state.label, state.source, state.mean_intensity
        );
    }
    eprintln!("empty spots: {:?}", summary.free_spot_ids());
    eprintln!("occupied spots: {:?}", summary.occupied_spot_ids());
    eprintln!(
        "{}/{} free ({:.1}% free)",
        summary.free_slots,
        summary.total_slots,
        summary.free_percent()
    );

    let output = serde_json::json!({
        "spots": pipeline.spots(),
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn first_frame(configured: &SourceSettings, url: &str) -> Result<Frame> {
    let settings = SourceSettings {
        url: url.to_string(),
        loop_playback: false,
        ..configured.clone()
    };
    let mut source = VideoSource::new(&settings)?;
    let frame = source
        .next_frame()?
        .ok_or_else(|| anyhow!("source {} has no frames", url));
    source.release();
    frame
}
