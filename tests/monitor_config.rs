use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use parking_occupancy::{ClassifierKind, MonitorConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PARKING_CONFIG",
        "PARKING_MASK_PATH",
        "PARKING_LOG_PATH",
        "PARKING_SOURCE_URL",
        "PARKING_SOURCE_LOOP",
        "PARKING_CLASSIFIER_KIND",
        "PARKING_CLASSIFIER_PATH",
        "PARKING_OVERLAP_THRESHOLD",
        "PARKING_HISTORY_SIZE",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "mask_path": "lot/mask_crop.png",
            "log_path": "lot/occupancy.csv",
            "source": {
                "url": "stub://north_lot",
                "loop_playback": false,
                "width": 1280,
                "height": 720,
                "synthetic_frames": 42
            },
            "classifier": {
                "kind": "linear",
                "path": "lot/model.json",
                "feature_width": 20,
                "feature_height": 10
            },
            "spots": {
                "binarize_threshold": 100,
                "overlap_threshold": 0.3,
                "min_width": 10,
                "max_area": 50000
            },
            "smoothing": { "history_size": 7 },
            "gate": { "dark_below": 15.0, "bright_above": 245.0 }
        }"#,
    );

    std::env::set_var("PARKING_CONFIG", file.path());
    std::env::set_var("PARKING_SOURCE_URL", "stub://south_lot");
    std::env::set_var("PARKING_HISTORY_SIZE", "3");
    std::env::set_var("PARKING_SOURCE_LOOP", "yes");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.mask_path, PathBuf::from("lot/mask_crop.png"));
    assert_eq!(cfg.log_path, PathBuf::from("lot/occupancy.csv"));
    assert_eq!(cfg.source.url, "stub://south_lot");
    assert!(cfg.source.loop_playback);
    assert_eq!((cfg.source.width, cfg.source.height), (1280, 720));
    assert_eq!(cfg.source.synthetic_frames, 42);
    assert_eq!(cfg.classifier.kind, ClassifierKind::Linear);
    assert_eq!(cfg.classifier_path(), Some(PathBuf::from("lot/model.json").as_path()));
    assert_eq!(cfg.classifier.feature_shape.len(), 20 * 10 * 3);
    assert_eq!(cfg.spots.binarize_threshold, 100);
    assert_eq!(cfg.spots.overlap_threshold, 0.3);
    assert_eq!(cfg.spots.bounds.min_width, 10);
    assert_eq!(cfg.spots.bounds.max_width, 200);
    assert_eq!(cfg.spots.bounds.max_area, 50_000);
    assert_eq!(cfg.history_size, 3);
    assert_eq!(cfg.gate.dark_below, 15.0);
    assert_eq!(cfg.pipeline_settings().history_size, 3);

    clear_env();
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");
    assert_eq!(cfg, MonitorConfig::default());
    assert_eq!(cfg.source.url, "stub://parking_lot");
    assert_eq!(cfg.classifier.kind, ClassifierKind::Linear);

    clear_env();
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("PARKING_OVERLAP_THRESHOLD", "0"),
        ("PARKING_OVERLAP_THRESHOLD", "not-a-number"),
        ("PARKING_HISTORY_SIZE", "0"),
        ("PARKING_SOURCE_LOOP", "sometimes"),
        ("PARKING_CLASSIFIER_KIND", "svm"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            MonitorConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }

    clear_env();
}

#[test]
fn rejects_unreadable_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config("{ not json");
    std::env::set_var("PARKING_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());

    std::env::set_var("PARKING_CONFIG", "/nonexistent/parking.json");
    assert!(MonitorConfig::load().is_err());

    clear_env();
}

#[test]
fn explicit_config_path_wins_over_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "classifier": { "kind": "stub" } }"#);
    std::env::set_var("PARKING_CONFIG", "/nonexistent/parking.json");
    let cfg = MonitorConfig::load_from(Some(file.path())).expect("load explicit");
    assert_eq!(cfg.classifier.kind, ClassifierKind::Stub);
    assert_eq!(cfg.classifier_path(), None);

    clear_env();
}
