use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDateTime};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::pipeline::FrameSummary;

/// Fixed header row of the metrics log.
pub const METRICS_HEADER: &str =
    "free_slots,occupied_slots,total_slots,occupancy_percent,frame_number,timestamp";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// One aggregate row of the metrics log.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameMetricsRecord {
    pub free_slots: usize,
    pub occupied_slots: usize,
    pub total_slots: usize,
    pub occupancy_percent: f64,
    pub frame_number: u64,
    pub timestamp: NaiveDateTime,
}

impl FrameMetricsRecord {
    pub fn from_summary(summary: &FrameSummary, frame_number: u64, timestamp: NaiveDateTime) -> Self {
        Self {
            free_slots: summary.free_slots,
            occupied_slots: summary.occupied_slots,
            total_slots: summary.total_slots,
            occupancy_percent: summary.occupancy_percent,
            frame_number,
            timestamp,
        }
    }

    /// CSV row without the trailing newline. Percent is written with one decimal.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{:.1},{},{}",
            self.free_slots,
            self.occupied_slots,
            self.total_slots,
            self.occupancy_percent,
            self.frame_number,
            format_timestamp(&self.timestamp)
        )
    }

    pub fn parse_csv_row(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
        if fields.len() != 6 {
            return Err(anyhow!("expected 6 fields, found {}", fields.len()));
        }
        let count = |idx: usize, name: &str| -> Result<usize> {
            fields[idx]
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} is not an integer: '{}'", name, fields[idx]))
        };
        Ok(Self {
            free_slots: count(0, "free_slots")?,
            occupied_slots: count(1, "occupied_slots")?,
            total_slots: count(2, "total_slots")?,
            occupancy_percent: fields[3]
                .trim()
                .parse()
                .map_err(|_| anyhow!("occupancy_percent is not a number: '{}'", fields[3]))?,
            frame_number: fields[4]
                .trim()
                .parse()
                .map_err(|_| anyhow!("frame_number is not an integer: '{}'", fields[4]))?,
            timestamp: parse_timestamp(fields[5].trim())?,
        })
    }
}

/// ISO-8601 local time with millisecond precision.
pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|e| anyhow!("invalid timestamp '{}': {}", value, e))
}

/// How far a record got towards durable storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Durability {
    /// Written, flushed and synced.
    Synced,
    /// Written and flushed, but the storage sync failed.
    Unsynced(String),
    /// The row could not be written. Nothing is kept for a retry; a partial row may
    /// be left on disk, and the next row starts on a fresh line.
    WriteFailed(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendReceipt {
    pub record: FrameMetricsRecord,
    pub durability: Durability,
}

/// Append-only sink for per-frame metrics.
///
/// Appends never fail the caller: durability problems are reported in the receipt
/// and the frame counter still advances, keeping numbering tied to processed frames.
pub trait MetricsStore {
    fn append(&mut self, summary: &FrameSummary) -> AppendReceipt;

    /// Frame number the next appended record will carry.
    fn next_frame_number(&self) -> u64;

    fn close(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub records_appended: u64,
    pub write_failures: u64,
    pub sync_failures: u64,
}

/// CSV metrics log on the local filesystem.
///
/// Rows go straight to the file, one `write_all` per row; nothing is buffered
/// between appends.
pub struct CsvMetricsSink {
    path: PathBuf,
    file: File,
    next_frame_number: u64,
    /// Set after a failed write, which may have left a partial row without its newline.
    pending_newline: bool,
    stats: SinkStats,
}

impl CsvMetricsSink {
    /// Open or create the log.
    ///
    /// An absent or empty file gets the header; an existing log must start with the
    /// header and numbering continues after its highest frame_number. The existing
    /// log is streamed line by line.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open metrics log {}", path.display()))?;

        file.seek(SeekFrom::Start(0))?;
        let scan = scan_existing(BufReader::new(&file))
            .with_context(|| format!("metrics log {} is not usable", path.display()))?;

        let last_frame_number = if scan.lines == 0 {
            file.write_all(format!("{}\n", METRICS_HEADER).as_bytes())?;
            file.sync_all()?;
            log::info!("metrics log created at {}", path.display());
            0
        } else {
            if !scan.ends_with_newline {
                // torn final row from an interrupted write
                file.write_all(b"\n")?;
            }
            log::info!(
                "metrics log {} resumed after frame {}",
                path.display(),
                scan.last_frame_number
            );
            scan.last_frame_number
        };

        Ok(Self {
            path,
            file,
            next_frame_number: last_frame_number + 1,
            pending_newline: false,
            stats: SinkStats::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    fn write_row(&mut self, record: &FrameMetricsRecord) -> Durability {
        let mut line = String::new();
        if self.pending_newline {
            line.push('\n');
        }
        line.push_str(&record.to_csv_row());
        line.push('\n');

        if let Err(e) = self.file.write_all(line.as_bytes()) {
            self.stats.write_failures += 1;
            self.pending_newline = true;
            log::error!(
                "metrics write failed for frame {} ({}): {}",
                record.frame_number,
                self.path.display(),
                e
            );
            return Durability::WriteFailed(e.to_string());
        }
        self.pending_newline = false;
        if let Err(e) = self.file.sync_data() {
            self.stats.sync_failures += 1;
            log::warn!(
                "metrics sync failed for frame {} ({}): {}",
                record.frame_number,
                self.path.display(),
                e
            );
            return Durability::Unsynced(e.to_string());
        }
        Durability::Synced
    }
}

impl MetricsStore for CsvMetricsSink {
    fn append(&mut self, summary: &FrameSummary) -> AppendReceipt {
        let record =
            FrameMetricsRecord::from_summary(summary, self.next_frame_number, Local::now().naive_local());
        let durability = self.write_row(&record);
        self.next_frame_number += 1;
        self.stats.records_appended += 1;
        AppendReceipt { record, durability }
    }

    fn next_frame_number(&self) -> u64 {
        self.next_frame_number
    }

    fn close(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|e| anyhow!("failed to close metrics log {}: {}", self.path.display(), e))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct LogScan {
    lines: usize,
    last_frame_number: u64,
    ends_with_newline: bool,
}

/// Validate the header and find the highest frame_number in an existing log.
///
/// Rows that are not UTF-8 or do not parse are skipped with a warning.
fn scan_existing<R: BufRead>(mut reader: R) -> Result<LogScan> {
    let mut scan = LogScan::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        scan.lines += 1;
        scan.ends_with_newline = buf.last() == Some(&b'\n');
        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim_end_matches(['\r', '\n']),
            Err(e) if scan.lines == 1 => return Err(anyhow!("header is not UTF-8: {}", e)),
            Err(e) => {
                log::warn!("ignoring undecodable metrics row {}: {}", scan.lines, e);
                continue;
            }
        };
        if scan.lines == 1 {
            if line != METRICS_HEADER {
                return Err(anyhow!("unexpected header '{}'", line));
            }
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        match FrameMetricsRecord::parse_csv_row(line) {
            Ok(record) => scan.last_frame_number = scan.last_frame_number.max(record.frame_number),
            Err(e) => log::warn!("ignoring unreadable metrics row {}: {}", scan.lines, e),
        }
    }
    Ok(scan)
}

/// In-memory store for tests and dry runs.
#[derive(Debug)]
pub struct InMemoryMetricsStore {
    records: Vec<FrameMetricsRecord>,
    next_frame_number: u64,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        Self::resuming_after(0)
    }

    /// Store that behaves like a log whose last record was `last_frame_number`.
    pub fn resuming_after(last_frame_number: u64) -> Self {
        Self {
            records: Vec::new(),
            next_frame_number: last_frame_number + 1,
        }
    }

    pub fn records(&self) -> &[FrameMetricsRecord] {
        &self.records
    }
}

impl Default for InMemoryMetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsStore for InMemoryMetricsStore {
    fn append(&mut self, summary: &FrameSummary) -> AppendReceipt {
        let record =
            FrameMetricsRecord::from_summary(summary, self.next_frame_number, Local::now().naive_local());
        self.next_frame_number += 1;
        self.records.push(record.clone());
        AppendReceipt {
            record,
            durability: Durability::Synced,
        }
    }

    fn next_frame_number(&self) -> u64 {
        self.next_frame_number
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FrameSummary;
    use chrono::NaiveDate;

    fn summary(free: usize, total: usize) -> FrameSummary {
        let occupied = total - free;
        FrameSummary {
            free_slots: free,
            occupied_slots: occupied,
            total_slots: total,
            occupancy_percent: if total == 0 {
                0.0
            } else {
                occupied as f64 / total as f64 * 100.0
            },
            states: Vec::new(),
        }
    }

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_milli_opt(14, 5, 7, 42)
            .unwrap()
    }

    #[test]
    fn row_format_matches_log_contract() {
        let record = FrameMetricsRecord::from_summary(&summary(1, 3), 17, fixed_time());
        assert_eq!(record.to_csv_row(), "1,2,3,66.7,17,2024-03-09T14:05:07.042");
        let parsed = FrameMetricsRecord::parse_csv_row(&record.to_csv_row()).unwrap();
        assert_eq!(parsed.frame_number, 17);
        assert_eq!(parsed.timestamp, fixed_time());
        assert_eq!(parsed.occupancy_percent, 66.7);
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(FrameMetricsRecord::parse_csv_row("1,2,3").is_err());
        assert!(FrameMetricsRecord::parse_csv_row("a,2,3,4.0,5,2024-03-09T14:05:07.042").is_err());
        assert!(FrameMetricsRecord::parse_csv_row("1,2,3,4.0,5,yesterday").is_err());
    }

    #[test]
    fn in_memory_store_numbers_from_one() {
        let mut store = InMemoryMetricsStore::new();
        let first = store.append(&summary(2, 2));
        let second = store.append(&summary(0, 2));
        assert_eq!(first.record.frame_number, 1);
        assert_eq!(second.record.frame_number, 2);
        assert_eq!(store.next_frame_number(), 3);
        assert_eq!(store.records().len(), 2);
    }

    #[test]
    fn scan_rejects_foreign_header() {
        assert!(scan_existing("a,b,c\n1,2,3\n".as_bytes()).is_err());
    }

    #[test]
    fn scan_finds_max_and_skips_torn_rows() {
        let log = format!(
            "{}\n0,3,3,100.0,1,2024-03-09T14:05:07.042\n1,2,3,66.7,2,2024-03-09T14:05:07.142\n1,2,3,66",
            METRICS_HEADER
        );
        let scan = scan_existing(log.as_bytes()).unwrap();
        assert_eq!(scan.last_frame_number, 2);
        assert_eq!(scan.lines, 4);
        assert!(!scan.ends_with_newline);
    }

    #[test]
    fn scan_skips_rows_that_are_not_utf8() {
        let mut log = format!("{}\n0,3,3,100.0,1,2024-03-09T14:05:07.042\n", METRICS_HEADER).into_bytes();
        log.extend_from_slice(b"1,2,3,66.7,\xff\xfe,2024-03-09T14:05:07.142\n");
        log.extend_from_slice(b"1,2,3,66.7,2,2024-03-09T14:05:07.242\n");
        let scan = scan_existing(log.as_slice()).unwrap();
        assert_eq!(scan.last_frame_number, 2);
        assert!(scan.ends_with_newline);

        assert!(scan_existing(&b"\xff\xfeheader\n"[..]).is_err());
    }

    #[test]
    fn empty_log_scans_as_zero_lines() {
        assert_eq!(scan_existing(&b""[..]).unwrap(), LogScan::default());
    }

    /// Swaps the log file for one that rejects every write.
    fn sink_on_full_device(dir: &tempfile::TempDir) -> Option<CsvMetricsSink> {
        let full = OpenOptions::new().append(true).open("/dev/full").ok()?;
        let mut sink = CsvMetricsSink::open(dir.path().join("parking_data.csv")).unwrap();
        sink.file = full;
        Some(sink)
    }

    #[test]
    fn failed_write_is_counted_and_numbering_continues() {
        let dir = tempfile::tempdir().unwrap();
        let Some(mut sink) = sink_on_full_device(&dir) else {
            return;
        };
        let receipt = sink.append(&summary(1, 2));
        assert!(matches!(receipt.durability, Durability::WriteFailed(_)));
        assert_eq!(receipt.record.frame_number, 1);
        assert_eq!(sink.next_frame_number(), 2);
        let stats = sink.stats();
        assert_eq!(stats.write_failures, 1);
        assert_eq!(stats.records_appended, 1);
        assert!(sink.pending_newline);
    }

    #[test]
    fn row_after_failed_write_starts_on_a_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parking_data.csv");
        let mut sink = CsvMetricsSink::open(&path).unwrap();
        // a partial row left behind by an interrupted write
        sink.file.write_all(b"1,1,2,5").unwrap();
        sink.pending_newline = true;

        let receipt = sink.append(&summary(2, 2));
        assert_eq!(receipt.durability, Durability::Synced);
        assert!(!sink.pending_newline);
        sink.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[1], "1,1,2,5");
        assert!(lines[2].starts_with("2,0,2,0.0,1,"));
    }
}
