//! Offline checks for a metrics log.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::storage::{FrameMetricsRecord, METRICS_HEADER};

/// A frame_number jump: `after` was followed directly by `next`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGap {
    pub after: u64,
    pub next: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowViolation {
    /// 1-based line number in the file.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogReport {
    pub records: u64,
    pub first_frame: Option<u64>,
    pub last_frame: Option<u64>,
    pub gaps: Vec<FrameGap>,
    pub violations: Vec<RowViolation>,
}

impl LogReport {
    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty() && self.violations.is_empty()
    }
}

pub fn verify_metrics_log(path: &Path) -> Result<LogReport> {
    verify_metrics_log_with(path, |_, _| {})
}

/// Check every row, calling `on_record` with each record that parsed.
///
/// A missing or foreign header is an error: nothing else in the file can be trusted.
pub fn verify_metrics_log_with<F>(path: &Path, mut on_record: F) -> Result<LogReport>
where
    F: FnMut(usize, &FrameMetricsRecord),
{
    let file = File::open(path)
        .with_context(|| format!("failed to read metrics log {}", path.display()))?;
    let mut lines = BufReader::new(file).split(b'\n').enumerate();
    let header = match lines.next() {
        Some((_, line)) => line
            .with_context(|| format!("failed to read metrics log {}", path.display()))?,
        None => return Err(anyhow!("metrics log {} is empty", path.display())),
    };
    let header = String::from_utf8_lossy(&header);
    let header = header.trim_end_matches('\r');
    if header != METRICS_HEADER {
        return Err(anyhow!(
            "metrics log {} has an unexpected header '{}'",
            path.display(),
            header
        ));
    }

    let mut report = LogReport::default();
    let mut previous: Option<u64> = None;
    for (idx, line) in lines {
        let line_no = idx + 1;
        let bytes =
            line.with_context(|| format!("failed to read metrics log {}", path.display()))?;
        let line = match std::str::from_utf8(&bytes) {
            Ok(line) => line,
            Err(e) => {
                report.violations.push(RowViolation {
                    line: line_no,
                    message: format!("row is not UTF-8: {}", e),
                });
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let record = match FrameMetricsRecord::parse_csv_row(line) {
            Ok(record) => record,
            Err(e) => {
                report.violations.push(RowViolation {
                    line: line_no,
                    message: format!("unreadable row: {}", e),
                });
                continue;
            }
        };
        on_record(line_no, &record);
        report.records += 1;

        if record.free_slots + record.occupied_slots != record.total_slots {
            report.violations.push(RowViolation {
                line: line_no,
                message: format!(
                    "free_slots ({}) + occupied_slots ({}) != total_slots ({})",
                    record.free_slots, record.occupied_slots, record.total_slots
                ),
            });
        }
        let expected = expected_percent(&record);
        if (record.occupancy_percent - expected).abs() > 0.051 {
            report.violations.push(RowViolation {
                line: line_no,
                message: format!(
                    "occupancy_percent {} does not match {}/{} ({:.1})",
                    record.occupancy_percent, record.occupied_slots, record.total_slots, expected
                ),
            });
        }

        match previous {
            None => report.first_frame = Some(record.frame_number),
            Some(prev) if record.frame_number == prev + 1 => {}
            Some(prev) if record.frame_number > prev => report.gaps.push(FrameGap {
                after: prev,
                next: record.frame_number,
            }),
            Some(prev) => report.violations.push(RowViolation {
                line: line_no,
                message: format!(
                    "frame_number {} does not increase (previous {})",
                    record.frame_number, prev
                ),
            }),
        }
        previous = Some(record.frame_number);
        report.last_frame = Some(record.frame_number);
    }
    Ok(report)
}

fn expected_percent(record: &FrameMetricsRecord) -> f64 {
    if record.total_slots == 0 {
        0.0
    } else {
        record.occupied_slots as f64 / record.total_slots as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn log_with(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", METRICS_HEADER).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        file
    }

    #[test]
    fn clean_log() {
        let file = log_with(&[
            "2,1,3,33.3,1,2024-03-09T14:05:07.042",
            "0,3,3,100.0,2,2024-03-09T14:05:07.142",
            "0,0,0,0.0,3,2024-03-09T14:05:07.242",
        ]);
        let report = verify_metrics_log(file.path()).unwrap();
        assert!(report.is_clean(), "{:?}", report);
        assert_eq!(report.records, 3);
        assert_eq!(report.first_frame, Some(1));
        assert_eq!(report.last_frame, Some(3));
    }

    #[test]
    fn reports_gaps_and_violations() {
        let file = log_with(&[
            "2,1,3,33.3,1,2024-03-09T14:05:07.042",
            "2,2,3,50.0,4,2024-03-09T14:05:07.142",
            "1,2,3,50.0,5,2024-03-09T14:05:07.242",
            "1,2,3,66.7,5,2024-03-09T14:05:07.342",
            "garbage",
        ]);
        let report = verify_metrics_log(file.path()).unwrap();
        assert_eq!(report.gaps, vec![FrameGap { after: 1, next: 4 }]);
        let lines: Vec<usize> = report.violations.iter().map(|v| v.line).collect();
        // line 3: counts and percent, line 4: percent, line 5: repeat, line 6: unreadable
        assert_eq!(lines, vec![3, 3, 4, 5, 6]);
        assert_eq!(report.records, 4);
    }

    #[test]
    fn row_that_is_not_utf8_is_a_violation() {
        let mut file = log_with(&["2,1,3,33.3,1,2024-03-09T14:05:07.042"]);
        file.write_all(b"2,1,3,33.3,\xff,2024-03-09T14:05:07.142\n").unwrap();
        writeln!(file, "2,1,3,33.3,2,2024-03-09T14:05:07.242").unwrap();
        let report = verify_metrics_log(file.path()).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].line, 3);
        assert!(report.violations[0].message.contains("not UTF-8"));
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn foreign_header_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b,c").unwrap();
        assert!(verify_metrics_log(file.path()).is_err());
    }
}
