// Append-only sample log
//
// One plain-text file per (data kind, calendar day, device):
//   <kind>_<MM-DD-YYYY>_<device>.txt
// holding one tab-delimited line per received sample:
//   HR:  <HH:MM:SS.ffff>\t<bpm>\t<rr1>\t<rr2>\t<rr3>
//   ECG: <HH:MM:SS.ffff>\t<device timestamp>\t<s0>\t<s1>...
//
// Files are never truncated. Every record is written with a single write call
// and synced before `append` returns.

use crate::error::LogWriteError;
use crate::types::{DeviceHandle, Sample, SamplePayload, StreamKind};
use chrono::{DateTime, Local, NaiveDate, Timelike};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Heart-rate records always carry exactly this many interval fields
pub const HR_INTERVAL_FIELDS: usize = 3;

/// One line destined for the sample log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub kind: StreamKind,
    pub device: DeviceHandle,
    /// Tab-delimited device payload, without the timestamp
    pub payload: String,
}

impl LogRecord {
    pub fn from_sample(sample: &Sample, device: &DeviceHandle) -> Self {
        Self {
            timestamp: sample.received_at,
            kind: sample.kind(),
            device: device.clone(),
            payload: format_payload(&sample.payload),
        }
    }

    /// Full line including the trailing newline
    pub fn line(&self) -> String {
        format!("{}\t{}\n", format_receive_time(&self.timestamp), self.payload)
    }
}

/// `HH:MM:SS.ffff` (tenths of a millisecond)
pub fn format_receive_time(timestamp: &DateTime<Local>) -> String {
    let ten_thousandths = (timestamp.nanosecond() % 1_000_000_000) / 100_000;
    format!("{}.{:04}", timestamp.format("%H:%M:%S"), ten_thousandths)
}

pub fn format_payload(payload: &SamplePayload) -> String {
    match payload {
        SamplePayload::HeartRate(hr) => {
            let mut fields = Vec::with_capacity(1 + HR_INTERVAL_FIELDS);
            fields.push(hr.bpm.to_string());
            for i in 0..HR_INTERVAL_FIELDS {
                fields.push(hr.rr_intervals_ms.get(i).copied().unwrap_or(0).to_string());
            }
            fields.join("\t")
        }
        SamplePayload::Ecg(ecg) => {
            let mut line = ecg.device_timestamp.to_string();
            for value in &ecg.samples {
                line.push('\t');
                line.push_str(&value.to_string());
            }
            line
        }
    }
}

/// `<kind>_<MM-DD-YYYY>_<device>.txt`
pub fn log_file_name(tag: &str, date: NaiveDate, device: &DeviceHandle) -> String {
    format!("{}_{}_{}.txt", tag, date.format("%m-%d-%Y"), device)
}

pub struct SampleLogger {
    directory: PathBuf,
}

impl SampleLogger {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File a record lands in. The date comes from the record's receive time,
    /// so a session running past midnight continues in a new file.
    pub fn path_for(&self, record: &LogRecord) -> Result<PathBuf, LogWriteError> {
        let tag = record
            .kind
            .log_tag()
            .ok_or(LogWriteError::UnsupportedKind(record.kind))?;
        Ok(self.directory.join(log_file_name(
            tag,
            record.timestamp.date_naive(),
            &record.device,
        )))
    }

    /// Append one record, creating the file on first use.
    pub fn append(&self, record: &LogRecord) -> Result<PathBuf, LogWriteError> {
        let path = self.path_for(record)?;

        if !self.directory.exists() {
            fs::create_dir_all(&self.directory).map_err(|source| LogWriteError::CreateDir {
                path: self.directory.clone(),
                source,
            })?;
        }

        let append_err = |source| LogWriteError::Append {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(append_err)?;
        file.write_all(record.line().as_bytes())
            .map_err(append_err)?;
        file.flush().map_err(append_err)?;
        file.sync_data().map_err(append_err)?;

        Ok(path)
    }
}

/// Turns a run of log-write failures into at most one operator notice per
/// interval. Every failure is still counted.
#[derive(Debug)]
pub struct WriteFailureReporter {
    interval: Duration,
    last_notice: Option<Instant>,
    suppressed: u64,
    total: u64,
}

impl WriteFailureReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_notice: None,
            suppressed: 0,
            total: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Record a failure; returns the notice text when one is due.
    pub fn record(&mut self, error: &LogWriteError) -> Option<String> {
        self.record_at(error, Instant::now())
    }

    fn record_at(&mut self, error: &LogWriteError, now: Instant) -> Option<String> {
        self.total += 1;

        let due = self
            .last_notice
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if !due {
            self.suppressed += 1;
            return None;
        }

        let text = if self.suppressed > 0 {
            format!(
                "Sample log write failed: {} ({} earlier failures not shown)",
                error, self.suppressed
            )
        } else {
            format!("Sample log write failed: {}", error)
        };
        self.last_notice = Some(now);
        self.suppressed = 0;
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EcgSample, HeartRateSample};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32, micros: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 9, h, m, s)
            .unwrap()
            .with_nanosecond(micros * 1000)
            .unwrap()
    }

    fn hr_sample(ts: DateTime<Local>, bpm: u16, rr: &[u16]) -> Sample {
        Sample {
            received_at: ts,
            payload: SamplePayload::HeartRate(HeartRateSample {
                bpm,
                rr_intervals_ms: rr.to_vec(),
            }),
        }
    }

    #[test]
    fn test_hr_line_zero_pads_intervals() {
        let device = DeviceHandle::new("7E37D222");
        let sample = hr_sample(at(10, 15, 2, 123_400), 58, &[812]);
        let record = LogRecord::from_sample(&sample, &device);

        assert_eq!(record.line(), "10:15:02.1234\t58\t812\t0\t0\n");
        assert_eq!(record.payload.split('\t').count(), 1 + HR_INTERVAL_FIELDS);
    }

    #[test]
    fn test_ecg_line_joins_samples() {
        let device = DeviceHandle::new("7E37D222");
        let sample = Sample {
            received_at: at(23, 59, 59, 999_999),
            payload: SamplePayload::Ecg(EcgSample {
                device_timestamp: 599_618_496_000_000_000,
                samples: vec![-12, 40, 7],
            }),
        };
        let record = LogRecord::from_sample(&sample, &device);

        assert_eq!(record.line(), "23:59:59.9999\t599618496000000000\t-12\t40\t7\n");
    }

    #[test]
    fn test_file_name_convention() {
        let device = DeviceHandle::new("7E37D222");
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(log_file_name("HR", date, &device), "HR_03-09-2024_7E37D222.txt");
    }

    #[test]
    fn test_append_round_trip_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let logger = SampleLogger::new(temp_dir.path().join("logs"));
        let device = DeviceHandle::new("7E37D222");

        let mut expected = String::new();
        let mut path = None;
        for i in 0..5u16 {
            let sample = hr_sample(at(8, 0, i as u32, 0), 60 + i, &[900, 910 + i]);
            let record = LogRecord::from_sample(&sample, &device);
            expected.push_str(&record.line());
            path = Some(logger.append(&record).unwrap());
        }

        let path = path.unwrap();
        assert!(path.ends_with("HR_03-09-2024_7E37D222.txt"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, expected);
        assert_eq!(content.lines().count(), 5);
        assert_eq!(content.lines().next(), Some("08:00:00.0000\t60\t900\t910\t0"));
    }

    #[test]
    fn test_append_never_truncates_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let logger = SampleLogger::new(temp_dir.path());
        let device = DeviceHandle::new("D1");
        let record = LogRecord::from_sample(&hr_sample(at(9, 0, 0, 0), 70, &[]), &device);

        let path = logger.path_for(&record).unwrap();
        std::fs::write(&path, "existing\n").unwrap();
        logger.append(&record).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "existing\n09:00:00.0000\t70\t0\t0\t0\n");
    }

    #[test]
    fn test_midnight_rollover_uses_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let logger = SampleLogger::new(temp_dir.path());
        let device = DeviceHandle::new("D1");

        let before = LogRecord::from_sample(&hr_sample(at(23, 59, 59, 0), 70, &[]), &device);
        let mut after = before.clone();
        after.timestamp = Local.with_ymd_and_hms(2024, 3, 10, 0, 0, 1).unwrap();

        let first = logger.append(&before).unwrap();
        let second = logger.append(&after).unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("HR_03-10-2024_D1.txt"));
    }

    #[test]
    fn test_unsupported_kind_rejected() {
        let logger = SampleLogger::new("/nonexistent");
        let record = LogRecord {
            timestamp: at(1, 0, 0, 0),
            kind: StreamKind::Ppg,
            device: DeviceHandle::new("D1"),
            payload: String::new(),
        };
        assert!(matches!(
            logger.append(&record),
            Err(LogWriteError::UnsupportedKind(StreamKind::Ppg))
        ));
    }

    #[test]
    fn test_open_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        // A regular file where the log directory should be
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let logger = SampleLogger::new(&blocker);
        let record = LogRecord::from_sample(&hr_sample(at(9, 0, 0, 0), 70, &[]), &DeviceHandle::new("D1"));

        assert!(logger.append(&record).is_err());
    }

    #[test]
    fn test_failure_reporter_rate_limits() {
        let mut reporter = WriteFailureReporter::new(Duration::from_secs(30));
        let error = LogWriteError::UnsupportedKind(StreamKind::Acc);
        let start = Instant::now();

        assert!(reporter.record_at(&error, start).is_some());
        assert!(reporter.record_at(&error, start + Duration::from_secs(1)).is_none());
        assert!(reporter.record_at(&error, start + Duration::from_secs(2)).is_none());

        let notice = reporter
            .record_at(&error, start + Duration::from_secs(31))
            .unwrap();
        assert!(notice.contains("2 earlier failures"));
        assert_eq!(reporter.total(), 4);
    }
}
