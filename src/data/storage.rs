//! Session CSV log.
//!
//! One file per session, named after the session start time (`DAS_20231231235959.csv` with
//! the default prefix). The first row is a fixed header naming the channels; every accepted
//! frame becomes one row of `elapsed,v0,...,v7` where `elapsed` is seconds since the session
//! started with millisecond precision.
//!
//! Elapsed time is taken from a monotonic clock and kept strictly increasing: consecutive
//! rows are at least one millisecond apart.
//! Values are written in Rust's shortest round-trip form, so a row parsed back yields the
//! exact same `f64`s.

use crate::config::StorageSettings;
use crate::error::{AppResult, DaqError};
use crate::frame::{Channel, Frame, CHANNEL_COUNT};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Header cell for the elapsed-time column.
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// Smallest gap between the timestamps of consecutive rows.
const MIN_ROW_SPACING: Duration = Duration::from_millis(1);

/// How many numbered variants are tried when a same-second file already exists.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Append-only CSV log for one session.
pub struct CsvLogger {
    path: PathBuf,
    writer: csv::Writer<File>,
    start_time: DateTime<Local>,
    started: Instant,
    last_elapsed: Option<Duration>,
    rows: u64,
    flush_every: usize,
    unflushed: usize,
}

impl CsvLogger {
    /// Create the session file in `settings.output_dir` and write the header.
    ///
    /// Any failure here is a [`DaqError::Start`]: the session must not begin without a log.
    pub fn create(settings: &StorageSettings, start_time: DateTime<Local>) -> AppResult<Self> {
        let dir = &settings.output_dir;
        std::fs::create_dir_all(dir).map_err(|source| DaqError::Start {
            path: dir.clone(),
            source,
        })?;

        let (path, file) = open_unique(dir, &settings.file_prefix, start_time)?;
        let logger = Self::with_file(path, file, start_time, settings.flush_every_rows)?;

        info!(path = %logger.path.display(), "Session log created");
        Ok(logger)
    }

    /// Write the header to a freshly created file.
    ///
    /// If the header cannot be written the file is removed again.
    pub(crate) fn with_file(
        path: PathBuf,
        file: File,
        start_time: DateTime<Local>,
        flush_every: usize,
    ) -> AppResult<Self> {
        let mut writer = csv::WriterBuilder::new().from_writer(file);
        if let Err(source) = write_header(&mut writer) {
            drop(writer);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove incomplete session log");
            }
            return Err(DaqError::Start { path, source });
        }
        Ok(Self::from_writer(path, writer, start_time, flush_every))
    }

    /// Wrap a writer that already holds the header.
    pub(crate) fn from_writer(
        path: PathBuf,
        writer: csv::Writer<File>,
        start_time: DateTime<Local>,
        flush_every: usize,
    ) -> Self {
        Self {
            path,
            writer,
            start_time,
            started: Instant::now(),
            last_elapsed: None,
            rows: 0,
            flush_every,
            unflushed: 0,
        }
    }

    /// Append one frame, timestamped with the time elapsed since the session started.
    pub fn append(&mut self, frame: &Frame) -> AppResult<()> {
        let elapsed = self.started.elapsed();
        self.append_at(elapsed, frame)
    }

    /// Append one frame with an explicit elapsed time.
    ///
    /// Timestamps strictly increase at millisecond resolution: an elapsed time that would
    /// not print later than the previous row is raised to one millisecond past it.
    pub fn append_at(&mut self, elapsed: Duration, frame: &Frame) -> AppResult<()> {
        let elapsed = truncate_to_millis(elapsed);
        let elapsed = match self.last_elapsed {
            Some(last) => elapsed.max(last + MIN_ROW_SPACING),
            None => elapsed,
        };
        self.last_elapsed = Some(elapsed);

        let mut record = Vec::with_capacity(CHANNEL_COUNT + 1);
        record.push(format_elapsed(elapsed));
        record.extend(frame.values().iter().map(|v| v.to_string()));
        self.writer.write_record(&record)?;

        self.rows += 1;
        self.unflushed += 1;
        if self.flush_every > 0 && self.unflushed >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Push buffered rows to the file.
    pub fn flush(&mut self) -> AppResult<()> {
        self.writer
            .flush()
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        self.unflushed = 0;
        Ok(())
    }

    /// Flush, sync and close the file. Returns the number of data rows written.
    pub fn close(mut self) -> AppResult<u64> {
        self.flush()?;
        let rows = self.rows;
        let path = self.path.clone();
        let file = self
            .writer
            .into_inner()
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        file.sync_all()
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        debug!(path = %path.display(), rows, "Session log closed");
        Ok(rows)
    }

    /// Location of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wall-clock start of the session.
    pub fn start_time(&self) -> DateTime<Local> {
        self.start_time
    }

    /// Data rows written so far (header excluded).
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

impl std::fmt::Debug for CsvLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvLogger")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

/// File name for a session that started at `start_time`.
pub fn session_file_name(prefix: &str, start_time: DateTime<Local>) -> String {
    format!("{}_{}.csv", prefix, start_time.format("%Y%m%d%H%M%S"))
}

/// Seconds with exactly three decimals, truncated to the millisecond.
pub fn format_elapsed(elapsed: Duration) -> String {
    let millis = elapsed.as_millis();
    format!("{}.{:03}", millis / 1000, millis % 1000)
}

fn truncate_to_millis(elapsed: Duration) -> Duration {
    Duration::from_millis(elapsed.as_millis().try_into().unwrap_or(u64::MAX))
}

fn open_unique(
    dir: &Path,
    prefix: &str,
    start_time: DateTime<Local>,
) -> AppResult<(PathBuf, File)> {
    let base = session_file_name(prefix, start_time);
    let stem = base.trim_end_matches(".csv").to_string();

    let mut last_err = None;
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}_{}.csv", stem, attempt)
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                last_err = Some((path, e));
            }
            Err(source) => return Err(DaqError::Start { path, source }),
        }
    }

    let (path, source) = last_err.unwrap_or_else(|| {
        (
            dir.join(&base),
            std::io::Error::from(ErrorKind::AlreadyExists),
        )
    });
    Err(DaqError::Start { path, source })
}

fn write_header(writer: &mut csv::Writer<File>) -> std::io::Result<()> {
    let mut header = Vec::with_capacity(CHANNEL_COUNT + 1);
    header.push(TIMESTAMP_COLUMN.to_string());
    header.extend(Channel::all().map(|c| c.to_string()));
    writer.write_record(&header)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use chrono::TimeZone;

    fn settings(dir: &Path) -> StorageSettings {
        StorageSettings {
            output_dir: dir.to_path_buf(),
            file_prefix: "DAS".to_string(),
            flush_every_rows: 1,
        }
    }

    fn start() -> DateTime<Local> {
        Local.with_ymd_and_hms(2023, 12, 31, 23, 59, 58).unwrap()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_file_name_from_start_time() {
        assert_eq!(session_file_name("DAS", start()), "DAS_20231231235958.csv");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::ZERO), "0.000");
        assert_eq!(format_elapsed(Duration::from_micros(1_234_999)), "1.234");
        assert_eq!(format_elapsed(Duration::from_secs(61)), "61.000");
    }

    #[test]
    fn test_header_and_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut logger = CsvLogger::create(&settings(temp_dir.path()), start()).unwrap();
        assert!(logger.path().ends_with("DAS_20231231235958.csv"));

        let frame = Frame::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        logger.append_at(Duration::from_millis(1500), &frame).unwrap();
        let path = logger.path().to_path_buf();
        assert_eq!(logger.close().unwrap(), 1);

        let lines = read_lines(&path);
        assert_eq!(lines[0], "Timestamp,CH1,CH2,CH3,CH4,CH5,CH6,CH7,CH8");
        assert_eq!(lines[1], "1.500,1,2,3,4,5,6,7,8");
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_row_round_trips_through_parser() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut logger = CsvLogger::create(&settings(temp_dir.path()), start()).unwrap();
        let frame = Frame::new([0.1, -2.5e-7, 3.0, 1e300, -0.0, 6.25, 7.125, 123456.789]);
        logger.append_at(Duration::from_millis(7), &frame).unwrap();
        let path = logger.path().to_path_buf();
        logger.close().unwrap();

        let lines = read_lines(&path);
        let (elapsed, values) = lines[1].split_once(',').unwrap();
        assert_eq!(elapsed, "0.007");
        assert_eq!(parser::parse(values.as_bytes()).unwrap(), frame);
    }

    #[test]
    fn test_elapsed_strictly_increases() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut logger = CsvLogger::create(&settings(temp_dir.path()), start()).unwrap();
        let frame = Frame::new([0.0; CHANNEL_COUNT]);
        logger.append_at(Duration::from_millis(20), &frame).unwrap();
        logger.append_at(Duration::from_millis(10), &frame).unwrap();
        logger.append(&frame).unwrap();
        let path = logger.path().to_path_buf();
        logger.close().unwrap();

        let stamps: Vec<f64> = read_lines(&path)[1..]
            .iter()
            .map(|line| line.split(',').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(stamps.len(), 3);
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(stamps[1], 0.021);
    }

    #[test]
    fn test_same_millisecond_rows_get_distinct_stamps() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut logger = CsvLogger::create(&settings(temp_dir.path()), start()).unwrap();
        let frame = Frame::new([0.0; CHANNEL_COUNT]);
        logger.append_at(Duration::from_micros(100), &frame).unwrap();
        logger.append_at(Duration::from_micros(900), &frame).unwrap();
        logger.append_at(Duration::from_micros(2_500), &frame).unwrap();
        let path = logger.path().to_path_buf();
        logger.close().unwrap();

        let stamps: Vec<String> = read_lines(&path)[1..]
            .iter()
            .map(|line| line.split(',').next().unwrap().to_string())
            .collect();
        assert_eq!(stamps, ["0.000", "0.001", "0.002"]);
    }

    #[test]
    fn test_failed_header_removes_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("DAS_20231231235958.csv");
        std::fs::write(&path, b"").unwrap();
        // Read-only handle: the header write fails on flush
        let file = File::open(&path).unwrap();

        let err = CsvLogger::with_file(path.clone(), file, start(), 1).unwrap_err();
        assert!(matches!(err, DaqError::Start { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_same_second_sessions_do_not_overwrite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let first = CsvLogger::create(&settings(temp_dir.path()), start()).unwrap();
        let second = CsvLogger::create(&settings(temp_dir.path()), start()).unwrap();
        assert_ne!(first.path(), second.path());
        assert!(second.path().ends_with("DAS_20231231235958_1.csv"));
    }

    #[test]
    fn test_unwritable_directory_is_start_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        // A regular file where the output directory should be
        let blocker = temp_dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = CsvLogger::create(&settings(&blocker), start()).unwrap_err();
        assert!(matches!(err, DaqError::Start { .. }));
    }
}
