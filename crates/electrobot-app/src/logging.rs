use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "electrobot-";
pub const LOG_FILE_SUFFIX: &str = ".log";
pub const LOG_RETENTION_DAYS: i64 = 14;
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn env_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

fn timer() -> ChronoLocal {
    ChronoLocal::new(LOG_TIMESTAMP_FORMAT.to_string())
}

/// Stdout logging only.
pub fn init_console_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_timer(timer())
        .with_writer(io::stdout)
        .init();
}

/// Stdout logging plus daily files under `log_dir`.
pub fn init_logging(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    cleanup_old_logs(log_dir, Local::now(), LOG_RETENTION_DAYS)?;

    let writer = DailyLogWriter::new(log_dir.to_path_buf(), LOG_RETENTION_DAYS)?;
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(timer())
                .with_writer(io::stdout),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(timer())
                .with_ansi(false)
                .with_writer(writer),
        )
        .init();

    Ok(())
}

#[derive(Debug)]
struct DailyState {
    current_day: NaiveDate,
    file: File,
}

#[derive(Clone, Debug)]
struct DailyLogWriter {
    log_dir: PathBuf,
    retention_days: i64,
    state: Arc<Mutex<DailyState>>,
}

impl DailyLogWriter {
    fn new(log_dir: PathBuf, retention_days: i64) -> Result<Self> {
        let today = Local::now().date_naive();
        let file = open_log_file(&log_dir, today)?;
        Ok(Self {
            log_dir,
            retention_days,
            state: Arc::new(Mutex::new(DailyState {
                current_day: today,
                file,
            })),
        })
    }
}

impl<'a> MakeWriter<'a> for DailyLogWriter {
    type Writer = DailyLogGuard;

    fn make_writer(&'a self) -> Self::Writer {
        DailyLogGuard {
            writer: self.clone(),
        }
    }
}

struct DailyLogGuard {
    writer: DailyLogWriter,
}

impl Write for DailyLogGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let now = Local::now();
        let today = now.date_naive();
        let mut state = self
            .writer
            .state
            .lock()
            .map_err(|_| io::Error::other("failed to lock log writer"))?;

        if state.current_day != today {
            state.file.flush()?;
            state.file = open_log_file(&self.writer.log_dir, today)?;
            state.current_day = today;
            let _ = cleanup_old_logs(&self.writer.log_dir, now, self.writer.retention_days);
        }

        state.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .writer
            .state
            .lock()
            .map_err(|_| io::Error::other("failed to lock log writer"))?;
        state.file.flush()
    }
}

fn log_file_path(log_dir: &Path, day: NaiveDate) -> PathBuf {
    log_dir.join(format!(
        "{LOG_FILE_PREFIX}{}{LOG_FILE_SUFFIX}",
        day.format("%Y-%m-%d")
    ))
}

fn open_log_file(log_dir: &Path, day: NaiveDate) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(log_dir, day))
}

fn parse_log_filename_day(file_name: &str) -> Option<NaiveDate> {
    let body = file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    NaiveDate::parse_from_str(body, "%Y-%m-%d").ok()
}

/// Deletes log files whose day is older than `retention_days` before `now`.
pub fn cleanup_old_logs<Tz: TimeZone>(
    log_dir: &Path,
    now: DateTime<Tz>,
    retention_days: i64,
) -> Result<()> {
    let cutoff = now.date_naive() - Duration::days(retention_days);
    let entries = match fs::read_dir(log_dir) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", log_dir.display())),
    };

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(day) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(parse_log_filename_day)
        else {
            continue;
        };
        if day < cutoff {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

/// In-memory log sink for tests: install it as the thread's default
/// subscriber and inspect what the code under test logged.
#[derive(Clone, Default)]
pub struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .with_writer(self.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        let buf = match self.buf.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl<'a> MakeWriter<'a> for CaptureWriter {
    type Writer = CaptureGuard;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureGuard {
            buf: self.buf.clone(),
        }
    }
}

pub struct CaptureGuard {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for CaptureGuard {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .buf
            .lock()
            .map_err(|_| io::Error::other("failed to lock capture buffer"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("electrobot_logging_test_{}", Uuid::new_v4()))
    }

    #[test]
    fn test_parse_log_filename_day() {
        assert!(parse_log_filename_day("electrobot-2026-02-08.log").is_some());
        assert!(parse_log_filename_day("electrobot-2026-02-08-10.log").is_none());
        assert!(parse_log_filename_day("other-2026-02-08.log").is_none());
    }

    #[test]
    fn test_cleanup_old_logs_keeps_recent_removes_old() {
        let dir = test_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("electrobot-2026-01-01.log"), "old").unwrap();
        fs::write(dir.join("electrobot-2026-02-07.log"), "new").unwrap();
        fs::write(dir.join("notes.txt"), "keep").unwrap();

        let now = DateTime::parse_from_rfc3339("2026-02-08T11:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        cleanup_old_logs(&dir, now, 14).unwrap();

        assert!(!dir.join("electrobot-2026-01-01.log").exists());
        assert!(dir.join("electrobot-2026-02-07.log").exists());
        assert!(dir.join("notes.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_cleanup_missing_dir_is_ok() {
        cleanup_old_logs(&test_dir(), Utc::now(), 14).unwrap();
    }

    #[test]
    fn test_daily_writer_appends_to_todays_file() {
        let dir = test_dir();
        fs::create_dir_all(&dir).unwrap();
        let writer = DailyLogWriter::new(dir.clone(), 14).unwrap();
        writer.make_writer().write_all(b"line one\n").unwrap();
        writer.make_writer().write_all(b"line two\n").unwrap();
        writer.make_writer().flush().unwrap();

        let path = log_file_path(&dir, Local::now().date_naive());
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "line one\nline two\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_capture_writer_collects_events() {
        let capture = CaptureWriter::new();
        {
            let _guard = capture.install();
            tracing::warn!(user = 7, "Failed to send message");
        }
        tracing::warn!("not captured");
        let out = capture.contents();
        assert!(out.contains("Failed to send message"));
        assert!(out.contains("user=7"));
        assert!(!out.contains("not captured"));
    }
}
