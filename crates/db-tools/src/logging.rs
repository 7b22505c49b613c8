//! Structured JSON logging to stderr and an optional size-rotated file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;
use crate::error::{CoreError, CoreResult};

/// Crates whose logs are held at the third-party level.
const THIRD_PARTY_TARGETS: [&str; 5] = ["hyper", "tower_http", "axum", "h2", "reqwest"];

/// Filter directives for `config` when `RUST_LOG` is not set.
pub fn default_directives(config: &LogConfig) -> String {
    let third_party = config.third_party_level.to_string().to_lowercase();
    let mut directives = vec![
        third_party.clone(),
        format!("db_tools={}", config.level.to_string().to_lowercase()),
    ];
    directives.extend(
        THIRD_PARTY_TARGETS
            .iter()
            .map(|target| format!("{target}={third_party}")),
    );
    directives.join(",")
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LogConfig) -> CoreResult<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(default_directives(config)),
    }
    .map_err(|e| CoreError::Logging(format!("invalid filter: {e}")))?;

    let file_layer = match &config.file {
        Some(path) => {
            let writer = RotatingWriter::open(path, config.max_bytes, config.backup_count)?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_current_span(false)
                    .with_writer(writer),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| CoreError::Logging(e.to_string()))
}

/// Append-only log file that rolls over once it would exceed `max_bytes`,
/// keeping `backup_count` numbered copies (`.1` is the newest).
///
/// A `max_bytes` of zero disables rotation. Every write is flushed.
#[derive(Clone)]
pub struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backup_count: u32,
}

impl RotatingWriter {
    pub fn open(path: &Path, max_bytes: u64, backup_count: u32) -> CoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingFile {
                path: path.to_path_buf(),
                file,
                written,
                max_bytes,
                backup_count,
            })),
        })
    }
}

impl RotatingFile {
    fn should_roll(&self, incoming: usize) -> bool {
        self.max_bytes > 0 && self.written > 0 && self.written + incoming as u64 > self.max_bytes
    }

    fn roll(&mut self) -> std::io::Result<()> {
        self.file.flush()?;
        if self.backup_count > 0 {
            shift_backups(&self.path, self.backup_count);
            self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        } else {
            self.file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

/// `log.{n-1}` → `log.{n}` down to `log` → `log.1`; the oldest is dropped.
fn shift_backups(path: &Path, keep: u32) {
    let numbered = |i: u32| PathBuf::from(format!("{}.{i}", path.display()));

    let _ = std::fs::remove_file(numbered(keep));
    for i in (1..keep).rev() {
        let _ = std::fs::rename(numbered(i), numbered(i + 1));
    }
    let _ = std::fs::rename(path, numbered(1));
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut inner = self.inner.lock();
        if inner.should_roll(buf.len()) {
            inner.roll()?;
        }
        let n = inner.file.write(buf)?;
        inner.file.flush()?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
