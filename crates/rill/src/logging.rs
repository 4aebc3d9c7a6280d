//! # Logging
//!
//! Installs a `tracing-subscriber` pipeline writing plain-text lines to a
//! size-rotated file. The subscriber is scoped to the returned guard rather
//! than installed globally, so the process owner decides how long it lives.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogConfig;

/// Keeps the subscriber installed until dropped.
pub struct LogGuard {
    _default: DefaultGuard,
}

pub fn init(config: &LogConfig) -> io::Result<LogGuard> {
    let filter = EnvFilter::try_new(&config.level).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid log level '{}': {}", config.level, e),
        )
    })?;

    let file = RotatingFile::open(&config.path, config.max_bytes, config.backups)?;
    let layer = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true);

    let default = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .set_default();
    Ok(LogGuard { _default: default })
}

/// An append-only file that rolls over once it reaches `max_bytes`.
///
/// On rollover `path` becomes `path.1`, `path.1` becomes `path.2`, and so on
/// up to `path.{backups}`; the oldest is overwritten. With no backups the
/// file is truncated instead.
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RotatingFile {
    pub fn open(path: impl AsRef<Path>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self { path, max_bytes, backups, file, written })
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.backups == 0 {
            self.file.set_len(0)?;
        } else {
            for n in (1..self.backups).rev() {
                let from = self.backup_path(n);
                if from.exists() {
                    std::fs::rename(&from, self.backup_path(n + 1))?;
                }
            }
            std::fs::rename(&self.path, self.backup_path(1))?;
            self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        }
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.max_bytes > 0 && self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
