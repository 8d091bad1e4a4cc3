// Thu Oct 15 2026 - Alex

use colored::*;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// Installs the coloured stderr logger. Later calls are ignored.
pub fn init(level: LevelFilter) {
    if log::set_boxed_logger(Box::new(ColoredLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}

pub fn init_with_file(level: LevelFilter, path: &Path) -> std::io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let logger = FileLogger {
        level,
        file: Mutex::new(file),
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
    Ok(())
}

/// `RUST_LOG`-driven logging through `env_logger`, defaulting to `info`.
pub fn init_from_env() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

pub fn level_from_verbosity(verbosity: usize) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

struct ColoredLogger {
    level: LevelFilter,
}

fn level_tag(level: Level) -> ColoredString {
    match level {
        Level::Error => "ERROR".red().bold(),
        Level::Warn => "WARN ".yellow().bold(),
        Level::Info => "INFO ".green().bold(),
        Level::Debug => "DEBUG".blue().bold(),
        Level::Trace => "TRACE".magenta().bold(),
    }
}

impl Log for ColoredLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let target = format!("[{}]", record.target());
        eprintln!("{} {} {}", level_tag(record.level()), target.dimmed(), record.args());
    }

    fn flush(&self) {}
}

struct FileLogger {
    level: LevelFilter,
    file: Mutex<File>,
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} {:5} [{}] {}\n",
            unix_timestamp(),
            record.level(),
            record.target(),
            record.args()
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

/// Logs the lifetime of a scope at debug level.
pub struct ScopedTimer {
    name: String,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(name: &str) -> Self {
        log::debug!("{} started", name);
        Self {
            name: name.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        log::debug!("{} took {:.2}ms", self.name, self.elapsed_ms());
    }
}

/// Logs every completed tenth of a job. Shareable across worker threads.
pub struct ProgressLogger {
    name: String,
    total: usize,
    current: AtomicUsize,
    last_decile: AtomicUsize,
}

impl ProgressLogger {
    pub fn new(name: &str, total: usize) -> Self {
        log::info!("[{}] starting, {} items", name, total);
        Self {
            name: name.to_string(),
            total,
            current: AtomicUsize::new(0),
            last_decile: AtomicUsize::new(0),
        }
    }

    pub fn inc(&self) {
        let current = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        if self.total == 0 {
            return;
        }
        let decile = current * 10 / self.total;
        // only the thread that moves the decile forward logs it
        if self.last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            log::info!("[{}] {}% ({}/{})", self.name, decile * 10, current, self.total);
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        log::info!("[{}] done ({}/{})", self.name, self.current(), self.total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_from_verbosity(0), LevelFilter::Warn);
        assert_eq!(level_from_verbosity(2), LevelFilter::Debug);
        assert_eq!(level_from_verbosity(9), LevelFilter::Trace);
    }

    #[test]
    fn test_progress_counts_across_threads() {
        use rayon::prelude::*;

        let progress = ProgressLogger::new("test", 100);
        (0..100).into_par_iter().for_each(|_| progress.inc());
        assert_eq!(progress.current(), 100);
        assert_eq!(progress.last_decile.load(Ordering::Relaxed), 10);
    }
}
