use crate::config::LoggingConfig;
use crate::errors::ConfigError;
use chrono::Local;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "cref_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<u8> for LogLevel {
    fn from(val: u8) -> Self {
        match val {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

static DEFAULT_LOG_LEVEL: Mutex<LogLevel> = Mutex::new(LogLevel::Info);

pub fn set_log_level(level: LogLevel) {
    if let Ok(mut default_level) = DEFAULT_LOG_LEVEL.lock() {
        *default_level = level;
    }
}

pub fn set_log_level_from_env() {
    if let Ok(level) = env::var("CREF_LOG_LEVEL") {
        match level.to_uppercase().as_str() {
            "TRACE" => set_log_level(LogLevel::Trace),
            "DEBUG" => set_log_level(LogLevel::Debug),
            "INFO" => set_log_level(LogLevel::Info),
            "WARN" => set_log_level(LogLevel::Warn),
            "ERROR" => set_log_level(LogLevel::Error),
            _ => {}
        }
    }
}

fn get_default_log_level() -> Level {
    DEFAULT_LOG_LEVEL
        .lock()
        .map(|level| (*level).into())
        .unwrap_or(Level::INFO)
}

struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S"))
    }
}

fn rotate_logs(log_dir: &Path, config: &LoggingConfig) -> Result<(), ConfigError> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"))
        })
        .collect();

    entries.sort();

    if config.max_files > 0 && entries.len() > config.max_files {
        let to_delete = entries.len() - config.max_files;
        for path in entries.drain(0..to_delete) {
            let _ = fs::remove_file(path);
        }
    }

    if config.max_age_days > 0 {
        let now = SystemTime::now();
        let max_age = Duration::from_secs(config.max_age_days * 24 * 60 * 60);

        for path in entries {
            let modified = path.metadata().and_then(|m| m.modified());
            if let Ok(modified) = modified {
                if now.duration_since(modified).is_ok_and(|age| age > max_age) {
                    let _ = fs::remove_file(path);
                }
            }
        }
    }

    Ok(())
}

struct FileLineFormatter;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for FileLineFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        write!(writer, "[")?;
        LocalTimeFormatter.format_time(&mut writer)?;
        write!(writer, "] [{:5}] ", metadata.level())?;

        if let Some(file) = metadata.file() {
            write!(writer, "{}:{} ", file, metadata.line().unwrap_or(0))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_file_subscriber(log_path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let default_level = get_default_log_level();
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level.to_string().to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .event_format(FileLineFormatter);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    tracing::info!("--- Logger Initialized ---");

    Ok(())
}

/// Session log file under the XDG cache home, rotated by count and age.
pub fn init_session_logger(config: &LoggingConfig) -> Result<(), ConfigError> {
    let cache_home = xdg::BaseDirectories::with_prefix("cref")
        .get_cache_home()
        .ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not find cache home directory",
            ))
        })?;
    let logs_dir = cache_home.join("logs");

    rotate_logs(&logs_dir, config)?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let filename = format!("{}{}_{}.log", LOG_PREFIX, timestamp, std::process::id());
    init_file_subscriber(&logs_dir.join(filename))
}

pub fn init_stderr_logger() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(get_default_log_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_timer(LocalTimeFormatter)
        .with_ansi(true)
        .with_target(false)
        .with_line_number(false)
        .with_file(false)
        .with_level(true)
        .init();
}
