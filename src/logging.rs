//! # Logging Setup
//!
//! Installs `env_logger` backends behind the `log` facade according to the
//! logging section of the configuration: one for the console and, if
//! enabled, one appending to a file. Each has its own level and line format.
//! `RUST_LOG` overrides the configured levels.
//!
//! ```rust,no_run
//! use smartmeter_rs::config::LoggingConfig;
//! use smartmeter_rs::logging::init_logger;
//!
//! init_logger(&LoggingConfig::default()).expect("Failed to initialize logging");
//! log::info!("System initialized");
//! ```

use crate::config::{parse_level, LogFormat, LoggingConfig};
use crate::error::MeterError;
use env_logger::{Builder, Env, Target, WriteStyle};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::io::Write;

/// Timestamp layout of `text` and `json` lines
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// Fans records out to the console and file loggers.
struct CombinedLogger {
    loggers: Vec<env_logger::Logger>,
}

impl Log for CombinedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.loggers.iter().any(|logger| logger.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        for logger in &self.loggers {
            logger.log(record);
        }
    }

    fn flush(&self) {
        for logger in &self.loggers {
            logger.flush();
        }
    }
}

/// Install the global logger. Fails if a logger is already installed.
pub fn init_logger(config: &LoggingConfig) -> Result<(), MeterError> {
    let mut loggers = Vec::new();

    if config.console.enabled {
        let level = parse_level(&config.console.level).unwrap_or(LevelFilter::Info);
        let mut builder = builder(config.console.format, level);
        builder.target(Target::Stdout);
        loggers.push(builder.build());
    }

    if config.file.enabled && !config.file.path.is_empty() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file.path)
            .map_err(|e| MeterError::Logging(format!("cannot open {}: {}", config.file.path, e)))?;
        let level = parse_level(&config.file.level).unwrap_or(LevelFilter::Info);
        let mut builder = builder(config.file.format, level);
        builder
            .target(Target::Pipe(Box::new(file)))
            .write_style(WriteStyle::Never);
        loggers.push(builder.build());
    }

    let max_level = loggers
        .iter()
        .map(|logger| logger.filter())
        .max()
        .unwrap_or(LevelFilter::Off);

    log::set_boxed_logger(Box::new(CombinedLogger { loggers }))
        .map_err(|e| MeterError::Logging(e.to_string()))?;
    log::set_max_level(max_level);

    if config.loki.enabled {
        log::warn!(
            "Loki log shipping is not supported, logging.loki ({}) is ignored",
            config.loki.url
        );
    }
    Ok(())
}

fn builder(format: LogFormat, level: LevelFilter) -> Builder {
    let mut builder = Builder::new();
    builder
        .filter_level(level)
        .parse_env(Env::default())
        .format(move |buf, record| {
            let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
            writeln!(buf, "{}", format_record(format, record, &timestamp))
        });
    builder
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Render one record; errors carry their source location.
pub fn format_record(format: LogFormat, record: &Record, timestamp: &str) -> String {
    let location = (record.level() == Level::Error).then(|| {
        (
            record.file().unwrap_or("<unknown>"),
            record.line().unwrap_or_default(),
        )
    });

    match format {
        LogFormat::Raw => match location {
            Some((file, line)) => format!("{} ({}:{})", record.args(), file, line),
            None => record.args().to_string(),
        },
        LogFormat::Text => {
            let suffix = location
                .map(|(file, line)| format!(" ({}:{})", file, line))
                .unwrap_or_default();
            format!(
                "{} - {} - {} - {}{}",
                timestamp,
                record.target(),
                level_name(record.level()),
                record.args(),
                suffix
            )
        }
        LogFormat::Json => {
            let mut line = serde_json::json!({
                "timestamp": timestamp,
                "name": record.target(),
                "level": level_name(record.level()),
                "message": record.args().to_string(),
            });
            if let Some((file, line_no)) = location {
                line["file"] = file.into();
                line["line"] = line_no.into();
            }
            line.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2024-03-15 12:34:05,120";

    fn render(format: LogFormat, level: Level) -> String {
        format_record(
            format,
            &Record::builder()
                .args(format_args!("Daten ok"))
                .level(level)
                .target("smartmeter_rs::meter_reader")
                .file(Some("src/meter_reader.rs"))
                .line(Some(42))
                .build(),
            TS,
        )
    }

    #[test]
    fn test_raw_format() {
        assert_eq!(render(LogFormat::Raw, Level::Info), "Daten ok");
        assert_eq!(
            render(LogFormat::Raw, Level::Error),
            "Daten ok (src/meter_reader.rs:42)"
        );
    }

    #[test]
    fn test_text_format() {
        assert_eq!(
            render(LogFormat::Text, Level::Warn),
            "2024-03-15 12:34:05,120 - smartmeter_rs::meter_reader - WARNING - Daten ok"
        );
    }

    #[test]
    fn test_json_format() {
        let info: serde_json::Value = serde_json::from_str(&render(LogFormat::Json, Level::Info)).unwrap();
        assert_eq!(info["level"], "INFO");
        assert_eq!(info["message"], "Daten ok");
        assert!(info.get("file").is_none());

        let error: serde_json::Value = serde_json::from_str(&render(LogFormat::Json, Level::Error)).unwrap();
        assert_eq!(error["file"], "src/meter_reader.rs");
        assert_eq!(error["line"], 42);
    }
}
