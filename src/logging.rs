//! Logger setup for applications embedding the client.
//!
//! The client itself only talks to the `log` facade; this installs an
//! `env_logger` backend with a timestamped format. With a log directory
//! configured, every line also goes to a daily rotated file.

use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::debug;
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Setting this variable (to anything) lowers the default level to `debug`.
pub const DEBUG_LOG_ENV: &str = "DEBUG_LOG";

/// Rotated files kept besides the active one are pruned past this count.
pub const MAX_LOG_FILES: usize = 7;

const LOG_FILE_PREFIX: &str = "transport";

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub debug: bool,
    /// Also write to `transport.<date>.log` files in this directory.
    pub log_dir: Option<PathBuf>,
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self {
            debug: std::env::var_os(DEBUG_LOG_ENV).is_some(),
            log_dir: None,
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Filter used when `RUST_LOG` is not set.
    pub fn default_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

/// Installs the global logger. A logger that is already installed is kept.
pub fn init(config: &LogConfig) -> Result<()> {
    if let Err(e) = builder(config)?.try_init() {
        debug!("Keeping the logger that is already installed: {}", e);
    }
    Ok(())
}

/// Renders a message with structured data appended as JSON.
pub fn with_data(message: &str, data: &Value) -> String {
    format!("{} | data={}", message, data)
}

/// Writes each line to stderr and to the rotating file.
struct ConsoleAndFile {
    file: RollingFileAppender,
}

impl Write for ConsoleAndFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

fn builder(config: &LogConfig) -> Result<Builder> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(config.default_filter()));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}: {}",
            buf.timestamp_seconds(),
            record.level(),
            record.target(),
            record.args()
        )
    });

    if let Some(dir) = &config.log_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;
        let file = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .max_log_files(MAX_LOG_FILES)
            .build(dir)
            .with_context(|| format!("Failed to open log file in {:?}", dir))?;
        builder.target(Target::Pipe(Box::new(ConsoleAndFile { file })));
    }

    Ok(builder)
}
