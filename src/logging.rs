//! Log sink configuration.
//!
//! Events are structured (scalar fields) and emitted as JSON. Logging is
//! off unless asked for: a log level enables it, and a log file alone
//! implies `info`.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Wire the global subscriber. Call once, before any events.
pub fn init(level: Option<&str>, log_file: Option<&Path>) -> io::Result<()> {
    let directive = match (level, log_file) {
        (Some(level), _) => match level {
            "debug" | "info" | "warn" | "error" => level,
            _ => "info",
        },
        (None, Some(_)) => "info",
        (None, None) => "off",
    };
    let filter = EnvFilter::new(directive);
    let stderr_layer = fmt::layer().json().with_writer(io::stderr);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let file_layer = fmt::layer().json().with_writer(Mutex::new(file));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
        }
    }
    Ok(())
}
