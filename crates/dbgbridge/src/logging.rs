//! Logging initialization
//!
//! Logs never go to stdout: when the bridge is driven over stdio, stdout is
//! the client protocol channel.
//!
//! ```rust,no_run
//! use dbgbridge::LoggingConfig;
//!
//! // Stderr only, nothing to hold on to
//! LoggingConfig::quiet().init()?;
//!
//! // File logging buffers in the background; keep the guard alive
//! let _guard = LoggingConfig::file("/var/log/dbgbridge").init()?;
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogOutput, LogRotation, LoggingConfig};

/// Flushes buffered file logs when dropped
#[derive(Debug)]
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

impl LoggingConfig {
    /// Install the global tracing subscriber
    ///
    /// Returns a guard when file output is enabled; it must be held until
    /// shutdown or buffered lines are lost.
    ///
    /// # Errors
    ///
    /// Returns an error if file output is configured without a directory,
    /// the directory cannot be created, or a global subscriber is already set.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        let (writer, guards) = match self.output {
            LogOutput::None => return Ok(None),
            LogOutput::Stderr => (BoxMakeWriter::new(io::stderr), Vec::new()),
            LogOutput::File => {
                let (file, guard) = self.file_writer()?;
                (BoxMakeWriter::new(file), vec![guard])
            }
            LogOutput::Both => {
                let (file, file_guard) = self.file_writer()?;
                let (stderr, stderr_guard) = tracing_appender::non_blocking(io::stderr());
                (
                    BoxMakeWriter::new(file.and(stderr)),
                    vec![file_guard, stderr_guard],
                )
            }
        };

        let registry = tracing_subscriber::registry().with(filter);
        let installed = if self.structured {
            registry
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
        };
        installed.map_err(|e| io::Error::other(e.to_string()))?;

        Ok((!guards.is_empty()).then_some(LoggingGuard { _guards: guards }))
    }

    fn file_writer(&self) -> io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
        let dir = self.directory.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "file logging requires logging.directory",
            )
        })?;
        std::fs::create_dir_all(dir)?;

        let appender = match self.rotation {
            LogRotation::Hourly => tracing_appender::rolling::hourly(dir, &self.file_prefix),
            LogRotation::Daily => tracing_appender::rolling::daily(dir, &self.file_prefix),
            LogRotation::Never => tracing_appender::rolling::never(dir, &self.file_prefix),
        };
        Ok(tracing_appender::non_blocking(appender))
    }
}
