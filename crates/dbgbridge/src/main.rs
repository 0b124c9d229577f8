//! dbgbridge CLI entry point
//!
//! Speaks the client protocol on stdin/stdout and listens for debug engines
//! on TCP.

#![warn(clippy::all)]

use std::path::PathBuf;

use clap::Parser;
use dbgbridge::{BridgeConfig, LoggingConfig, run_stdio};

/// dbgbridge - DevTools client to DBGp engine bridge
#[derive(Parser, Debug)]
#[command(name = "dbgbridge", version, about, author)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, value_name = "FILE", env = "DBGBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address the engine listener binds to
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Port the engine listener binds to
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Only accept engines announcing this IDE key
    #[arg(long, value_name = "KEY")]
    idekey: Option<String>,

    /// Stop on the first line of the program
    #[arg(long)]
    break_on_entry: bool,

    /// Enable verbose logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn into_config(self) -> dbgbridge::BridgeResult<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_file(path)?,
            None => BridgeConfig::default(),
        };
        if self.verbose {
            config.logging = LoggingConfig::verbose();
        } else if self.quiet {
            config.logging = LoggingConfig::quiet();
        }
        if let Some(bind) = self.bind {
            config.connection.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if self.idekey.is_some() {
            config.connection.idekey = self.idekey;
        }
        if self.break_on_entry {
            config.connection.break_on_entry = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    let _guard = match config.logging.init() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run_stdio(config).await {
        tracing::error!(error = %e, "dbgbridge stopped");
        std::process::exit(1);
    }
}
