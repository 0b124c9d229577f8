//! STDIO frontend
//!
//! Reads newline-delimited client commands and writes replies and events one
//! JSON object per line. Logs go to stderr so stdout stays a clean protocol
//! channel. Each command runs on its own task; output order is the order in
//! which the callback produced messages.

use std::sync::Arc;

use dbgbridge_protocol::OutboundMessage;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::callback::ClientCallback;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::listener::NativeListener;
use crate::translator::MessageTranslator;

/// Maximum command size in bytes (10 MB)
const MAX_LINE_SIZE: usize = 10 * 1024 * 1024;

/// STDIO frontend configuration
#[derive(Debug, Clone)]
pub struct StdioFrontendConfig {
    /// Flush after every message (default: true)
    pub flush_after_message: bool,
    /// Lines longer than this are dropped
    pub max_line_size: usize,
    /// Stop reading once the primary engine session ends (default: false)
    pub exit_on_session_end: bool,
}

impl Default for StdioFrontendConfig {
    fn default() -> Self {
        Self {
            flush_after_message: true,
            max_line_size: MAX_LINE_SIZE,
            exit_on_session_end: false,
        }
    }
}

/// Line-oriented client transport over any async reader and writer
pub struct StdioFrontend {
    translator: Arc<MessageTranslator>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    config: StdioFrontendConfig,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for StdioFrontend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioFrontend")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StdioFrontend {
    /// Frontend writing what arrives on `outbound`, which must be the
    /// receiving end of the translator's callback channel
    pub fn new(
        translator: Arc<MessageTranslator>,
        outbound: mpsc::UnboundedReceiver<OutboundMessage>,
        config: StdioFrontendConfig,
    ) -> Self {
        let shutdown = Arc::new(Notify::new());
        if config.exit_on_session_end {
            let shutdown = Arc::clone(&shutdown);
            translator.on_session_end(move || shutdown.notify_one());
        }
        Self {
            translator,
            outbound,
            config,
            shutdown,
        }
    }

    /// The translator commands are fed into
    pub fn translator(&self) -> &Arc<MessageTranslator> {
        &self.translator
    }

    /// Run until `reader` hits EOF (or the primary session ends, if so
    /// configured), then dispose the translator and flush what is left
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if reading or writing fails.
    pub async fn run<R, W>(self, mut reader: R, writer: W) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            translator,
            outbound,
            config,
            shutdown,
        } = self;
        debug!("starting STDIO frontend");

        let (stop_tx, stop_rx) = oneshot::channel();
        let writer_task = tokio::spawn(write_loop(
            outbound,
            writer,
            stop_rx,
            config.flush_after_message,
        ));

        let mut line = String::new();
        let read_result = loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read,
                () = shutdown.notified() => {
                    info!("primary session ended, closing client channel");
                    break Ok(());
                }
            };
            match read {
                Ok(0) => {
                    debug!("STDIO frontend received EOF");
                    break Ok(());
                }
                Ok(n) if n > config.max_line_size => {
                    error!(bytes = n, limit = config.max_line_size, "command exceeds maximum size, dropped");
                }
                Ok(_) => {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    trace!(command, "received");
                    translator.spawn_command(command.to_string());
                }
                Err(e) => {
                    error!(error = %e, "error reading client input");
                    break Err(BridgeError::Io(e));
                }
            }
        };

        translator.dispose().await;
        let _ = stop_tx.send(());
        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "error writing client output");
                return Err(BridgeError::Io(e));
            }
            Err(e) => warn!(error = %e, "writer task ended abnormally"),
        }
        debug!("STDIO frontend stopped");
        read_result
    }
}

async fn write_loop<W>(
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    mut writer: W,
    mut stop: oneshot::Receiver<()>,
    flush: bool,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => write_message(&mut writer, &message, flush).await?,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(message) = outbound.try_recv() {
                    write_message(&mut writer, &message, flush).await?;
                }
                break;
            }
        }
    }
    writer.flush().await
}

async fn write_message<W>(writer: &mut W, message: &OutboundMessage, flush: bool) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = match message.to_json() {
        Ok(line) => line,
        Err(e) => {
            error!(id = ?message.id(), error = %e, "failed to serialize outbound message");
            return Ok(());
        }
    };
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    if flush {
        writer.flush().await?;
    }
    Ok(())
}

/// Serve one client on stdin/stdout and accept engines on the configured
/// address until stdin closes
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the engine listener
/// cannot bind, or client IO fails.
pub async fn run_stdio(config: BridgeConfig) -> BridgeResult<()> {
    config.connection.validate()?;

    let (callback, outbound) = ClientCallback::channel();
    let translator = Arc::new(MessageTranslator::new(
        config.connection.clone(),
        Arc::new(callback),
    ));
    let listener = NativeListener::bind(&config.connection, translator.multiplexer().clone()).await?;
    let accept = listener.spawn();

    let frontend = StdioFrontend::new(translator, outbound, StdioFrontendConfig::default());
    let result = frontend
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;
    accept.abort();
    result
}
