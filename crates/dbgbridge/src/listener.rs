//! TCP listener for debug engines
//!
//! Engines connect out to the bridge. Every accepted stream is wrapped in a
//! [`FramedConnection`] and attached to the multiplexer under a fresh
//! session id; from then on the multiplexer owns it.

use std::net::SocketAddr;
use std::sync::Arc;

use dbgbridge_native::{FramedConnection, JsonPacketDecoder, PacketDecoder};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::multiplexer::ConnectionMultiplexer;

/// Accepts engine connections and hands them to the multiplexer
pub struct NativeListener {
    listener: TcpListener,
    multiplexer: ConnectionMultiplexer,
    decoder: Arc<dyn PacketDecoder>,
}

impl std::fmt::Debug for NativeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeListener")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

impl NativeListener {
    /// Bind `bind_address:port` from `config`, decoding payloads as JSON
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the address cannot be bound.
    pub async fn bind(config: &ConnectionConfig, multiplexer: ConnectionMultiplexer) -> BridgeResult<Self> {
        Self::bind_with_decoder(config, multiplexer, Arc::new(JsonPacketDecoder)).await
    }

    /// Bind with a custom payload decoder
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the address cannot be bound.
    pub async fn bind_with_decoder(
        config: &ConnectionConfig,
        multiplexer: ConnectionMultiplexer,
        decoder: Arc<dyn PacketDecoder>,
    ) -> BridgeResult<Self> {
        let addr = format!("{}:{}", config.bind_address, config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            error!(address = %addr, error = %e, "failed to bind engine listener");
            BridgeError::Io(e)
        })?;
        info!(address = ?listener.local_addr().ok(), "listening for debug engines");
        Ok(Self {
            listener,
            multiplexer,
            decoder,
        })
    }

    /// Address actually bound; useful with port 0
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if the socket has no local address.
    pub fn local_addr(&self) -> BridgeResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept engines until the multiplexer is disposed
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if accepting fails.
    pub async fn run(self) -> BridgeResult<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            if self.multiplexer.is_disposed() {
                debug!(%peer, "multiplexer disposed, listener stopping");
                return Ok(());
            }
            debug!(%peer, "engine connected");
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "could not set TCP_NODELAY");
            }

            let connection = FramedConnection::new(stream, Arc::clone(&self.decoder))
                .with_endpoint(peer.to_string());
            match self.multiplexer.attach(Arc::new(connection)).await {
                Ok(session_id) => info!(%peer, session = %session_id, "engine attached"),
                // dropping the connection closes the socket
                Err(err) => warn!(%peer, error = %err, "engine refused"),
            }
        }
    }

    /// Run the accept loop on its own task
    pub fn spawn(self) -> JoinHandle<BridgeResult<()>> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::BridgeMetrics;
    use crate::multiplexer::{MultiplexerConfig, SessionEvent};
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            port: 0,
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_accepted_engine_becomes_session() {
        let multiplexer =
            ConnectionMultiplexer::new(MultiplexerConfig::default(), Arc::new(BridgeMetrics::new()));
        let mut events = multiplexer.subscribe();
        let listener = NativeListener::bind(&config(), multiplexer.clone()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = listener.spawn();

        let mut engine = tokio::net::TcpStream::connect(addr).await.unwrap();
        let init = br#"{"name":"init","attributes":{"fileuri":"file:///index.php","idekey":"dev"}}"#;
        engine
            .write_all(format!("{}\0", init.len()).as_bytes())
            .await
            .unwrap();
        engine.write_all(init).await.unwrap();
        engine.write_all(b"\0").await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        let SessionEvent::Started { init, .. } = event else {
            panic!("expected Started, got {event:?}");
        };
        assert_eq!(init.fileuri, "file:///index.php");
        assert_eq!(multiplexer.sessions().await.len(), 1);

        multiplexer.dispose().await;
        accept.abort();
    }
}
