use crate::chord::types::PeerId;
use crate::config::PeerConfig;
use crate::error::NetworkError;
use crate::network::messages::Message;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Opens one TCP connection per control message
#[derive(Clone, Debug)]
pub struct ControlClient {
    config: Arc<PeerConfig>,
    timeout: Duration,
}

impl ControlClient {
    pub fn new(config: Arc<PeerConfig>) -> Self {
        let timeout = config.timing.control_timeout();
        Self { config, timeout }
    }

    /// Deliver `message` to `peer` and close the connection
    pub async fn send(&self, peer: PeerId, message: &Message) -> Result<(), NetworkError> {
        let addr = self
            .config
            .addr_of(peer)
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        let delivery = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.write_all(message.to_line().as_bytes()).await?;
            stream.shutdown().await
        };

        match tokio::time::timeout(self.timeout, delivery).await {
            Ok(Ok(())) => {
                debug!("Sent `{}` to peer {}", message, peer);
                Ok(())
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                Err(NetworkError::PeerUnreachable(peer))
            }
            Ok(Err(e)) => Err(NetworkError::ConnectionFailed(format!(
                "sending {} to peer {}: {}",
                message.kind(),
                peer,
                e
            ))),
            Err(_) => Err(NetworkError::Timeout(format!(
                "sending {} to peer {}",
                message.kind(),
                peer
            ))),
        }
    }
}
