use crate::chord::actor::RingHandle;
use crate::chord::types::{FileId, PeerId};
use crate::config::PeerConfig;
use crate::error::TransferError;
use crate::network::control::{client::ControlClient, departure::DepartureTracker};
use crate::network::transfer::{
    receive_file, send_file, LossModel, TransferConfig, TransferRegistry,
};
use crate::network::transport::RoutedChannel;
use crate::storage::FileStore;
use bytes::Bytes;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Everything the peer's tasks share. Cheap to clone.
#[derive(Clone)]
pub struct PeerContext {
    pub config: Arc<PeerConfig>,
    pub ring: RingHandle,
    pub control: ControlClient,
    /// The peer's well-known UDP socket: ping responder and transfer inbox
    pub udp: Arc<UdpSocket>,
    pub transfers: TransferRegistry,
    pub store: FileStore,
    pub departure: DepartureTracker,
    /// Cancelled when the peer must stop at once, running transfers included
    pub abort: CancellationToken,
    /// Child of `abort`; stops the ping senders and the control listener
    pub shutdown: CancellationToken,
    /// Child of `shutdown`; cancelled alone when a graceful quit begins
    pub pinging: CancellationToken,
    /// Running uploads and downloads
    pub transfers_in_flight: TaskTracker,
}

impl PeerContext {
    pub fn new(config: PeerConfig, ring: RingHandle, udp: Arc<UdpSocket>) -> Self {
        let config = Arc::new(config);
        let abort = CancellationToken::new();
        let shutdown = abort.child_token();
        let pinging = shutdown.child_token();
        Self {
            control: ControlClient::new(config.clone()),
            store: FileStore::new(config.data_dir.clone()),
            transfers: TransferRegistry::new(config.timing.header_len),
            config,
            ring,
            udp,
            departure: DepartureTracker::new(),
            abort,
            shutdown,
            pinging,
            transfers_in_flight: TaskTracker::new(),
        }
    }

    pub fn self_id(&self) -> PeerId {
        self.config.peer_id
    }

    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig::from_peer_config(&self.config)
    }

    /// Push `content` to `requester` from a fresh ephemeral socket.
    /// A graceful quit lets it finish; only an abort stops it early.
    pub fn spawn_upload(&self, file: FileId, requester: PeerId, content: Bytes) {
        let ctx = self.clone();
        self.transfers_in_flight.spawn(async move {
            let upload = ctx.upload(file, requester, content);
            tokio::select! {
                _ = ctx.abort.cancelled() => {
                    warn!("Stopping upload of file {} to peer {}", file, requester);
                }
                result = upload => match result {
                    Ok(report) => info!(
                        "The file {} is sent to peer {} ({} segments, {} retransmissions)",
                        file, requester, report.segments, report.retransmissions
                    ),
                    Err(e) => error!("Sending file {} to peer {} failed: {}", file, requester, e),
                },
            }
        });
    }

    async fn upload(
        &self,
        file: FileId,
        requester: PeerId,
        content: Bytes,
    ) -> Result<crate::network::transfer::TransferReport, TransferError> {
        let target = self
            .config
            .addr_of(requester)
            .map_err(|e| TransferError::Io(std::io::Error::other(e.to_string())))?;
        let socket = UdpSocket::bind(SocketAddr::new(self.config.host, 0)).await?;
        let mut loss = LossModel::new(self.config.drop_prob);
        send_file(
            &socket,
            target,
            file,
            requester,
            content,
            &self.transfer_config(),
            &mut loss,
        )
        .await
    }

    /// Receive `file` from `owner` into the data directory. The session is
    /// registered before this returns, so segments arriving from now on reach it.
    pub fn start_download(&self, file: FileId, owner: PeerId) {
        let inbound = self.transfers.register();
        let channel = RoutedChannel::new(self.udp.clone(), inbound);
        let ctx = self.clone();
        self.transfers_in_flight.spawn(async move {
            let download = async {
                let mut sink = ctx.store.create_received(file).await?;
                receive_file(&channel, &mut sink, file, owner, &ctx.transfer_config()).await
            };
            tokio::select! {
                _ = ctx.abort.cancelled() => {
                    warn!("Stopping download of file {} from peer {}", file, owner);
                }
                result = download => match result {
                    Ok(report) => info!(
                        "Stored file {} as {} ({} bytes, {} duplicate segments)",
                        file,
                        ctx.store.received_path(file).display(),
                        report.bytes,
                        report.duplicates
                    ),
                    Err(e) => error!("Receiving file {} from peer {} failed: {}", file, owner, e),
                },
            }
        });
    }
}
