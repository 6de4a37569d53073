use crate::chord::actor::RingHandle;
use crate::chord::types::{FileId, PeerId, RingSnapshot, RingState, Slot};
use crate::chord::workers::{run_ping_responder, run_ping_sender};
use crate::config::PeerConfig;
use crate::error::{CdhtError, NetworkError};
use crate::network::context::PeerContext;
use crate::network::control::{
    announce_departure, server::run_control_listener, submit_file_request, DepartureOutcome,
};
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

type PeerTask = (&'static str, JoinHandle<Result<(), CdhtError>>);

/// A running ring peer: the ring actor, the UDP ping socket, the TCP control
/// listener and one ping worker per successor.
pub struct RingPeer {
    ctx: PeerContext,
    tasks: Vec<PeerTask>,
}

impl RingPeer {
    /// Bind both sockets on `base_port + peer_id` and start every worker
    pub async fn start(config: PeerConfig) -> Result<Self, CdhtError> {
        config.validate()?;
        let addr = config.local_addr()?;

        let udp = UdpSocket::bind(addr).await.map_err(|source| bind_error(addr, source))?;
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|source| bind_error(addr, source))?;

        let state = RingState::new(
            config.peer_id,
            config.first_successor,
            config.second_successor,
        );
        let ring = RingHandle::spawn(state, config.key_space);
        let ctx = PeerContext::new(config, ring, Arc::new(udp));

        info!(
            "Peer {} is up on {} with successors {} and {}",
            ctx.self_id(),
            addr,
            ctx.config.first_successor,
            ctx.config.second_successor
        );

        let tasks = vec![
            spawn_task(&ctx, "ping responder", run_ping_responder(ctx.clone())),
            spawn_task(&ctx, "control listener", run_control_listener(ctx.clone(), tcp)),
            spawn_task(&ctx, "first successor pings", run_ping_sender(ctx.clone(), Slot::First)),
            spawn_task(&ctx, "second successor pings", run_ping_sender(ctx.clone(), Slot::Second)),
        ];

        Ok(Self { ctx, tasks })
    }

    pub fn id(&self) -> PeerId {
        self.ctx.self_id()
    }

    pub async fn submit_file_request(&self, file: FileId) -> Result<(), CdhtError> {
        submit_file_request(&self.ctx, file).await
    }

    /// Hand this peer's place to its predecessors, then stop
    pub async fn initiate_graceful_quit(&self) -> Result<DepartureOutcome, CdhtError> {
        announce_departure(&self.ctx).await
    }

    pub async fn debug_dump_state(&self) -> Result<RingSnapshot, CdhtError> {
        Ok(self.ctx.ring.snapshot().await?)
    }

    /// Stop without telling anyone, as if the process had been killed
    pub fn shutdown(&self) {
        self.ctx.abort.cancel();
    }

    /// Cancelled once the peer's workers are stopping, gracefully or not
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    /// Cancelling this stops the peer at once, abandoning running transfers
    pub fn abort_token(&self) -> CancellationToken {
        self.ctx.abort.clone()
    }

    /// Wait for the peer to stop and return the first error any worker hit.
    ///
    /// Transfers still running after a graceful quit get one receive idle
    /// timeout to finish before they are abandoned.
    pub async fn wait(self) -> Result<(), CdhtError> {
        self.ctx.shutdown.cancelled().await;

        let in_flight = &self.ctx.transfers_in_flight;
        in_flight.close();
        if !in_flight.is_empty() {
            info!("Waiting for {} transfers to finish", in_flight.len());
        }
        let drain = self.ctx.config.timing.receive_idle_timeout();
        if timeout(drain, in_flight.wait()).await.is_err() {
            warn!("Transfers still running after {:?}, abandoning them", drain);
        }
        self.ctx.abort.cancel();
        in_flight.wait().await;

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let mut first_error = None;
        for (name, joined) in names.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(Ok(())) => debug!("{} finished", name),
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => error!("{} panicked: {}", name, e),
            }
        }
        info!("Peer {} stopped", self.ctx.self_id());
        first_error.map_or(Ok(()), Err)
    }
}

fn bind_error(addr: SocketAddr, source: std::io::Error) -> NetworkError {
    NetworkError::Bind {
        addr: addr.to_string(),
        source,
    }
}

/// Any worker failing takes the whole peer down
fn spawn_task<F>(ctx: &PeerContext, name: &'static str, task: F) -> PeerTask
where
    F: Future<Output = Result<(), CdhtError>> + Send + 'static,
{
    let abort = ctx.abort.clone();
    let handle = tokio::spawn(async move {
        let result = task.await;
        if let Err(e) = &result {
            error!("{} failed: {}", name, e);
            abort.cancel();
        }
        result
    });
    (name, handle)
}
