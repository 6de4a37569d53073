use crate::chord::types::{FileId, PeerId};
use crate::error::{CdhtError, NetworkError};
use crate::network::context::PeerContext;
use crate::network::messages::Message;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Accept control connections until the peer shuts down. Each connection
/// carries exactly one newline-terminated message and is handled to
/// completion before the next is accepted.
pub async fn run_control_listener(ctx: PeerContext, listener: TcpListener) -> Result<(), CdhtError> {
    info!(
        "Control listener for peer {} on {}",
        ctx.self_id(),
        listener.local_addr().map_err(NetworkError::from)?
    );
    loop {
        let (stream, from) = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept control connection: {}", e);
                    continue;
                }
            },
        };

        let Some(message) = read_message(&ctx, stream, from).await else {
            continue;
        };
        debug!("Control message from {}: {}", from, message);

        if let Err(e) = handle_message(&ctx, message).await {
            if e.is_invariant_violation() {
                error!("Stopping peer {}: {}", ctx.self_id(), e);
                ctx.abort.cancel();
                return Err(e);
            }
            warn!("Failed to handle `{}`: {}", message, e);
        }
    }
    debug!("Control listener for peer {} stopped", ctx.self_id());
    Ok(())
}

async fn read_message(ctx: &PeerContext, stream: TcpStream, from: SocketAddr) -> Option<Message> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let timeout = ctx.config.timing.control_timeout();
    match tokio::time::timeout(timeout, reader.read_line(&mut line)).await {
        Ok(Ok(0)) => {
            debug!("Empty control connection from {}", from);
            None
        }
        Ok(Ok(_)) => match Message::from_bytes(line.as_bytes()) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Dropping malformed control message from {}: {}", from, e);
                None
            }
        },
        Ok(Err(e)) => {
            warn!("Failed to read control message from {}: {}", from, e);
            None
        }
        Err(_) => {
            warn!("Control connection from {} sent nothing for {:?}", from, timeout);
            None
        }
    }
}

async fn handle_message(ctx: &PeerContext, message: Message) -> Result<(), CdhtError> {
    match message {
        Message::FileRequest {
            requester,
            file,
            has_file: true,
            query: true,
        } => serve_file(ctx, requester, file).await,
        Message::FileRequest {
            requester,
            file,
            has_file: false,
            query: true,
        } => forward_file_request(ctx, requester, file).await,
        Message::FileRequest {
            requester: owner,
            file,
            query: false,
            ..
        } => {
            info!(
                "Received a response message from peer {}, which has the file {}",
                owner, file
            );
            info!("We now start receiving the file ...");
            ctx.start_download(file, owner);
            Ok(())
        }
        Message::GracefulQuit {
            departing,
            first_successor,
            second_successor,
            query: true,
        } => {
            info!("Peer {} will depart from the network", departing);
            ctx.ring
                .set_successors(first_successor, second_successor)
                .await?;
            let ack = Message::GracefulQuit {
                departing: ctx.self_id(),
                first_successor,
                second_successor,
                query: false,
            };
            ctx.control.send(departing, &ack).await?;
            Ok(())
        }
        Message::GracefulQuit {
            departing: acker,
            query: false,
            ..
        } => {
            ctx.departure.record_ack(acker)?;
            Ok(())
        }
        Message::DeadPeerRepair {
            sender,
            query: true,
            ..
        } => {
            let snapshot = ctx.ring.snapshot().await?;
            let reply = Message::DeadPeerRepair {
                sender: ctx.self_id(),
                query: false,
                successor: Some(snapshot.first_successor),
            };
            ctx.control.send(sender, &reply).await?;
            Ok(())
        }
        Message::DeadPeerRepair {
            sender,
            query: false,
            successor: Some(successor),
        } => {
            debug!("Peer {} reports its first successor is {}", sender, successor);
            ctx.ring.install_second_successor(successor).await?;
            Ok(())
        }
        Message::DeadPeerRepair {
            sender,
            query: false,
            successor: None,
        } => {
            warn!("Repair response from peer {} carries no successor", sender);
            Ok(())
        }
        Message::Ping { sender, .. } => {
            warn!("Ping from peer {} arrived on the control channel, ignoring", sender);
            Ok(())
        }
    }
}

/// This peer owns `file`: tell the requester and start sending
async fn serve_file(ctx: &PeerContext, requester: PeerId, file: FileId) -> Result<(), CdhtError> {
    if requester == ctx.self_id() {
        info!("File {} is stored locally at peer {}", file, requester);
        return Ok(());
    }
    info!("File {} is here.", file);
    let content = match ctx.store.read(file).await {
        Ok(content) => content,
        Err(e) => {
            error!("Cannot serve file {} to peer {}: {}", file, requester, e);
            return Ok(());
        }
    };
    let response = Message::FileRequest {
        requester: ctx.self_id(),
        file,
        has_file: true,
        query: false,
    };
    ctx.control.send(requester, &response).await?;
    info!(
        "A response message, destined for peer {}, has been sent.",
        requester
    );
    info!("We now start sending the file ...");
    ctx.spawn_upload(file, requester, content);
    Ok(())
}

async fn forward_file_request(
    ctx: &PeerContext,
    requester: PeerId,
    file: FileId,
) -> Result<(), CdhtError> {
    info!("File {} is not stored here.", file);
    let decision = ctx.ring.route(file).await?;
    let forward = Message::FileRequest {
        requester,
        file,
        has_file: decision.successor_has_file(),
        query: true,
    };
    ctx.control.send(decision.next_hop(), &forward).await?;
    info!("File request message has been forwarded to my successor.");
    Ok(())
}
