use crate::chord::types::{PeerId, Slot};
use crate::error::{CdhtError, NetworkError};
use crate::network::context::PeerContext;
use crate::network::control::request_successor_repair;
use crate::network::messages::{parse_ping_reply, ping_reply, Message};
use crate::network::transfer::{Segment, MAX_DATAGRAM};
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{sleep, Instant};

const PING_REPLY_BUFFER: usize = 64;

/// Serve the peer's well-known UDP socket: answer pings and hand transfer
/// segments to whichever download is waiting for them.
///
/// Once the peer is leaving, pings go unanswered but segments keep flowing
/// until the last download is done and the peer is finally torn down.
pub async fn run_ping_responder(ctx: PeerContext) -> Result<(), CdhtError> {
    info!("Starting ping responder for peer {}", ctx.self_id());
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let (n, from) = tokio::select! {
            _ = ctx.abort.cancelled() => break,
            received = ctx.udp.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    // ICMP unreachable from an earlier send surfaces here on some platforms
                    debug!("UDP receive error: {}", e);
                    continue;
                }
            },
        };
        let datagram = &buf[..n];

        if Segment::is_segment(datagram) {
            if !ctx.transfers.dispatch(Bytes::copy_from_slice(datagram), from) {
                debug!("Segment from {} with no download waiting, dropping", from);
            }
            continue;
        }

        match Message::from_bytes(datagram) {
            Ok(Message::Ping { sender, .. }) if ctx.shutdown.is_cancelled() => {
                debug!("Leaving the ring, not answering ping from peer {}", sender);
            }
            Ok(Message::Ping { sender, slot }) => {
                info!("A ping request message was received from Peer {}", sender);
                ctx.ring.learn_predecessor(sender, slot).await?;
                if let Err(e) = ctx
                    .udp
                    .send_to(ping_reply(ctx.self_id()).as_bytes(), from)
                    .await
                {
                    warn!("Failed to answer ping from peer {}: {}", sender, e);
                }
            }
            Ok(other) => debug!("Unexpected `{}` on the ping socket from {}", other, from),
            Err(e) => debug!("Dropping malformed datagram from {}: {}", from, e),
        }
    }

    debug!("Ping responder for peer {} stopped", ctx.self_id());
    Ok(())
}

/// Ping the successor in `slot` every ping interval and repair the ring once
/// it misses `max_fails` replies in a row.
pub async fn run_ping_sender(ctx: PeerContext, slot: Slot) -> Result<(), CdhtError> {
    info!("Starting {} successor ping worker", slot);
    let timing = ctx.config.timing.clone();
    let socket = UdpSocket::bind(SocketAddr::new(ctx.config.host, 0))
        .await
        .map_err(NetworkError::from)?;
    let ping = Message::Ping {
        sender: ctx.self_id(),
        slot,
    }
    .to_string();

    let mut watched: Option<PeerId> = None;
    let mut fails: u32 = 0;

    while !ctx.pinging.is_cancelled() {
        let snapshot = ctx.ring.snapshot().await?;
        let target = snapshot.successor(slot);
        if watched != Some(target) {
            watched = Some(target);
            fails = 0;
        }

        match ping_once(&ctx, &socket, &ping, target).await {
            Ok(true) => {
                fails = 0;
                if slot == Slot::First && snapshot.second_successor == target {
                    // an earlier repair request got no answer
                    debug!("Second successor still unknown, asking peer {} again", target);
                    if let Err(e) = request_successor_repair(&ctx, target).await {
                        warn!("Failed to ask peer {} for a new second successor: {}", target, e);
                    }
                }
            }
            Ok(false) => {
                fails += 1;
                debug!("Peer {} missed ping {}/{}", target, fails, timing.max_fails);
                if fails >= timing.max_fails {
                    fails = 0;
                    handle_dead_successor(&ctx, slot, target).await;
                }
            }
            Err(e) => error!("Cannot ping peer {}: {}", target, e),
        }

        tokio::select! {
            _ = ctx.pinging.cancelled() => break,
            _ = sleep(timing.ping_interval()) => {}
        }
    }

    debug!("{} successor ping worker stopped", slot);
    Ok(())
}

/// One ping round: true if `target` answered before the ping timeout
async fn ping_once(
    ctx: &PeerContext,
    socket: &UdpSocket,
    ping: &str,
    target: PeerId,
) -> Result<bool, CdhtError> {
    let addr = ctx.config.addr_of(target)?;
    info!("Sending ping request to Peer {}", target);
    if let Err(e) = socket.send_to(ping.as_bytes(), addr).await {
        debug!("Ping to {} not sent: {}", addr, e);
    }

    let deadline = Instant::now() + ctx.config.timing.ping_timeout();
    let mut buf = [0u8; PING_REPLY_BUFFER];
    loop {
        match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(false),
            Ok(Err(e)) => {
                // a refused port means nothing listens there, wait out the round
                debug!("Ping socket error while waiting on {}: {}", addr, e);
                tokio::time::sleep_until(deadline).await;
                return Ok(false);
            }
            Ok(Ok((_, from))) if from != addr => {
                debug!("Stale ping reply from {}", from);
            }
            Ok(Ok((n, _))) => {
                // any reply from the right address counts, even an unreadable one
                let responder = parse_ping_reply(&buf[..n]).unwrap_or(target);
                info!("A ping response message was received from Peer {}", responder);
                return Ok(true);
            }
        }
    }
}

/// React to `peer` missing too many pings in `slot`
pub async fn handle_dead_successor(ctx: &PeerContext, slot: Slot, peer: PeerId) {
    if slot == Slot::Second {
        // the first successor lost the same peer and repairs itself first
        tokio::select! {
            _ = ctx.pinging.cancelled() => return,
            _ = sleep(ctx.config.timing.repair_grace()) => {}
        }
    }

    let ask = match ctx.ring.successor_died(slot, peer).await {
        Ok(Some(ask)) => ask,
        Ok(None) => return,
        Err(e) => {
            error!("Ring state unavailable while repairing: {}", e);
            return;
        }
    };
    if let Err(e) = request_successor_repair(ctx, ask).await {
        warn!("Failed to ask peer {} for a new second successor: {}", ask, e);
    }
}
