use crate::chord::types::{FileId, PeerId};
use crate::error::TransferError;
use crate::network::transfer::{
    segment::{Ack, Segment},
    LossModel, Role, TransferConfig, TransferEvent, TransferSession, ACK_BUFFER_LEN,
};
use crate::network::transport::DatagramChannel;
use bytes::Bytes;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of a completed send
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub segments: u64,
    pub retransmissions: u64,
    pub dropped: u64,
}

/// Push `content` to `target` one segment at a time.
///
/// Returns once the end-of-file segment is acknowledged. There is no overall
/// deadline: a counterpart that never answers keeps the sender retransmitting.
pub async fn send_file<C: DatagramChannel + ?Sized>(
    channel: &C,
    target: SocketAddr,
    file: FileId,
    counterpart: PeerId,
    content: Bytes,
    config: &TransferConfig,
    loss: &mut LossModel,
) -> Result<TransferReport, TransferError> {
    let mut session = TransferSession::new(file, counterpart, Role::Responding);
    let mut report = TransferReport::default();
    let total = content.len() as u64;
    let mss = config.mss.max(1) as u64;

    info!(
        "Sending file {} ({} bytes) to peer {} at {}",
        file, total, counterpart, target
    );

    let mut in_flight: Option<(Segment, Bytes)> = None;
    let mut attempts_for_segment: u64 = 0;

    loop {
        let (segment, wire) = match (session.retransmit_pending, in_flight.take()) {
            (true, Some(pending)) => {
                report.retransmissions += 1;
                attempts_for_segment += 1;
                session.log_event(
                    TransferEvent::Retransmit,
                    pending.0.header.cursor,
                    pending.0.header.len,
                    0,
                );
                pending
            }
            _ => {
                let start = session.cursor;
                let end = (start + mss).min(total);
                let eof = end == total;
                let segment = Segment::new(end, content.slice(start as usize..end as usize), eof);
                let wire = segment.encode(config.header_len)?;
                session.cursor = end;
                session.eof_reached = eof;
                report.segments += 1;
                attempts_for_segment = 0;
                (segment, wire)
            }
        };
        let header = segment.header;

        if loss.should_drop() {
            report.dropped += 1;
            session.log_event(TransferEvent::Drop, header.cursor, header.len, 0);
        } else {
            match channel.send_to(&wire, target).await {
                Ok(_) => session.log_event(TransferEvent::Send, header.cursor, header.len, 0),
                Err(e) => warn!("Failed to send segment {} to {}: {}", header.cursor, target, e),
            }
        }

        if wait_for_ack(channel, target, header.cursor, config.ack_timeout).await {
            session.retransmit_pending = false;
            session.log_event(TransferEvent::Receive, 0, header.len, header.cursor);
            if header.eof {
                break;
            }
        } else {
            session.retransmit_pending = true;
            if attempts_for_segment > 0 && attempts_for_segment % 10 == 0 {
                warn!(
                    "Segment {} of file {} still unacknowledged after {} retransmissions",
                    header.cursor, file, attempts_for_segment
                );
            }
            in_flight = Some((segment, wire));
        }
    }

    report.bytes = total;
    info!(
        "Transfer of file {} to peer {} complete: {} bytes in {} segments, {} retransmitted, {} dropped",
        file, counterpart, report.bytes, report.segments, report.retransmissions, report.dropped
    );
    Ok(report)
}

/// Wait up to `timeout` for an ACK of `expected` from `target`.
///
/// Any other datagram, including ACKs for other cursors, is discarded and the
/// wait continues against the same deadline.
async fn wait_for_ack<C: DatagramChannel + ?Sized>(
    channel: &C,
    target: SocketAddr,
    expected: u64,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; ACK_BUFFER_LEN];

    loop {
        match tokio::time::timeout_at(deadline, channel.recv_from(&mut buf)).await {
            Err(_) => return false,
            Ok(Err(e)) => {
                warn!("Receiving acknowledgement failed: {}", e);
                tokio::time::sleep_until(deadline).await;
                return false;
            }
            Ok(Ok((n, from))) => {
                if from != target {
                    debug!("Ignoring datagram from {} while waiting on {}", from, target);
                    continue;
                }
                match Ack::decode(&buf[..n]) {
                    Some(ack) if ack.cursor == expected => return true,
                    Some(ack) => debug!(
                        "Discarding stale ACK {} while waiting for {}",
                        ack.cursor, expected
                    ),
                    None => debug!("Discarding non-ACK datagram from {}", from),
                }
            }
        }
    }
}
