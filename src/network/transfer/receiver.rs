use crate::chord::types::{FileId, PeerId};
use crate::error::TransferError;
use crate::network::transfer::{
    segment::{Ack, Segment, SegmentHeader},
    Role, TransferConfig, TransferEvent, TransferSession, MAX_DATAGRAM,
};
use crate::network::transport::DatagramChannel;
use log::{debug, info, warn};
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Outcome of a completed receive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    pub bytes: u64,
    pub segments: u64,
    pub duplicates: u64,
}

/// What to do with an incoming segment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentFate {
    /// Next in sequence: append and acknowledge
    Apply,
    /// Already applied (our ACK was lost): acknowledge again, do not append
    Duplicate,
    /// Starts past what we hold; cannot happen with a well-behaved stop-and-wait sender
    Gap,
}

/// Sequencing state of the receiving side
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReceiverState {
    last_acked: Option<u64>,
}

impl ReceiverState {
    pub fn applied(&self) -> u64 {
        self.last_acked.unwrap_or(0)
    }

    pub fn classify(&self, header: &SegmentHeader) -> SegmentFate {
        match self.last_acked {
            Some(acked) if header.cursor <= acked => SegmentFate::Duplicate,
            _ if header.start() == self.applied() => SegmentFate::Apply,
            _ => SegmentFate::Gap,
        }
    }

    pub fn record(&mut self, header: &SegmentHeader) {
        self.last_acked = Some(header.cursor);
    }
}

/// Receive one file from whoever sends the opening segment on `channel`.
///
/// The sink is flushed and shut down as soon as the end-of-file segment is
/// applied; the receiver then lingers briefly so a retransmitted final
/// segment still gets its ACK.
pub async fn receive_file<C, W>(
    channel: &C,
    sink: &mut W,
    file: FileId,
    counterpart: PeerId,
    config: &TransferConfig,
) -> Result<ReceiveReport, TransferError>
where
    C: DatagramChannel + ?Sized,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut session = TransferSession::new(file, counterpart, Role::Requesting);
    let mut state = ReceiverState::default();
    let mut report = ReceiveReport::default();
    let mut source: Option<SocketAddr> = None;
    let mut linger_until: Option<Instant> = None;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let deadline = linger_until.unwrap_or_else(|| Instant::now() + config.idle_timeout);
        let (n, from) = match tokio::time::timeout_at(deadline, channel.recv_from(&mut buf)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                if linger_until.is_some() {
                    break;
                }
                return Err(TransferError::Io(e));
            }
            Err(_) if linger_until.is_some() => break,
            Err(_) => {
                warn!(
                    "No segment of file {} from peer {} for {:?}",
                    file, counterpart, config.idle_timeout
                );
                return Err(TransferError::Stalled(config.idle_timeout));
            }
        };

        if source.is_some_and(|bound| bound != from) {
            debug!("Ignoring datagram from {}, receiving from {:?}", from, source);
            continue;
        }

        let segment = match Segment::decode(&buf[..n], config.header_len) {
            Ok(segment) => segment,
            Err(e) => {
                warn!("Dropping malformed segment from {}: {}", from, e);
                continue;
            }
        };
        let header = segment.header;
        if source.is_none() && header.start() != 0 {
            debug!(
                "Segment {} from {} does not open a file, waiting for the first one",
                header.cursor, from
            );
            continue;
        }
        session.log_event(TransferEvent::Receive, header.cursor, header.len, 0);

        match state.classify(&header) {
            SegmentFate::Apply if linger_until.is_none() => {
                source = Some(from);
                sink.write_all(&segment.payload).await?;
                state.record(&header);
                session.cursor = header.cursor;
                report.segments += 1;
                report.bytes = header.cursor;
                send_ack(channel, &session, &header, from).await;
                if header.eof {
                    session.eof_reached = true;
                    sink.flush().await?;
                    sink.shutdown().await?;
                    info!(
                        "The file {} is received ({} bytes from peer {})",
                        file, report.bytes, counterpart
                    );
                    linger_until = Some(Instant::now() + config.linger());
                }
            }
            SegmentFate::Duplicate => {
                report.duplicates += 1;
                debug!("Duplicate segment {} from {}, re-acknowledging", header.cursor, from);
                send_ack(channel, &session, &header, from).await;
            }
            SegmentFate::Apply | SegmentFate::Gap => {
                warn!(
                    "Out of sequence segment {} (holding {}), dropping",
                    header.cursor,
                    state.applied()
                );
            }
        }
    }

    Ok(report)
}

async fn send_ack<C: DatagramChannel + ?Sized>(
    channel: &C,
    session: &TransferSession,
    header: &SegmentHeader,
    to: SocketAddr,
) {
    let ack = Ack::for_segment(header);
    match channel.send_to(&ack.encode(), to).await {
        Ok(_) => session.log_event(TransferEvent::Send, 0, header.len, header.cursor),
        Err(e) => warn!("Failed to acknowledge segment {} to {}: {}", header.cursor, to, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cursor: u64, len: usize) -> SegmentHeader {
        SegmentHeader {
            cursor,
            len,
            eof: false,
        }
    }

    #[test]
    fn replayed_segment_is_ack_only() {
        let mut state = ReceiverState::default();
        assert_eq!(state.classify(&header(100, 100)), SegmentFate::Apply);
        state.record(&header(100, 100));
        assert_eq!(state.classify(&header(100, 100)), SegmentFate::Duplicate);
        assert_eq!(state.classify(&header(200, 100)), SegmentFate::Apply);
        assert_eq!(state.classify(&header(300, 100)), SegmentFate::Gap);
    }

    #[test]
    fn empty_file_segment_applies_once() {
        let mut state = ReceiverState::default();
        let eof = SegmentHeader {
            cursor: 0,
            len: 0,
            eof: true,
        };
        assert_eq!(state.classify(&eof), SegmentFate::Apply);
        state.record(&eof);
        assert_eq!(state.classify(&eof), SegmentFate::Duplicate);
    }
}
