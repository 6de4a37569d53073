//! Stop-and-wait file transfer over an unreliable datagram channel.
//!
//! The sender keeps exactly one segment in flight, resending it on every ACK
//! timeout. The receiver appends each new segment, ACKs everything it sees and
//! never applies the same byte range twice.

pub mod receiver;
pub mod registry;
pub mod segment;
pub mod sender;

pub use receiver::{receive_file, ReceiveReport};
pub use registry::TransferRegistry;
pub use segment::{Ack, Segment, SegmentHeader};
pub use sender::{send_file, TransferReport};

use crate::chord::types::{FileId, PeerId};
use crate::config::PeerConfig;
use chrono::{DateTime, Utc};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::time::Duration;

/// Log target for per-segment transfer events; the binary routes it to its own file
pub const TRANSFER_LOG_TARGET: &str = "transfer_events";

/// Bytes reserved for the ACK datagram read buffer
pub(crate) const ACK_BUFFER_LEN: usize = 64;

/// Largest UDP payload; segments from peers with a bigger MSS must still fit
pub const MAX_DATAGRAM: usize = 65_507;

#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub mss: usize,
    pub header_len: usize,
    pub ack_timeout: Duration,
    pub idle_timeout: Duration,
}

impl TransferConfig {
    pub fn from_peer_config(config: &PeerConfig) -> Self {
        Self {
            mss: config.mss,
            header_len: config.timing.header_len,
            ack_timeout: config.timing.ack_timeout(),
            idle_timeout: config.timing.receive_idle_timeout(),
        }
    }

    /// How long a finished receiver keeps answering retransmitted final segments
    pub fn linger(&self) -> Duration {
        self.ack_timeout * 3
    }
}

/// Simulated channel loss applied by the sender before each transmission
pub struct LossModel {
    drop_prob: f64,
    rng: StdRng,
}

impl LossModel {
    pub fn new(drop_prob: f64) -> Self {
        Self {
            drop_prob,
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(drop_prob: f64, seed: u64) -> Self {
        Self {
            drop_prob,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn lossless() -> Self {
        Self::seeded(0.0, 0)
    }

    /// Draw uniformly from [0, 1); the segment is dropped when the draw is at or below `drop_prob`
    pub fn should_drop(&mut self) -> bool {
        if self.drop_prob <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() <= self.drop_prob
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Serving a file to a requester
    Responding,
    /// Receiving a requested file
    Requesting,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Responding => write!(f, "responding"),
            Role::Requesting => write!(f, "requesting"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    Send,
    Receive,
    Drop,
    Retransmit,
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferEvent::Send => write!(f, "snd"),
            TransferEvent::Receive => write!(f, "rcv"),
            TransferEvent::Drop => write!(f, "drop"),
            TransferEvent::Retransmit => write!(f, "RTX"),
        }
    }
}

/// State of one file movement, owned by the task running it
#[derive(Debug)]
pub struct TransferSession {
    pub file_id: FileId,
    pub peer_counterpart: PeerId,
    pub role: Role,
    /// Cumulative bytes sent (sender) or applied (receiver); doubles as the sequence number
    pub cursor: u64,
    pub eof_reached: bool,
    pub retransmit_pending: bool,
    pub start_time: DateTime<Utc>,
}

impl TransferSession {
    pub fn new(file_id: FileId, peer_counterpart: PeerId, role: Role) -> Self {
        Self {
            file_id,
            peer_counterpart,
            role,
            cursor: 0,
            eof_reached: false,
            retransmit_pending: false,
            start_time: Utc::now(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.start_time).num_milliseconds()
    }

    /// `<role> <event> <elapsed_ms> <cursor> <segment_len> <ack_cursor>`
    pub fn log_event(&self, event: TransferEvent, cursor: u64, len: usize, ack: u64) {
        info!(
            target: TRANSFER_LOG_TARGET,
            "{} {} {} {} {} {}",
            self.role,
            event,
            self.elapsed_ms(),
            cursor,
            len,
            ack
        );
    }
}
