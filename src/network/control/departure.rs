use crate::chord::types::PeerId;
use crate::error::RingError;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// Recorded, still waiting on other predecessors
    Waiting,
    /// Every notified predecessor has answered
    Complete,
    /// No departure in progress; a late or stray ack
    Ignored,
}

struct Departure {
    expected: HashSet<PeerId>,
    acked: HashSet<PeerId>,
    done: Option<oneshot::Sender<()>>,
}

impl Departure {
    fn finish_if_complete(&mut self) -> bool {
        if self.expected.is_subset(&self.acked) {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
            return true;
        }
        false
    }
}

/// Tracks graceful-quit acknowledgements from the predecessors a departing peer notified
#[derive(Clone, Default)]
pub struct DepartureTracker {
    inner: Arc<Mutex<Option<Departure>>>,
}

impl DepartureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for acks from `expected`; the receiver fires once all have arrived
    pub fn begin(&self, expected: impl IntoIterator<Item = PeerId>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut departure = Departure {
            expected: expected.into_iter().collect(),
            acked: HashSet::new(),
            done: Some(tx),
        };
        departure.finish_if_complete();
        if let Ok(mut inner) = self.inner.lock() {
            *inner = Some(departure);
        }
        rx
    }

    /// Stop waiting on a predecessor that could not be notified at all
    pub fn forget(&self, peer: PeerId) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(departure) = inner.as_mut() {
                departure.expected.remove(&peer);
                departure.finish_if_complete();
            }
        }
    }

    pub fn record_ack(&self, from: PeerId) -> Result<AckOutcome, RingError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| RingError::InvariantViolation("departure state poisoned".into()))?;
        let Some(departure) = inner.as_mut() else {
            warn!("Quit acknowledgement from peer {} but this peer is not departing", from);
            return Ok(AckOutcome::Ignored);
        };
        if !departure.expected.contains(&from) {
            return Err(RingError::InvariantViolation(format!(
                "quit acknowledgement from peer {}, which is not a tracked predecessor",
                from
            )));
        }
        departure.acked.insert(from);
        info!("Peer {} acknowledged the departure", from);
        if departure.finish_if_complete() {
            Ok(AckOutcome::Complete)
        } else {
            Ok(AckOutcome::Waiting)
        }
    }

    pub fn acknowledged(&self) -> Vec<PeerId> {
        let mut acked: Vec<PeerId> = self
            .inner
            .lock()
            .ok()
            .and_then(|inner| inner.as_ref().map(|d| d.acked.iter().copied().collect()))
            .unwrap_or_default();
        acked.sort();
        acked
    }
}
