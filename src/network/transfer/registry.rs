use crate::network::transfer::segment::Segment;
use bytes::Bytes;
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const SESSION_QUEUE_LEN: usize = 64;

type Inbound = mpsc::Sender<(Bytes, SocketAddr)>;

#[derive(Default)]
struct Sessions {
    pending: VecDeque<Inbound>,
    active: HashMap<SocketAddr, Inbound>,
}

impl Sessions {
    fn prune(&mut self) {
        self.pending.retain(|session| !session.is_closed());
        self.active.retain(|_, session| !session.is_closed());
    }
}

/// Hands transfer segments arriving on the shared peer port to receiver sessions.
///
/// Sessions register before their sender is known; the first segment of a
/// file from an unfamiliar address claims the oldest pending session.
#[derive(Clone)]
pub struct TransferRegistry {
    header_len: usize,
    sessions: Arc<Mutex<Sessions>>,
}

impl TransferRegistry {
    pub fn new(header_len: usize) -> Self {
        Self {
            header_len,
            sessions: Arc::new(Mutex::new(Sessions::default())),
        }
    }

    pub fn register(&self) -> mpsc::Receiver<(Bytes, SocketAddr)> {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_LEN);
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.prune();
            sessions.pending.push_back(tx);
        }
        rx
    }

    /// Returns false when no live session wanted the datagram
    pub fn dispatch(&self, datagram: Bytes, from: SocketAddr) -> bool {
        let Ok(mut sessions) = self.sessions.lock() else {
            return false;
        };
        sessions.prune();

        if let Some(session) = sessions.active.get(&from) {
            return match session.try_send((datagram, from)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Receiver for {} is backed up, dropping segment", from);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    sessions.active.remove(&from);
                    false
                }
            };
        }

        // only the opening segment of a file may claim a session; anything
        // else from an unknown address is a leftover of an older transfer
        let opening = Segment::decode(&datagram, self.header_len)
            .is_ok_and(|segment| segment.header.start() == 0);
        if !opening {
            debug!("Segment from unknown sender {} does not start a file, dropping", from);
            return false;
        }

        while let Some(session) = sessions.pending.pop_front() {
            if session.try_send((datagram.clone(), from)).is_ok() {
                sessions.active.insert(from, session);
                return true;
            }
        }
        false
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.sessions
            .lock()
            .map(|sessions| sessions.pending.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER_LEN: usize = 20;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn segment(cursor: u64, payload: &'static [u8], eof: bool) -> Bytes {
        Segment::new(cursor, Bytes::from_static(payload), eof)
            .encode(HEADER_LEN)
            .unwrap()
    }

    #[tokio::test]
    async fn first_segment_binds_oldest_pending_session() {
        let registry = TransferRegistry::new(HEADER_LEN);
        let mut first = registry.register();
        let mut second = registry.register();

        assert!(registry.dispatch(segment(1, b"a", false), addr(1)));
        assert!(registry.dispatch(segment(1, b"b", false), addr(2)));
        assert!(registry.dispatch(segment(2, b"c", true), addr(1)));

        assert_eq!(first.recv().await.unwrap().0, segment(1, b"a", false));
        assert_eq!(first.recv().await.unwrap().0, segment(2, b"c", true));
        assert_eq!(second.recv().await.unwrap().1, addr(2));
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn finished_sessions_are_skipped() {
        let registry = TransferRegistry::new(HEADER_LEN);
        drop(registry.register());
        assert_eq!(registry.pending(), 0);
        assert!(!registry.dispatch(segment(1, b"x", true), addr(1)));

        let mut live = registry.register();
        assert!(registry.dispatch(segment(1, b"y", true), addr(1)));
        assert_eq!(live.recv().await.unwrap().0, segment(1, b"y", true));
    }

    #[tokio::test]
    async fn leftover_segment_cannot_claim_a_pending_session() {
        let registry = TransferRegistry::new(HEADER_LEN);
        let mut session = registry.register();

        // tail of some earlier file from a sender nobody is waiting on
        assert!(!registry.dispatch(segment(900, b"late", true), addr(7)));
        assert_eq!(registry.pending(), 1);

        assert!(registry.dispatch(segment(4, b"good", false), addr(8)));
        assert_eq!(session.recv().await.unwrap().1, addr(8));
        // once bound, later segments from that sender flow through
        assert!(registry.dispatch(segment(8, b"more", true), addr(8)));
    }

    #[test]
    fn finished_downloads_do_not_accumulate() {
        let registry = TransferRegistry::new(HEADER_LEN);
        for port in 1..=5 {
            let session = registry.register();
            assert!(registry.dispatch(segment(1, b"z", true), addr(port)));
            drop(session);
        }
        // pruning runs on the next registration
        let _live = registry.register();
        let sessions = registry.sessions.lock().unwrap();
        assert!(sessions.active.is_empty());
        assert_eq!(sessions.pending.len(), 1);
    }
}
