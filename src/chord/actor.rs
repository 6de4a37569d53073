use crate::{
    chord::routing::{self, RouteDecision},
    chord::types::{FileId, PeerId, RingSnapshot, RingState, Slot},
    error::RingError,
};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

/// Actor Messages
/// Each message includes a oneshot sender, so the actor processes the message and sends the response back through the corresponding sender
#[derive(Debug)]
pub enum RingMessage {
    Snapshot {
        respond_to: oneshot::Sender<RingSnapshot>,
    },
    LearnPredecessor {
        id: PeerId,
        slot: Slot,
        respond_to: oneshot::Sender<bool>,
    },
    Route {
        file: FileId,
        respond_to: oneshot::Sender<RouteDecision>,
    },
    SuccessorDied {
        slot: Slot,
        peer: PeerId,
        respond_to: oneshot::Sender<Option<PeerId>>,
    },
    SetSuccessors {
        first: PeerId,
        second: PeerId,
        respond_to: oneshot::Sender<()>,
    },
    InstallSecondSuccessor {
        id: PeerId,
        respond_to: oneshot::Sender<bool>,
    },
}

/// The Actor responsible for the ring state; the only place it is ever mutated
pub struct RingActor {
    state: RingState,
    key_space: u32,
    receiver: mpsc::Receiver<RingMessage>,
}

impl RingActor {
    pub fn new(state: RingState, key_space: u32, receiver: mpsc::Receiver<RingMessage>) -> Self {
        Self {
            state,
            key_space,
            receiver,
        }
    }

    /// Runs until every handle has been dropped
    pub async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            self.handle_message(msg);
        }
        debug!("Ring actor for peer {} stopped", self.state.self_id);
    }

    fn handle_message(&mut self, msg: RingMessage) {
        match msg {
            RingMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.state.snapshot());
            }
            RingMessage::LearnPredecessor {
                id,
                slot,
                respond_to,
            } => {
                let changed = self.state.learn_predecessor(id, slot);
                if changed {
                    info!("My {} predecessor is now peer {}", slot, id);
                }
                let _ = respond_to.send(changed);
            }
            RingMessage::Route { file, respond_to } => {
                let decision = routing::route(
                    self.state.self_id,
                    self.state.first_successor,
                    file.key(self.key_space),
                );
                let _ = respond_to.send(decision);
            }
            RingMessage::SuccessorDied {
                slot,
                peer,
                respond_to,
            } => {
                let _ = respond_to.send(self.successor_died(slot, peer));
            }
            RingMessage::SetSuccessors {
                first,
                second,
                respond_to,
            } => {
                self.state.set_successors(first, second);
                info!("My first successor is now peer {}", first);
                info!("My second successor is now peer {}", second);
                let _ = respond_to.send(());
            }
            RingMessage::InstallSecondSuccessor { id, respond_to } => {
                let installed = if id == self.state.self_id {
                    warn!("Repair response names this peer as its own second successor, ignoring");
                    false
                } else {
                    self.state.set_second_successor(id);
                    info!("My second successor is now peer {}", id);
                    true
                };
                let _ = respond_to.send(installed);
            }
        }
    }

    /// Returns the peer to ask for a replacement second successor, or None if
    /// `peer` no longer sits in `slot` (someone else already repaired it).
    fn successor_died(&mut self, slot: Slot, peer: PeerId) -> Option<PeerId> {
        if self.state.successor(slot) != peer {
            debug!(
                "Peer {} already replaced as {} successor, nothing to repair",
                peer, slot
            );
            return None;
        }
        info!("Peer {} is no longer alive", peer);
        match slot {
            Slot::First => {
                let promoted = self.state.promote_second_successor();
                info!("My first successor is now peer {}", promoted);
                Some(promoted)
            }
            Slot::Second => Some(self.state.first_successor),
        }
    }
}

/// Actor handle for interacting with the RingActor
#[derive(Clone, Debug)]
pub struct RingHandle {
    sender: mpsc::Sender<RingMessage>,
}

impl RingHandle {
    fn new(state: RingState, key_space: u32) -> (Self, RingActor) {
        let (sender, receiver) = mpsc::channel(32);
        let actor = RingActor::new(state, key_space, receiver);
        (Self { sender }, actor)
    }

    /// Build the actor and spawn it on the current runtime
    pub fn spawn(state: RingState, key_space: u32) -> Self {
        let (handle, actor) = Self::new(state, key_space);
        tokio::spawn(actor.run());
        handle
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RingMessage,
    ) -> Result<T, RingError> {
        let (send, recv) = oneshot::channel();
        self.sender
            .send(build(send))
            .await
            .map_err(|_| RingError::ActorGone)?;
        recv.await.map_err(|_| RingError::ActorGone)
    }

    pub async fn snapshot(&self) -> Result<RingSnapshot, RingError> {
        self.request(|respond_to| RingMessage::Snapshot { respond_to })
            .await
    }

    pub async fn learn_predecessor(&self, id: PeerId, slot: Slot) -> Result<bool, RingError> {
        self.request(|respond_to| RingMessage::LearnPredecessor {
            id,
            slot,
            respond_to,
        })
        .await
    }

    pub async fn route(&self, file: FileId) -> Result<RouteDecision, RingError> {
        self.request(|respond_to| RingMessage::Route { file, respond_to })
            .await
    }

    pub async fn successor_died(&self, slot: Slot, peer: PeerId) -> Result<Option<PeerId>, RingError> {
        self.request(|respond_to| RingMessage::SuccessorDied {
            slot,
            peer,
            respond_to,
        })
        .await
    }

    pub async fn set_successors(&self, first: PeerId, second: PeerId) -> Result<(), RingError> {
        self.request(|respond_to| RingMessage::SetSuccessors {
            first,
            second,
            respond_to,
        })
        .await
    }

    pub async fn install_second_successor(&self, id: PeerId) -> Result<bool, RingError> {
        self.request(|respond_to| RingMessage::InstallSecondSuccessor { id, respond_to })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> RingHandle {
        RingHandle::spawn(RingState::new(PeerId(4), PeerId(5), PeerId(8)), 256)
    }

    #[tokio::test]
    async fn first_successor_death_promotes_second() {
        let ring = handle();
        let ask = ring.successor_died(Slot::First, PeerId(5)).await.unwrap();
        assert_eq!(ask, Some(PeerId(8)));
        assert!(ring.install_second_successor(PeerId(9)).await.unwrap());

        let snapshot = ring.snapshot().await.unwrap();
        assert_eq!(snapshot.first_successor, PeerId(8));
        assert_eq!(snapshot.second_successor, PeerId(9));
    }

    #[tokio::test]
    async fn stale_death_report_is_ignored() {
        let ring = handle();
        ring.set_successors(PeerId(8), PeerId(9)).await.unwrap();
        assert_eq!(ring.successor_died(Slot::First, PeerId(5)).await.unwrap(), None);
        assert_eq!(ring.successor_died(Slot::Second, PeerId(8)).await.unwrap(), None);
        assert_eq!(
            ring.successor_died(Slot::Second, PeerId(9)).await.unwrap(),
            Some(PeerId(8))
        );
        // second successor death does not touch the table by itself
        assert_eq!(ring.snapshot().await.unwrap().second_successor, PeerId(9));
    }

    #[tokio::test]
    async fn own_id_is_never_installed_as_second_successor() {
        let ring = handle();
        assert!(!ring.install_second_successor(PeerId(4)).await.unwrap());
        assert_eq!(ring.snapshot().await.unwrap().second_successor, PeerId(8));
    }

    #[tokio::test]
    async fn concurrent_predecessor_updates_are_serialized() {
        let ring = handle();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let ring = ring.clone();
            tasks.push(tokio::spawn(async move {
                ring.learn_predecessor(PeerId(3), Slot::First).await.unwrap()
            }));
        }
        let mut changed = 0;
        for task in tasks {
            if task.await.unwrap() {
                changed += 1;
            }
        }
        assert_eq!(changed, 1);
        assert_eq!(ring.snapshot().await.unwrap().first_predecessor, Some(PeerId(3)));
    }

    #[tokio::test]
    async fn route_uses_current_first_successor() {
        let ring = handle();
        assert_eq!(
            ring.route(FileId(5)).await.unwrap(),
            RouteDecision::SuccessorOwns(PeerId(5))
        );
        // 2012 mod 256 = 220, outside (4, 5]
        assert_eq!(
            ring.route(FileId(2012)).await.unwrap(),
            RouteDecision::Forward(PeerId(5))
        );
    }
}
