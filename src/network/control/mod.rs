//! TCP control plane: file-request routing, the graceful quit handshake and
//! dead successor repair. Every message travels on its own connection.

pub mod client;
pub mod departure;
pub mod server;

use crate::chord::types::{FileId, PeerId, RingSnapshot};
use crate::error::{CdhtError, NetworkError};
use crate::network::context::PeerContext;
use crate::network::messages::Message;
use log::{error, info, warn};

/// How a graceful quit ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepartureOutcome {
    pub acknowledged: Vec<PeerId>,
    /// False when the wait for acknowledgements timed out
    pub complete: bool,
}

/// Start locating `file`. The request travels clockwise until the peer whose
/// successor owns the key; the owner then answers directly.
pub async fn submit_file_request(ctx: &PeerContext, file: FileId) -> Result<(), CdhtError> {
    let decision = ctx.ring.route(file).await?;
    let next = decision.next_hop();
    let message = Message::FileRequest {
        requester: ctx.self_id(),
        file,
        has_file: decision.successor_has_file(),
        query: true,
    };
    ctx.control.send(next, &message).await?;
    info!(
        "File request message for {} has been sent to my successor",
        file
    );
    Ok(())
}

/// Ask `peer` (our first successor) for its first successor, which becomes our second
pub async fn request_successor_repair(ctx: &PeerContext, peer: PeerId) -> Result<(), NetworkError> {
    let message = Message::DeadPeerRepair {
        sender: ctx.self_id(),
        query: true,
        successor: None,
    };
    ctx.control.send(peer, &message).await
}

/// Which predecessor learns which successor pair when this peer leaves
fn departure_notices(snapshot: &RingSnapshot) -> Vec<(PeerId, PeerId, PeerId)> {
    let mut notices = Vec::with_capacity(2);
    if let Some(p1) = snapshot.first_predecessor {
        notices.push((p1, snapshot.first_successor, snapshot.second_successor));
        if let Some(p2) = snapshot.second_predecessor.filter(|p2| *p2 != p1) {
            notices.push((p2, p1, snapshot.first_successor));
        }
    } else if let Some(p2) = snapshot.second_predecessor {
        warn!(
            "Second predecessor {} is known but the first is not, it cannot be told who follows",
            p2
        );
    }
    notices
}

/// Tell both predecessors who replaces this peer, wait for their
/// acknowledgements and then shut the peer down.
pub async fn announce_departure(ctx: &PeerContext) -> Result<DepartureOutcome, CdhtError> {
    ctx.pinging.cancel();
    let snapshot = ctx.ring.snapshot().await?;
    let notices = departure_notices(&snapshot);
    let done = ctx.departure.begin(notices.iter().map(|(to, _, _)| *to));

    for (to, first, second) in &notices {
        let message = Message::GracefulQuit {
            departing: ctx.self_id(),
            first_successor: *first,
            second_successor: *second,
            query: true,
        };
        if let Err(e) = ctx.control.send(*to, &message).await {
            warn!("Could not tell peer {} about the departure: {}", to, e);
            ctx.departure.forget(*to);
        }
    }

    let timeout = ctx.config.timing.quit_ack_timeout();
    let complete = matches!(tokio::time::timeout(timeout, done).await, Ok(Ok(())));
    if !complete {
        error!("Not every predecessor acknowledged within {:?}", timeout);
    }
    let acknowledged = ctx.departure.acknowledged();
    info!("Peer {} is leaving the ring", ctx.self_id());
    ctx.shutdown.cancel();
    Ok(DepartureOutcome {
        acknowledged,
        complete,
    })
}
