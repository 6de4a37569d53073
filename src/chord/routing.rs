use crate::chord::types::PeerId;

/// Where a file request goes after this peer has looked at it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteDecision {
    /// The first successor owns the key: hand it the request with the has-file hint set
    SuccessorOwns(PeerId),
    /// The key lies further round the ring: pass the request on unchanged
    Forward(PeerId),
}

impl RouteDecision {
    pub fn next_hop(&self) -> PeerId {
        match self {
            RouteDecision::SuccessorOwns(peer) | RouteDecision::Forward(peer) => *peer,
        }
    }

    pub fn successor_has_file(&self) -> bool {
        matches!(self, RouteDecision::SuccessorOwns(_))
    }
}

/// Whether `key` falls in the clockwise interval (`self_id`, `successor_id`].
///
/// Peer and key ids live in the same modulo space, so the interval may wrap
/// past zero. A ring of one peer (`self_id == successor_id`) owns every key.
pub fn owns(self_id: PeerId, successor_id: PeerId, key: u32) -> bool {
    let (start, end) = (self_id.0, successor_id.0);
    if start < end {
        key > start && key <= end
    } else if start > end {
        key > start || key <= end
    } else {
        true
    }
}

pub fn route(self_id: PeerId, first_successor: PeerId, key: u32) -> RouteDecision {
    if owns(self_id, first_successor, key) {
        RouteDecision::SuccessorOwns(first_successor)
    } else {
        RouteDecision::Forward(first_successor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: u32) -> PeerId {
        PeerId(id)
    }

    #[test]
    fn interval_without_wraparound() {
        assert!(owns(p(4), p(8), 5));
        assert!(owns(p(4), p(8), 8));
        assert!(!owns(p(4), p(8), 4));
        assert!(!owns(p(4), p(8), 9));
        assert!(!owns(p(4), p(8), 0));
    }

    #[test]
    fn interval_with_wraparound() {
        assert!(owns(p(200), p(3), 201));
        assert!(owns(p(200), p(3), 255));
        assert!(owns(p(200), p(3), 0));
        assert!(owns(p(200), p(3), 3));
        assert!(!owns(p(200), p(3), 4));
        assert!(!owns(p(200), p(3), 200));
        assert!(!owns(p(200), p(3), 100));
    }

    #[test]
    fn matches_clockwise_walk_for_every_key() {
        // walking the ring step by step is the definition; check it exhaustively on a small ring
        let space = 16;
        for start in 0..space {
            for end in 0..space {
                if start == end {
                    continue;
                }
                let mut walked = vec![false; space as usize];
                let mut cursor = (start + 1) % space;
                loop {
                    walked[cursor as usize] = true;
                    if cursor == end {
                        break;
                    }
                    cursor = (cursor + 1) % space;
                }
                for key in 0..space {
                    assert_eq!(
                        owns(p(start), p(end), key),
                        walked[key as usize],
                        "self={} succ={} key={}",
                        start,
                        end,
                        key
                    );
                }
            }
        }
    }

    #[test]
    fn single_peer_ring_owns_everything() {
        assert!(owns(p(7), p(7), 0));
        assert!(owns(p(7), p(7), 7));
    }

    #[test]
    fn route_sets_hint_only_when_successor_owns() {
        assert_eq!(route(p(1), p(3), 2), RouteDecision::SuccessorOwns(p(3)));
        assert!(route(p(1), p(3), 3).successor_has_file());
        let forward = route(p(1), p(3), 9);
        assert_eq!(forward, RouteDecision::Forward(p(3)));
        assert!(!forward.successor_has_file());
        assert_eq!(forward.next_hop(), p(3));
    }
}
