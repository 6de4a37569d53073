use serde::{Deserialize, Serialize};
use std::fmt;

/// PeerId is a peer's position on the modulo ring; it also fixes the peer's ports
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub u32);

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PeerId {
    fn from(id: u32) -> Self {
        PeerId(id)
    }
}

/// FileId is the number a file is requested by (e.g. `2012` for `2012.pdf`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u32);

impl FileId {
    /// Files are placed on the ring by reducing their number into the key space
    pub fn key(&self, key_space: u32) -> u32 {
        self.0 % key_space
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Which of the two tracked neighbours on one side of the ring
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    /// Wire flag used by pings: 1 when the ping targets the sender's first successor
    pub fn as_flag(&self) -> bool {
        matches!(self, Slot::First)
    }

    pub fn from_flag(flag: bool) -> Self {
        if flag {
            Slot::First
        } else {
            Slot::Second
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::First => write!(f, "first"),
            Slot::Second => write!(f, "second"),
        }
    }
}

/// Neighbour table of a single peer.
///
/// Only the ring actor holds one of these; everything else reads a
/// [`RingSnapshot`] or asks the actor to mutate it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingState {
    pub self_id: PeerId,
    pub first_successor: PeerId,
    pub second_successor: PeerId,
    pub first_predecessor: Option<PeerId>,
    pub second_predecessor: Option<PeerId>,
}

impl RingState {
    pub fn new(self_id: PeerId, first_successor: PeerId, second_successor: PeerId) -> Self {
        Self {
            self_id,
            first_successor,
            second_successor,
            first_predecessor: None,
            second_predecessor: None,
        }
    }

    pub fn successor(&self, slot: Slot) -> PeerId {
        match slot {
            Slot::First => self.first_successor,
            Slot::Second => self.second_successor,
        }
    }

    pub fn predecessor(&self, slot: Slot) -> Option<PeerId> {
        match slot {
            Slot::First => self.first_predecessor,
            Slot::Second => self.second_predecessor,
        }
    }

    /// Record `id` as the predecessor in `slot`. Returns false when nothing changed.
    pub fn learn_predecessor(&mut self, id: PeerId, slot: Slot) -> bool {
        let target = match slot {
            Slot::First => &mut self.first_predecessor,
            Slot::Second => &mut self.second_predecessor,
        };
        if *target == Some(id) {
            return false;
        }
        *target = Some(id);
        true
    }

    /// Which predecessor slot `id` currently occupies, if any
    pub fn predecessor_slot(&self, id: PeerId) -> Option<Slot> {
        if self.first_predecessor == Some(id) {
            Some(Slot::First)
        } else if self.second_predecessor == Some(id) {
            Some(Slot::Second)
        } else {
            None
        }
    }

    /// Drop the dead first successor and move the second one up.
    /// Both slots name the same live peer until a repair response arrives.
    pub fn promote_second_successor(&mut self) -> PeerId {
        self.first_successor = self.second_successor;
        self.first_successor
    }

    pub fn set_successors(&mut self, first: PeerId, second: PeerId) {
        self.first_successor = first;
        self.second_successor = second;
    }

    pub fn set_second_successor(&mut self, id: PeerId) -> bool {
        if self.second_successor == id {
            return false;
        }
        self.second_successor = id;
        true
    }

    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            self_id: self.self_id,
            second_predecessor: self.second_predecessor,
            first_predecessor: self.first_predecessor,
            first_successor: self.first_successor,
            second_successor: self.second_successor,
        }
    }
}

/// Point-in-time copy of a peer's neighbours, as returned by the debug dump
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSnapshot {
    pub self_id: PeerId,
    pub second_predecessor: Option<PeerId>,
    pub first_predecessor: Option<PeerId>,
    pub first_successor: PeerId,
    pub second_successor: PeerId,
}

impl RingSnapshot {
    pub fn successor(&self, slot: Slot) -> PeerId {
        match slot {
            Slot::First => self.first_successor,
            Slot::Second => self.second_successor,
        }
    }
}

impl fmt::Display for RingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // unknown predecessors print as -1, like the wire sentinel
        let show = |p: Option<PeerId>| p.map_or_else(|| "-1".to_string(), |p| p.to_string());
        write!(
            f,
            "[P2: {} P1: {} S1: {} S2: {}]",
            show(self.second_predecessor),
            show(self.first_predecessor),
            self.first_successor,
            self.second_successor
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring() -> RingState {
        RingState::new(PeerId(4), PeerId(5), PeerId(8))
    }

    #[test]
    fn learning_the_same_predecessor_twice_is_a_no_op() {
        let mut state = ring();
        assert!(state.learn_predecessor(PeerId(3), Slot::First));
        assert!(!state.learn_predecessor(PeerId(3), Slot::First));
        assert!(state.learn_predecessor(PeerId(1), Slot::Second));
        assert_eq!(state.first_predecessor, Some(PeerId(3)));
        assert_eq!(state.second_predecessor, Some(PeerId(1)));
        assert_eq!(state.predecessor_slot(PeerId(1)), Some(Slot::Second));
        assert_eq!(state.predecessor_slot(PeerId(9)), None);
    }

    #[test]
    fn promotion_moves_second_successor_up() {
        let mut state = ring();
        assert_eq!(state.promote_second_successor(), PeerId(8));
        assert_eq!(state.successor(Slot::First), PeerId(8));
        assert!(state.set_second_successor(PeerId(10)));
        assert_eq!(state.successor(Slot::Second), PeerId(10));
    }

    #[test]
    fn snapshot_prints_like_the_debug_command() {
        let mut state = ring();
        state.learn_predecessor(PeerId(3), Slot::First);
        assert_eq!(state.snapshot().to_string(), "[P2: -1 P1: 3 S1: 5 S2: 8]");
    }

    #[test]
    fn file_keys_wrap_into_key_space() {
        assert_eq!(FileId(2012).key(256), 220);
        assert_eq!(FileId(255).key(256), 255);
        assert_eq!(FileId(2012).to_string(), "2012");
        assert_eq!(FileId(7).to_string(), "0007");
    }
}
