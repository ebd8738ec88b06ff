//! Known neighbours, kept in id order, and the door state derived from them
//!
//! The registry is a plain data structure owned by the manager's event loop.
//! Its single invariant is strict ordering: for entries at positions i < j,
//! `id(i) < id(j)`. The local player's own id is never stored here; instead
//! the insertion point of that id splits the registry into the players on
//! our left and the players on our right.

use crate::transport::PeerHandle;
use log::warn;
use shared::{parse_peer_id, Direction, DoorCommand, DoorState, PeerId};
use std::sync::Arc;

/// A remote player and the handle used to call it
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub handle: Arc<dyn PeerHandle>,
}

impl Peer {
    pub fn new(id: PeerId, handle: Arc<dyn PeerHandle>) -> Self {
        Self { id, handle }
    }
}

#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Vec<Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    /// Returns the index at which `id` would be inserted
    ///
    /// The player at `k - 1` is immediately left of `id` and the player at
    /// `k` is immediately right of it.
    pub fn find_insertion_point(&self, id: PeerId) -> usize {
        self.peers.partition_point(|peer| peer.id <= id)
    }

    /// Inserts while preserving order. Returns false if the id is already known.
    pub fn insert(&mut self, peer: Peer) -> bool {
        if self.contains(peer.id) {
            return false;
        }
        let k = self.find_insertion_point(peer.id);
        self.peers.insert(k, peer);
        true
    }

    /// Removes by id; unknown ids are a no-op
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        self.position(id).map(|index| self.peers.remove(index))
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, index: usize) -> Option<&Peer> {
        self.peers.get(index)
    }

    pub fn get_by_id(&self, id: PeerId) -> Option<&Peer> {
        self.position(id).map(|index| &self.peers[index])
    }

    /// The player immediately beside `self_id` on the given side, if any
    pub fn neighbour(&self, self_id: PeerId, direction: Direction) -> Option<&Peer> {
        let k = self.find_insertion_point(self_id);
        match direction {
            Direction::Left => k.checked_sub(1).and_then(|index| self.peers.get(index)),
            Direction::Right => self.peers.get(k),
        }
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.iter().map(|peer| peer.id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn position(&self, id: PeerId) -> Option<usize> {
        self.peers.binary_search_by_key(&id, |peer| peer.id).ok()
    }
}

/// Door state for (left, right) given our id and the sorted ids we know of
pub fn resolve_doors(self_id: PeerId, sorted_ids: &[PeerId]) -> (DoorState, DoorState) {
    match (sorted_ids.first(), sorted_ids.last()) {
        (Some(&first), Some(&last)) => {
            if self_id < first {
                (DoorState::Closed, DoorState::Open)
            } else if last < self_id {
                (DoorState::Open, DoorState::Closed)
            } else {
                (DoorState::Open, DoorState::Open)
            }
        }
        _ => (DoorState::Closed, DoorState::Closed),
    }
}

/// Last door state announced on each side
///
/// Both doors start closed. `assure` only reports a command when the state
/// actually changes, so bursts of recognize/forget traffic never repeat a
/// notification.
#[derive(Debug, Clone)]
pub struct DoorTracker {
    left: DoorState,
    right: DoorState,
}

impl Default for DoorTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DoorTracker {
    pub fn new() -> Self {
        Self {
            left: DoorState::Closed,
            right: DoorState::Closed,
        }
    }

    pub fn state(&self, direction: Direction) -> DoorState {
        match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    pub fn assure(&mut self, direction: Direction, state: DoorState) -> Option<DoorCommand> {
        let current = match direction {
            Direction::Left => &mut self.left,
            Direction::Right => &mut self.right,
        };
        if *current == state {
            return None;
        }
        *current = state;
        Some(DoorCommand::new(state, direction))
    }

    /// Applies a resolved (left, right) pair, returning only the changes
    pub fn apply(&mut self, left: DoorState, right: DoorState) -> Vec<DoorCommand> {
        [
            self.assure(Direction::Left, left),
            self.assure(Direction::Right, right),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Extracts sorted, distinct peer ids from published names
pub fn discover_ids(root_name: &str, names: &[String]) -> Vec<PeerId> {
    let mut ids: Vec<PeerId> = names
        .iter()
        .filter_map(|name| {
            let id = parse_peer_id(root_name, name);
            if id.is_none() {
                warn!("Ignoring published name {} with no usable player number", name);
            }
            id
        })
        .filter(|id| *id > 0)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
