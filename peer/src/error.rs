use crate::manager::Phase;
use directory::DirectoryError;
use shared::{Direction, PeerId};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    /// The directory could not be reached or answered badly at join time
    #[error("directory unavailable: {0}")]
    DiscoveryUnavailable(String),

    /// Another player already published under the name derived from our id
    #[error("name {name} is already taken by another player")]
    IdentityConflict { name: String },

    /// Every id up to the largest the wire can carry is already published
    #[error("no player id left after {largest}")]
    IdSpaceExhausted { largest: PeerId },

    #[error("player id {0} cannot be carried on the wire")]
    IdOutOfRange(PeerId),

    #[error("peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    /// Door state and registry disagree about a neighbour
    #[error(
        "protocol violation: player {self_id} has no neighbour on the {direction} \
         although that door is open"
    )]
    ProtocolViolation { self_id: PeerId, direction: Direction },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("operation requires phase {expected:?} but manager is {actual:?}")]
    InvalidPhase { expected: Phase, actual: Phase },

    #[error("peer manager has stopped")]
    ManagerStopped,

    #[error("no known player with id {0}")]
    UnknownPeer(PeerId),

    #[error("event loop task failed: {0}")]
    TaskFailed(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl From<DirectoryError> for PeerError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::Conflict { name, .. } => PeerError::IdentityConflict { name },
            other => PeerError::DiscoveryUnavailable(other.to_string()),
        }
    }
}
