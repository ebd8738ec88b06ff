//! Picks the neighbour a ball is thrown to

use crate::error::PeerError;
use crate::registry::PeerRegistry;
use crate::transport::PeerHandle;
use shared::{Ball, Direction, PeerId, Request, WireBall, WirePlayer};
use std::sync::Arc;

/// Returns the id and handle of the player beside `self_id` in `direction`
///
/// With k the insertion point of `self_id`, left is the player at k - 1 and
/// right is the player at k. A missing neighbour is a protocol violation;
/// callers decide whether a closed door excuses it.
pub fn route(
    registry: &PeerRegistry,
    self_id: PeerId,
    direction: Direction,
) -> Result<(PeerId, Arc<dyn PeerHandle>), PeerError> {
    registry
        .neighbour(self_id, direction)
        .map(|peer| (peer.id, Arc::clone(&peer.handle)))
        .ok_or(PeerError::ProtocolViolation { self_id, direction })
}

/// The request that hands a ball over to another player
pub fn accept_request(ball: &Ball) -> Result<Request, PeerError> {
    let ball = WireBall::try_from(ball).map_err(|_| PeerError::IdOutOfRange(ball.owner))?;
    Ok(Request::Accept { ball })
}

pub fn wire_player(id: PeerId) -> Result<WirePlayer, PeerError> {
    WirePlayer::try_from(id).map_err(|_| PeerError::IdOutOfRange(id))
}
