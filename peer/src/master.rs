//! Game master: a client that steers every player at once
//!
//! The master is not a player. It discovers the published players once at
//! connect time and then calls their relays directly, the same way players
//! call each other.

use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::registry::{discover_ids, Peer, PeerRegistry};
use crate::router::accept_request;
use crate::transport::Transport;
use log::{debug, info};
use rand::Rng;
use shared::{server_name, Ball, PeerId, Request, Vec2, LAUNCH_X};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Delay between two launched balls
pub const DEFAULT_FIRE_SPACING: Duration = Duration::from_millis(100);

pub struct GameMaster {
    players: PeerRegistry,
}

impl GameMaster {
    /// Discovers every player currently published under the root name
    pub async fn connect(
        config: &PeerConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PeerError> {
        if config.fail_fast {
            transport.ping().await?;
        }

        let names = timeout(config.lookup_timeout, transport.lookup(&config.root_name))
            .await
            .map_err(|_| {
                PeerError::DiscoveryUnavailable(format!(
                    "lookup timed out after {:?}",
                    config.lookup_timeout
                ))
            })??;

        let mut players = PeerRegistry::new();
        for id in discover_ids(&config.root_name, &names) {
            players.insert(Peer::new(id, transport.connect(&server_name(&config.root_name, id))));
        }
        info!("Game master sees {} players: {:?}", players.len(), players.ids());

        Ok(Self { players })
    }

    pub fn players(&self) -> Vec<PeerId> {
        self.players.ids()
    }

    /// Asks one player to leave the game
    pub async fn quit(&self, id: PeerId) -> Result<(), PeerError> {
        let peer = self.players.get_by_id(id).ok_or(PeerError::UnknownPeer(id))?;
        info!("Asking player {} to quit", id);
        peer.handle.call(Request::Quit).await
    }

    pub async fn kick(&self) -> Result<(), PeerError> {
        self.broadcast(Request::Kick).await
    }

    pub async fn set_pause_duration(&self, duration: f32) -> Result<(), PeerError> {
        self.broadcast(Request::SetPauseDuration { duration }).await
    }

    pub async fn set_gravity(&self, gravity: f32) -> Result<(), PeerError> {
        self.broadcast(Request::SetGravity { gravity }).await
    }

    pub async fn do_master_command(&self, name: &str) -> Result<(), PeerError> {
        self.broadcast(Request::DoMasterCommand {
            name: name.to_string(),
        })
        .await
    }

    /// Launches `count` rounds of balls, one per player per round
    ///
    /// Returns the number of balls delivered.
    pub async fn fire_balls(&self, count: usize, spacing: Duration) -> Result<usize, PeerError> {
        let mut fired = 0;
        for _ in 0..count {
            for peer in self.players.iter() {
                sleep(spacing).await;
                let ball = launch_ball(peer.id, &mut rand::thread_rng());
                debug!("Firing {} at player {}", ball, peer.id);
                peer.handle.call(accept_request(&ball)?).await?;
                fired += 1;
            }
        }
        info!("Fired {} balls", fired);
        Ok(fired)
    }

    async fn broadcast(&self, request: Request) -> Result<(), PeerError> {
        for peer in self.players.iter() {
            debug!("Sending {} to player {}", request.kind(), peer.id);
            peer.handle.call(request.clone()).await?;
        }
        Ok(())
    }
}

/// A fresh ball at the launch position with a random unit velocity
pub fn launch_ball<R: Rng>(owner: PeerId, rng: &mut R) -> Ball {
    let mut dx: f32 = rng.gen();
    let dy: f32 = rng.gen();
    if rng.gen_bool(0.5) {
        dx = -dx;
    }

    let magnitude = (dx * dx + dy * dy).sqrt();
    let velocity = if magnitude > f32::EPSILON {
        Vec2::new(dx / magnitude, dy / magnitude)
    } else {
        Vec2::new(0.0, 1.0)
    };
    Ball::new(owner, Vec2::new(LAUNCH_X, 0.0), velocity)
}
