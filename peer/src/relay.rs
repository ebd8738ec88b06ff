//! Inbound request handling
//!
//! A [`Relay`] is what a player publishes. Remote calls arrive on arbitrary
//! tasks; the relay validates each request and forwards it as a
//! [`RelayEvent`] into the manager's bounded inbox. It never touches the
//! registry itself.
//!
//! Once the manager starts tearing down it calls
//! [`Relay::stop_accepting_data`]. From then on every handler returns
//! success without forwarding anything, and the relay's sender is dropped so
//! the inbox can be closed safely.

use crate::error::PeerError;
use log::{debug, info, warn};
use shared::{Ball, PeerId, Request, WireBall, WirePlayer};
use tokio::sync::{mpsc, Mutex};

/// Commands for the presentation layer that need no topology work
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    PauseDuration(f32),
    Gravity(f32),
    Kick,
    Quit,
    Master(String),
}

/// Validated inbound request, as delivered to the event loop
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Recognized(PeerId),
    Forgotten(PeerId),
    BallAccepted(Ball),
    Control(ControlCommand),
}

#[derive(Debug)]
struct RelayState {
    accepting: bool,
    inbox: Option<mpsc::Sender<RelayEvent>>,
}

#[derive(Debug)]
pub struct Relay {
    state: Mutex<RelayState>,
}

impl Relay {
    /// Creates a relay together with the receiving end of its inbox
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RelayEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let relay = Self {
            state: Mutex::new(RelayState {
                accepting: true,
                inbox: Some(tx),
            }),
        };
        (relay, rx)
    }

    /// Dispatches a wire request to the matching handler
    pub async fn handle(&self, request: Request) -> Result<(), PeerError> {
        match request {
            Request::Recognize { player } => self.recognize(player).await,
            Request::Forget { player } => self.forget(player).await,
            Request::Accept { ball } => self.accept_ball(ball).await,
            Request::Quit => self.quit().await,
            Request::Kick => self.kick().await,
            Request::SetPauseDuration { duration } => self.set_pause_duration(duration).await,
            Request::SetGravity { gravity } => self.set_gravity(gravity).await,
            Request::DoMasterCommand { name } => self.do_master_command(name).await,
        }
    }

    pub async fn recognize(&self, player: WirePlayer) -> Result<(), PeerError> {
        let id = player_id(player)?;
        self.forward(RelayEvent::Recognized(id)).await;
        Ok(())
    }

    pub async fn forget(&self, player: WirePlayer) -> Result<(), PeerError> {
        let id = player_id(player)?;
        self.forward(RelayEvent::Forgotten(id)).await;
        Ok(())
    }

    pub async fn accept_ball(&self, ball: WireBall) -> Result<(), PeerError> {
        let owner = player_id(ball.owner)?;
        let (position, velocity) = (ball.position(), ball.velocity());
        if !position.is_finite() || !velocity.is_finite() {
            return Err(PeerError::MalformedPayload(format!(
                "ball from {} has non-finite coordinates",
                owner
            )));
        }
        self.forward(RelayEvent::BallAccepted(Ball::new(owner, position, velocity)))
            .await;
        Ok(())
    }

    pub async fn quit(&self) -> Result<(), PeerError> {
        self.forward(RelayEvent::Control(ControlCommand::Quit)).await;
        Ok(())
    }

    pub async fn kick(&self) -> Result<(), PeerError> {
        self.forward(RelayEvent::Control(ControlCommand::Kick)).await;
        Ok(())
    }

    pub async fn set_pause_duration(&self, duration: f32) -> Result<(), PeerError> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(PeerError::MalformedPayload(format!(
                "invalid pause duration {}",
                duration
            )));
        }
        self.forward(RelayEvent::Control(ControlCommand::PauseDuration(duration)))
            .await;
        Ok(())
    }

    pub async fn set_gravity(&self, gravity: f32) -> Result<(), PeerError> {
        if !gravity.is_finite() {
            return Err(PeerError::MalformedPayload(format!("invalid gravity {}", gravity)));
        }
        self.forward(RelayEvent::Control(ControlCommand::Gravity(gravity)))
            .await;
        Ok(())
    }

    pub async fn do_master_command(&self, name: String) -> Result<(), PeerError> {
        if name.trim().is_empty() {
            return Err(PeerError::MalformedPayload("empty master command".to_string()));
        }
        self.forward(RelayEvent::Control(ControlCommand::Master(name)))
            .await;
        Ok(())
    }

    /// Stops forwarding. Later calls are acknowledged and dropped.
    pub async fn stop_accepting_data(&self) {
        let mut state = self.state.lock().await;
        if !state.accepting {
            return;
        }
        state.accepting = false;
        state.inbox = None;
        info!("Relay no longer accepting data");
    }

    pub async fn is_accepting(&self) -> bool {
        self.state.lock().await.accepting
    }

    async fn forward(&self, event: RelayEvent) {
        let sender = {
            let state = self.state.lock().await;
            if !state.accepting {
                debug!("Dropping {:?}, relay shut down", event);
                return;
            }
            state.inbox.clone()
        };

        // The flag can flip while we wait for inbox capacity; the manager
        // closes the receiver after flipping it, which releases this send.
        if let Some(sender) = sender {
            if let Err(e) = sender.send(event).await {
                warn!("Inbox closed, dropped {:?}", e.0);
            }
        }
    }
}

fn player_id(player: WirePlayer) -> Result<PeerId, PeerError> {
    player
        .peer_id()
        .ok_or_else(|| PeerError::MalformedPayload(format!("invalid player id {}", player.id)))
}
