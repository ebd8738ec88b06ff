//! Peer lifecycle and the single-threaded event loop
//!
//! A [`PeerManager`] goes through a fixed sequence of phases:
//!
//! ```text
//! Created --get_ready--> Joining --join--> Running --drain--> Draining --stop--> Stopped
//! ```
//!
//! `get_ready` discovers the players already in the game, picks the next id
//! and publishes the relay. `join` greets every known player and hands the
//! manager to a spawned event loop, returning a [`ManagerHandle`].
//!
//! The event loop is the only owner of the registry and door state. It
//! multiplexes inbound relay events, outbound ball commands from the
//! presentation layer and stop/drain/snapshot requests from the handle, and
//! processes them one at a time.

use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::registry::{discover_ids, resolve_doors, DoorTracker, Peer, PeerRegistry};
use crate::relay::{ControlCommand, Relay, RelayEvent};
use crate::router;
use crate::transport::{Publication, Transport};
use log::{debug, error, info, warn};
use shared::{
    server_name, Ball, BallCommand, Direction, DoorCommand, DoorState, PeerId, Request, Vec2,
    MAX_PEER_ID,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Placeholder id before `get_ready` has picked one; real ids start at 1
const UNASSIGNED_ID: PeerId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Joining,
    Running,
    Draining,
    Stopped,
}

/// Streams consumed by the presentation layer
///
/// `doors` closes once the manager stops; `balls` and `controls` close when
/// the event loop exits.
pub struct Presentation {
    pub doors: mpsc::UnboundedReceiver<DoorCommand>,
    pub balls: mpsc::UnboundedReceiver<Ball>,
    pub controls: mpsc::UnboundedReceiver<ControlCommand>,
}

/// Point-in-time view of a running player
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub self_id: PeerId,
    pub peers: Vec<PeerId>,
    pub left: DoorState,
    pub right: DoorState,
    pub lost_balls: u64,
    pub phase: Phase,
}

impl fmt::Display for Snapshot {
    /// Renders the row of players, e.g. `1 2 _5] ` for player 5 with an
    /// open left door and a closed right one
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let k = self.peers.partition_point(|id| *id < self.self_id);
        for id in &self.peers[..k] {
            write!(f, "{} ", id)?;
        }
        let left = if self.left == DoorState::Open { "_" } else { "[" };
        let right = if self.right == DoorState::Open { "_" } else { "]" };
        write!(f, "{}{}{} ", left, self.self_id, right)?;
        for id in &self.peers[k..] {
            write!(f, "{} ", id)?;
        }
        Ok(())
    }
}

pub struct PeerManager {
    config: PeerConfig,
    transport: Arc<dyn Transport>,
    phase: Phase,
    myself: PeerId,
    initial_ids: Vec<PeerId>,
    registry: PeerRegistry,
    doors: DoorTracker,
    relay: Arc<Relay>,
    inbox: Option<mpsc::Receiver<RelayEvent>>,
    publication: Option<Box<dyn Publication>>,
    door_tx: Option<mpsc::UnboundedSender<DoorCommand>>,
    ball_tx: mpsc::UnboundedSender<Ball>,
    control_tx: mpsc::UnboundedSender<ControlCommand>,
    lost_balls: u64,
}

impl PeerManager {
    /// Creates a manager in the `Created` phase plus the presentation streams
    pub fn new(config: PeerConfig, transport: Arc<dyn Transport>) -> (Self, Presentation) {
        let (relay, inbox) = Relay::new(config.inbox_capacity);
        let (door_tx, doors) = mpsc::unbounded_channel();
        let (ball_tx, balls) = mpsc::unbounded_channel();
        let (control_tx, controls) = mpsc::unbounded_channel();

        let manager = Self {
            config,
            transport,
            phase: Phase::Created,
            myself: UNASSIGNED_ID,
            initial_ids: Vec::new(),
            registry: PeerRegistry::new(),
            doors: DoorTracker::new(),
            relay: Arc::new(relay),
            inbox: Some(inbox),
            publication: None,
            door_tx: Some(door_tx),
            ball_tx,
            control_tx,
            lost_balls: 0,
        };
        let presentation = Presentation {
            doors,
            balls,
            controls,
        };
        (manager, presentation)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The relay this manager publishes; inbound calls land here
    pub fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }

    /// Our id, once `get_ready` has assigned one
    pub fn id(&self) -> Option<PeerId> {
        (self.myself != UNASSIGNED_ID).then_some(self.myself)
    }

    /// Discovers existing players, picks our id and publishes our relay
    ///
    /// Returns the assigned id. Calling it again while `Joining` returns the
    /// same id. Any failure leaves the manager `Stopped`.
    pub async fn get_ready(&mut self) -> Result<PeerId, PeerError> {
        match self.phase {
            Phase::Created => {}
            Phase::Joining => return Ok(self.myself),
            actual => {
                return Err(PeerError::InvalidPhase {
                    expected: Phase::Created,
                    actual,
                })
            }
        }

        match self.establish_identity().await {
            Ok(id) => Ok(id),
            Err(e) => {
                error!("Failed to get ready: {}", e);
                self.relay.stop_accepting_data().await;
                self.finish();
                Err(e)
            }
        }
    }

    async fn establish_identity(&mut self) -> Result<PeerId, PeerError> {
        if self.config.fail_fast {
            self.transport.ping().await?;
        }

        let root_name = self.config.root_name.clone();
        let limit = self.config.lookup_timeout;
        let names = timeout(limit, self.transport.lookup(&root_name))
            .await
            .map_err(|_| {
                PeerError::DiscoveryUnavailable(format!(
                    "lookup of {}* timed out after {:?}",
                    root_name, limit
                ))
            })??;

        let ids = discover_ids(&root_name, &names);
        let my_id = next_id(&ids)?;
        let name = server_name(&root_name, my_id);

        let publication = self
            .transport
            .publish(&name, Arc::clone(&self.relay))
            .await?;

        info!("I am player {} ({}), {} others known", my_id, name, ids.len());
        self.myself = my_id;
        self.initial_ids = ids;
        self.publication = Some(publication);
        self.phase = Phase::Joining;
        Ok(my_id)
    }

    /// Greets every known player and starts the event loop
    ///
    /// `ball_commands` carries balls leaving through a door. A failed greeting
    /// aborts the join and withdraws our publication.
    pub async fn join(
        mut self,
        ball_commands: mpsc::Receiver<BallCommand>,
    ) -> Result<ManagerHandle, PeerError> {
        if self.phase != Phase::Joining {
            return Err(PeerError::InvalidPhase {
                expected: Phase::Joining,
                actual: self.phase,
            });
        }

        for id in std::mem::take(&mut self.initial_ids) {
            self.recognize_other(id);
        }

        if let Err(e) = self.say_hello_to_everyone().await {
            error!("Failed to join: {}", e);
            let mut inbox = self.inbox.take();
            self.drain(&mut inbox).await;
            self.finish();
            return Err(e);
        }

        self.phase = Phase::Running;
        self.check_doors();

        let id = self.myself;
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let (drain_tx, drain_rx) = mpsc::channel(1);
        let (snapshot_tx, snapshot_rx) = mpsc::channel(4);
        let task = tokio::spawn(self.run(ball_commands, stop_rx, drain_rx, snapshot_rx));

        Ok(ManagerHandle {
            id,
            stop_tx,
            drain_tx,
            snapshot_tx,
            task,
        })
    }

    async fn run(
        mut self,
        mut ball_commands: mpsc::Receiver<BallCommand>,
        mut stop_rx: mpsc::Receiver<oneshot::Sender<()>>,
        mut drain_rx: mpsc::Receiver<oneshot::Sender<()>>,
        mut snapshot_rx: mpsc::Receiver<oneshot::Sender<Snapshot>>,
    ) -> Result<(), PeerError> {
        info!("Player {} running: {}", self.myself, self.snapshot());
        let mut inbox = self.inbox.take();

        loop {
            tokio::select! {
                request = stop_rx.recv() => {
                    if request.is_none() {
                        info!("Manager handle dropped, shutting down");
                    }
                    self.drain(&mut inbox).await;
                    self.finish();
                    if let Some(ack) = request {
                        let _ = ack.send(());
                    }
                    return Ok(());
                }
                Some(ack) = drain_rx.recv() => {
                    self.drain(&mut inbox).await;
                    let _ = ack.send(());
                }
                Some(reply) = snapshot_rx.recv() => {
                    let _ = reply.send(self.snapshot());
                }
                Some(command) = ball_commands.recv(), if self.phase == Phase::Running => {
                    if let Err(e) = self.throw_ball(command).await {
                        error!("Player {} stopping: {}", self.myself, e);
                        self.drain(&mut inbox).await;
                        self.finish();
                        return Err(e);
                    }
                }
                Some(event) = next_event(&mut inbox) => {
                    self.handle_event(event);
                }
            }
        }
    }

    fn handle_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Recognized(id) => self.recognize_other(id),
            RelayEvent::Forgotten(id) => self.forget_other(id),
            RelayEvent::BallAccepted(ball) => {
                debug!("Player {} received ball {}", self.myself, ball);
                if self.ball_tx.send(ball).is_err() {
                    warn!("Presentation is gone, dropping received ball");
                }
            }
            RelayEvent::Control(command) => {
                debug!("Player {} received control {:?}", self.myself, command);
                if self.control_tx.send(command).is_err() {
                    warn!("Presentation is gone, dropping control command");
                }
            }
        }
    }

    fn recognize_other(&mut self, id: PeerId) {
        if id == self.myself {
            warn!("Player {} asked to recognize itself, ignoring", id);
            return;
        }
        if self.registry.contains(id) {
            debug!("Player {} already recognizes {}", self.myself, id);
            return;
        }

        let handle = self
            .transport
            .connect(&server_name(&self.config.root_name, id));
        self.registry.insert(Peer::new(id, handle));
        info!("I ({}) recognize {}", self.myself, id);
        self.check_doors();
    }

    fn forget_other(&mut self, id: PeerId) {
        match self.registry.remove(id) {
            Some(_) => info!("I ({}) forget {}", self.myself, id),
            None => debug!("Player {} asked to forget unknown {}", self.myself, id),
        }
        self.check_doors();
    }

    /// Recomputes both doors and announces what changed; only while running
    fn check_doors(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        let (left, right) = resolve_doors(self.myself, &self.registry.ids());
        for command in self.doors.apply(left, right) {
            self.announce(command);
        }
        debug!("Current players: {}", self.snapshot());
    }

    fn announce(&self, command: DoorCommand) {
        if let Some(door_tx) = &self.door_tx {
            info!("Player {}: {}", self.myself, command);
            if door_tx.send(command).is_err() {
                warn!("Presentation is gone, door command {} not delivered", command);
            }
        }
    }

    /// Hands a ball to the neighbour in its direction of travel
    ///
    /// A missing neighbour behind a closed door means the presentation acted
    /// on a stale door; the ball bounces back. Behind an open door it is a
    /// protocol violation and the loop stops.
    async fn throw_ball(&mut self, command: BallCommand) -> Result<(), PeerError> {
        debug!("Got ball throw command: {}", command);
        let direction = command.direction;

        match router::route(&self.registry, self.myself, direction) {
            Ok((target, handle)) => {
                let sent = match router::accept_request(&command.ball) {
                    Ok(request) => handle.call(request).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    self.lost_balls += 1;
                    error!(
                        "Failed to throw ball {} {} to {}, ball lost: {}",
                        command.ball, direction, target, e
                    );
                } else {
                    debug!("Threw ball {} {} to {}", command.ball, direction, target);
                }
                Ok(())
            }
            Err(violation) => {
                if self.doors.state(direction) == DoorState::Closed {
                    warn!(
                        "No player on the {} and that door is closed, bouncing ball back",
                        direction
                    );
                    self.bounce(command.ball);
                    Ok(())
                } else {
                    Err(violation)
                }
            }
        }
    }

    fn bounce(&self, ball: Ball) {
        let velocity = Vec2::new(-ball.velocity.x, ball.velocity.y);
        let ball = Ball::new(ball.owner, ball.position, velocity);
        if self.ball_tx.send(ball).is_err() {
            warn!("Presentation is gone, bounced ball dropped");
        }
    }

    async fn say_hello_to_everyone(&self) -> Result<(), PeerError> {
        let hello = Request::Recognize {
            player: router::wire_player(self.myself)?,
        };
        for peer in self.registry.iter() {
            debug!("Player {} says hello to {}", self.myself, peer.id);
            peer.handle.call(hello.clone()).await?;
        }
        Ok(())
    }

    async fn say_goodbye_to_everyone(&self) {
        let goodbye = match router::wire_player(self.myself) {
            Ok(player) => Request::Forget { player },
            Err(e) => {
                warn!("Cannot say goodbye: {}", e);
                return;
            }
        };
        for peer in self.registry.iter() {
            debug!("Player {} says goodbye to {}", self.myself, peer.id);
            if let Err(e) = peer.handle.call(goodbye.clone()).await {
                warn!("Goodbye to {} failed, continuing: {}", peer.id, e);
            }
        }
    }

    /// No new balls or people: stop the relay, say goodbye, withdraw
    async fn drain(&mut self, inbox: &mut Option<mpsc::Receiver<RelayEvent>>) {
        if matches!(self.phase, Phase::Draining | Phase::Stopped) {
            return;
        }
        info!("Player {}: no new balls or people", self.myself);

        self.relay.stop_accepting_data().await;
        if let Some(mut receiver) = inbox.take() {
            receiver.close();
            let mut discarded = 0;
            while receiver.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!("Discarded {} queued events", discarded);
            }
        }

        if self.phase == Phase::Running {
            for command in self.doors.apply(DoorState::Closed, DoorState::Closed) {
                self.announce(command);
            }
        }
        self.phase = Phase::Draining;

        self.say_goodbye_to_everyone().await;

        if let Some(mut publication) = self.publication.take() {
            if let Err(e) = publication.shutdown().await {
                warn!("Failed to withdraw {}: {}", publication.name(), e);
            }
        }
    }

    fn finish(&mut self) {
        self.door_tx = None;
        self.phase = Phase::Stopped;
        info!("Player {} stopped", self.myself);
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            self_id: self.myself,
            peers: self.registry.ids(),
            left: self.doors.state(Direction::Left),
            right: self.doors.state(Direction::Right),
            lost_balls: self.lost_balls,
            phase: self.phase,
        }
    }
}

/// One past the largest published id, as long as the wire can still carry it
fn next_id(ids: &[PeerId]) -> Result<PeerId, PeerError> {
    match ids.last() {
        None => Ok(UNASSIGNED_ID + 1),
        Some(&largest) => largest
            .checked_add(1)
            .filter(|id| *id <= MAX_PEER_ID)
            .ok_or(PeerError::IdSpaceExhausted { largest }),
    }
}

async fn next_event(inbox: &mut Option<mpsc::Receiver<RelayEvent>>) -> Option<RelayEvent> {
    match inbox {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Control surface of a running player
pub struct ManagerHandle {
    id: PeerId,
    stop_tx: mpsc::Sender<oneshot::Sender<()>>,
    drain_tx: mpsc::Sender<oneshot::Sender<()>>,
    snapshot_tx: mpsc::Sender<oneshot::Sender<Snapshot>>,
    task: JoinHandle<Result<(), PeerError>>,
}

impl ManagerHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// True once the event loop has exited, whether stopped or failed
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops accepting inbound data, says goodbye and withdraws, but keeps
    /// the loop alive until `stop`
    pub async fn no_new_balls_or_people(&self) -> Result<(), PeerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.drain_tx
            .send(ack_tx)
            .await
            .map_err(|_| PeerError::ManagerStopped)?;
        ack_rx.await.map_err(|_| PeerError::ManagerStopped)
    }

    pub async fn snapshot(&self) -> Result<Snapshot, PeerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.snapshot_tx
            .send(reply_tx)
            .await
            .map_err(|_| PeerError::ManagerStopped)?;
        reply_rx.await.map_err(|_| PeerError::ManagerStopped)
    }

    /// Drains if needed, stops the loop and returns how it ended
    pub async fn stop(self) -> Result<(), PeerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PeerError::TaskFailed(e.to_string())),
        }
    }
}
