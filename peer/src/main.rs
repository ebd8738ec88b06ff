use clap::Parser;
use log::{debug, error, info, warn};
use peer::master::launch_ball;
use peer::{ControlCommand, PeerConfig, PeerManager, TcpTransport};
use shared::{
    Ball, BallCommand, Direction, DoorCommand, DoorState, Vec2, DEFAULT_DIRECTORY_ADDR,
    DEFAULT_ROOT_NAME,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless volley player", long_about = None)]
struct Args {
    /// Directory service address
    #[arg(short = 'd', long, default_value = DEFAULT_DIRECTORY_ADDR)]
    directory: String,

    /// Root name players publish under
    #[arg(short = 'r', long, default_value = DEFAULT_ROOT_NAME)]
    root: String,

    /// Host the player's listener binds to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// How long a ball stays on this table before it is passed on
    #[arg(long, default_value = "500")]
    dwell_ms: u64,

    /// Balls to put in play after joining
    #[arg(short = 'b', long, default_value = "0")]
    balls: usize,

    /// Timeout for calls to other players, 0 waits forever
    #[arg(long, default_value = "5000")]
    call_timeout_ms: u64,

    /// Join even if the directory does not answer a ping
    #[arg(long)]
    no_fail_fast: bool,
}

/// Local stand-in for a rendered table: holds balls for a while, then tosses
/// them out through whichever door is open
struct Table {
    dwell: Duration,
    left: DoorState,
    right: DoorState,
    held: Vec<Ball>,
}

impl Table {
    fn new(dwell: Duration) -> Self {
        Self {
            dwell,
            left: DoorState::Closed,
            right: DoorState::Closed,
            held: Vec::new(),
        }
    }

    fn door(&self, direction: Direction) -> DoorState {
        match direction {
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    fn set_door(&mut self, command: DoorCommand) {
        match command.direction {
            Direction::Left => self.left = command.state,
            Direction::Right => self.right = command.state,
        }
    }

    /// Lets the ball cross the table, then reports it ready to leave
    ///
    /// The task yields false if the table was gone by then.
    fn receive(&self, ball: Ball, ready_tx: &mpsc::UnboundedSender<Ball>) -> JoinHandle<bool> {
        let ready_tx = ready_tx.clone();
        let dwell = self.dwell;
        tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            match ready_tx.send(ball) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Table closed, dropping ball {}", e.0);
                    false
                }
            }
        })
    }

    /// Picks a door for the ball, bouncing it off a closed one
    fn toss(&mut self, ball: Ball) -> Option<BallCommand> {
        let heading = if ball.velocity.x < 0.0 {
            Direction::Left
        } else {
            Direction::Right
        };

        if self.door(heading) == DoorState::Open {
            return Some(BallCommand::new(ball, heading));
        }
        let other = heading.opposite();
        if self.door(other) == DoorState::Open {
            let velocity = Vec2::new(-ball.velocity.x, ball.velocity.y);
            return Some(BallCommand::new(
                Ball::new(ball.owner, ball.position, velocity),
                other,
            ));
        }

        debug!("Both doors closed, holding {}", ball);
        self.held.push(ball);
        None
    }

    fn release_held(&mut self) -> Vec<Ball> {
        if self.left == DoorState::Closed && self.right == DoorState::Closed {
            return Vec::new();
        }
        std::mem::take(&mut self.held)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = PeerConfig {
        root_name: args.root,
        directory_addr: args.directory,
        bind_host: args.host,
        fail_fast: !args.no_fail_fast,
        call_timeout: (args.call_timeout_ms > 0)
            .then(|| Duration::from_millis(args.call_timeout_ms)),
        ..PeerConfig::default()
    };

    info!("Starting player...");
    info!("Directory: {}", config.directory_addr);

    let transport = Arc::new(TcpTransport::new(&config));
    let (mut manager, mut presentation) = PeerManager::new(config, transport);
    let id = manager.get_ready().await?;

    let (ball_tx, ball_rx) = mpsc::channel(32);
    let handle = manager.join(ball_rx).await?;
    info!("Joined as player {}", id);

    let mut table = Table::new(Duration::from_millis(args.dwell_ms));
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    for _ in 0..args.balls {
        table.receive(launch_ball(id, &mut rand::thread_rng()), &ready_tx);
    }

    let mut report = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving the game...");
                break;
            }
            Some(door) = presentation.doors.recv() => {
                info!("Door {}", door);
                table.set_door(door);
                for ball in table.release_held() {
                    table.receive(ball, &ready_tx);
                }
            }
            Some(ball) = presentation.balls.recv() => {
                debug!("Caught {}", ball);
                table.receive(ball, &ready_tx);
            }
            Some(ball) = ready_rx.recv() => {
                if let Some(command) = table.toss(ball) {
                    debug!("{}", command);
                    if ball_tx.send(command).await.is_err() {
                        warn!("Manager no longer takes balls");
                        break;
                    }
                }
            }
            Some(control) = presentation.controls.recv() => match control {
                ControlCommand::Quit => {
                    info!("Game master asked us to quit");
                    break;
                }
                other => info!("Control command: {:?}", other),
            },
            _ = report.tick() => match handle.snapshot().await {
                Ok(snapshot) => {
                    info!("Players: {} (lost balls: {})", snapshot, snapshot.lost_balls)
                }
                Err(e) => {
                    error!("Manager stopped unexpectedly: {}", e);
                    break;
                }
            },
        }
    }

    handle.stop().await?;
    info!("Player {} left the game", id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball_heading(dx: f32) -> Ball {
        Ball::new(1, Vec2::new(0.0, 0.0), Vec2::new(dx, 0.5))
    }

    #[test]
    fn test_toss_through_open_door() {
        let mut table = Table::new(Duration::ZERO);
        table.set_door(DoorCommand::new(DoorState::Open, Direction::Left));

        let command = table.toss(ball_heading(-1.0)).unwrap();
        assert_eq!(command.direction, Direction::Left);
    }

    #[test]
    fn test_toss_bounces_off_closed_door() {
        let mut table = Table::new(Duration::ZERO);
        table.set_door(DoorCommand::new(DoorState::Open, Direction::Right));

        let command = table.toss(ball_heading(-1.0)).unwrap();
        assert_eq!(command.direction, Direction::Right);
        assert_eq!(command.ball.velocity.x, 1.0);
    }

    #[test]
    fn test_held_until_a_door_opens() {
        let mut table = Table::new(Duration::ZERO);
        assert!(table.toss(ball_heading(1.0)).is_none());
        assert!(table.release_held().is_empty());

        table.set_door(DoorCommand::new(DoorState::Open, Direction::Left));
        assert_eq!(table.release_held().len(), 1);
        assert!(table.release_held().is_empty());
    }

    #[tokio::test]
    async fn test_received_ball_is_ready_after_dwell() {
        let table = Table::new(Duration::from_millis(5));
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();

        assert!(table.receive(ball_heading(1.0), &ready_tx).await.unwrap());
        assert_eq!(ready_rx.recv().await, Some(ball_heading(1.0)));
    }

    #[tokio::test]
    async fn test_ball_dropped_when_table_is_gone() {
        let table = Table::new(Duration::from_millis(5));
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        drop(ready_rx);

        assert!(!table.receive(ball_heading(1.0), &ready_tx).await.unwrap());
    }
}
