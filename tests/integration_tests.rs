//! Integration tests for multi-player membership and ball passing
//!
//! These tests run several players against one another, either in memory or
//! over real TCP sockets with a live directory service.

use directory::{DirectoryClient, DirectoryServer};
use peer::{
    ControlCommand, GameMaster, ManagerHandle, MemoryNetwork, PeerConfig, PeerError, PeerManager,
    Presentation, Snapshot, TcpTransport, Transport,
};
use shared::{Ball, BallCommand, Direction, DoorState, PeerId, Vec2};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

struct Player {
    handle: ManagerHandle,
    presentation: Presentation,
    balls: mpsc::Sender<BallCommand>,
}

fn config(root: &str) -> PeerConfig {
    PeerConfig {
        root_name: root.to_string(),
        lookup_timeout: Duration::from_secs(2),
        call_timeout: Some(Duration::from_secs(2)),
        ..PeerConfig::default()
    }
}

async fn start_player(
    config: PeerConfig,
    transport: Arc<dyn Transport>,
) -> Result<Player, PeerError> {
    let (mut manager, presentation) = PeerManager::new(config, transport);
    manager.get_ready().await?;
    let (balls, ball_rx) = mpsc::channel(8);
    let handle = manager.join(ball_rx).await?;
    Ok(Player {
        handle,
        presentation,
        balls,
    })
}

/// Polls a player's snapshot until it knows exactly `expected`
async fn wait_for_peers(handle: &ManagerHandle, expected: &[PeerId]) -> Snapshot {
    for _ in 0..200 {
        let snapshot = handle.snapshot().await.unwrap();
        if snapshot.peers == expected {
            return snapshot;
        }
        sleep(Duration::from_millis(10)).await;
    }
    let snapshot = handle.snapshot().await.unwrap();
    panic!(
        "Player {} never converged to {:?}, last saw {:?}",
        handle.id(),
        expected,
        snapshot.peers
    );
}

async fn next_ball(presentation: &mut Presentation) -> Ball {
    timeout(Duration::from_secs(2), presentation.balls.recv())
        .await
        .expect("no ball arrived")
        .expect("ball channel closed")
}

async fn start_directory() -> (String, oneshot::Sender<()>) {
    let server = DirectoryServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await;
    });
    (addr, stop_tx)
}

/// MEMBERSHIP TESTS
mod membership_tests {
    use super::*;

    const ROOT: &str = "it-membership/player";

    /// Three sequential joins converge to a symmetric view with correct doors
    #[tokio::test]
    async fn three_players_converge() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.clone());

        let p1 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let p2 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let p3 = start_player(config(ROOT), transport.clone()).await.unwrap();

        assert_eq!(
            (p1.handle.id(), p2.handle.id(), p3.handle.id()),
            (1, 2, 3)
        );

        let s1 = wait_for_peers(&p1.handle, &[2, 3]).await;
        let s2 = wait_for_peers(&p2.handle, &[1, 3]).await;
        let s3 = wait_for_peers(&p3.handle, &[1, 2]).await;

        assert_eq!((s1.left, s1.right), (DoorState::Closed, DoorState::Open));
        assert_eq!((s2.left, s2.right), (DoorState::Open, DoorState::Open));
        assert_eq!((s3.left, s3.right), (DoorState::Open, DoorState::Closed));
        assert_eq!(s2.to_string(), "1 _2_ 3 ");

        for player in [p1, p2, p3] {
            player.handle.stop().await.unwrap();
        }
        assert!(network.names().await.is_empty());
    }

    /// A leaving player says goodbye and its neighbours close ranks
    #[tokio::test]
    async fn leaving_player_is_forgotten() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.clone());

        let p1 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let p2 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let p3 = start_player(config(ROOT), transport.clone()).await.unwrap();
        wait_for_peers(&p1.handle, &[2, 3]).await;
        wait_for_peers(&p3.handle, &[1, 2]).await;

        p2.handle.stop().await.unwrap();

        let s1 = wait_for_peers(&p1.handle, &[3]).await;
        let s3 = wait_for_peers(&p3.handle, &[1]).await;
        assert_eq!((s1.left, s1.right), (DoorState::Closed, DoorState::Open));
        assert_eq!((s3.left, s3.right), (DoorState::Open, DoorState::Closed));

        p1.handle.stop().await.unwrap();
        p3.handle.stop().await.unwrap();
    }

    /// The door channel reports the last player's door opening and then closes
    #[tokio::test]
    async fn door_channel_closes_after_stop() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.clone());

        let mut p1 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let p2 = start_player(config(ROOT), transport.clone()).await.unwrap();

        let door = timeout(Duration::from_secs(2), p1.presentation.doors.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(door.direction, Direction::Right);
        assert_eq!(door.state, DoorState::Open);

        p2.handle.stop().await.unwrap();
        p1.handle.stop().await.unwrap();

        let mut remaining = Vec::new();
        while let Some(door) = p1.presentation.doors.recv().await {
            remaining.push(door);
        }
        assert!(remaining.iter().all(|d| d.direction == Direction::Right));
    }

    /// Concurrent joins either get distinct ids or a typed identity conflict
    #[tokio::test]
    async fn concurrent_joins_never_share_an_id() {
        let network = MemoryNetwork::new();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let transport: Arc<dyn Transport> = Arc::new(network.clone());
            tasks.push(tokio::spawn(async move {
                start_player(config(ROOT), transport).await
            }));
        }

        let mut players = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(player) => players.push(player),
                Err(PeerError::IdentityConflict { .. }) => {}
                Err(e) => panic!("Unexpected join error: {}", e),
            }
        }

        let mut ids: Vec<PeerId> = players.iter().map(|p| p.handle.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), players.len());
        assert!(!players.is_empty());

        for player in players {
            player.handle.stop().await.unwrap();
        }
    }
}

/// BALL PASSING TESTS
mod ball_tests {
    use super::*;

    const ROOT: &str = "it-balls/player";

    /// Balls thrown right and left land on the immediate neighbours
    #[tokio::test]
    async fn balls_reach_immediate_neighbours() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.clone());

        let mut p1 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let p2 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let mut p3 = start_player(config(ROOT), transport.clone()).await.unwrap();
        wait_for_peers(&p2.handle, &[1, 3]).await;

        let right = Ball::new(2, Vec2::new(1.0, 0.3), Vec2::new(1.0, 0.0));
        p2.balls
            .send(BallCommand::new(right.clone(), Direction::Right))
            .await
            .unwrap();
        assert_eq!(next_ball(&mut p3.presentation).await, right);

        let left = Ball::new(2, Vec2::new(-1.0, 0.3), Vec2::new(-1.0, 0.0));
        p2.balls
            .send(BallCommand::new(left.clone(), Direction::Left))
            .await
            .unwrap();
        assert_eq!(next_ball(&mut p1.presentation).await, left);

        for player in [p1, p2, p3] {
            player.handle.stop().await.unwrap();
        }
    }

    /// A ball thrown at a neighbour that vanished is counted as lost
    #[tokio::test]
    async fn crashed_neighbour_loses_ball() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.clone());

        let p1 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let p2 = start_player(config(ROOT), transport.clone()).await.unwrap();
        wait_for_peers(&p1.handle, &[2]).await;

        assert!(network.crash("it-balls/player0002").await);

        let ball = Ball::new(1, Vec2::new(1.0, 0.0), Vec2::new(1.0, 0.0));
        p1.balls
            .send(BallCommand::new(ball, Direction::Right))
            .await
            .unwrap();

        let mut lost = 0;
        for _ in 0..100 {
            lost = p1.handle.snapshot().await.unwrap().lost_balls;
            if lost > 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lost, 1);

        p1.handle.stop().await.unwrap();
        p2.handle.stop().await.unwrap();
    }
}

/// GAME MASTER TESTS
mod master_tests {
    use super::*;

    const ROOT: &str = "it-master/player";

    /// Control commands from the master surface on each player's control stream
    #[tokio::test]
    async fn master_commands_reach_players() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn Transport> = Arc::new(network.clone());

        let mut p1 = start_player(config(ROOT), transport.clone()).await.unwrap();
        let mut p2 = start_player(config(ROOT), transport.clone()).await.unwrap();

        let master = GameMaster::connect(&config(ROOT), transport.clone())
            .await
            .unwrap();
        assert_eq!(master.players(), vec![1, 2]);

        master.set_pause_duration(1.5).await.unwrap();
        master.quit(2).await.unwrap();

        for player in [&mut p1, &mut p2] {
            let control = timeout(Duration::from_secs(2), player.presentation.controls.recv())
                .await
                .unwrap();
            assert_eq!(control, Some(ControlCommand::PauseDuration(1.5)));
        }
        let quit = timeout(Duration::from_secs(2), p2.presentation.controls.recv())
            .await
            .unwrap();
        assert_eq!(quit, Some(ControlCommand::Quit));

        master.fire_balls(1, Duration::from_millis(1)).await.unwrap();
        assert_eq!(next_ball(&mut p1.presentation).await.owner, 1);
        assert_eq!(next_ball(&mut p2.presentation).await.owner, 2);

        p1.handle.stop().await.unwrap();
        p2.handle.stop().await.unwrap();
    }
}

/// TCP TESTS
mod tcp_tests {
    use super::*;

    fn tcp_config(root: &str, directory_addr: &str) -> PeerConfig {
        PeerConfig {
            directory_addr: directory_addr.to_string(),
            ..config(root)
        }
    }

    /// Two players over TCP find each other and pass a ball
    #[tokio::test]
    async fn players_over_tcp() {
        let (directory_addr, _stop) = start_directory().await;
        let root = "it-tcp/player";
        let transport: Arc<dyn Transport> =
            Arc::new(TcpTransport::new(&tcp_config(root, &directory_addr)));

        let p1 = start_player(tcp_config(root, &directory_addr), transport.clone())
            .await
            .unwrap();
        let mut p2 = start_player(tcp_config(root, &directory_addr), transport.clone())
            .await
            .unwrap();

        wait_for_peers(&p1.handle, &[2]).await;
        let s2 = wait_for_peers(&p2.handle, &[1]).await;
        assert_eq!((s2.left, s2.right), (DoorState::Open, DoorState::Closed));

        let ball = Ball::new(1, Vec2::new(0.9, 0.1), Vec2::new(0.6, 0.8));
        p1.balls
            .send(BallCommand::new(ball.clone(), Direction::Right))
            .await
            .unwrap();
        assert_eq!(next_ball(&mut p2.presentation).await, ball);

        p1.handle.stop().await.unwrap();
        wait_for_peers(&p2.handle, &[]).await;
        p2.handle.stop().await.unwrap();

        let directory = DirectoryClient::new(directory_addr, Duration::from_secs(2));
        assert!(directory.lookup(root).await.unwrap().is_empty());
    }

    /// A stale directory entry makes the hello round fail and the join abort
    #[tokio::test]
    async fn join_aborts_when_hello_fails() {
        let (directory_addr, _stop) = start_directory().await;
        let root = "it-stale/player";

        let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap().to_string();
        drop(dead);

        let directory = DirectoryClient::new(directory_addr.clone(), Duration::from_secs(2));
        directory
            .publish("it-stale/player0001", &dead_addr)
            .await
            .unwrap();

        let transport: Arc<dyn Transport> =
            Arc::new(TcpTransport::new(&tcp_config(root, &directory_addr)));
        match start_player(tcp_config(root, &directory_addr), transport).await {
            Err(PeerError::PeerUnreachable { peer, .. }) => {
                assert_eq!(peer, "it-stale/player0001")
            }
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Join succeeded against a dead peer"),
        }

        assert_eq!(
            directory.lookup(root).await.unwrap(),
            vec!["it-stale/player0001".to_string()]
        );
    }

    /// Joining without a directory fails fast
    #[tokio::test]
    async fn join_without_directory_fails_fast() {
        let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = unused.local_addr().unwrap().to_string();
        drop(unused);

        let config = tcp_config("it-nodir/player", &addr);
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(&config));
        match start_player(config, transport).await {
            Err(PeerError::DiscoveryUnavailable(_)) => {}
            Err(e) => panic!("Unexpected error: {}", e),
            Ok(_) => panic!("Join succeeded without a directory"),
        }
    }
}
