//! # Peer Library
//!
//! Membership and routing for one player in a row of players passing balls
//! left and right.
//!
//! ## Overview
//!
//! Players are ordered by id. Each player only ever talks to its immediate
//! neighbours: a ball leaving through the left door goes to the next smaller
//! id, a ball leaving through the right door to the next larger id. Doors are
//! open exactly when there is someone on that side.
//!
//! ## Core Components
//!
//! - `PeerManager`: lifecycle (join, run, drain, stop) and the event loop
//! - `PeerRegistry`: known neighbours, always sorted by id
//! - `Relay`: validates inbound calls and queues them for the event loop
//! - `Transport`: directory access and peer calls, over TCP or in memory
//! - `GameMaster`: broadcasts control commands and launches balls
//!
//! ## Joining
//!
//! 1. Look up every name under the root name in the directory
//! 2. Take the largest id found plus one (or 1 if nobody is there)
//! 3. Publish our relay under `root_name` + zero-padded id
//! 4. Say hello to everyone; they recognize us and update their doors
//!
//! ## Leaving
//!
//! Leaving stops the relay first so no inbound call can reach a torn-down
//! inbox, then says goodbye to every known player and withdraws the name.
//!
//! ```no_run
//! use peer::{PeerConfig, PeerManager, TcpTransport};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> Result<(), peer::PeerError> {
//! let config = PeerConfig::default();
//! let transport = Arc::new(TcpTransport::new(&config));
//! let (mut manager, mut presentation) = PeerManager::new(config, transport);
//!
//! manager.get_ready().await?;
//! let (_ball_tx, ball_rx) = mpsc::channel(8);
//! let handle = manager.join(ball_rx).await?;
//!
//! while let Some(door) = presentation.doors.recv().await {
//!     println!("{}", door);
//! #   break;
//! }
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod master;
pub mod memory;
pub mod registry;
pub mod relay;
pub mod router;
pub mod tcp;
pub mod transport;

pub use config::PeerConfig;
pub use error::PeerError;
pub use manager::{ManagerHandle, PeerManager, Phase, Presentation, Snapshot};
pub use master::GameMaster;
pub use memory::MemoryNetwork;
pub use registry::{resolve_doors, DoorTracker, PeerRegistry};
pub use relay::{ControlCommand, Relay, RelayEvent};
pub use tcp::TcpTransport;
pub use transport::{PeerHandle, Publication, Transport};
