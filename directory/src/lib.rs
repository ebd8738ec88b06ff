//! # Directory Service
//!
//! The directory is the only shared infrastructure in a game: a small name
//! service mapping published player names to the socket addresses of their
//! RPC listeners. Players use it twice in their lifetime, once at join time
//! to discover who is already playing (and thereby pick their own id) and
//! once at shutdown to withdraw their name.
//!
//! ## Modules
//!
//! - `names`: the ordered name table with publish/unpublish/prefix lookup
//! - `server`: TCP server exposing the table over length-prefixed bincode
//!   frames, one task per connection
//! - `client`: `DirectoryClient`, a timeout-bounded client used by players
//!   and by the game master
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use directory::{DirectoryClient, DirectoryServer};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = DirectoryServer::bind("127.0.0.1:23000").await?;
//!     tokio::spawn(server.run());
//!
//!     let client = DirectoryClient::new("127.0.0.1:23000", Duration::from_secs(5));
//!     client.publish("volley/player0001", "127.0.0.1:40001").await?;
//!     let names = client.lookup("volley/player").await?;
//!     assert_eq!(names, vec!["volley/player0001".to_string()]);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod names;
pub mod server;

pub use client::DirectoryClient;
pub use error::DirectoryError;
pub use server::DirectoryServer;
