use shared::{DEFAULT_DIRECTORY_ADDR, DEFAULT_ROOT_NAME};
use std::time::Duration;

/// Settings shared by players and the game master
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Namespace prefix; a player's name is this plus its zero-padded id
    pub root_name: String,
    pub directory_addr: String,
    /// Host the RPC listener binds to; the port is always ephemeral
    pub bind_host: String,
    /// Refuse to join when the directory does not answer a ping
    pub fail_fast: bool,
    pub lookup_timeout: Duration,
    /// Bound on each outbound peer call; None waits indefinitely
    pub call_timeout: Option<Duration>,
    /// Capacity of the relay inbox; full inbox makes inbound calls wait
    pub inbox_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            root_name: DEFAULT_ROOT_NAME.to_string(),
            directory_addr: DEFAULT_DIRECTORY_ADDR.to_string(),
            bind_host: "127.0.0.1".to_string(),
            fail_fast: true,
            lookup_timeout: Duration::from_secs(60),
            call_timeout: Some(Duration::from_secs(5)),
            inbox_capacity: 32,
        }
    }
}
