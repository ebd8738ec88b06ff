//! Seams between the peer manager and the network
//!
//! The manager only ever talks to the outside world through these traits:
//! a [`Transport`] reaches the directory and mints handles, a [`PeerHandle`]
//! sends one request to one remote player, and a [`Publication`] keeps a
//! relay reachable under a name until it is shut down. The TCP
//! implementation lives in [`crate::tcp`], an in-process one in
//! [`crate::memory`].

use crate::error::PeerError;
use crate::relay::Relay;
use async_trait::async_trait;
use shared::Request;
use std::fmt;
use std::sync::Arc;

/// A callable reference to one remote player
#[async_trait]
pub trait PeerHandle: Send + Sync + fmt::Debug {
    /// The published name this handle calls
    fn name(&self) -> &str;

    /// Sends a request and waits for the remote relay to acknowledge it
    async fn call(&self, request: Request) -> Result<(), PeerError>;
}

/// A relay exposed under a name
#[async_trait]
pub trait Publication: Send + Sync {
    fn name(&self) -> &str;

    /// Withdraws the name and stops serving inbound calls
    async fn shutdown(&mut self) -> Result<(), PeerError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Checks that the directory answers at all
    async fn ping(&self) -> Result<(), PeerError>;

    /// Lists published names starting with `prefix`
    async fn lookup(&self, prefix: &str) -> Result<Vec<String>, PeerError>;

    /// Starts serving `relay` and publishes it under `name`
    async fn publish(
        &self,
        name: &str,
        relay: Arc<Relay>,
    ) -> Result<Box<dyn Publication>, PeerError>;

    /// Creates a handle for `name`. Connecting is lazy; failures surface on call.
    fn connect(&self, name: &str) -> Arc<dyn PeerHandle>;
}
