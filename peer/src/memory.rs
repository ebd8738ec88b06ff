//! In-process transport
//!
//! Every player sharing one [`MemoryNetwork`] can see and call every other.
//! Calls go straight into the target's [`Relay`], so the same inbox,
//! backpressure and shutdown rules apply as over TCP. Useful for running
//! many players in one test without sockets.

use crate::error::PeerError;
use crate::relay::Relay;
use crate::transport::{PeerHandle, Publication, Transport};
use async_trait::async_trait;
use log::{debug, info};
use shared::Request;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
struct NetworkState {
    reachable: bool,
    endpoints: BTreeMap<String, Arc<Relay>>,
}

/// Shared directory and switchboard for in-process players
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                reachable: true,
                endpoints: BTreeMap::new(),
            })),
        }
    }

    /// Simulates the directory going away; ping, lookup and publish then fail
    pub async fn set_reachable(&self, reachable: bool) {
        self.state.lock().await.reachable = reachable;
    }

    pub async fn names(&self) -> Vec<String> {
        self.state.lock().await.endpoints.keys().cloned().collect()
    }

    /// Drops an endpoint without any goodbye, as if its process died
    pub async fn crash(&self, name: &str) -> bool {
        self.state.lock().await.endpoints.remove(name).is_some()
    }

    async fn endpoint(&self, name: &str) -> Option<Arc<Relay>> {
        self.state.lock().await.endpoints.get(name).cloned()
    }

    async fn ensure_reachable(&self) -> Result<(), PeerError> {
        if self.state.lock().await.reachable {
            Ok(())
        } else {
            Err(PeerError::DiscoveryUnavailable(
                "in-memory directory is switched off".to_string(),
            ))
        }
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    async fn ping(&self) -> Result<(), PeerError> {
        self.ensure_reachable().await
    }

    async fn lookup(&self, prefix: &str) -> Result<Vec<String>, PeerError> {
        self.ensure_reachable().await?;
        let state = self.state.lock().await;
        Ok(state
            .endpoints
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn publish(
        &self,
        name: &str,
        relay: Arc<Relay>,
    ) -> Result<Box<dyn Publication>, PeerError> {
        self.ensure_reachable().await?;
        let mut state = self.state.lock().await;
        if state.endpoints.contains_key(name) {
            return Err(PeerError::IdentityConflict {
                name: name.to_string(),
            });
        }
        state.endpoints.insert(name.to_string(), relay);
        info!("Published {} in memory", name);

        Ok(Box::new(MemoryPublication {
            name: name.to_string(),
            network: self.clone(),
            active: true,
        }))
    }

    fn connect(&self, name: &str) -> Arc<dyn PeerHandle> {
        Arc::new(MemoryPeerHandle {
            name: name.to_string(),
            network: self.clone(),
        })
    }
}

#[derive(Debug)]
struct MemoryPeerHandle {
    name: String,
    network: MemoryNetwork,
}

#[async_trait]
impl PeerHandle for MemoryPeerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: Request) -> Result<(), PeerError> {
        debug!("{} -> {}", request.kind(), self.name);
        match self.network.endpoint(&self.name).await {
            Some(relay) => relay.handle(request).await,
            None => Err(PeerError::PeerUnreachable {
                peer: self.name.clone(),
                reason: "no such endpoint".to_string(),
            }),
        }
    }
}

struct MemoryPublication {
    name: String,
    network: MemoryNetwork,
    active: bool,
}

#[async_trait]
impl Publication for MemoryPublication {
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&mut self) -> Result<(), PeerError> {
        if self.active {
            self.active = false;
            self.network.crash(&self.name).await;
            info!("Withdrew {} from memory", self.name);
        }
        Ok(())
    }
}
