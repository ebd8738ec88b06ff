//! TCP transport backed by the directory service
//!
//! Publishing binds an ephemeral listener, registers its address with the
//! directory and spawns an accept loop. Each inbound connection carries one
//! or more length-prefixed [`Request`] frames; every frame is answered with
//! a [`Response`] once the relay has taken the request.
//!
//! Outbound handles resolve their peer's address on first use and open a
//! fresh connection per call, bounded by the configured call timeout.

use crate::config::PeerConfig;
use crate::error::PeerError;
use crate::relay::Relay;
use crate::transport::{PeerHandle, Publication, Transport};
use async_trait::async_trait;
use directory::DirectoryClient;
use log::{debug, error, info, warn};
use shared::{read_frame, read_frame_bytes, write_frame, Request, Response};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct TcpTransport {
    directory: DirectoryClient,
    bind_host: String,
    call_timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new(config: &PeerConfig) -> Self {
        Self {
            directory: DirectoryClient::new(config.directory_addr.clone(), config.lookup_timeout),
            bind_host: config.bind_host.clone(),
            call_timeout: config.call_timeout,
        }
    }

    pub fn directory(&self) -> &DirectoryClient {
        &self.directory
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn ping(&self) -> Result<(), PeerError> {
        Ok(self.directory.ping().await?)
    }

    async fn lookup(&self, prefix: &str) -> Result<Vec<String>, PeerError> {
        Ok(self.directory.lookup(prefix).await?)
    }

    async fn publish(
        &self,
        name: &str,
        relay: Arc<Relay>,
    ) -> Result<Box<dyn Publication>, PeerError> {
        let listener = TcpListener::bind((self.bind_host.as_str(), 0)).await?;
        let addr = listener.local_addr()?;
        self.directory.publish(name, &addr.to_string()).await?;
        info!("Serving {} on {}", name, addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, relay, shutdown_rx, name.to_string()));

        Ok(Box::new(TcpPublication {
            name: name.to_string(),
            directory: self.directory.clone(),
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }))
    }

    fn connect(&self, name: &str) -> Arc<dyn PeerHandle> {
        Arc::new(TcpPeerHandle {
            name: name.to_string(),
            directory: self.directory.clone(),
            call_timeout: self.call_timeout,
            addr: OnceCell::new(),
        })
    }
}

async fn serve(
    listener: TcpListener,
    relay: Arc<Relay>,
    mut shutdown: oneshot::Receiver<()>,
    name: String,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Listener for {} shutting down", name);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!("{} accepted connection from {}", name, peer_addr);
                    let relay = Arc::clone(&relay);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, relay).await {
                            warn!("Connection from {} ended with error: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, relay: Arc<Relay>) -> io::Result<()> {
    while let Some(payload) = read_frame_bytes(&mut stream).await? {
        let response = match bincode::deserialize::<Request>(&payload) {
            Ok(request) => {
                let kind = request.kind();
                match relay.handle(request).await {
                    Ok(()) => Response::Ack,
                    Err(e) => {
                        warn!("Rejected {} request: {}", kind, e);
                        Response::Rejected {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Failed to decode request: {}", e);
                Response::Rejected {
                    reason: format!("malformed request: {}", e),
                }
            }
        };
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

struct TcpPublication {
    name: String,
    directory: DirectoryClient,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl Publication for TcpPublication {
    fn name(&self) -> &str {
        &self.name
    }

    /// Unpublishes first so no new caller finds us, then stops the listener
    async fn shutdown(&mut self) -> Result<(), PeerError> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };

        let unpublished = self.directory.unpublish(&self.name).await;
        if let Err(e) = &unpublished {
            warn!("Failed to unpublish {}: {}", self.name, e);
        }

        let _ = shutdown.send(());
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Listener task for {} failed: {}", self.name, e);
            }
        }
        info!("Stopped serving {}", self.name);

        unpublished.map_err(PeerError::from)
    }
}

pub struct TcpPeerHandle {
    name: String,
    directory: DirectoryClient,
    call_timeout: Option<Duration>,
    addr: OnceCell<String>,
}

impl fmt::Debug for TcpPeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpPeerHandle")
            .field("name", &self.name)
            .field("addr", &self.addr.get())
            .finish()
    }
}

impl TcpPeerHandle {
    async fn resolve(&self) -> Result<String, PeerError> {
        self.addr
            .get_or_try_init(|| async {
                match self.directory.resolve(&self.name).await {
                    Ok(Some(addr)) => Ok(addr),
                    Ok(None) => Err(unreachable(&self.name, "name is not published")),
                    Err(e) => Err(unreachable(&self.name, e)),
                }
            })
            .await
            .cloned()
    }

    async fn exchange(&self, request: &Request) -> Result<Response, PeerError> {
        let addr = self.resolve().await?;
        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| unreachable(&self.name, e))?;
        write_frame(&mut stream, request)
            .await
            .map_err(|e| unreachable(&self.name, e))?;
        read_frame::<_, Response>(&mut stream)
            .await
            .map_err(|e| unreachable(&self.name, e))?
            .ok_or_else(|| unreachable(&self.name, "connection closed before reply"))
    }
}

#[async_trait]
impl PeerHandle for TcpPeerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: Request) -> Result<(), PeerError> {
        let kind = request.kind();
        let response = match self.call_timeout {
            Some(limit) => timeout(limit, self.exchange(&request))
                .await
                .map_err(|_| {
                    unreachable(&self.name, format!("{} timed out after {:?}", kind, limit))
                })??,
            None => self.exchange(&request).await?,
        };

        match response {
            Response::Ack => Ok(()),
            Response::Rejected { reason } => Err(PeerError::MalformedPayload(reason)),
        }
    }
}

fn unreachable(name: &str, reason: impl fmt::Display) -> PeerError {
    PeerError::PeerUnreachable {
        peer: name.to_string(),
        reason: reason.to_string(),
    }
}
