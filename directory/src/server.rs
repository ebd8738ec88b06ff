//! Directory server: TCP front end over the shared name table

use crate::error::DirectoryError;
use crate::names::{NameError, NameTable};
use log::{debug, error, info, warn};
use shared::{read_frame_bytes, write_frame, DirectoryRequest, DirectoryResponse};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

/// Name service that players use to find each other
///
/// Each accepted connection gets its own task; the tasks share the name
/// table behind a read-write lock so lookups from many joining players can
/// proceed in parallel.
pub struct DirectoryServer {
    listener: TcpListener,
    names: Arc<RwLock<NameTable>>,
}

impl DirectoryServer {
    pub async fn bind(addr: &str) -> Result<Self, DirectoryError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Directory listening on {}", listener.local_addr()?);

        Ok(DirectoryServer {
            listener,
            names: Arc::new(RwLock::new(NameTable::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DirectoryError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn names(&self) -> Arc<RwLock<NameTable>> {
        Arc::clone(&self.names)
    }

    /// Serves until the process is killed
    pub async fn run(self) -> Result<(), DirectoryError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serves until the shutdown future resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), DirectoryError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Directory shutting down");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!("Directory connection from {}", addr);
                            let names = Arc::clone(&self.names);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, names).await {
                                    warn!("Directory connection from {} failed: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Error accepting directory connection: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(mut stream: TcpStream, names: Arc<RwLock<NameTable>>) -> io::Result<()> {
    while let Some(payload) = read_frame_bytes(&mut stream).await? {
        let response = match bincode::deserialize::<DirectoryRequest>(&payload) {
            Ok(request) => handle_request(request, &names).await,
            Err(e) => {
                warn!("Malformed directory request: {}", e);
                DirectoryResponse::Rejected {
                    reason: format!("malformed request: {}", e),
                }
            }
        };
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

/// Applies one request to the name table
pub async fn handle_request(
    request: DirectoryRequest,
    names: &RwLock<NameTable>,
) -> DirectoryResponse {
    match request {
        DirectoryRequest::Ping => DirectoryResponse::Pong,

        DirectoryRequest::Publish { name, addr } => {
            let mut names = names.write().await;
            match names.publish(&name, &addr) {
                Ok(()) => DirectoryResponse::Published,
                Err(NameError::AlreadyBound { name, addr }) => {
                    warn!("Refusing to publish {}: already bound to {}", name, addr);
                    DirectoryResponse::Conflict { name, addr }
                }
                Err(e) => DirectoryResponse::Rejected {
                    reason: e.to_string(),
                },
            }
        }

        DirectoryRequest::Unpublish { name } => {
            names.write().await.unpublish(&name);
            DirectoryResponse::Unpublished
        }

        DirectoryRequest::Lookup { prefix } => {
            let found = names.read().await.lookup(&prefix);
            debug!("Lookup {}* matched {} names", prefix, found.len());
            DirectoryResponse::Names(found)
        }

        DirectoryRequest::Resolve { name } => {
            DirectoryResponse::Address(names.read().await.resolve(&name))
        }
    }
}
