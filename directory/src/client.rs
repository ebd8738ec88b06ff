//! Client side of the directory protocol
//!
//! Every request opens a fresh connection, sends one frame and waits for one
//! reply. The whole exchange is bounded by the client's timeout so that a
//! wedged directory cannot stall a joining player forever.

use crate::error::DirectoryError;
use shared::{read_frame, write_frame, DirectoryRequest, DirectoryResponse};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    addr: String,
    timeout: Duration,
}

impl DirectoryClient {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Checks the directory answers at all
    pub async fn ping(&self) -> Result<(), DirectoryError> {
        match self.request(DirectoryRequest::Ping).await? {
            DirectoryResponse::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn publish(&self, name: &str, addr: &str) -> Result<(), DirectoryError> {
        let request = DirectoryRequest::Publish {
            name: name.to_string(),
            addr: addr.to_string(),
        };
        match self.request(request).await? {
            DirectoryResponse::Published => Ok(()),
            DirectoryResponse::Conflict { name, addr } => {
                Err(DirectoryError::Conflict { name, addr })
            }
            other => Err(unexpected(other)),
        }
    }

    pub async fn unpublish(&self, name: &str) -> Result<(), DirectoryError> {
        let request = DirectoryRequest::Unpublish {
            name: name.to_string(),
        };
        match self.request(request).await? {
            DirectoryResponse::Unpublished => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Lists every published name starting with the prefix
    pub async fn lookup(&self, prefix: &str) -> Result<Vec<String>, DirectoryError> {
        let request = DirectoryRequest::Lookup {
            prefix: prefix.to_string(),
        };
        match self.request(request).await? {
            DirectoryResponse::Names(names) => Ok(names),
            other => Err(unexpected(other)),
        }
    }

    pub async fn resolve(&self, name: &str) -> Result<Option<String>, DirectoryError> {
        let request = DirectoryRequest::Resolve {
            name: name.to_string(),
        };
        match self.request(request).await? {
            DirectoryResponse::Address(addr) => Ok(addr),
            other => Err(unexpected(other)),
        }
    }

    async fn request(
        &self,
        request: DirectoryRequest,
    ) -> Result<DirectoryResponse, DirectoryError> {
        match timeout(self.timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(DirectoryError::Timeout(self.timeout)),
        }
    }

    async fn exchange(
        &self,
        request: &DirectoryRequest,
    ) -> Result<DirectoryResponse, DirectoryError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        write_frame(&mut stream, request).await?;
        read_frame::<_, DirectoryResponse>(&mut stream)
            .await?
            .ok_or(DirectoryError::ConnectionClosed)
    }
}

fn unexpected(response: DirectoryResponse) -> DirectoryError {
    match response {
        DirectoryResponse::Rejected { reason } => DirectoryError::Rejected(reason),
        other => DirectoryError::UnexpectedResponse(format!("{:?}", other)),
    }
}
