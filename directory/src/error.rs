use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("directory request timed out after {0:?}")]
    Timeout(Duration),

    #[error("directory closed the connection without answering")]
    ConnectionClosed,

    #[error("name {name} already bound to {addr}")]
    Conflict { name: String, addr: String },

    #[error("directory rejected request: {0}")]
    Rejected(String),

    #[error("unexpected directory response: {0}")]
    UnexpectedResponse(String),
}
