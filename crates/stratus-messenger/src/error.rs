use std::net::SocketAddr;

use stratus_core::ProbeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessengerError {
    #[error("cannot reach coordinator at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("io error talking to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("no reply from {0} in time")]
    Timeout(SocketAddr),

    #[error("reply of {got} bytes, expected {expected}")]
    ShortReply { expected: usize, got: usize },

    #[error("malformed reply: {0}")]
    Malformed(String),
}

impl From<MessengerError> for ProbeError {
    fn from(e: MessengerError) -> Self {
        match e {
            MessengerError::Timeout(_) => ProbeError::Timeout,
            MessengerError::ShortReply { .. } | MessengerError::Malformed(_) => {
                ProbeError::Malformed(e.to_string())
            }
            MessengerError::Connect { .. } | MessengerError::Io { .. } => {
                ProbeError::Unreachable(e.to_string())
            }
        }
    }
}
