//! DUT side of the link: send one request, wait for the reply.

use crate::config::ConfigError;
use crate::error::ErrorCode;
use crate::link::{self, LinkError, LinkOptions};
use std::io;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Client failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request of {len} bytes exceeds the limit of {max} bytes")]
    RequestTooLong { len: usize, max: usize },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {0} timed out")]
    ConnectTimedOut(String),

    #[error("failed to send request: {0}")]
    Send(#[source] LinkError),

    #[error("failed to read response: {0}")]
    Receive(#[source] LinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::RequestTooLong { .. } => ErrorCode::RequestTooLong,
            ClientError::Connect { .. } | ClientError::ConnectTimedOut(_) => ErrorCode::ConnectFail,
            ClientError::Send(e) => e.write_code(),
            ClientError::Receive(e) => e.read_code(),
            ClientError::Config(e) => e.code(),
        }
    }
}

/// Reject requests longer than `max` bytes.
pub fn check_request_len(request: &str, max: usize) -> Result<(), ClientError> {
    if request.len() > max {
        return Err(ClientError::RequestTooLong {
            len: request.len(),
            max,
        });
    }
    Ok(())
}

/// Send `text` to the assist server and return its reply, sentinel removed.
pub async fn request(
    ip_address: &str,
    port: u16,
    text: &str,
    options: &LinkOptions,
) -> Result<String, ClientError> {
    let addr = format!("{ip_address}:{port}");
    let connect = TcpStream::connect((ip_address, port));
    let mut stream = match tokio::time::timeout(options.timeout, connect).await {
        Err(_) => return Err(ClientError::ConnectTimedOut(addr)),
        Ok(Err(source)) => return Err(ClientError::Connect { addr, source }),
        Ok(Ok(stream)) => stream,
    };
    info!(server = %addr, "Connected");

    link::send(&mut stream, text.as_bytes(), options)
        .await
        .map_err(ClientError::Send)?;
    debug!(len = text.len(), "Request sent");

    let reply = link::receive(&mut stream, options)
        .await
        .map_err(ClientError::Receive)?;
    debug!(len = reply.len(), "Reply received");

    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Shutdown after reply failed");
    }

    Ok(String::from_utf8_lossy(link::unseal(&reply)).into_owned())
}
