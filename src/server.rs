//! TCP server for the assist board.
//!
//! Accepts one connection at a time, serves its single request/response
//! exchange through the dispatcher, closes it and accepts the next.

use crate::dispatcher::Dispatcher;
use crate::error::ErrorCode;
use crate::link::Session;
use crate::services::Reservation;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Pending connections the kernel queues while one is being served.
pub const LISTEN_BACKLOG: i32 = 1;

/// Server startup and accept failures
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot resolve listen address {0}")]
    Address(String),

    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to configure socket: {0}")]
    SocketOption(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::Address(_) | ServerError::Bind { .. } => ErrorCode::BindFail,
            ServerError::Socket(_) => ErrorCode::CreateSocketFail,
            ServerError::SocketOption(_) => ErrorCode::SocketFail,
            ServerError::Listen(_) => ErrorCode::ListenFail,
            ServerError::Accept(_) => ErrorCode::AcceptFail,
        }
    }
}

/// Resolve `host:port` to the first socket address.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    (host, port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ServerError::Address(format!("{host}:{port}")))
}

/// Create a listening socket with SO_REUSEADDR and a backlog of one.
fn create_listener(addr: SocketAddr) -> Result<std::net::TcpListener, ServerError> {
    let socket = Socket::new(
        match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        },
        Type::STREAM,
        Some(Protocol::TCP),
    )
    .map_err(ServerError::Socket)?;

    socket
        .set_reuse_address(true)
        .map_err(ServerError::SocketOption)?;
    socket
        .set_nonblocking(true)
        .map_err(ServerError::SocketOption)?;
    socket
        .bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    socket.listen(LISTEN_BACKLOG).map_err(ServerError::Listen)?;

    Ok(socket.into())
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    reservation: Reservation,
}

impl Server {
    /// Bind the listener. Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr, dispatcher: Dispatcher) -> Result<Self, ServerError> {
        let listener = TcpListener::from_std(create_listener(addr)?).map_err(ServerError::Socket)?;
        info!(address = %addr, backlog = LISTEN_BACKLOG, "Server listening");

        Ok(Server {
            listener,
            dispatcher,
            reservation: Reservation::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn reservation(&self) -> Reservation {
        self.reservation
    }

    /// Accept one connection and serve its exchange.
    pub async fn serve_one(&mut self) -> Result<ErrorCode, ServerError> {
        let (mut stream, peer) = self.listener.accept().await.map_err(ServerError::Accept)?;
        debug!(peer = %peer, "New connection");

        let mut session = Session::new(peer);
        let code = self
            .dispatcher
            .serve(&mut stream, &mut session, &mut self.reservation)
            .await;

        if let Err(e) = stream.shutdown().await {
            debug!(
                peer = %peer,
                error = %e,
                code = %ErrorCode::SocketCloseFail,
                "Failed to shut down connection"
            );
        }

        info!(peer = %peer, code = code.as_i32(), elapsed = ?session.elapsed(), "Connection closed");
        Ok(code)
    }

    /// Serve connections until the process is stopped.
    pub async fn run(&mut self) {
        loop {
            match self.serve_one().await {
                Ok(code) if !code.is_success() => warn!(code = %code, "Exchange failed"),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }
    }
}
