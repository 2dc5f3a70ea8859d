//! Listening socket setup and sequential connection acceptance.
//!
//! The acceptor knows nothing about the protocol. Setup failures are fatal
//! to the process; per-connection accept failures are logged and skipped.

use crate::config::ListenSpec;
use std::io;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tracing::{debug, error};

/// Fatal listener setup errors
#[derive(Debug, thiserror::Error)]
pub enum AcceptorError {
    #[error("failed to resolve {spec}: {source}")]
    Resolution {
        spec: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to create socket for {addr}: {source}")]
    Socket {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// A bound listener handing out one established connection at a time.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Acceptor {
    /// Resolve `spec`, then bind and listen on the first address it yields.
    pub async fn bind(spec: &ListenSpec, backlog: i32) -> Result<Self, AcceptorError> {
        let addr = resolve(spec).await?;
        debug!(%spec, %addr, "Resolved listen address");

        let listener = create_listener(addr, backlog)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| AcceptorError::Socket { addr, source })?;
        let listener =
            TcpListener::from_std(listener).map_err(|source| AcceptorError::Socket { addr, source })?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next established connection.
    ///
    /// Accept failures are logged and the wait continues.
    pub async fn next_connection(&self) -> (TcpStream, SocketAddr) {
        loop {
            match self.listener.accept().await {
                Ok(connection) => return connection,
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }
    }
}

async fn resolve(spec: &ListenSpec) -> Result<SocketAddr, AcceptorError> {
    let resolution = |source: io::Error| AcceptorError::Resolution {
        spec: spec.to_string(),
        source,
    };

    lookup_host((spec.host.as_str(), spec.port))
        .await
        .map_err(resolution)?
        .next()
        .ok_or_else(|| resolution(io::Error::new(io::ErrorKind::NotFound, "no addresses found")))
}

/// Create a non-blocking listener with address reuse.
///
/// SO_REUSEPORT stays off so a single process owns the accept queue.
fn create_listener(addr: SocketAddr, backlog: i32) -> Result<std::net::TcpListener, AcceptorError> {
    let socket_error = |source: io::Error| AcceptorError::Socket { addr, source };

    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(socket_error)?;

    socket.set_reuse_address(true).map_err(socket_error)?;
    socket.set_nonblocking(true).map_err(socket_error)?;
    socket
        .bind(&addr.into())
        .map_err(|source| AcceptorError::Bind { addr, source })?;
    socket
        .listen(backlog)
        .map_err(|source| AcceptorError::Listen { addr, source })?;

    Ok(socket.into())
}
