//! TCP listener binding and release tracking.
//!
//! # Responsibilities
//! - Bind an exclusive listening socket for an endpoint
//! - Report when a running accept loop has dropped its socket, so the same
//!   port can be bound again

use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// The operating environment refused a listening socket.
#[derive(Debug, thiserror::Error)]
#[error("failed to listen on {addr}: {source}")]
pub struct BindError {
    pub addr: SocketAddr,
    #[source]
    pub source: std::io::Error,
}

/// Bind `host:port`, returning the socket and its actual local address.
/// Port 0 asks the OS for an ephemeral port.
pub async fn bind(host: IpAddr, port: u16) -> Result<(TcpListener, SocketAddr), BindError> {
    let addr = SocketAddr::new(host, port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| BindError { addr, source })?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| BindError { addr, source })?;

    tracing::info!(address = %local_addr, "Listener bound");
    Ok((listener, local_addr))
}

/// A listener handed to an accept loop.
///
/// Dropping it (which the accept loop does as soon as it stops accepting)
/// closes the socket and resolves the paired [`Released`] future.
#[derive(Debug)]
pub struct ReleasingListener {
    inner: TcpListener,
    _released: oneshot::Sender<()>,
}

/// Resolves once the paired socket has been closed.
#[derive(Debug)]
pub struct Released(oneshot::Receiver<()>);

impl ReleasingListener {
    pub fn new(inner: TcpListener) -> (Self, Released) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner,
                _released: tx,
            },
            Released(rx),
        )
    }
}

impl Released {
    /// A release signal tied to an arbitrary owner instead of a listener.
    pub fn pair() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self(rx))
    }

    /// Wait until the socket is closed.
    pub async fn wait(self) {
        // The sender is never used; dropping it is the signal.
        let _ = self.0.await;
    }
}

impl axum::serve::Listener for ReleasingListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    fn accept(&mut self) -> impl std::future::Future<Output = (Self::Io, Self::Addr)> + Send {
        <TcpListener as axum::serve::Listener>::accept(&mut self.inner)
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn bind_ephemeral_port() {
        let (listener, local_addr) = bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await.unwrap();
        assert_ne!(local_addr.port(), 0);
        assert_eq!(listener.local_addr().unwrap(), local_addr);
    }

    #[tokio::test]
    async fn bind_taken_port_fails() {
        let (_first, first_addr) = bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await.unwrap();
        let port = first_addr.port();

        let err = bind(IpAddr::V4(Ipv4Addr::LOCALHOST), port).await.unwrap_err();
        assert_eq!(err.addr.port(), port);
        assert_eq!(err.source.kind(), std::io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn release_fires_on_drop() {
        let (inner, addr) = bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await.unwrap();
        let port = addr.port();
        let (listener, released) = ReleasingListener::new(inner);

        drop(listener);
        tokio::time::timeout(Duration::from_secs(1), released.wait())
            .await
            .expect("release should fire");

        bind(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
            .await
            .expect("port should be free again");
    }
}
