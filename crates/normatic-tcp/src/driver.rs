//! TCP connection factory and transport

use std::any::Any;
use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use normatic_core::{ConnectionFactory, NormaticError, Result, TargetDescriptor, Transport};
use parking_lot::Mutex;

/// Opens TCP connections to the hosts of a target descriptor
///
/// Hosts are tried in the order they appear in the descriptor; the first one
/// that accepts wins. The connect timeout is enforced by the pool.
#[derive(Debug, Clone)]
pub struct TcpConnectionFactory {
    nodelay: bool,
}

impl TcpConnectionFactory {
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Enable or disable `TCP_NODELAY` on new sockets
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }
}

impl Default for TcpConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for TcpConnectionFactory {
    #[tracing::instrument(skip_all, fields(descriptor = %target))]
    async fn open(&self, target: &TargetDescriptor) -> Result<Arc<dyn Transport>> {
        let mut last_error: Option<io::Error> = None;

        for host in target.hosts() {
            match tokio::net::TcpStream::connect((host.host.as_str(), host.port)).await {
                Ok(stream) => {
                    stream.set_nodelay(self.nodelay)?;
                    // Stays non-blocking, which the liveness probes rely on
                    let stream = stream.into_std()?;
                    let transport = TcpTransport::new(stream)?;
                    tracing::debug!(peer = %transport.peer_addr(), "tcp connection established");
                    return Ok(Arc::new(transport));
                }
                Err(e) => {
                    tracing::debug!(host = %host, error = %e, "host refused connection");
                    last_error = Some(e);
                }
            }
        }

        let reason = match last_error {
            Some(e) => e.to_string(),
            None => "descriptor names no hosts".to_string(),
        };
        Err(NormaticError::unavailable(target.to_string(), reason))
    }
}

/// One TCP connection
///
/// Liveness is read off the socket without consuming anything: a one-byte
/// peek that would block means the peer is quiet and the connection is
/// healthy, buffered bytes mean a response is pending, and end-of-stream or
/// a socket error means the connection is dead.
pub struct TcpTransport {
    peer: SocketAddr,
    stream: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
}

enum Probe {
    Quiet,
    Pending,
    Dead,
}

impl TcpTransport {
    /// Wrap a connected, non-blocking stream
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            peer,
            stream: Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `f` against the open socket; `None` once the transport is closed
    pub fn with_stream<R>(&self, f: impl FnOnce(&TcpStream) -> R) -> Option<R> {
        self.stream.lock().as_ref().map(f)
    }

    fn probe(&self) -> Probe {
        let guard = self.stream.lock();
        let Some(stream) = guard.as_ref() else {
            return Probe::Dead;
        };

        let mut buf = [0u8; 1];
        match stream.peek(&mut buf) {
            Ok(0) => Probe::Dead,
            Ok(_) => Probe::Pending,
            Err(e) if e.kind() == ErrorKind::WouldBlock => Probe::Quiet,
            Err(e) if e.kind() == ErrorKind::Interrupted => Probe::Quiet,
            Err(e) => {
                tracing::trace!(peer = %self.peer, error = %e, "socket probe failed");
                Probe::Dead
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn is_healthy(&self) -> bool {
        !self.is_closed() && !matches!(self.probe(), Probe::Dead)
    }

    fn has_pending_data(&self) -> bool {
        !self.is_closed() && matches!(self.probe(), Probe::Pending)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let Some(stream) = self.stream.lock().take() else {
            return Ok(());
        };

        match stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(NormaticError::Io(e)),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
