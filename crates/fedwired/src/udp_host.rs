//! UdpHost — the fedwire Host over a tokio UDP socket.
//!
//! transmit       — non-blocking `try_send_to` toward one peer. A full
//!                  socket buffer drops the chunk; delivery is best-effort.
//! schedule_after — a spawned tokio task that sleeps, then runs.
//! now            — wall-clock time since the UNIX epoch.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;

use fedwire_services::{Host, Task};

pub struct UdpHost {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    runtime: Handle,
    dropped: AtomicU64,
}

impl UdpHost {
    /// Must be called from inside a tokio runtime; scheduled tasks run on it.
    pub fn new(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            runtime: Handle::current(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Chunks that failed to leave the socket.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Host for UdpHost {
    fn transmit(&self, chunk: Bytes) {
        if let Err(e) = self.socket.try_send_to(&chunk, self.peer) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                peer = %self.peer,
                bytes = chunk.len(),
                error = %e,
                "chunk transmit failed, dropping"
            );
        }
    }

    fn schedule_after(&self, delay: Duration, task: Task) {
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }

    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Bind a UDP socket for chunk traffic with SO_REUSEADDR and, when
/// `recv_buffer_bytes` is non-zero, an enlarged receive buffer.
pub fn bind_socket(addr: SocketAddr, recv_buffer_bytes: usize) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    if recv_buffer_bytes > 0 {
        socket
            .set_recv_buffer_size(recv_buffer_bytes)
            .context("SO_RCVBUF")?;
    }
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&addr.into())
        .with_context(|| format!("bind({addr})"))?;

    UdpSocket::from_std(socket.into()).context("failed to register socket with tokio")
}

/// Unspecified address of the same family as `peer`, ephemeral port.
pub fn ephemeral_for(peer: SocketAddr) -> SocketAddr {
    match peer {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}
