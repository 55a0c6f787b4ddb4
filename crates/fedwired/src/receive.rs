//! Receive side — datagrams in, merged tensor out.
//!
//! `ChunkReceiver` reads datagrams and merges each one into the shared
//! buffer. Malformed or mismatched chunks are logged and dropped; the loop
//! only stops on shutdown or a socket error. `report_loop` periodically
//! assembles the buffer and logs where the round stands.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use fedwire_core::wire::MAX_DATAGRAM;
use fedwire_services::SharedMlBuffer;

use crate::delivery::DeliveryTracker;

pub struct ChunkReceiver {
    socket: Arc<UdpSocket>,
    buffer: SharedMlBuffer<f32>,
    tracker: DeliveryTracker,
    shutdown: broadcast::Receiver<()>,
}

impl ChunkReceiver {
    pub fn new(
        socket: Arc<UdpSocket>,
        buffer: SharedMlBuffer<f32>,
        tracker: DeliveryTracker,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            buffer,
            tracker,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        // Room for one byte past the largest legal chunk, so oversized
        // datagrams show up as a length mismatch instead of truncating.
        let mut buf = vec![0u8; MAX_DATAGRAM + 1];

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("chunk receiver shutting down");
                    return Ok(());
                }
                result = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = result.context("recv_from failed")?;
                    self.handle(&buf[..len], peer).await;
                }
            }
        }
    }

    async fn handle(&self, datagram: &[u8], peer: SocketAddr) {
        match self.buffer.receive(datagram).await {
            Ok(sequence) => {
                self.tracker.record(sequence, peer);
                tracing::trace!(
                    %peer,
                    sequence,
                    delivery_count = self.tracker.delivery_count(sequence),
                    contributors = self.tracker.contributors(sequence),
                    "chunk received"
                );
            }
            Err(e) => {
                tracing::warn!(%peer, len = datagram.len(), error = %e, "chunk rejected, discarding");
            }
        }
    }
}

/// Assemble every `every` and log a snapshot of the round.
pub async fn report_loop(buffer: SharedMlBuffer<f32>, tracker: DeliveryTracker, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        log_snapshot(&buffer, &tracker).await;
    }
}

pub async fn log_snapshot(buffer: &SharedMlBuffer<f32>, tracker: &DeliveryTracker) {
    let snapshot = buffer.snapshot().await;
    let tensor = buffer.assemble().await;
    tracing::info!(
        size = tensor.size(),
        slots = snapshot.slot_count,
        max_seq = ?snapshot.max_seq,
        missing = snapshot.missing.len(),
        "assembly snapshot"
    );
    tracker.print_stats();
}
