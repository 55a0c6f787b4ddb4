//! Delivery tracking — records which peers contributed which sequences.
//!
//! One counter per (sequence, peer) pair. Sequences are bounded by the
//! receiver's element limit, so the table cannot outgrow the run it
//! describes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;

/// Tracks accepted chunks per sequence and peer.
#[derive(Clone, Default)]
pub struct DeliveryTracker {
    // sequence -> peer -> accepted chunks
    deliveries: Arc<DashMap<u32, HashMap<SocketAddr, u32>>>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted chunk from a peer.
    pub fn record(&self, sequence: u32, peer: SocketAddr) {
        *self
            .deliveries
            .entry(sequence)
            .or_default()
            .entry(peer)
            .or_insert(0) += 1;
    }

    /// How many chunks were accepted for this sequence.
    pub fn delivery_count(&self, sequence: u32) -> u32 {
        self.deliveries
            .get(&sequence)
            .map(|peers| peers.values().sum())
            .unwrap_or(0)
    }

    /// Distinct peers that contributed to this sequence.
    pub fn contributors(&self, sequence: u32) -> usize {
        self.deliveries
            .get(&sequence)
            .map(|peers| peers.len())
            .unwrap_or(0)
    }

    /// Accepted chunks per peer.
    pub fn per_peer(&self) -> HashMap<SocketAddr, u32> {
        let mut counts = HashMap::new();
        for entry in self.deliveries.iter() {
            for (peer, chunks) in entry.value() {
                *counts.entry(*peer).or_insert(0) += chunks;
            }
        }
        counts
    }

    /// Log delivery stats: sequences merged from several peers, and
    /// sequences one peer sent more than once.
    pub fn print_stats(&self) {
        let mut merged_count = 0;
        let mut repeated_count = 0;
        let mut most_contributors = 0;

        for entry in self.deliveries.iter() {
            let contributors = entry.value().len();
            most_contributors = most_contributors.max(contributors);
            if contributors > 1 {
                merged_count += 1;
            } else if entry.value().values().any(|&chunks| chunks > 1) {
                repeated_count += 1;
            }
        }

        tracing::info!(
            sequences = self.deliveries.len(),
            multi_peer_sequences = merged_count,
            repeated_sequences = repeated_count,
            most_contributors,
            "delivery tracker stats"
        );

        for (peer, chunks) in self.per_peer() {
            tracing::info!(%peer, chunks, "  peer");
        }
    }
}
