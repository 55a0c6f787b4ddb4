//! fedwire integration test harness.
//!
//! Every test runs senders and receivers over a SimHost: a virtual clock
//! and an in-memory link. No sockets, no sleeping, no root. Loss and
//! reordering are seeded, so a failing test fails the same way every time.
//!
//!   cargo test --test integration

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fedwire_core::{DataRate, OwnedTensor, Tensor};
use fedwire_services::sim_host::Delivered;
use fedwire_services::{ChunkSender, MlBuffer, ReceiveError, SendHandle, SimHost};

mod faults;
mod federation;
mod lifecycle;
mod pacing;

// ── Harness ───────────────────────────────────────────────────────────────────

/// One sending node: a simulated host and a sender bound to it.
pub struct Node {
    pub host: Arc<SimHost>,
    pub sender: ChunkSender<SimHost>,
}

impl Node {
    pub fn new() -> Self {
        Self::over(SimHost::new())
    }

    /// A node whose link drops each chunk with probability `rate`.
    pub fn lossy(rate: f64, seed: u64) -> Self {
        Self::over(SimHost::with_loss(rate, seed))
    }

    fn over(host: SimHost) -> Self {
        let host = Arc::new(host);
        Self {
            sender: ChunkSender::new(host.clone()),
            host,
        }
    }

    pub fn send(&self, tensor: &Tensor<'_, f32>, k: usize, rate: Option<DataRate>) -> SendHandle {
        self.sender
            .send(tensor, k, rate)
            .expect("send should be accepted")
    }

    /// Let every scheduled dispatch run, then hand over what hit the link.
    pub fn flush(&self) -> Vec<Delivered> {
        self.host.run_until_idle();
        self.host.drain()
    }
}

/// Feed every chunk to `rx`, returning the per-chunk results.
pub fn deliver(rx: &mut MlBuffer<f32>, chunks: &[Delivered]) -> Vec<Result<u32, ReceiveError>> {
    chunks.iter().map(|c| rx.receive(&c.bytes)).collect()
}

/// A tensor of `n` values in [-1, 1), reproducible from `seed`.
pub fn random_tensor(n: usize, seed: u64) -> OwnedTensor<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Tensor::from_vec((0..n).map(|_| rng.gen_range(-1.0..1.0)).collect())
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "length differs");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < 1e-5, "element {i}: {a} != {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The harness itself: a one-chunk send lands on the link.
#[test]
fn test_harness_delivers() {
    let node = Node::new();
    let handle = node.send(&Tensor::from_vec(vec![1.0, 2.0]), 8, None);
    assert!(handle.is_complete());
    let chunks = node.flush();
    assert_eq!(chunks.len(), 1);

    let mut rx = MlBuffer::new(fedwire_core::MergePolicy::Update);
    assert_eq!(deliver(&mut rx, &chunks), vec![Ok(0)]);
}
