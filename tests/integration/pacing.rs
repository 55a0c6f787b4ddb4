use crate::*;

use std::time::Duration;

use fedwire_core::wire::HEADER_LEN;
use fedwire_services::Host;

fn send_times(chunks: &[Delivered]) -> Vec<Duration> {
    chunks.iter().map(|c| c.at).collect()
}

/// Consecutive chunks leave exactly one serialization time apart.
#[test]
fn test_pacing_gaps_match_rate() {
    let rate = DataRate::from_bps(1_000_000);
    let node = Node::new();
    node.send(&Tensor::<f32>::zeros(256), 64, Some(rate));
    let chunks = node.flush();

    let gap = rate.tx_time(HEADER_LEN + 64 * 4);
    assert_eq!(gap, Duration::from_micros(2_272));
    assert_eq!(
        send_times(&chunks),
        vec![Duration::ZERO, gap, gap * 2, gap * 3]
    );
}

/// The gap after a chunk is that chunk's own transmission time.
#[test]
fn test_gap_follows_previous_chunk() {
    let rate = DataRate::from_bps(64_000);
    let node = Node::new();
    node.send(&Tensor::<f32>::zeros(10), 4, Some(rate));
    let times = send_times(&node.flush());

    let full = rate.tx_time(HEADER_LEN + 16);
    assert_eq!(times, vec![Duration::ZERO, full, full * 2]);
}

/// Without a rate nothing is scheduled; the whole tensor leaves at once.
#[test]
fn test_unpaced_send_is_instant() {
    let node = Node::new();
    let handle = node.send(&random_tensor(1_000, 1), 10, None);
    assert!(handle.is_complete());
    assert_eq!(node.host.pending(), 0);
    assert!(send_times(&node.flush()).iter().all(|t| t.is_zero()));
}

/// A slow link never blocks the caller: send returns after the first chunk
/// and the rest waits on the host clock.
#[test]
fn test_send_returns_before_link_drains() {
    let rate = DataRate::from_bps(8);
    let node = Node::new();
    let handle = node.send(&Tensor::<f32>::zeros(3), 1, Some(rate));

    assert_eq!(handle.dispatched(), 1);
    assert!(!handle.is_complete());
    assert_eq!(node.host.now(), Duration::ZERO);

    node.host.run_until_idle();
    assert!(handle.is_complete());
    // 32-byte chunks at one byte per second
    assert_eq!(node.host.now(), Duration::from_secs(64));
}

/// Two nodes pace independently on their own clocks.
#[test]
fn test_independent_senders() {
    let fast = Node::new();
    let slow = Node::new();
    fast.send(&Tensor::<f32>::zeros(8), 2, Some(DataRate::from_bps(1_000_000)));
    slow.send(&Tensor::<f32>::zeros(8), 2, Some(DataRate::from_bps(1_000)));

    let fast_times = send_times(&fast.flush());
    let slow_times = send_times(&slow.flush());
    assert_eq!(fast_times.len(), 4);
    assert_eq!(slow_times.len(), 4);
    assert_eq!(slow_times[3], fast_times[3] * 1_000);
}
