use crate::*;

use std::collections::BTreeSet;
use std::time::Duration;

use fedwire_core::wire::{self, decode};
use fedwire_core::{MergePolicy, WireError};

/// Chunks lost on the link leave zeros at exactly their offsets; everything
/// that arrived is in place, and every lost chunk is reported missing.
#[test]
fn test_loss_zero_fills_missing_chunks() {
    let k = 4;
    let node = Node::lossy(0.3, 9);
    let tensor = random_tensor(400, 5);
    node.send(&tensor, k, Some(DataRate::from_bps(1_000_000)));
    let chunks = node.flush();
    assert!(node.host.dropped() > 0);
    assert_eq!(chunks.len() as u64 + node.host.dropped(), 100);

    let arrived: BTreeSet<u32> = chunks
        .iter()
        .map(|c| decode::<f32>(&c.bytes).unwrap().header.sequence())
        .collect();
    let max_seq = *arrived.iter().next_back().unwrap();

    let mut rx = MlBuffer::new(MergePolicy::Average);
    deliver(&mut rx, &chunks);
    let expected_missing: Vec<u32> = (0..100).filter(|s| !arrived.contains(s)).collect();
    assert_eq!(rx.missing(), expected_missing);

    let assembled = rx.assemble().clone();
    assert_eq!(assembled.size(), max_seq as usize * k + k);
    for (i, &x) in assembled.data().iter().enumerate() {
        let seq = (i / k) as u32;
        if arrived.contains(&seq) {
            assert_eq!(x, tensor[i], "element {i} of received chunk {seq}");
        } else {
            assert_eq!(x, 0.0, "element {i} of lost chunk {seq}");
        }
    }

    assert_eq!(
        rx.assemble_complete().unwrap_err(),
        ReceiveError::Incomplete {
            missing: expected_missing
        }
    );
}

/// Losing the final, short chunk shrinks nothing in front of it, and the
/// strict assembly still notices it is gone.
#[test]
fn test_lost_tail_chunk() {
    let node = Node::new();
    let tensor = Tensor::from_vec((1..=10).map(|i| i as f32).collect());
    node.send(&tensor, 4, None);
    let mut chunks = node.flush();
    chunks.pop();

    let mut rx = MlBuffer::new(MergePolicy::Update);
    deliver(&mut rx, &chunks);
    assert_eq!(rx.missing(), vec![2]);
    assert_eq!(rx.assemble().data(), &tensor.data()[..8]);
    assert_eq!(
        rx.assemble_complete().unwrap_err(),
        ReceiveError::Incomplete { missing: vec![2] }
    );
}

/// Only the first chunk of a run arrives: everything after it is missing.
#[test]
fn test_only_first_chunk_arrives() {
    let node = Node::new();
    node.send(&random_tensor(10, 12), 4, None);
    let chunks = node.flush();

    let mut rx = MlBuffer::new(MergePolicy::Average);
    deliver(&mut rx, &chunks[..1]);
    assert_eq!(rx.missing(), vec![1, 2]);
    assert_eq!(rx.assemble().size(), 4);
    assert!(matches!(
        rx.assemble_complete(),
        Err(ReceiveError::Incomplete { .. })
    ));
}

/// Any arrival order reassembles to the same tensor.
#[test]
fn test_reordering_is_harmless() {
    let tensor = random_tensor(1_000, 6);
    for seed in 0..5 {
        let node = Node::new();
        node.send(&tensor, 32, None);
        node.host.shuffle_outbox(seed);
        let chunks = node.flush();

        let mut rx = MlBuffer::new(MergePolicy::Update);
        deliver(&mut rx, &chunks);
        assert_eq!(rx.assemble(), &tensor, "shuffle seed {seed}");
    }
}

/// Garbage, truncated and foreign chunks are rejected one by one and leave
/// every other slot untouched.
#[test]
fn test_malformed_chunks_are_isolated() {
    let node = Node::new();
    let tensor = random_tensor(12, 7);
    node.send(&tensor, 4, None);
    let good = node.flush();

    let mut bad_version = good[1].bytes.to_vec();
    bad_version[0] = 0x7f;
    let truncated = good[2].bytes.slice(..good[2].bytes.len() - 3);
    let wrong_dtype = wire::encode_slice(&[1.0f64; 4], 1, 4, 8, Duration::ZERO).unwrap();

    let mut rx = MlBuffer::<f32>::new(MergePolicy::Average);
    rx.receive(&good[0].bytes).unwrap();
    assert!(matches!(
        rx.receive(b"\x01\x01hello"),
        Err(ReceiveError::Malformed(WireError::Truncated { .. }))
    ));
    assert!(matches!(
        rx.receive(&bad_version),
        Err(ReceiveError::Malformed(WireError::UnknownVersion(0x7f)))
    ));
    assert!(matches!(
        rx.receive(&truncated),
        Err(ReceiveError::Malformed(WireError::LengthMismatch { .. }))
    ));
    assert!(matches!(
        rx.receive(&wrong_dtype),
        Err(ReceiveError::Malformed(WireError::DTypeMismatch { .. }))
    ));
    assert_eq!(rx.max_seq(), Some(0));
    assert_eq!(rx.slot_count(), 1);

    rx.receive(&good[1].bytes).unwrap();
    rx.receive(&good[2].bytes).unwrap();
    assert_eq!(rx.assemble(), &tensor);
    assert_eq!(rx.contributions(1), 1);
}

/// A sender using a different chunk size cannot corrupt the round.
#[test]
fn test_stride_mismatch_rejected() {
    let a = Node::new();
    let b = Node::new();
    let tensor = random_tensor(12, 8);
    a.send(&tensor, 4, None);
    b.send(&random_tensor(12, 9), 3, None);

    let mut rx = MlBuffer::new(MergePolicy::Average);
    deliver(&mut rx, &a.flush());
    let results = deliver(&mut rx, &b.flush());
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(ReceiveError::StrideMismatch { expected: 4, actual: 3 }))));
    assert_eq!(rx.assemble(), &tensor);
}

/// The same chunk delivered twice: idempotent under update, and a no-op
/// for the mean under average.
#[test]
fn test_duplicate_delivery() {
    let node = Node::new();
    let tensor = Tensor::from_vec(vec![0.25f32, 0.5, 0.75]);
    node.send(&tensor, 2, None);
    let chunks = node.flush();

    for policy in [MergePolicy::Update, MergePolicy::Average] {
        let mut rx = MlBuffer::new(policy);
        deliver(&mut rx, &chunks);
        deliver(&mut rx, &chunks);
        assert_eq!(rx.contributions(0), 2);
        assert_eq!(rx.assemble(), &tensor, "{policy:?}");
    }
}
