use crate::*;

use fedwire_core::{MergePolicy, TensorError};
use fedwire_services::BufferState;

/// Empty → Accumulating → Assembled → Accumulating → Empty.
#[test]
fn test_buffer_state_machine() {
    let node = Node::new();
    node.send(&random_tensor(8, 1), 4, None);
    let chunks = node.flush();

    let mut rx = MlBuffer::<f32>::new(MergePolicy::Average);
    assert_eq!(rx.state(), BufferState::Empty);

    rx.receive(&chunks[0].bytes).unwrap();
    assert_eq!(rx.state(), BufferState::Accumulating);

    rx.assemble();
    assert_eq!(rx.state(), BufferState::Assembled);

    rx.receive(&chunks[1].bytes).unwrap();
    assert_eq!(rx.state(), BufferState::Accumulating);

    rx.reset();
    assert_eq!(rx.state(), BufferState::Empty);
}

/// Repeated assembly without new chunks returns the same tensor.
#[test]
fn test_assemble_is_idempotent() {
    let node = Node::new();
    node.send(&random_tensor(50, 2), 7, None);
    let mut rx = MlBuffer::new(MergePolicy::Average);
    deliver(&mut rx, &node.flush());

    let first = rx.assemble().clone();
    assert!(!rx.is_stale());
    let second = rx.assemble().clone();
    assert_eq!(first, second);
}

/// After reset, assembly yields the empty tensor and a new stride is
/// accepted.
#[test]
fn test_reset_clears_round() {
    let node = Node::new();
    node.send(&random_tensor(20, 3), 4, None);
    let mut rx = MlBuffer::new(MergePolicy::Update);
    deliver(&mut rx, &node.flush());
    rx.assemble();

    rx.reset();
    assert!(rx.assemble().is_empty());
    assert_eq!(rx.max_seq(), None);
    assert!(rx.missing().is_empty());

    let next = random_tensor(20, 4);
    node.send(&next, 6, None);
    assert!(deliver(&mut rx, &node.flush()).iter().all(|r| r.is_ok()));
    assert_eq!(rx.assemble(), &next);
}

/// `(a + b) - b == a` for tensors that survive a trip over the link.
#[test]
fn test_tensor_arithmetic_after_transfer() {
    let a = Tensor::from_vec((0..32).map(|i| (i * 3 - 40) as f32).collect());
    let b = Tensor::from_vec((0..32).map(|i| (i % 5) as f32 * 0.5).collect());

    let node = Node::new();
    node.send(&a, 8, None);
    let mut rx = MlBuffer::new(MergePolicy::Update);
    deliver(&mut rx, &node.flush());
    let received = rx.assemble();

    let round_trip = received.try_add(&b).unwrap().try_sub(&b).unwrap();
    assert_eq!(round_trip, a);
}

/// Copying past the end of the source is an out-of-range error.
#[test]
fn test_copy_from_out_of_range() {
    let source = random_tensor(10, 5);
    let mut window = Tensor::<f32>::zeros(4);
    assert_eq!(
        window.copy_from(&source, 8).unwrap_err(),
        TensorError::OutOfRange {
            start: 8,
            len: 4,
            source_len: 10
        }
    );
    window.copy_from(&source, 6).unwrap();
    assert_eq!(window.data(), &source.data()[6..]);
}
