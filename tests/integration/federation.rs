use crate::*;

use fedwire_core::MergePolicy;
use fedwire_services::SharedMlBuffer;

/// Two clients send different updates for the same model; the aggregator
/// ends up with their elementwise mean.
#[test]
fn test_two_senders_average() {
    let a = Node::new();
    let b = Node::new();
    let weights_a = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0]);
    let weights_b = Tensor::from_vec(vec![3.0f32, 2.0, 1.0, 0.0, -5.0]);
    a.send(&weights_a, 2, None);
    b.send(&weights_b, 2, None);

    let mut server = MlBuffer::new(MergePolicy::Average);
    deliver(&mut server, &a.flush());
    deliver(&mut server, &b.flush());

    assert_eq!(server.contributions(0), 2);
    assert_eq!(server.contributions(2), 2);
    assert_eq!(server.assemble().data(), &[2.0, 2.0, 2.0, 2.0, 0.0]);
}

/// Under update the last sender to arrive wins every slot.
#[test]
fn test_update_keeps_latest() {
    let a = Node::new();
    let b = Node::new();
    let old = random_tensor(64, 10);
    let new = random_tensor(64, 11);
    a.send(&old, 16, None);
    b.send(&new, 16, None);

    let mut server = MlBuffer::new(MergePolicy::Update);
    deliver(&mut server, &a.flush());
    deliver(&mut server, &b.flush());
    assert_eq!(server.assemble(), &new);
}

/// The running mean over many clients does not depend on arrival order.
#[test]
fn test_average_ignores_arrival_order() {
    let clients: Vec<OwnedTensor<f32>> = (0..5).map(|seed| random_tensor(40, 100 + seed)).collect();

    let mut expected = vec![0.0f32; 40];
    for c in &clients {
        for (e, x) in expected.iter_mut().zip(c.data()) {
            *e += x / clients.len() as f32;
        }
    }

    let node = Node::new();
    for c in &clients {
        node.send(c, 8, None);
    }
    node.host.shuffle_outbox(42);
    let mut server = MlBuffer::new(MergePolicy::Average);
    deliver(&mut server, &node.flush());

    for seq in 0..5 {
        assert_eq!(server.contributions(seq), 5);
    }
    assert_close(server.assemble().data(), &expected);
}

/// Integer models near the type's limits average without wrapping.
#[test]
fn test_integer_average_near_limits() {
    let a = Node::new();
    let b = Node::new();
    a.sender
        .send(&Tensor::from_vec(vec![2_000_000_000i32, i32::MIN, 7]), 2, None)
        .unwrap();
    b.sender
        .send(&Tensor::from_vec(vec![2_000_000_000i32, i32::MIN, -8]), 2, None)
        .unwrap();

    let mut server = MlBuffer::<i32>::new(MergePolicy::Average);
    for c in a.flush().iter().chain(&b.flush()) {
        server.receive(&c.bytes).unwrap();
    }
    // (7 - 8) / 2 truncates toward zero
    assert_eq!(server.assemble().data(), &[2_000_000_000, i32::MIN, 0]);
}

/// Federated rounds: aggregate, reset, aggregate again.
#[test]
fn test_consecutive_rounds() {
    let mut server = MlBuffer::new(MergePolicy::Average);
    let node = Node::new();

    node.send(&Tensor::from_vec(vec![2.0f32; 6]), 3, None);
    node.send(&Tensor::from_vec(vec![4.0f32; 6]), 3, None);
    deliver(&mut server, &node.flush());
    assert_eq!(server.assemble().data(), &[3.0; 6]);

    server.reset();
    node.send(&Tensor::from_vec(vec![10.0f32; 6]), 3, None);
    deliver(&mut server, &node.flush());
    assert_eq!(server.assemble().data(), &[10.0; 6]);
    assert_eq!(server.contributions(0), 1);
}

/// Several receive tasks feeding one shared aggregator.
#[tokio::test]
async fn test_shared_aggregator_across_tasks() {
    let server = SharedMlBuffer::<f32>::new(MergePolicy::Average);
    let clients: Vec<OwnedTensor<f32>> = (0..4)
        .map(|i| Tensor::from_vec(vec![i as f32 * 2.0; 12]))
        .collect();

    let mut tasks = Vec::new();
    for client in &clients {
        let node = Node::new();
        node.send(client, 5, None);
        let chunks = node.flush();
        let server = server.clone();
        tasks.push(tokio::spawn(async move {
            for c in chunks {
                server.receive(&c.bytes).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    // mean of 0, 2, 4, 6
    assert_close(server.assemble_complete().await.unwrap().data(), &[3.0; 12]);
    assert!(server.missing().await.is_empty());
}
