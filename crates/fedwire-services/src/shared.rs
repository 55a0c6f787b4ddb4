//! SharedMlBuffer — an MlBuffer behind one async mutex.
//!
//! For hosts that receive on several tasks at once. One lock covers both
//! merging and assembly, so an assembled tensor never reflects half of a
//! merge.

use std::sync::Arc;

use tokio::sync::Mutex;

use fedwire_core::{Element, MergePolicy, OwnedTensor};

use crate::ml_buffer::MlBuffer;
use crate::reassembly::ReceiveError;

/// Point-in-time summary of a shared buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferSnapshot {
    pub slot_count: usize,
    pub max_seq: Option<u32>,
    pub missing: Vec<u32>,
    pub stale: bool,
}

pub struct SharedMlBuffer<T: Element = f32> {
    inner: Arc<Mutex<MlBuffer<T>>>,
}

impl<T: Element> Clone for SharedMlBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Element> SharedMlBuffer<T> {
    pub fn new(policy: MergePolicy) -> Self {
        Self::from_buffer(MlBuffer::new(policy))
    }

    pub fn from_buffer(buffer: MlBuffer<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffer)),
        }
    }

    pub async fn receive(&self, chunk: &[u8]) -> Result<u32, ReceiveError> {
        self.inner.lock().await.receive(chunk)
    }

    /// A copy of the assembled tensor.
    pub async fn assemble(&self) -> OwnedTensor<T> {
        self.inner.lock().await.assemble().clone()
    }

    pub async fn assemble_complete(&self) -> Result<OwnedTensor<T>, ReceiveError> {
        self.inner.lock().await.assemble_complete().cloned()
    }

    pub async fn reset(&self) {
        self.inner.lock().await.reset();
    }

    pub async fn missing(&self) -> Vec<u32> {
        self.inner.lock().await.missing()
    }

    pub async fn snapshot(&self) -> BufferSnapshot {
        let buffer = self.inner.lock().await;
        BufferSnapshot {
            slot_count: buffer.slot_count(),
            max_seq: buffer.max_seq(),
            missing: buffer.missing(),
            stale: buffer.is_stale(),
        }
    }
}
