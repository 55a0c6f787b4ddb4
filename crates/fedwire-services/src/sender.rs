//! Chunk sender — fragments a tensor and paces the chunks onto the host.
//!
//! A send is planned up front (chunk count, final chunk length) and then
//! driven by the host: the first chunk goes out immediately, and each
//! following chunk is scheduled `rate.tx_time(previous chunk)` later. The
//! caller is never blocked. Without a rate every chunk is dispatched in
//! the calling task.
//!
//! The run copies the tensor's elements, so the caller may reuse or drop
//! its tensor as soon as `send` returns.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use fedwire_core::wire::{self, HEADER_LEN, MAX_DATAGRAM};
use fedwire_core::{DataRate, Element, Tensor};

use crate::host::Host;

// ── Plan ──────────────────────────────────────────────────────────────────────

/// How a tensor of `total` elements splits into chunks of `stride`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: usize,
    stride: usize,
    chunk_count: u32,
    last_len: usize,
}

impl ChunkPlan {
    pub fn new(total: usize, max_payload_elements: usize) -> Result<Self, SendError> {
        if max_payload_elements == 0 {
            return Err(SendError::InvalidConfiguration(
                "max_payload_elements must be non-zero".into(),
            ));
        }
        if u32::try_from(max_payload_elements).is_err() {
            return Err(SendError::InvalidConfiguration(format!(
                "max_payload_elements {max_payload_elements} does not fit the stride field"
            )));
        }
        if total == 0 {
            return Err(SendError::EmptyTensor);
        }
        let total_u32 = u32::try_from(total).map_err(|_| {
            SendError::InvalidConfiguration(format!(
                "{total} elements do not fit the total field"
            ))
        })?;
        let chunk_count = total_u32.div_ceil(max_payload_elements as u32);
        let last_len = match total % max_payload_elements {
            0 => max_payload_elements,
            rem => rem,
        };

        Ok(Self {
            total,
            stride: max_payload_elements,
            chunk_count,
            last_len,
        })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Length of the final chunk: `total mod stride`, or `stride` when
    /// that is zero.
    pub fn last_len(&self) -> usize {
        self.last_len
    }

    /// Element range covered by chunk `seq`.
    pub fn range(&self, seq: u32) -> Range<usize> {
        let start = seq as usize * self.stride;
        let len = if seq + 1 == self.chunk_count {
            self.last_len
        } else {
            self.stride
        };
        start..start + len
    }

    /// Encoded size of the largest chunk of this plan for element type `T`.
    fn largest_chunk_bytes<T: Element>(&self) -> usize {
        HEADER_LEN + self.stride.min(self.total) * T::DTYPE.width()
    }
}

// ── Sender ────────────────────────────────────────────────────────────────────

pub struct ChunkSender<H: Host> {
    host: Arc<H>,
}

impl<H: Host> Clone for ChunkSender<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
        }
    }
}

impl<H: Host> ChunkSender<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    /// Fragment `tensor` into chunks of at most `max_payload_elements`
    /// and start dispatching them. Nothing is transmitted if the plan is
    /// rejected.
    pub fn send<T: Element>(
        &self,
        tensor: &Tensor<'_, T>,
        max_payload_elements: usize,
        rate: Option<DataRate>,
    ) -> Result<SendHandle, SendError> {
        let plan = ChunkPlan::new(tensor.size(), max_payload_elements)?;
        let largest = plan.largest_chunk_bytes::<T>();
        if largest > MAX_DATAGRAM {
            return Err(SendError::InvalidConfiguration(format!(
                "chunks of {max_payload_elements} {} elements need {largest} bytes, \
                 above the {MAX_DATAGRAM}-byte datagram limit",
                T::DTYPE.name()
            )));
        }

        let dispatched = Arc::new(AtomicU32::new(0));
        let run = Arc::new(SendRun {
            host: self.host.clone(),
            data: tensor.data().to_vec(),
            plan,
            rate: rate.filter(|r| !r.is_zero()),
            dispatched: dispatched.clone(),
        });

        tracing::debug!(
            dtype = T::DTYPE.name(),
            elements = plan.total(),
            chunks = plan.chunk_count(),
            stride = plan.stride(),
            last_len = plan.last_len(),
            rate = ?run.rate.map(|r| r.to_string()),
            "send planned"
        );

        dispatch_from(run, 0);

        Ok(SendHandle { plan, dispatched })
    }
}

/// State of one send, shared by the scheduled continuations.
struct SendRun<H: Host, T: Element> {
    host: Arc<H>,
    data: Vec<T>,
    plan: ChunkPlan,
    rate: Option<DataRate>,
    dispatched: Arc<AtomicU32>,
}

/// Dispatch chunk `seq` onward. Unpaced runs loop here; paced runs hand the
/// next chunk to the host scheduler and return.
fn dispatch_from<H: Host, T: Element>(run: Arc<SendRun<H, T>>, mut seq: u32) {
    let stride = run.plan.stride() as u32;
    let total = run.plan.total() as u32;
    while seq < run.plan.chunk_count() {
        let range = run.plan.range(seq);
        let chunk = match wire::encode_slice(&run.data[range], seq, stride, total, run.host.now()) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(sequence = seq, error = %e, "chunk encode failed, send aborted");
                return;
            }
        };
        let len = chunk.len();
        run.host.transmit(chunk);
        run.dispatched.fetch_add(1, Ordering::Release);
        tracing::trace!(sequence = seq, bytes = len, "chunk sent");

        seq += 1;
        if seq == run.plan.chunk_count() {
            break;
        }
        if let Some(rate) = run.rate {
            let next = run.clone();
            run.host
                .schedule_after(rate.tx_time(len), Box::new(move || dispatch_from(next, seq)));
            return;
        }
    }
    tracing::debug!(chunks = run.plan.chunk_count(), "send complete");
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Progress of a send. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SendHandle {
    plan: ChunkPlan,
    dispatched: Arc<AtomicU32>,
}

impl SendHandle {
    pub fn chunk_count(&self) -> u32 {
        self.plan.chunk_count()
    }

    pub fn last_chunk_len(&self) -> usize {
        self.plan.last_len()
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Chunks handed to the host so far.
    pub fn dispatched(&self) -> u32 {
        self.dispatched.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.dispatched() == self.plan.chunk_count()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("invalid send configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cannot send an empty tensor")]
    EmptyTensor,
}
