//! MlBuffer — one endpoint's view of a federated exchange.
//!
//! Holds the working tensor (what this node sends, and where assembled
//! results land) and the reassembly state for the current round.
//!
//! State machine:
//!
//!   Empty ──receive──► Accumulating ──assemble──► Assembled
//!                          ▲                          │
//!                          └────────receive───────────┘
//!   any ──reset──► Empty
//!
//! `assemble` is cached: it only rebuilds the working tensor when a chunk
//! was accepted since the last call.

use fedwire_core::wire;
use fedwire_core::{DataRate, Element, MergePolicy, OwnedTensor, Tensor, TensorError};

use crate::host::Host;
use crate::reassembly::{ReassemblyBuffer, ReceiveError};
use crate::sender::{ChunkSender, SendError, SendHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Empty,
    Accumulating,
    Assembled,
}

pub struct MlBuffer<T: Element = f32> {
    policy: MergePolicy,
    tensor: OwnedTensor<T>,
    reassembly: ReassemblyBuffer<T>,
    stale: bool,
}

impl<T: Element> MlBuffer<T> {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            tensor: Tensor::new(),
            reassembly: ReassemblyBuffer::new(),
            stale: false,
        }
    }

    /// A buffer that refuses chunks of runs longer than `max_elements`.
    pub fn with_max_elements(policy: MergePolicy, max_elements: usize) -> Self {
        Self {
            reassembly: ReassemblyBuffer::with_max_elements(max_elements),
            ..Self::new(policy)
        }
    }

    /// Start from a copy of `tensor` as the working tensor.
    pub fn from_tensor(policy: MergePolicy, tensor: &Tensor<'_, T>) -> Self {
        let mut buffer = Self::new(policy);
        buffer.tensor = tensor.to_owned_tensor();
        buffer
    }

    /// Build the working tensor from several memory regions laid end to
    /// end, e.g. the weights of each layer of a model.
    pub fn gather(policy: MergePolicy, regions: &[&[T]]) -> Result<Self, TensorError> {
        let total = regions.iter().map(|r| r.len()).sum();
        let mut tensor = Tensor::with_capacity(total);
        for region in regions {
            tensor.append_slice(region)?;
        }
        let mut buffer = Self::new(policy);
        buffer.tensor = tensor;
        Ok(buffer)
    }

    pub fn set_tensor(&mut self, tensor: OwnedTensor<T>) {
        self.tensor = tensor;
    }

    /// The working tensor as it stands, without assembling.
    pub fn tensor(&self) -> &OwnedTensor<T> {
        &self.tensor
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: MergePolicy) {
        self.policy = policy;
    }

    // ── Receiving ─────────────────────────────────────────────────────────────

    /// Decode and merge one chunk. Returns the chunk's sequence number.
    /// On error nothing is changed.
    pub fn receive(&mut self, chunk: &[u8]) -> Result<u32, ReceiveError> {
        let decoded = wire::decode::<T>(chunk)?;
        let sequence = decoded.header.sequence();
        let count = self
            .reassembly
            .merge(self.policy, &decoded.header, decoded.tensor)?;
        self.stale = true;
        tracing::debug!(
            sequence,
            len = decoded.header.length(),
            contributions = count,
            policy = ?self.policy,
            "chunk merged"
        );
        Ok(sequence)
    }

    /// The assembled tensor. Missing sequences are zero-filled.
    pub fn assemble(&mut self) -> &OwnedTensor<T> {
        if self.stale {
            self.tensor = self.reassembly.assemble();
            self.stale = false;
        }
        &self.tensor
    }

    /// Like `assemble`, but refuses while any chunk of the run is missing,
    /// trailing chunks included.
    pub fn assemble_complete(&mut self) -> Result<&OwnedTensor<T>, ReceiveError> {
        let missing = self.reassembly.missing();
        if !missing.is_empty() {
            return Err(ReceiveError::Incomplete { missing });
        }
        Ok(self.assemble())
    }

    /// Assemble, then copy the result back out into `regions` in order.
    /// The regions must add up to exactly the assembled size.
    pub fn scatter(&mut self, regions: &mut [&mut [T]]) -> Result<(), TensorError> {
        let tensor = self.assemble();
        let total: usize = regions.iter().map(|r| r.len()).sum();
        if total != tensor.size() {
            return Err(TensorError::SizeMismatch {
                expected: tensor.size(),
                actual: total,
            });
        }
        let mut offset = 0;
        for region in regions.iter_mut() {
            let len = region.len();
            Tensor::view(&mut region[..]).copy_from(tensor, offset)?;
            offset += len;
        }
        Ok(())
    }

    /// Forget the current round and the working tensor.
    pub fn reset(&mut self) {
        self.reassembly.clear();
        self.tensor.clear();
        self.stale = false;
    }

    pub fn state(&self) -> BufferState {
        if self.stale {
            BufferState::Accumulating
        } else if self.reassembly.slot_count() == 0 {
            BufferState::Empty
        } else {
            BufferState::Assembled
        }
    }

    /// True when chunks arrived since the last `assemble`.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn max_seq(&self) -> Option<u32> {
        self.reassembly.max_seq()
    }

    pub fn contributions(&self, sequence: u32) -> u32 {
        self.reassembly.contributions(sequence)
    }

    pub fn slot_count(&self) -> usize {
        self.reassembly.slot_count()
    }

    pub fn missing(&self) -> Vec<u32> {
        self.reassembly.missing()
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Ship the working tensor through `sender`.
    pub fn send<H: Host>(
        &self,
        sender: &ChunkSender<H>,
        max_payload_elements: usize,
        rate: Option<DataRate>,
    ) -> Result<SendHandle, SendError> {
        sender.send(&self.tensor, max_payload_elements, rate)
    }
}
