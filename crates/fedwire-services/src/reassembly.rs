//! Reassembly — per-sequence slots merged under a federated policy.
//!
//! Every accepted chunk lands in the slot keyed by its sequence number.
//! Repeated arrivals for the same sequence (several peers contributing the
//! same fragment of a model) are combined by the [`MergePolicy`]:
//!
//!   Average — online mean, `slot = (slot * count + payload) / (count + 1)`
//!   Update  — last writer wins
//!
//! Assembly places slot `s` at element `s * stride`, where `stride` is the
//! sender's chunk size carried in every header. Sequences that never
//! arrived are left as zeros.
//!
//! Every header also carries the run's total element count, so `missing`
//! covers the whole run, lost trailing chunks included. Runs longer than
//! the buffer's element limit are refused outright.
//!
//! A chunk is fully validated before any state changes, so a rejected
//! chunk leaves slots, counts, stride and `max_seq` exactly as they were.

use std::collections::BTreeMap;

use fedwire_core::wire::ChunkHeader;
use fedwire_core::{Element, MergePolicy, OwnedTensor, Tensor, TensorError, WireError};

struct Slot<T: Element> {
    tensor: OwnedTensor<T>,
    count: u32,
}

pub struct ReassemblyBuffer<T: Element> {
    slots: BTreeMap<u32, Slot<T>>,
    max_seq: Option<u32>,
    stride: Option<u32>,
    total: Option<u32>,
    max_elements: usize,
}

impl<T: Element> Default for ReassemblyBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> ReassemblyBuffer<T> {
    pub fn new() -> Self {
        Self::with_max_elements(usize::MAX)
    }

    /// A buffer that refuses runs of more than `max_elements` elements.
    pub fn with_max_elements(max_elements: usize) -> Self {
        Self {
            slots: BTreeMap::new(),
            max_seq: None,
            stride: None,
            total: None,
            max_elements,
        }
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// Merge one decoded chunk. Returns the slot's contribution count.
    pub fn merge(
        &mut self,
        policy: MergePolicy,
        header: &ChunkHeader,
        payload: OwnedTensor<T>,
    ) -> Result<u32, ReceiveError> {
        let sequence = header.sequence();
        let stride = header.stride();
        let total = header.total();
        if total as usize > self.max_elements {
            return Err(ReceiveError::TooLarge {
                total,
                limit: self.max_elements,
            });
        }
        if let Some(expected) = self.stride {
            if expected != stride {
                return Err(ReceiveError::StrideMismatch {
                    expected,
                    actual: stride,
                });
            }
        }
        if let Some(expected) = self.total {
            if expected != total {
                return Err(ReceiveError::TotalMismatch {
                    expected,
                    actual: total,
                });
            }
        }

        let count = if let Some(slot) = self.slots.get_mut(&sequence) {
            slot.tensor = match policy {
                MergePolicy::Average => slot
                    .tensor
                    .try_mean_step(slot.count, &payload)
                    .map_err(|source| ReceiveError::Merge { sequence, source })?,
                MergePolicy::Update => payload,
            };
            slot.count += 1;
            slot.count
        } else {
            self.slots.insert(
                sequence,
                Slot {
                    tensor: payload,
                    count: 1,
                },
            );
            1
        };

        self.stride = Some(stride);
        self.total = Some(total);
        self.max_seq = Some(self.max_seq.map_or(sequence, |m| m.max(sequence)));
        Ok(count)
    }

    pub fn max_seq(&self) -> Option<u32> {
        self.max_seq
    }

    /// Stride of the current round, once a chunk has been accepted.
    pub fn stride(&self) -> Option<u32> {
        self.stride
    }

    /// Element count of the current round's run, once a chunk has been
    /// accepted.
    pub fn total(&self) -> Option<u32> {
        self.total
    }

    /// Chunks in the current round's run.
    pub fn chunk_count(&self) -> Option<u32> {
        match (self.total, self.stride) {
            (Some(total), Some(stride)) => Some(total.div_ceil(stride)),
            _ => None,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// How many chunks were merged into slot `sequence`.
    pub fn contributions(&self, sequence: u32) -> u32 {
        self.slots.get(&sequence).map_or(0, |slot| slot.count)
    }

    /// Sequences of the run that have no slot, including any after
    /// `max_seq`.
    pub fn missing(&self) -> Vec<u32> {
        match self.chunk_count() {
            Some(count) => (0..count).filter(|s| !self.slots.contains_key(s)).collect(),
            None => Vec::new(),
        }
    }

    /// Element count of the assembled tensor: every chunk before the last
    /// is a full stride, the last is as long as its slot (a full stride if
    /// the final chunk never arrived).
    pub fn assembled_len(&self) -> usize {
        let (Some(max), Some(stride)) = (self.max_seq, self.stride) else {
            return 0;
        };
        let stride = stride as usize;
        let last_len = self.slots.get(&max).map_or(stride, |slot| slot.tensor.size());
        max as usize * stride + last_len
    }

    /// Place every slot at `sequence * stride` in a fresh zeroed tensor.
    pub fn assemble(&self) -> OwnedTensor<T> {
        let Some(stride) = self.stride else {
            return Tensor::new();
        };
        let stride = stride as usize;
        let mut out = Tensor::zeros(self.assembled_len());
        let data = out.data_mut();
        for (&sequence, slot) in &self.slots {
            let offset = sequence as usize * stride;
            data[offset..offset + slot.tensor.size()].copy_from_slice(slot.tensor.data());
        }
        out
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.max_seq = None;
        self.stride = None;
        self.total = None;
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReceiveError {
    #[error("malformed chunk: {0}")]
    Malformed(#[from] WireError),

    #[error("chunk stride {actual} does not match this round's stride {expected}")]
    StrideMismatch { expected: u32, actual: u32 },

    #[error("chunk run of {actual} elements does not match this round's {expected}")]
    TotalMismatch { expected: u32, actual: u32 },

    #[error("chunk run of {total} elements exceeds the receiver limit of {limit}")]
    TooLarge { total: u32, limit: usize },

    #[error("cannot merge sequence {sequence}: {source}")]
    Merge {
        sequence: u32,
        #[source]
        source: TensorError,
    },

    #[error("assembly incomplete, missing sequences {missing:?}")]
    Incomplete { missing: Vec<u32> },
}
