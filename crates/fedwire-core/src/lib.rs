//! fedwire-core — tensors, the chunk wire format, rates and configuration.
//! All other fedwire crates depend on this one.

pub mod config;
pub mod element;
pub mod rate;
pub mod tensor;
pub mod wire;

pub use config::{FedwireConfig, MergePolicy};
pub use element::{DType, Element};
pub use rate::DataRate;
pub use tensor::{OwnedTensor, Tensor, TensorError};
pub use wire::{ChunkHeader, Decoded, WireError};
