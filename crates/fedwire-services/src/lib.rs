//! fedwire-services — chunked tensor exchange on top of a pluggable host.
//!
//! The sending side fragments a tensor into chunks and paces them onto the
//! host's link. The receiving side merges chunks, per sequence slot, under
//! a federated merge policy and assembles them back into one tensor.

pub mod host;
pub mod ml_buffer;
pub mod reassembly;
pub mod sender;
pub mod shared;
pub mod sim_host;

pub use fedwire_core::MergePolicy;
pub use host::{Host, Task};
pub use ml_buffer::{BufferState, MlBuffer};
pub use reassembly::{ReassemblyBuffer, ReceiveError};
pub use sender::{ChunkPlan, ChunkSender, SendError, SendHandle};
pub use shared::{BufferSnapshot, SharedMlBuffer};
pub use sim_host::{Delivered, SimHost};
