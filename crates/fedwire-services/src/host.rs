//! Host — the runtime a fedwire endpoint is embedded in.
//!
//! The library never owns a socket or a clock. Everything that touches the
//! outside world goes through this trait, so the same sender runs over a
//! UDP socket in the daemon and over a virtual clock in tests.

use std::time::Duration;

use bytes::Bytes;

/// Deferred work handed to [`Host::schedule_after`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Host: Send + Sync + 'static {
    /// Put one encoded chunk on the link. Delivery is not guaranteed and
    /// failures are the host's to report.
    fn transmit(&self, chunk: Bytes);

    /// Run `task` once `delay` has elapsed on the host clock. Must not
    /// block the caller.
    fn schedule_after(&self, delay: Duration, task: Task);

    /// Current host time, measured from an epoch the host chooses.
    fn now(&self) -> Duration;
}
