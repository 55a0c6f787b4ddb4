//! SimHost — a deterministic in-memory host with a virtual clock.
//!
//! Transmitted chunks land in an outbox stamped with the virtual time they
//! were sent at. Scheduled tasks wait in a time-ordered queue until
//! `run_until_idle` pops them, advancing the clock to each task's deadline.
//! Nothing here sleeps, so paced sends finish instantly in tests while the
//! recorded timings stay exact.
//!
//! Loss and reordering are opt-in and seeded, so every run is reproducible.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::host::{Host, Task};

/// A chunk that made it onto the simulated link.
#[derive(Debug, Clone)]
pub struct Delivered {
    /// Virtual time of the `transmit` call.
    pub at: Duration,
    pub bytes: Bytes,
}

pub struct SimHost {
    state: Mutex<SimState>,
}

struct SimState {
    clock: Duration,
    next_id: u64,
    queue: BinaryHeap<Scheduled>,
    outbox: Vec<Delivered>,
    loss: Option<Loss>,
    sent: u64,
    dropped: u64,
}

struct Loss {
    rate: f64,
    rng: StdRng,
}

struct Scheduled {
    at: Duration,
    id: u64,
    task: Task,
}

// Min-heap on (at, id): earliest deadline first, FIFO among equal deadlines.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.id).cmp(&(self.at, self.id))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.id) == (other.at, other.id)
    }
}

impl Eq for Scheduled {}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHost {
    /// A lossless host at virtual time zero.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                clock: Duration::ZERO,
                next_id: 0,
                queue: BinaryHeap::new(),
                outbox: Vec::new(),
                loss: None,
                sent: 0,
                dropped: 0,
            }),
        }
    }

    /// Drop each transmitted chunk with probability `rate` (clamped to
    /// [0, 1], NaN as 0), drawn from a generator seeded with `seed`.
    pub fn with_loss(rate: f64, seed: u64) -> Self {
        let host = Self::new();
        host.lock().loss = Some(Loss {
            rate: if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) },
            rng: StdRng::seed_from_u64(seed),
        });
        host
    }

    /// Run scheduled tasks in deadline order until the queue is empty.
    /// Tasks may schedule more tasks. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            // Never hold the lock while a task runs: tasks call back into
            // transmit and schedule_after.
            let next = {
                let mut state = self.lock();
                let popped = state.queue.pop();
                if let Some(scheduled) = &popped {
                    state.clock = state.clock.max(scheduled.at);
                }
                popped.map(|scheduled| scheduled.task)
            };
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Take every delivered chunk, in delivery order.
    pub fn drain(&self) -> Vec<Delivered> {
        std::mem::take(&mut self.lock().outbox)
    }

    /// Permute the chunks waiting in the outbox.
    pub fn shuffle_outbox(&self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.lock().outbox.shuffle(&mut rng);
    }

    /// Tasks still waiting in the scheduler.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Chunks handed to `transmit`, including dropped ones.
    pub fn sent(&self) -> u64 {
        self.lock().sent
    }

    /// Chunks the loss model discarded.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking task poisons nothing the simulation relies on.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Host for SimHost {
    fn transmit(&self, chunk: Bytes) {
        let mut state = self.lock();
        state.sent += 1;
        let lost = match state.loss.as_mut() {
            Some(loss) => loss.rng.gen_bool(loss.rate),
            None => false,
        };
        if lost {
            state.dropped += 1;
            return;
        }
        let at = state.clock;
        state.outbox.push(Delivered { at, bytes: chunk });
    }

    fn schedule_after(&self, delay: Duration, task: Task) {
        let mut state = self.lock();
        let at = state.clock + delay;
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push(Scheduled { at, id, task });
    }

    fn now(&self) -> Duration {
        self.lock().clock
    }
}
