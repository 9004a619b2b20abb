//! Deadline-bounded drain passes
//!
//! A pass executes at most the tasks that were pending when it started and
//! stops early once its wall-clock budget is spent. Control then returns to
//! the loop, which runs its other work before the next pass.

use std::time::{Duration, Instant};

use super::queue::TaskFifo;

/// Default wall-clock budget for a single drain pass
pub const DEFAULT_DRAIN_BUDGET: Duration = Duration::from_millis(16);

/// Result of a single drain pass
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DrainStats {
    /// Tasks executed during the pass
    pub executed: usize,
    /// Tasks still pending when the pass ended
    pub remaining: usize,
    /// Wall-clock time the pass took
    pub elapsed: Duration,
}

/// Run one drain pass over `fifo` with the given budget
///
/// The pass quota is the number of tasks pending at entry, so tasks enqueued
/// while the pass runs always wait for a later pass. The budget is checked
/// after each task; the task that crosses the deadline finishes, then the
/// pass ends.
pub(crate) fn drain_until_deadline(fifo: &TaskFifo, budget: Duration) -> DrainStats {
    let quota = fifo.len();
    if quota == 0 {
        return DrainStats::default();
    }

    let start = Instant::now();
    let deadline = start + budget;
    let mut executed = 0;

    while executed < quota {
        let task = match fifo.pop() {
            Some(task) => task,
            None => break,
        };
        task();
        executed += 1;

        if Instant::now() >= deadline {
            break;
        }
    }

    let elapsed = start.elapsed();
    let remaining = fifo.len();

    if executed == 1 && elapsed >= budget {
        tracing::warn!(
            "Single task ran for {:?}, past the {:?} drain budget",
            elapsed,
            budget
        );
    }
    if remaining > 0 {
        tracing::trace!(
            "Drain pass ran {} tasks in {:?}, {} still pending",
            executed,
            elapsed,
            remaining
        );
    }

    DrainStats {
        executed,
        remaining,
        elapsed,
    }
}
