//! deferloop core - macrotask scheduling
//!
//! This crate contains the macrotask queue: producers on any thread enqueue
//! closures that later execute on an owning loop's home thread, drained in
//! deadline-bounded passes that keep the loop responsive.
//!
//! # Re-exports
//!
//! This crate re-exports the run loop crate for convenience:
//! - [`runloop`] - The portable host loop and the [`HostLoop`] trait

use tracing::info;

// Re-export the run loop crate
pub use deferloop_runloop as runloop;

pub mod config;
pub mod tasks;

// Re-export commonly used items
pub use config::{ConfigError, ConfigResult, QueueConfig};
pub use tasks::{
    add_task, init_primary_loop, is_primary_loop_installed, primary_queue, try_primary_queue,
    BridgeError, MacrotaskQueue, Task, DEFAULT_DRAIN_BUDGET,
};

// Re-export loop types
pub use runloop::{HostLoop, LoopError, LoopThread, RunLoop, RunLoopHandle};

/// Log queue state at shutdown
///
/// Called by embedders that want a teardown marker in their logs. Tasks
/// still pending on the primary queue are reported, not executed.
pub fn shutdown() {
    match try_primary_queue() {
        Some(queue) => info!(
            "deferloop shutting down, {} tasks pending",
            queue.len()
        ),
        None => info!("deferloop shutting down"),
    }
}
