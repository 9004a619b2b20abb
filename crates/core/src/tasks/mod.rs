//! Macrotask queue system for home-thread execution
//!
//! Producers on any thread enqueue closures that later execute on the owning
//! loop's thread. Pending tasks drain in deadline-bounded passes so a deep
//! backlog never starves the loop's timers and synchronous blocks.
//!
//! # Example
//!
//! ```ignore
//! use deferloop_core::{add_task, init_primary_loop};
//! use deferloop_core::runloop::LoopThread;
//! use std::sync::Arc;
//!
//! // Install the loop the primary queue will attach to
//! let loop_thread = LoopThread::spawn("worker")?;
//! init_primary_loop(Arc::new(loop_thread.handle()))?;
//!
//! // Defer work from any thread
//! add_task(|| {
//!     tracing::info!("Running on the loop thread");
//! });
//! ```

pub mod bridge;
pub mod drain;
pub mod queue;

pub use bridge::{
    add_task, init_primary_loop, is_primary_loop_installed, primary_queue, try_primary_queue,
    BridgeError, MacrotaskQueue,
};
pub use drain::DEFAULT_DRAIN_BUDGET;
pub use queue::Task;
