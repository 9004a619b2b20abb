//! deferloop run loop - portable home-thread event loop
//!
//! This crate provides:
//! - A wait/drain [`RunLoop`] with signalable sources, pre-wait observers,
//!   and timers
//! - The [`HostLoop`] trait, the capability seam cross-thread clients
//!   schedule against
//! - [`LoopThread`], a dedicated loop thread with RAII shutdown
//!
//! # Architecture
//!
//! Each loop pass runs pending synchronous blocks, fires due timers,
//! services signaled sources, fires pre-wait observers, then sleeps until
//! the next timer deadline or an external wake. Producers interact with the
//! loop through a cloneable [`RunLoopHandle`], which implements [`HostLoop`].
//!
//! # Thread Safety
//!
//! All handle operations are callable from any thread. Handlers, observers,
//! timer callbacks, and synchronous blocks always execute on the loop's
//! home thread.

pub mod error;
pub mod hooks;
pub mod runloop;
pub mod timer;

pub use error::LoopError;
pub use hooks::{HostLoop, ObserverHandler, ObserverKey, SourceHandler, SourceKey};
pub use runloop::{LoopThread, RunLoop, RunLoopHandle};
pub use timer::{TimerFlags, TimerKey};
