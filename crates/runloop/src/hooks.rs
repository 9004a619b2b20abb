//! Host loop capability trait
//!
//! [`HostLoop`] is the seam between cross-thread clients and whatever event
//! loop owns the home thread. The portable [`RunLoop`](crate::RunLoop)
//! implements it; an embedder with its own native loop can provide the same
//! capabilities instead.

use slotmap::new_key_type;

use crate::error::LoopError;

new_key_type! {
    /// Key for registered sources
    pub struct SourceKey;

    /// Key for registered pre-wait observers
    pub struct ObserverKey;
}

/// Handler invoked on the loop thread when a signaled source is serviced
pub type SourceHandler = Box<dyn FnMut() + Send + 'static>;

/// Handler invoked on the loop thread before each wait
pub type ObserverHandler = Box<dyn FnMut() + Send + 'static>;

/// Capabilities a host event loop exposes to cross-thread clients
///
/// All methods are callable from any thread. Handlers and observers always
/// run on the loop's home thread.
pub trait HostLoop: Send + Sync {
    /// Register a source
    ///
    /// Pass `None` for a wake-only source that carries no handler.
    fn add_source(&self, handler: Option<SourceHandler>) -> SourceKey;

    /// Remove a source
    ///
    /// # Returns
    /// `true` if the key was registered
    fn remove_source(&self, key: SourceKey) -> bool;

    /// Mark a source ready to be serviced
    ///
    /// Signaling alone does not rouse a waiting loop; call
    /// [`wake`](Self::wake) as well to force a new pass.
    fn signal_source(&self, key: SourceKey);

    /// Register an observer fired before each wait
    fn add_pre_wait_observer(&self, handler: ObserverHandler) -> ObserverKey;

    /// Remove an observer
    ///
    /// # Returns
    /// `true` if the key was registered
    fn remove_observer(&self, key: ObserverKey) -> bool;

    /// Wake the loop if it is waiting
    ///
    /// Wakes are level-triggered: one delivered while the loop is busy is
    /// consumed by the next wait instead of being lost.
    fn wake(&self);

    /// Run a block on the home thread, blocking until it completes
    ///
    /// Runs the block inline when called from the home thread.
    fn run_sync(&self, block: Box<dyn FnOnce() + Send>) -> Result<(), LoopError>;

    /// Check if the calling thread is the loop's home thread
    fn is_home_thread(&self) -> bool;
}
