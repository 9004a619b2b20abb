//! Error types for run loop operations

/// Error type for run loop operations
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The loop stopped before a submitted block could execute
    #[error("Run loop stopped before the block executed")]
    Stopped,

    /// The dedicated loop thread could not be created
    #[error("Failed to spawn loop thread: {0}")]
    Spawn(#[from] std::io::Error),
}
