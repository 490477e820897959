//! Error types for inventory operations.

use thiserror::Error;

/// Result type alias for inventory operations
pub type Result<T> = std::result::Result<T, InventoryError>;

/// Errors surfaced by the lot index, the dispatch operations and the
/// persistence codec. All of them are recoverable by the caller; a failed
/// operation leaves the inventory exactly as it was.
#[derive(Error, Debug)]
pub enum InventoryError {
    /// A lot with this expiry date already exists; the original is unchanged.
    #[error("a lot with expiry date {0} already exists")]
    DuplicateKey(u32),

    /// The referenced lot or order does not exist.
    #[error("{0}")]
    NotFound(&'static str),

    /// Dispatch would drive the lot's stock negative; nothing was mutated.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },

    /// An arena is out of free slots; the operation was aborted before any
    /// visible mutation.
    #[error("arena capacity exhausted")]
    AllocationFailure,

    /// The inventory file is truncated or malformed; nothing was loaded.
    #[error("corrupt inventory file: {0}")]
    CorruptPersistence(String),

    /// I/O errors from save/load plumbing.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl InventoryError {
    /// Create a corruption error with context
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptPersistence(msg.into())
    }
}
