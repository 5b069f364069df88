use std::path::PathBuf;

use thiserror::Error;

/// Failures while opening, reading or mutating a local trust store.
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// The store directory could not be opened or created.
    #[error("Failed to open trust store at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A certificate file in the store could not be read or parsed.
    #[error("Failed to read trust store entry {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// A certificate could not be persisted.
    #[error("Failed to write trust store entry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A mutation was attempted on a store opened read-only.
    #[error("Trust store was opened read-only")]
    ReadOnly,

    /// The store handle was used after being closed.
    #[error("Trust store is closed")]
    Closed,

    /// The home directory needed for the default store root is unknown.
    #[error("Unable to determine trust store root; set CERTVAULT_TRUST_STORE_DIR")]
    UnknownRoot,
}
