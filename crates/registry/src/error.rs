use fusion_htlc_types::SwapKey;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("swap not found: {0}")]
    NotFound(SwapKey),

    #[error("duplicate swap key: {0}")]
    DuplicateId(SwapKey),

    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: SwapKey,
        expected: u64,
        actual: u64,
    },

    #[error("swap {0} is not in a terminal state")]
    NotTerminal(SwapKey),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),
}
