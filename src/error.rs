use thiserror::Error;

#[derive(Error, Debug)]
pub enum CasError {
    #[error("Request load failed: {0}")]
    RequestLoad(String),

    #[error("Conflict resolution rejected commit: {0}")]
    Conflict(String),

    #[error("Merkle build failed: {0}")]
    MerkleBuild(String),

    #[error("Ledger transaction failed: {0}")]
    Ledger(String),

    #[error("Proof publication failed: {0}")]
    ProofPublish(String),

    #[error("Anchor commit publication failed for stream {stream_id}: {reason}")]
    AnchorCommitPublish { stream_id: String, reason: String },

    #[error("Batch persistence failed: {0}")]
    Persist(String),

    #[error("Invalid witness: {0}")]
    InvalidWitness(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CasError>;
