use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Payload signature could not be verified")]
    SignatureInvalid,
    #[error("Payload reference not found: {0}")]
    ReferenceNotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Order #{0} was already submitted with the same payload")]
    DuplicateSubmission(u64),
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, IntakeError>;
