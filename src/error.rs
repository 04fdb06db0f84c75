use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnakeError>;

#[derive(Debug, Error)]
pub enum SnakeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Parameter shapes of a checkpoint do not match the network they are loaded into.
    #[error("incompatible checkpoint: expected {expected}, found {found}")]
    IncompatibleCheckpoint { expected: String, found: String },

    #[error("insufficient samples: requested {requested}, available {available}")]
    InsufficientSamples { requested: usize, available: usize },

    #[error("network produced non-finite Q-values")]
    NonFiniteQ,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
