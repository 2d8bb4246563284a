use crate::status::OrderStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timestamp parse error: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("Dispatch to {target} failed: {detail}")]
    DispatchFailure { target: String, detail: String },

    #[error("Engine '{engine}' is already running")]
    EngineBusy { engine: &'static str },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unrecognized {what}: '{raw}'")]
    Unrecognized { what: &'static str, raw: String },

    #[error("Carrier call '{operation}' failed: {detail}")]
    Carrier { operation: &'static str, detail: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type OpsResult<T> = Result<T, OpsError>;
