//! Error types for the protected-order trading system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid order intent: {0}")]
    Validation(String),

    #[error("Broker rejected request: {message}")]
    Broker { message: String },

    #[error("Broker unavailable: {message}")]
    BrokerUnavailable { message: String },

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("Insufficient market data: need at least {required} periods, got {supplied}")]
    InsufficientData { required: usize, supplied: usize },
}

impl Error {
    /// Whether the underlying call outcome is unknown (timeout/connect failure)
    /// and order state must be re-queried before any retry decision.
    pub fn is_unknown_outcome(&self) -> bool {
        match self {
            Error::BrokerUnavailable { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
