//! Error handling - Hierarchical errors shared by every layer

use thiserror::Error;
use uuid::Uuid;

use crate::core::types::OrderStatus;
use crate::risk::RiskError;

pub type Result<T> = std::result::Result<T, Error>;

/// Platform error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Venue rejected or failed a request
    #[error("Exchange error: {0}")]
    Exchange(String),

    /// Trading errors (bad quantity, over-fill, etc.)
    #[error("Trading error: {0}")]
    Trading(String),

    /// Pre-trade risk gate refused the order
    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    /// Compliance limit violated
    #[error("Compliance error: {0}")]
    Compliance(String),

    /// Operation not allowed in the order's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Lifecycle transition not allowed by the order state machine
    #[error("Invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// Connector used before `connect` or after `disconnect`
    #[error("Not connected")]
    NotConnected,

    /// Bounded queue is full
    #[error("Backpressure: {0}")]
    Backpressure(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
