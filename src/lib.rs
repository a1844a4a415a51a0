//! hft-platform - Core Library
//! Order lifecycle, execution algorithms and risk controls against a simulated venue

// Public modules
pub mod core;
pub mod exchanges;
pub mod execution;
pub mod feeds;
pub mod monitoring;
pub mod risk;
pub mod strategies;

// Re-exports
pub use core::{Config, Error, Result};
