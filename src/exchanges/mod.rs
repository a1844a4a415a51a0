//! Exchange implementations - simulated venue and protocol connector

pub mod connector;
pub mod simulated;

pub use connector::{Credentials, ExchangeConnector, FixTransport, Protocol, Transport, WebSocketTransport};
pub use simulated::SimulatedExchange;
