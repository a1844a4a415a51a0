//! Core traits - Seams between the order layer and venues

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{Result, types::*};

/// Exchange trait - Core trading operations against one venue
///
/// Implementations report order state back as [`ExecutionReport`]s; the
/// acknowledgement of `place_order` may already carry an immediate fill.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Exchange name
    fn name(&self) -> &str;

    /// Submit an order, returning the venue's acknowledgement
    async fn place_order(&self, order: &Order) -> Result<ExecutionReport>;

    /// Cancel a working order
    async fn cancel_order(&self, order_id: &Uuid) -> Result<()>;

    /// Replace price/quantity of a working order (same id)
    async fn modify_order(&self, order: &Order) -> Result<()>;

    /// Venue's view of an order
    async fn get_order(&self, order_id: &Uuid) -> Result<Order>;

    /// Fetch current ticker
    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<Ticker>;
}
