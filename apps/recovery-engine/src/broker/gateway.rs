//! Broker gateway trait definition.

use async_trait::async_trait;

use super::{BrokerError, BrokerPosition, OrderRequest, OrderSnapshot, OrderStatusReport, Quote};

/// Trait for broker gateway integrations.
///
/// The broker is the source of truth: its reported state overrides the
/// local ledger on any conflict. All methods are network calls and are the
/// only suspension points in the recovery services.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Query all open positions.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker API call fails. Callers must treat a
    /// failure as "no data this tick", never as an empty position set.
    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Submit an order, returning the broker's order ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the order fails to submit (transport failure,
    /// rejection, rate limit). Submission success does not imply a fill.
    async fn submit_order(&self, request: &OrderRequest) -> Result<String, BrokerError>;

    /// Cancel a working order.
    ///
    /// Cancellation is not guaranteed: the order may already be filled or
    /// in a terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error if the cancel request cannot be submitted.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// Query current status of an order.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is unknown or the call fails.
    async fn get_order_status(&self, broker_order_id: &str)
    -> Result<OrderStatusReport, BrokerError>;

    /// Query working orders for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker API call fails.
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderSnapshot>, BrokerError>;

    /// Query the current top-of-book quote for a symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if no quote is available.
    async fn get_quote(&self, symbol: &str) -> Result<Quote, BrokerError>;

    /// Gateway name for logging.
    fn gateway_name(&self) -> &'static str;
}
