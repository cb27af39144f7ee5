//! Types crossing the broker gateway boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{OrderSide, OrderStatus, OrderType};

/// Errors from broker gateway operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport-level failure (network, timeout). Transient: callers retry
    /// on their own cadence and never escalate a level because of it.
    #[error("Broker transport error: {0}")]
    Transport(String),

    /// Order rejected by the broker.
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Order or symbol not found at the broker.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded.
    #[error("Rate limited")]
    RateLimited,
}

impl BrokerError {
    /// Whether the error is worth retrying on the caller's next tick.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RateLimited)
    }
}

/// A position as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    /// Contract symbol.
    pub symbol: String,
    /// Signed quantity (negative for short).
    pub qty: Decimal,
    /// Average entry price.
    pub avg_price: Decimal,
}

/// Top-of-book quote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
}

impl Quote {
    /// Midpoint price.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Bid/ask spread.
    #[must_use]
    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// An order submission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-assigned order ID.
    pub client_order_id: String,
    /// Contract symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Unsigned quantity.
    pub qty: Decimal,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price (limit and stop-limit orders).
    pub limit_price: Option<Decimal>,
    /// Stop price (stop and stop-limit orders).
    pub stop_price: Option<Decimal>,
}

/// A working order as reported by the broker's open-order query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    /// Broker's order ID.
    pub broker_order_id: String,
    /// Contract symbol.
    pub symbol: String,
    /// Order side.
    pub side: OrderSide,
    /// Unsigned quantity.
    pub qty: Decimal,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price (if applicable).
    pub limit_price: Option<Decimal>,
    /// Stop price (if applicable).
    pub stop_price: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
}

/// Status report for a single order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Broker's order ID.
    pub broker_order_id: String,
    /// Current status.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_qty: Decimal,
    /// Average fill price across fills.
    pub avg_fill_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quote_mid_and_spread() {
        let quote = Quote {
            bid: dec!(5000.00),
            ask: dec!(5000.50),
        };
        assert_eq!(quote.mid(), dec!(5000.25));
        assert_eq!(quote.spread(), dec!(0.50));
    }

    #[test]
    fn test_broker_error_transient() {
        assert!(BrokerError::Transport("timeout".to_string()).is_transient());
        assert!(BrokerError::RateLimited.is_transient());
        assert!(!BrokerError::Rejected("margin".to_string()).is_transient());
        assert!(!BrokerError::NotFound("ord-1".to_string()).is_transient());
    }
}
