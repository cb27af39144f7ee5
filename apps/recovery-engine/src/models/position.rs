//! Position types owned by the position ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::OrderType;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Long position (positive quantity).
    Long,
    /// Short position (negative quantity).
    Short,
}

impl Direction {
    /// Derive direction from a signed quantity.
    #[must_use]
    pub fn from_qty(qty: Decimal) -> Self {
        if qty < Decimal::ZERO {
            Self::Short
        } else {
            Self::Long
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Outcome of the bot's most recent exit attempt for a position.
///
/// Written by the order path when an exit is submitted or its status
/// changes; read by the stuck-position monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitAttemptState {
    /// Exit order is working at the broker.
    Pending,
    /// Exit order failed to submit (transport error, venue outage).
    Failed,
    /// Exit order rejected by the broker.
    Rejected,
    /// Exit order filled.
    Filled,
}

/// Record of the most recent exit order submitted for a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitAttempt {
    /// Broker's order ID.
    pub broker_order_id: String,
    /// Order type used for the exit.
    pub order_type: OrderType,
    /// Limit price (if applicable).
    pub limit_price: Option<Decimal>,
    /// Stop price (if applicable).
    pub stop_price: Option<Decimal>,
    /// Submission timestamp.
    pub submitted_at: DateTime<Utc>,
    /// Current state of the attempt.
    pub state: ExitAttemptState,
}

/// A tracked open position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Contract symbol.
    pub symbol: String,
    /// Signed quantity (negative for short).
    pub qty: Decimal,
    /// Position direction.
    pub direction: Direction,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Unrealized P&L in account currency.
    pub unrealized_pnl: Decimal,
    /// When the position was opened.
    pub opened_at: DateTime<Utc>,
    /// Originating strategy tag, when known.
    pub strategy: Option<String>,
    /// Most recent exit attempt, when one has been made.
    pub last_exit: Option<ExitAttempt>,
}

impl Position {
    /// Unsigned remaining quantity.
    #[must_use]
    pub fn abs_qty(&self) -> Decimal {
        self.qty.abs()
    }

    /// Position age relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.opened_at)
    }
}
