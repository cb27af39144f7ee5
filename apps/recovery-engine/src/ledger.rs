//! Position ledger: the bot's own record of open positions.
//!
//! Shared between the reconciler, the stuck-position monitor, and the
//! emergency exit executor via `Arc`. The broker's reported state always
//! wins over this ledger on conflict.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use rust_decimal::Decimal;

use crate::models::{Direction, ExitAttempt, ExitAttemptState, Position};

/// Concurrency-safe store of tracked positions, keyed by symbol.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: RwLock<HashMap<String, Position>>,
}

impl PositionLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all tracked positions.
    #[must_use]
    pub fn get_all(&self) -> Vec<Position> {
        self.positions
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a position by symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions
            .read()
            .ok()
            .and_then(|p| p.get(symbol).cloned())
    }

    /// Insert or overwrite a position from broker-reported values.
    ///
    /// Used both by fills and by reconciliation's sync-from-broker path.
    /// An existing entry keeps its `opened_at`, strategy tag, and exit
    /// history; only quantity, direction, and entry price are replaced.
    pub fn upsert(&self, symbol: &str, qty: Decimal, avg_price: Decimal) {
        let Ok(mut positions) = self.positions.write() else {
            return;
        };
        match positions.get_mut(symbol) {
            Some(existing) => {
                existing.qty = qty;
                existing.direction = Direction::from_qty(qty);
                existing.entry_price = avg_price;
            }
            None => {
                positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        qty,
                        direction: Direction::from_qty(qty),
                        entry_price: avg_price,
                        unrealized_pnl: Decimal::ZERO,
                        opened_at: Utc::now(),
                        strategy: None,
                        last_exit: None,
                    },
                );
            }
        }
    }

    /// Insert a fully-specified position (fills, tests).
    pub fn insert(&self, position: Position) {
        if let Ok(mut positions) = self.positions.write() {
            positions.insert(position.symbol.clone(), position);
        }
    }

    /// Remove a position from the ledger.
    pub fn clear(&self, symbol: &str) {
        if let Ok(mut positions) = self.positions.write() {
            positions.remove(symbol);
        }
    }

    /// Update unrealized P&L for a symbol.
    pub fn set_unrealized_pnl(&self, symbol: &str, pnl: Decimal) {
        if let Ok(mut positions) = self.positions.write() {
            if let Some(position) = positions.get_mut(symbol) {
                position.unrealized_pnl = pnl;
            }
        }
    }

    /// Record a newly submitted exit attempt for a symbol.
    pub fn record_exit_attempt(&self, symbol: &str, attempt: ExitAttempt) {
        if let Ok(mut positions) = self.positions.write() {
            if let Some(position) = positions.get_mut(symbol) {
                position.last_exit = Some(attempt);
            }
        }
    }

    /// Update the state of a symbol's most recent exit attempt.
    pub fn mark_exit_state(&self, symbol: &str, state: ExitAttemptState) {
        if let Ok(mut positions) = self.positions.write() {
            if let Some(attempt) = positions.get_mut(symbol).and_then(|p| p.last_exit.as_mut()) {
                attempt.state = state;
            }
        }
    }

    /// Number of tracked positions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.positions.read().map(|p| p.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderType;
    use rust_decimal_macros::dec;

    #[test]
    fn test_upsert_and_get() {
        let ledger = PositionLedger::new();
        ledger.upsert("ESZ6", dec!(2), dec!(5000.25));

        let position = ledger.get("ESZ6").unwrap();
        assert_eq!(position.qty, dec!(2));
        assert_eq!(position.direction, Direction::Long);
        assert_eq!(ledger.count(), 1);
    }

    #[test]
    fn test_upsert_overwrites_broker_fields_only() {
        let ledger = PositionLedger::new();
        let opened = Utc::now() - chrono::Duration::hours(2);
        ledger.insert(Position {
            symbol: "ESZ6".to_string(),
            qty: dec!(2),
            direction: Direction::Long,
            entry_price: dec!(5000),
            unrealized_pnl: dec!(-50),
            opened_at: opened,
            strategy: Some("breakout".to_string()),
            last_exit: None,
        });

        ledger.upsert("ESZ6", dec!(-1), dec!(5010));

        let position = ledger.get("ESZ6").unwrap();
        assert_eq!(position.qty, dec!(-1));
        assert_eq!(position.direction, Direction::Short);
        assert_eq!(position.entry_price, dec!(5010));
        assert_eq!(position.opened_at, opened);
        assert_eq!(position.strategy.as_deref(), Some("breakout"));
    }

    #[test]
    fn test_clear() {
        let ledger = PositionLedger::new();
        ledger.upsert("NQZ6", dec!(1), dec!(18000));
        ledger.clear("NQZ6");
        assert!(ledger.get("NQZ6").is_none());
        assert_eq!(ledger.count(), 0);
    }

    #[test]
    fn test_set_unrealized_pnl() {
        let ledger = PositionLedger::new();
        ledger.upsert("ESZ6", dec!(2), dec!(5000));
        ledger.set_unrealized_pnl("ESZ6", dec!(-125.50));
        assert_eq!(ledger.get("ESZ6").unwrap().unrealized_pnl, dec!(-125.50));
    }

    #[test]
    fn test_exit_attempt_tracking() {
        let ledger = PositionLedger::new();
        ledger.upsert("ESZ6", dec!(2), dec!(5000));

        ledger.record_exit_attempt(
            "ESZ6",
            ExitAttempt {
                broker_order_id: "b-1".to_string(),
                order_type: OrderType::Limit,
                limit_price: Some(dec!(5001)),
                stop_price: None,
                submitted_at: Utc::now(),
                state: ExitAttemptState::Pending,
            },
        );
        ledger.mark_exit_state("ESZ6", ExitAttemptState::Rejected);

        let attempt = ledger.get("ESZ6").unwrap().last_exit.unwrap();
        assert_eq!(attempt.state, ExitAttemptState::Rejected);
        assert_eq!(attempt.broker_order_id, "b-1");
    }
}
