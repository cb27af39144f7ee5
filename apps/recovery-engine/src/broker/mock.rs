//! Mock broker gateway for paper mode and testing.
//!
//! Returns simulated responses without making API calls. Fill behavior is
//! scriptable per [`FillMode`] so tests can hold a position open through
//! lower escalation levels and release it at a chosen level.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::models::{OrderSide, OrderStatus, OrderType};

use super::{
    BrokerError, BrokerGateway, BrokerPosition, OrderRequest, OrderSnapshot, OrderStatusReport,
    Quote,
};

/// How the mock fills submitted orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Every order fills immediately.
    #[default]
    FillAll,
    /// Only market orders fill; limit/stop orders rest unfilled.
    FillMarketOnly,
    /// Nothing fills; orders rest as accepted.
    FillNone,
}

#[derive(Debug, Default)]
struct MockState {
    positions: HashMap<String, BrokerPosition>,
    quotes: HashMap<String, Quote>,
    open_orders: HashMap<String, OrderSnapshot>,
    statuses: HashMap<String, OrderStatusReport>,
    submitted: Vec<OrderRequest>,
    canceled: Vec<String>,
    fill_mode: FillMode,
    fail_positions: bool,
    fail_submit: bool,
}

/// Mock broker gateway.
#[derive(Debug, Default)]
pub struct MockBrokerGateway {
    state: Mutex<MockState>,
    order_counter: AtomicU64,
}

impl MockBrokerGateway {
    /// Create a new mock gateway with no positions and no quotes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a broker-side position.
    pub fn set_position(&self, symbol: &str, qty: Decimal, avg_price: Decimal) {
        let mut state = self.lock();
        state.positions.insert(
            symbol.to_string(),
            BrokerPosition {
                symbol: symbol.to_string(),
                qty,
                avg_price,
            },
        );
    }

    /// Seed a quote.
    pub fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.lock()
            .quotes
            .insert(symbol.to_string(), Quote { bid, ask });
    }

    /// Change the fill behavior.
    pub fn set_fill_mode(&self, mode: FillMode) {
        self.lock().fill_mode = mode;
    }

    /// Make `get_open_positions` fail with a transport error.
    pub fn set_fail_positions(&self, fail: bool) {
        self.lock().fail_positions = fail;
    }

    /// Make `submit_order` fail with a transport error.
    pub fn set_fail_submit(&self, fail: bool) {
        self.lock().fail_submit = fail;
    }

    /// All orders submitted so far.
    #[must_use]
    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.lock().submitted.clone()
    }

    /// Market orders submitted so far.
    #[must_use]
    pub fn market_order_count(&self) -> usize {
        self.lock()
            .submitted
            .iter()
            .filter(|o| o.order_type == OrderType::Market)
            .count()
    }

    /// Number of cancel requests received.
    #[must_use]
    pub fn cancel_count(&self) -> usize {
        self.lock().canceled.len()
    }

    #[allow(clippy::expect_used)] // Mutex poisoning in the mock is unrecoverable
    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock poisoned")
    }

    /// Fill price for an order given the symbol's quote.
    fn fill_price(order: &OrderRequest, quote: Option<Quote>) -> Decimal {
        match order.order_type {
            OrderType::Limit | OrderType::StopLimit => {
                order.limit_price.unwrap_or(Decimal::ZERO)
            }
            OrderType::Market | OrderType::Stop => quote.map_or(Decimal::ZERO, |q| {
                // Aggressive side: buys lift the ask, sells hit the bid.
                match order.side {
                    OrderSide::Buy => q.ask,
                    OrderSide::Sell => q.bid,
                }
            }),
        }
    }
}

#[async_trait]
impl BrokerGateway for MockBrokerGateway {
    async fn get_open_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let state = self.lock();
        if state.fail_positions {
            return Err(BrokerError::Transport("position query failed".to_string()));
        }
        Ok(state.positions.values().cloned().collect())
    }

    async fn submit_order(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        let order_id = self.order_counter.fetch_add(1, Ordering::SeqCst);
        let broker_order_id = format!("mock-{order_id}");

        let mut state = self.lock();
        if state.fail_submit {
            return Err(BrokerError::Transport("submit failed".to_string()));
        }
        state.submitted.push(request.clone());

        let fills = match state.fill_mode {
            FillMode::FillAll => true,
            FillMode::FillMarketOnly => request.order_type == OrderType::Market,
            FillMode::FillNone => false,
        };

        if fills {
            let quote = state.quotes.get(&request.symbol).copied();
            let price = Self::fill_price(request, quote);
            state.statuses.insert(
                broker_order_id.clone(),
                OrderStatusReport {
                    broker_order_id: broker_order_id.clone(),
                    status: OrderStatus::Filled,
                    filled_qty: request.qty,
                    avg_fill_price: price,
                },
            );
            // A filled exit takes the position flat.
            state.positions.remove(&request.symbol);
        } else {
            state.statuses.insert(
                broker_order_id.clone(),
                OrderStatusReport {
                    broker_order_id: broker_order_id.clone(),
                    status: OrderStatus::Accepted,
                    filled_qty: Decimal::ZERO,
                    avg_fill_price: Decimal::ZERO,
                },
            );
            state.open_orders.insert(
                broker_order_id.clone(),
                OrderSnapshot {
                    broker_order_id: broker_order_id.clone(),
                    symbol: request.symbol.clone(),
                    side: request.side,
                    qty: request.qty,
                    order_type: request.order_type,
                    limit_price: request.limit_price,
                    stop_price: request.stop_price,
                    status: OrderStatus::Accepted,
                    submitted_at: Utc::now(),
                },
            );
        }

        Ok(broker_order_id)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.canceled.push(broker_order_id.to_string());
        state.open_orders.remove(broker_order_id);
        if let Some(status) = state.statuses.get_mut(broker_order_id) {
            if status.status.is_active() {
                status.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn get_order_status(
        &self,
        broker_order_id: &str,
    ) -> Result<OrderStatusReport, BrokerError> {
        self.lock()
            .statuses
            .get(broker_order_id)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(broker_order_id.to_string()))
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderSnapshot>, BrokerError> {
        Ok(self
            .lock()
            .open_orders
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        self.lock()
            .quotes
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::NotFound(symbol.to_string()))
    }

    fn gateway_name(&self) -> &'static str {
        "mock"
    }
}
