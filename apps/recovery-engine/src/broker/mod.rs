//! Broker gateway seam.
//!
//! This module provides the boundary to the broker API consumed by the
//! recovery subsystem:
//! - Generic [`BrokerGateway`] trait for broker integrations
//! - Position, order, and quote types returned by the gateway
//! - [`MockBrokerGateway`] for paper mode and testing
//!
//! The wire transport behind a live gateway implementation is out of scope
//! here; the recovery services only depend on the trait.

mod gateway;
mod mock;
mod types;

pub use gateway::BrokerGateway;
pub use mock::{FillMode, MockBrokerGateway};
pub use types::{BrokerError, BrokerPosition, OrderRequest, OrderSnapshot, OrderStatusReport, Quote};
