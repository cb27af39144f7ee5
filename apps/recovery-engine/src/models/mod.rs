//! Core domain models for the recovery engine.
//!
//! These types define the shared vocabulary between the reconciler, the
//! stuck-position monitor, and the emergency exit executor.

mod alert;
mod order;
mod position;

pub use alert::{StuckAlert, StuckClassification};
pub use order::{OrderSide, OrderStatus, OrderType};
pub use position::{Direction, ExitAttempt, ExitAttemptState, Position};
