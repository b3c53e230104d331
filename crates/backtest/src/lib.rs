//! Bar-by-bar backtesting engine for the barsim system.
//!
//! This crate provides:
//! - A growing view over a historical bar series
//! - Order matching with stop, limit and contingent exit legs
//! - Trade lifecycle and cash / equity accounting
//! - A strategy driver and performance metrics

pub mod broker;
pub mod data;
pub mod metrics;
pub mod order;
pub mod position;
pub mod simulator;
pub mod strategy;
pub mod trade;

pub use broker::{BarOutcome, Broker};
pub use data::Data;
pub use metrics::{BacktestMetrics, MetricsCalculator};
pub use order::{Order, OrderRequest, StopLimitPolicy, TriggerState};
pub use position::Position;
pub use simulator::{BacktestSimulator, RunReport, RunStatus};
pub use strategy::{sma, CloseOverSma, Strategy};
pub use trade::{LegKind, Trade};
