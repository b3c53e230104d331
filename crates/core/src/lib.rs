//! Core types and configuration for the barsim backtesting system.
//!
//! This crate provides shared types used across all other crates:
//! - Market data types (bars, sides, order and trade ids)
//! - Broker configuration
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::{BrokerConfig, StopLimitPolicy};
pub use error::{Error, Result};
pub use types::*;
