//! Error types for the barsim system.

use crate::types::{Side, TradeId};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the barsim system.
///
/// Every variant describes a defect in strategy code or run setup. Account
/// ruin is an expected terminal outcome and is reported through the run
/// status instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fractional size submitted while fractional sizing is disabled.
    #[error(
        "Can't evaluate fractional size ({size} > 1.00) unless fractional sizing is enabled"
    )]
    FractionalSize { size: f64 },

    /// A trigger or target price that is not a positive finite number.
    #[error("Invalid {field} price ({price}): must be finite and greater than 0")]
    InvalidPrice { field: &'static str, price: f64 },

    /// Stop loss / take profit on the wrong side of the reference price.
    #[error("{}", bracket_message(.side, .stop_loss, .price, .take_profit))]
    BracketOrdering {
        side: Side,
        stop_loss: Option<f64>,
        price: f64,
        take_profit: Option<f64>,
    },

    /// Attempt to reduce a trade by more than it holds.
    #[error("Size provided of {size} can't be greater than trade {trade} size {trade_size}")]
    ReduceExceedsTrade {
        trade: TradeId,
        size: f64,
        trade_size: f64,
    },

    /// Reference to a trade the broker does not hold.
    #[error("No trade found with id: {0}")]
    UnknownTrade(TradeId),

    /// Operation needs market data and none is available yet.
    #[error("No data: {0}")]
    NoData(String),

    /// Bars settled out of sequence (a bar skipped or settled twice).
    #[error("Settlement error: bar {bar} can't be settled, expected bar {expected}")]
    Settlement { bar: usize, expected: usize },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a no-data error.
    pub fn no_data(msg: impl Into<String>) -> Self {
        Error::NoData(msg.into())
    }
}

fn bracket_message(side: &Side, sl: &Option<f64>, price: &f64, tp: &Option<f64>) -> String {
    let (kind, cmp) = match side {
        Side::Buy => ("Long", '<'),
        Side::Sell => ("Short", '>'),
    };
    match (*sl, *tp) {
        (Some(sl), Some(tp)) => format!(
            "{kind} orders require: Stop Loss ({sl}) {cmp} Price ({price}) {cmp} Profit Target ({tp})"
        ),
        (Some(sl), None) => {
            format!("{kind} orders require: Stop Loss ({sl}) {cmp} Price ({price})")
        }
        (None, Some(tp)) => {
            format!("{kind} orders require: Price ({price}) {cmp} Profit Target ({tp})")
        }
        (None, None) => format!("{kind} order at price ({price}) has no stop loss or profit target"),
    }
}
