//! Configuration structures for the barsim system.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How an order carrying both a stop and a limit price behaves once its
/// stop has been hit.
///
/// Bars carry no intrabar tape, so there is no way to tell whether the stop
/// or the limit was reached first when both fall inside one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopLimitPolicy {
    /// A triggered stop fills as a market order on the same bar; the limit
    /// price is ignored.
    MarketOnStop,
    /// A triggered stop turns the order into a resting limit order.
    LimitAfterStop,
}

impl StopLimitPolicy {
    /// Policy used unless the configuration overrides it.
    pub const DEFAULT: StopLimitPolicy = StopLimitPolicy::MarketOnStop;
}

impl Default for StopLimitPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Broker configuration, fixed for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Starting capital.
    pub cash: f64,
    /// Default order size as a fraction of cash (0-1].
    pub order_size: f64,
    /// Margin fraction (0-1]. Reserved, not used by order matching.
    pub margin: f64,
    /// Commission fraction charged per trade. Reserved, not used by order matching.
    pub commission: f64,
    /// Fill market orders at the previous bar's close instead of the current bar's open.
    pub trade_on_close: bool,
    /// Keep a single entry order in flight: a new entry cancels pending
    /// entries and closes every open trade.
    pub exclusive_orders: bool,
    /// Treat order sizes as fractional units instead of whole units.
    pub fractional: bool,
    /// Stop-limit resolution when both prices are reachable.
    pub stop_limit_policy: StopLimitPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cash: 100_000.0,
            order_size: 0.03,
            margin: 1.0,
            commission: 0.0,
            trade_on_close: false,
            exclusive_orders: false,
            fractional: false,
            stop_limit_policy: StopLimitPolicy::DEFAULT,
        }
    }
}

impl BrokerConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !self.cash.is_finite() || self.cash <= 0.0 {
            return Err(Error::config(format!(
                "cash must be a positive amount, got {}",
                self.cash
            )));
        }
        if !(self.order_size > 0.0 && self.order_size <= 1.0) {
            return Err(Error::config(format!(
                "order_size must be within (0, 1], got {}",
                self.order_size
            )));
        }
        if !(self.margin > 0.0 && self.margin <= 1.0) {
            return Err(Error::config(format!(
                "margin must be within (0, 1], got {}",
                self.margin
            )));
        }
        if !(self.commission >= 0.0 && self.commission < 1.0) {
            return Err(Error::config(format!(
                "commission must be within [0, 1), got {}",
                self.commission
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BrokerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_relative_eq!(config.cash, 100_000.0);
        assert_relative_eq!(config.order_size, 0.03);
        assert!(!config.fractional);
        assert_eq!(config.stop_limit_policy, StopLimitPolicy::MarketOnStop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            BrokerConfig::from_json_str(r#"{ "cash": 10000.0, "trade_on_close": true }"#).unwrap();
        assert_relative_eq!(config.cash, 10_000.0);
        assert!(config.trade_on_close);
        assert_relative_eq!(config.order_size, 0.03);
    }

    #[test]
    fn test_fractional_fields_from_json() {
        let config = BrokerConfig::from_json_str(
            r#"{ "order_size": 0.1, "margin": 0.5, "commission": 0.002, "fractional": true }"#,
        )
        .unwrap();
        assert_relative_eq!(config.order_size, 0.1);
        assert_relative_eq!(config.margin, 0.5);
        assert_relative_eq!(config.commission, 0.002);
        assert!(config.fractional);
    }

    #[test]
    fn test_policy_from_json() {
        let config =
            BrokerConfig::from_json_str(r#"{ "stop_limit_policy": "LimitAfterStop" }"#).unwrap();
        assert_eq!(config.stop_limit_policy, StopLimitPolicy::LimitAfterStop);
    }

    #[test]
    fn test_invalid_order_size() {
        let config = BrokerConfig {
            order_size: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            BrokerConfig::from_json_str("{ cash: }"),
            Err(Error::Json(_))
        ));
    }
}
