//! Strategy callbacks driven once per bar.

use crate::broker::Broker;
use crate::order::OrderRequest;
use barsim_core::{PriceField, Result};

/// A trading strategy. Called once per bar, after the bar is revealed and
/// before the broker settles it.
pub trait Strategy {
    fn on_bar(&mut self, broker: &mut Broker) -> Result<()>;
}

impl<F> Strategy for F
where
    F: FnMut(&mut Broker) -> Result<()>,
{
    fn on_bar(&mut self, broker: &mut Broker) -> Result<()> {
        self(broker)
    }
}

/// Simple moving average. Until `period` values are available, each point
/// averages the values seen so far.
pub fn sma(period: usize, values: &[f64]) -> Vec<f64> {
    let period = period.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        let count = if i >= period {
            sum -= values[i - period];
            period
        } else {
            i + 1
        };
        out.push(sum / count as f64);
    }
    out
}

/// Buys when a bar opens below its close-price SMA and closes above it;
/// sells on the mirror cross.
#[derive(Debug, Clone)]
pub struct CloseOverSma {
    pub period: usize,
}

impl CloseOverSma {
    pub fn new(period: usize) -> Self {
        Self { period }
    }
}

impl Strategy for CloseOverSma {
    fn on_bar(&mut self, broker: &mut Broker) -> Result<()> {
        let closes = broker.data().prices(PriceField::Close);
        let (Some(&ma), Some(bar)) = (sma(self.period, &closes).last(), broker.data().last_bar())
        else {
            return Ok(());
        };
        let (open, close) = (bar.open, bar.close);

        if open < ma && close > ma {
            broker.buy(OrderRequest::new())?;
        }
        if open > ma && close < ma {
            broker.sell(OrderRequest::new())?;
        }
        Ok(())
    }
}
