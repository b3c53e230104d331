//! Backtest simulator.
//!
//! Replays a bar series through a strategy and the broker, one bar at a
//! time: reveal the bar, let the strategy submit orders, settle.

use crate::broker::{BarOutcome, Broker};
use crate::metrics::{BacktestMetrics, MetricsCalculator};
use crate::strategy::Strategy;
use barsim_core::{Bar, BrokerConfig, Error, Result};
use serde::Serialize;
use tracing::{info, warn};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RunStatus {
    /// Every bar was settled.
    Completed,
    /// Equity fell to zero or below at `bar`; the run stopped there.
    Ruined { bar: usize, equity: f64 },
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    /// Number of bars settled.
    pub bars_processed: usize,
    /// Equity after the last settled bar.
    pub final_equity: f64,
}

impl RunReport {
    pub fn is_ruined(&self) -> bool {
        matches!(self.status, RunStatus::Ruined { .. })
    }
}

/// Backtest simulator state.
#[derive(Debug)]
pub struct BacktestSimulator {
    broker: Broker,
}

impl BacktestSimulator {
    /// Create a new backtest simulator over a non-empty bar series.
    pub fn new(bars: Vec<Bar>, config: BrokerConfig) -> Result<Self> {
        if bars.is_empty() {
            return Err(Error::no_data("bar series is empty"));
        }
        Ok(Self {
            broker: Broker::new(bars, config)?,
        })
    }

    /// Drive `strategy` over every remaining bar.
    ///
    /// Validation errors raised by the strategy or the broker abort the run.
    /// Account ruin ends it early with [`RunStatus::Ruined`].
    pub fn run<S: Strategy + ?Sized>(&mut self, strategy: &mut S) -> Result<RunReport> {
        if let Some(BarOutcome::Ruined { bar, equity }) = self.broker.ruin() {
            warn!(bar, equity, "account already ruined, nothing to run");
            return Ok(self.report(RunStatus::Ruined { bar, equity }));
        }
        info!(
            bars = self.broker.data().total_len(),
            cash = self.broker.cash(),
            "backtest started"
        );

        let mut status = RunStatus::Completed;
        while self.broker.advance() {
            strategy.on_bar(&mut self.broker)?;
            if let BarOutcome::Ruined { bar, equity } = self.broker.next()? {
                warn!(bar, equity, "backtest stopped on account ruin");
                status = RunStatus::Ruined { bar, equity };
                break;
            }
        }

        let report = self.report(status);
        info!(
            bars = report.bars_processed,
            equity = report.final_equity,
            closed_trades = self.broker.closed_trades().len(),
            "backtest finished"
        );
        Ok(report)
    }

    fn report(&self, status: RunStatus) -> RunReport {
        RunReport {
            status,
            bars_processed: self.broker.equities().len(),
            final_equity: self.broker.equities().last().copied().unwrap_or(self.broker.cash()),
        }
    }

    /// Calculate metrics over the bars settled so far.
    pub fn metrics(&self) -> BacktestMetrics {
        MetricsCalculator::new(self.broker.data().bars())
            .calculate(self.broker.equities(), self.broker.closed_trades())
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn broker_mut(&mut self) -> &mut Broker {
        &mut self.broker
    }
}
