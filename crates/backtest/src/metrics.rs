//! Backtest performance metrics.
//!
//! Calculates summary statistics from the per-bar equity curve and the
//! closed trades of a run.

use crate::trade::Trade;
use barsim_core::Bar;
use chrono::{DateTime, Duration, Utc};
use ordered_float::OrderedFloat;
use std::fmt;

/// Backtest performance metrics.
#[derive(Debug, Clone)]
pub struct BacktestMetrics {
    /// First bar timestamp.
    pub start: Option<DateTime<Utc>>,
    /// Last settled bar timestamp.
    pub end: Option<DateTime<Utc>>,
    /// Time between start and end.
    pub duration: Duration,
    /// Share of bars with an open trade (percent).
    pub exposure_pct: f64,
    /// Equity at the last settled bar.
    pub equity_final: f64,
    /// Highest equity.
    pub equity_peak: f64,
    /// Total return percentage.
    pub return_pct: f64,
    /// Buy & hold return over the same bars (percent).
    pub buy_hold_return_pct: f64,
    /// Maximum drawdown percentage (negative).
    pub max_drawdown_pct: f64,
    /// Average drawdown percentage over all bars (negative).
    pub avg_drawdown_pct: f64,
    /// Longest time spent below a previous peak.
    pub max_drawdown_duration: Duration,
    /// Average time spent below a previous peak.
    pub avg_drawdown_duration: Duration,
    /// Total number of closed trades.
    pub total_trades: u32,
    /// Win rate percentage.
    pub win_rate_pct: f64,
    /// Best trade return percentage.
    pub best_trade_pct: f64,
    /// Worst trade return percentage.
    pub worst_trade_pct: f64,
    /// Average trade return percentage.
    pub avg_trade_pct: f64,
    /// Longest trade.
    pub max_trade_duration: Duration,
    /// Average trade duration.
    pub avg_trade_duration: Duration,
    /// Profit factor (gross wins / gross losses).
    pub profit_factor: f64,
    /// Average P&L per trade in cash.
    pub expectancy: f64,
    /// Mean over standard deviation of per-bar equity returns.
    pub sharpe_ratio: f64,
}

impl Default for BacktestMetrics {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            duration: Duration::zero(),
            exposure_pct: 0.0,
            equity_final: 0.0,
            equity_peak: 0.0,
            return_pct: 0.0,
            buy_hold_return_pct: 0.0,
            max_drawdown_pct: 0.0,
            avg_drawdown_pct: 0.0,
            max_drawdown_duration: Duration::zero(),
            avg_drawdown_duration: Duration::zero(),
            total_trades: 0,
            win_rate_pct: 0.0,
            best_trade_pct: 0.0,
            worst_trade_pct: 0.0,
            avg_trade_pct: 0.0,
            max_trade_duration: Duration::zero(),
            avg_trade_duration: Duration::zero(),
            profit_factor: 0.0,
            expectancy: 0.0,
            sharpe_ratio: 0.0,
        }
    }
}

/// Metrics calculator.
pub struct MetricsCalculator<'a> {
    bars: &'a [Bar],
}

impl<'a> MetricsCalculator<'a> {
    /// Create a calculator over the bars of a run.
    pub fn new(bars: &'a [Bar]) -> Self {
        Self { bars }
    }

    /// Calculate metrics from the equity curve and closed trades.
    ///
    /// Only bars with a recorded equity are considered, so a run stopped
    /// early is measured up to its last settled bar.
    pub fn calculate(&self, equities: &[f64], trades: &[Trade]) -> BacktestMetrics {
        let n = equities.len().min(self.bars.len());
        if n == 0 {
            return BacktestMetrics::default();
        }
        let bars = &self.bars[..n];
        let equities = &equities[..n];

        let mut metrics = BacktestMetrics::default();

        let start = bars[0].datetime();
        let end = bars[n - 1].datetime();
        metrics.start = Some(start);
        metrics.end = Some(end);
        metrics.duration = end - start;

        // Equity
        metrics.equity_final = equities[n - 1];
        metrics.equity_peak = max_of(equities.iter().copied()).unwrap_or_default();
        if equities[0] != 0.0 {
            metrics.return_pct = (equities[n - 1] - equities[0]) / equities[0] * 100.0;
        }
        let (first_close, last_close) = (bars[0].close, bars[n - 1].close);
        if first_close != 0.0 {
            metrics.buy_hold_return_pct = (last_close - first_close) / first_close * 100.0;
        }

        // Drawdowns
        let drawdowns = drawdown_curve(equities);
        metrics.max_drawdown_pct = min_of(drawdowns.iter().copied()).unwrap_or_default() * 100.0;
        metrics.avg_drawdown_pct = mean(&drawdowns) * 100.0;
        let dd_durations = self.drawdown_durations(&drawdowns);
        metrics.max_drawdown_duration = dd_durations.iter().copied().max().unwrap_or_else(Duration::zero);
        metrics.avg_drawdown_duration = mean_duration(&dd_durations);

        // Sharpe over per-bar returns
        let returns: Vec<f64> = equities
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        if returns.len() >= 2 {
            let std_dev = std_dev(&returns);
            if std_dev > 0.0 {
                metrics.sharpe_ratio = mean(&returns) / std_dev;
            }
        }

        // Exposure
        let mut exposed = vec![false; n];
        for trade in trades {
            let exit = trade.exit_bar.unwrap_or(n - 1).min(n - 1);
            for slot in exposed.iter_mut().take(exit + 1).skip(trade.entry_bar) {
                *slot = true;
            }
        }
        metrics.exposure_pct = exposed.iter().filter(|e| **e).count() as f64 / n as f64 * 100.0;

        if trades.is_empty() {
            return metrics;
        }

        // Trades
        metrics.total_trades = trades.len() as u32;

        let mut gross_wins = 0.0;
        let mut gross_losses = 0.0;
        let mut wins = 0u32;
        let mut returns_pct = Vec::with_capacity(trades.len());
        let mut pnls = Vec::with_capacity(trades.len());
        let mut durations = Vec::with_capacity(trades.len());

        for trade in trades {
            let mark = trade.exit_price.unwrap_or(last_close);
            let pnl = trade.pnl(mark);
            if pnl > 0.0 {
                wins += 1;
                gross_wins += pnl;
            } else {
                gross_losses += pnl.abs();
            }
            pnls.push(pnl);
            returns_pct.push(trade.pnl_pct(mark));

            let exit = trade.exit_bar.unwrap_or(n - 1);
            if let (Some(entry_bar), Some(exit_bar)) =
                (self.bars.get(trade.entry_bar), self.bars.get(exit))
            {
                durations.push(exit_bar.datetime() - entry_bar.datetime());
            }
        }

        metrics.win_rate_pct = wins as f64 / metrics.total_trades as f64 * 100.0;
        metrics.best_trade_pct = max_of(returns_pct.iter().copied()).unwrap_or_default() * 100.0;
        metrics.worst_trade_pct = min_of(returns_pct.iter().copied()).unwrap_or_default() * 100.0;
        metrics.avg_trade_pct = mean(&returns_pct) * 100.0;
        metrics.max_trade_duration = durations.iter().copied().max().unwrap_or_else(Duration::zero);
        metrics.avg_trade_duration = mean_duration(&durations);
        metrics.expectancy = mean(&pnls);

        metrics.profit_factor = if gross_losses > 0.0 {
            gross_wins / gross_losses
        } else if gross_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        metrics
    }

    /// Durations of each completed stretch below a previous peak.
    fn drawdown_durations(&self, drawdowns: &[f64]) -> Vec<Duration> {
        let mut durations = Vec::new();
        let mut since: Option<DateTime<Utc>> = None;
        for (bar, dd) in self.bars.iter().zip(drawdowns) {
            match since {
                None if *dd < 0.0 => since = Some(bar.datetime()),
                Some(start) if *dd == 0.0 => {
                    durations.push(bar.datetime() - start);
                    since = None;
                }
                _ => {}
            }
        }
        durations
    }
}

/// Per-bar drawdown as a fraction of the running peak (0 or negative).
pub fn drawdown_curve(equities: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    equities
        .iter()
        .map(|&equity| {
            if equity >= peak {
                peak = equity;
                0.0
            } else if peak > 0.0 {
                equity / peak - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Arithmetic mean, 0 for an empty slice.
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    statrs::statistics::Statistics::mean(values)
}

/// Sample standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    statrs::statistics::Statistics::std_dev(values)
}

fn max_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.map(OrderedFloat).max().map(|v| v.0)
}

fn min_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.map(OrderedFloat).min().map(|v| v.0)
}

fn mean_duration(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::zero();
    }
    let total = durations.iter().fold(Duration::zero(), |acc, d| acc + *d);
    total / durations.len() as i32
}

impl fmt::Display for BacktestMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = |dt: Option<DateTime<Utc>>| {
            dt.map(|dt| dt.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        };
        let rows: [(&str, String); 22] = [
            ("Start", stamp(self.start)),
            ("End", stamp(self.end)),
            ("Duration", self.duration.to_string()),
            ("Exposure Time", format!("{:.2}%", self.exposure_pct)),
            ("Equity Final", format!("${:.2}", self.equity_final)),
            ("Equity Peak", format!("${:.2}", self.equity_peak)),
            ("Return", format!("{:.2}%", self.return_pct)),
            ("Buy & Hold Return", format!("{:.2}%", self.buy_hold_return_pct)),
            ("Max. Drawdown", format!("{:.2}%", self.max_drawdown_pct)),
            ("Avg. Drawdown", format!("{:.2}%", self.avg_drawdown_pct)),
            ("Max. Drawdown Duration", self.max_drawdown_duration.to_string()),
            ("Avg. Drawdown Duration", self.avg_drawdown_duration.to_string()),
            ("# Trades", self.total_trades.to_string()),
            ("Win Rate", format!("{:.2}%", self.win_rate_pct)),
            ("Best Trade", format!("{:.2}%", self.best_trade_pct)),
            ("Worst Trade", format!("{:.2}%", self.worst_trade_pct)),
            ("Avg. Trade", format!("{:.2}%", self.avg_trade_pct)),
            ("Max. Trade Duration", self.max_trade_duration.to_string()),
            ("Avg. Trade Duration", self.avg_trade_duration.to_string()),
            ("Profit Factor", format!("{:.2}", self.profit_factor)),
            ("Expectancy", format!("${:.2}", self.expectancy)),
            ("Sharpe Ratio", format!("{:.2}", self.sharpe_ratio)),
        ];
        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        for (label, value) in rows {
            writeln!(f, "{label:>width$}: {value}")?;
        }
        Ok(())
    }
}
