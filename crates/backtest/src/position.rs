//! Aggregate view over open trades.

use crate::trade::Trade;
use barsim_core::Side;

/// Read-only net position, marked at a fixed price.
#[derive(Debug, Clone, Copy)]
pub struct Position<'a> {
    trades: &'a [Trade],
    mark: f64,
}

impl<'a> Position<'a> {
    pub fn new(trades: &'a [Trade], mark: f64) -> Self {
        Self { trades, mark }
    }

    /// Net size in units. Negative if the position is short.
    pub fn size(&self) -> f64 {
        self.trades.iter().map(|t| t.side.sign() * t.size).sum()
    }

    /// Unrealized profit (positive) or loss (negative) in cash units.
    pub fn pnl(&self) -> f64 {
        self.trades.iter().map(|t| t.pnl(self.mark)).sum()
    }

    /// Side of the net position, `None` when flat.
    pub fn side(&self) -> Option<Side> {
        let size = self.size();
        if size > 0.0 {
            Some(Side::Buy)
        } else if size < 0.0 {
            Some(Side::Sell)
        } else {
            None
        }
    }

    pub fn is_long(&self) -> bool {
        self.side() == Some(Side::Buy)
    }

    pub fn is_short(&self) -> bool {
        self.side() == Some(Side::Sell)
    }

    pub fn is_flat(&self) -> bool {
        self.side().is_none()
    }
}
