//! Trades (position lots) opened by filled orders.

use crate::data::Data;
use barsim_core::{OrderId, Side, TradeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which contingent exit a leg order is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegKind {
    StopLoss,
    TakeProfit,
}

/// A position lot. Open while `exit_price` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub side: Side,
    /// Current size; shrinks on partial reductions.
    pub size: f64,
    pub entry_price: f64,
    /// Index of the bar the entry is attributed to.
    pub entry_bar: usize,
    pub exit_price: Option<f64>,
    pub exit_bar: Option<usize>,
    pub(crate) stop_loss_order: Option<OrderId>,
    pub(crate) take_profit_order: Option<OrderId>,
}

impl Trade {
    pub(crate) fn new(id: TradeId, side: Side, size: f64, entry_price: f64, entry_bar: usize) -> Self {
        Self {
            id,
            side,
            size,
            entry_price,
            entry_bar,
            exit_price: None,
            exit_bar: None,
            stop_loss_order: None,
            take_profit_order: None,
        }
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        self.side == Side::Buy
    }

    #[inline]
    pub fn is_short(&self) -> bool {
        self.side == Side::Sell
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.exit_price.is_none()
    }

    /// Pending stop-loss leg, if any.
    pub fn stop_loss_order(&self) -> Option<OrderId> {
        self.stop_loss_order
    }

    /// Pending take-profit leg, if any.
    pub fn take_profit_order(&self) -> Option<OrderId> {
        self.take_profit_order
    }

    pub(crate) fn leg(&self, kind: LegKind) -> Option<OrderId> {
        match kind {
            LegKind::StopLoss => self.stop_loss_order,
            LegKind::TakeProfit => self.take_profit_order,
        }
    }

    pub(crate) fn set_leg(&mut self, kind: LegKind, order: Option<OrderId>) {
        match kind {
            LegKind::StopLoss => self.stop_loss_order = order,
            LegKind::TakeProfit => self.take_profit_order = order,
        }
    }

    /// Live leg orders.
    pub(crate) fn legs(&self) -> impl Iterator<Item = OrderId> {
        self.stop_loss_order.into_iter().chain(self.take_profit_order)
    }

    /// Drop a leg slot pointing at `order`.
    pub(crate) fn forget_leg(&mut self, order: OrderId) {
        if self.stop_loss_order == Some(order) {
            self.stop_loss_order = None;
        }
        if self.take_profit_order == Some(order) {
            self.take_profit_order = None;
        }
    }

    /// Price used for valuation: the exit price once closed, else `mark`.
    #[inline]
    fn price_or(&self, mark: f64) -> f64 {
        self.exit_price.unwrap_or(mark)
    }

    /// Profit or loss in cash units.
    pub fn pnl(&self, mark: f64) -> f64 {
        let price = self.price_or(mark);
        match self.side {
            Side::Buy => (price - self.entry_price) * self.size,
            Side::Sell => (self.entry_price - price) * self.size,
        }
    }

    /// Return per unit as a fraction of the entry price.
    pub fn pnl_pct(&self, mark: f64) -> f64 {
        let price = self.price_or(mark);
        if self.entry_price <= 0.0 || price <= 0.0 {
            return 0.0;
        }
        match self.side {
            Side::Buy => price / self.entry_price - 1.0,
            Side::Sell => self.entry_price / price - 1.0,
        }
    }

    /// Timestamp of the entry bar, if it is visible in `data`.
    pub fn entry_time(&self, data: &Data) -> Option<DateTime<Utc>> {
        data.bars().get(self.entry_bar).map(|bar| bar.datetime())
    }

    /// Timestamp of the exit bar. `None` while the trade is open.
    pub fn exit_time(&self, data: &Data) -> Option<DateTime<Utc>> {
        let exit = self.exit_bar?;
        data.bars().get(exit).map(|bar| bar.datetime())
    }

    /// Trade value in cash (size x price).
    pub fn value(&self, mark: f64) -> f64 {
        self.size * self.price_or(mark)
    }
}
