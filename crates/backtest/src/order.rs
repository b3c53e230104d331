//! Pending orders and their trigger state.

use barsim_core::{OrderId, Side, TradeId};
use serde::{Deserialize, Serialize};

pub use barsim_core::StopLimitPolicy;

/// How an order was (or will be) resolved. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerState {
    /// Nothing resolved yet.
    #[default]
    Pending,
    /// Stop price hit; the order now trades as a market or limit order.
    Stop,
    /// Filled as a limit order.
    Limit,
    /// Filled as a market order (including triggered stops).
    Market,
}

impl TriggerState {
    /// Move to `next` if the transition is allowed, otherwise stay put.
    pub fn advance(self, next: TriggerState) -> TriggerState {
        match (self, next) {
            (TriggerState::Pending, _) => next,
            (TriggerState::Stop, TriggerState::Limit | TriggerState::Market) => next,
            _ => self,
        }
    }

    /// Whether anything has been resolved.
    pub fn is_triggered(self) -> bool {
        self != TriggerState::Pending
    }
}

/// Order parameters as submitted by a strategy.
///
/// A size of 0 means "use the default sizing". Stop loss and take profit
/// are attached as contingent legs to the trade the order opens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderRequest {
    pub size: f64,
    pub stop: Option<f64>,
    pub limit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trade: Option<TradeId>,
}

impl OrderRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn stop(mut self, price: f64) -> Self {
        self.stop = Some(price);
        self
    }

    pub fn limit(mut self, price: f64) -> Self {
        self.limit = Some(price);
        self
    }

    pub fn stop_loss(mut self, price: f64) -> Self {
        self.stop_loss = Some(price);
        self
    }

    pub fn take_profit(mut self, price: f64) -> Self {
        self.take_profit = Some(price);
        self
    }

    /// Bind the order to a trade so it can only reduce or close that trade.
    pub fn trade(mut self, trade: TradeId) -> Self {
        self.trade = Some(trade);
        self
    }
}

/// An order sitting in the broker's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    /// Requested size, 0 for default sizing.
    pub size: f64,
    pub stop: Option<f64>,
    pub limit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Trade this order is a contingent leg of (or closes).
    pub trade: Option<TradeId>,
    pub trigger: TriggerState,
}

impl Order {
    pub(crate) fn from_request(id: OrderId, side: Side, req: OrderRequest) -> Self {
        Self {
            id,
            side,
            size: req.size,
            stop: req.stop,
            limit: req.limit,
            stop_loss: req.stop_loss,
            take_profit: req.take_profit,
            trade: req.trade,
            trigger: TriggerState::Pending,
        }
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        self.side == Side::Buy
    }

    #[inline]
    pub fn is_short(&self) -> bool {
        !self.is_long()
    }

    /// Whether the order is bound to a trade.
    #[inline]
    pub fn is_contingent(&self) -> bool {
        self.trade.is_some()
    }

    /// Whether the order will attach legs to the trade it opens.
    #[inline]
    pub fn has_bracket(&self) -> bool {
        self.stop_loss.is_some() || self.take_profit.is_some()
    }

    /// Stop condition against a bar's range.
    pub(crate) fn stop_hit(&self, stop: f64, high: f64, low: f64) -> bool {
        match self.side {
            Side::Buy => high >= stop,
            Side::Sell => low <= stop,
        }
    }

    /// Limit condition against a bar's range. The limit must be crossed,
    /// touching it is not enough.
    pub(crate) fn limit_hit(&self, limit: f64, high: f64, low: f64) -> bool {
        match self.side {
            Side::Buy => low < limit,
            Side::Sell => high > limit,
        }
    }

    /// Limit fill price: the open, improved up to the limit.
    pub(crate) fn limit_price(&self, limit: f64, open: f64) -> f64 {
        match self.side {
            Side::Buy => open.min(limit),
            Side::Sell => open.max(limit),
        }
    }

    /// Market fill price, no better than the stop when one was set.
    pub(crate) fn market_price(&self, base: f64) -> f64 {
        match (self.stop, self.side) {
            (Some(stop), Side::Buy) => base.max(stop),
            (Some(stop), Side::Sell) => base.min(stop),
            (None, _) => base,
        }
    }
}
