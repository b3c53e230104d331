//! Order matching and trade ledger.
//!
//! The broker owns the order queue, open and closed trades, cash and the
//! per-bar equity curve. Orders and trades refer to each other by id only;
//! every lookup goes through the broker.

use crate::data::Data;
use crate::order::{Order, OrderRequest, StopLimitPolicy, TriggerState};
use crate::position::Position;
use crate::trade::{LegKind, Trade};
use barsim_core::{Bar, BrokerConfig, Error, OrderId, Result, Side, TradeId};
use tracing::{debug, trace, warn};

/// Sizes within this distance of zero count as zero.
pub const SIZE_EPSILON: f64 = 1e-10;

/// Result of settling one bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BarOutcome {
    /// The run can go on.
    Continue,
    /// Equity fell to zero or below; every trade was liquidated.
    Ruined { bar: usize, equity: f64 },
}

/// Simulated broker: order queue, trade ledger and cash.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    data: Data,
    cash: f64,
    /// Pending orders. Position in the queue is matching priority.
    orders: Vec<Order>,
    /// Open trades.
    trades: Vec<Trade>,
    /// Closed trades in closing order.
    closed_trades: Vec<Trade>,
    /// One equity value per settled bar.
    equities: Vec<f64>,
    next_order_id: u64,
    next_trade_id: u64,
    ruin: Option<BarOutcome>,
}

impl Broker {
    /// Create a broker over a bar series. No bar is visible until
    /// [`Broker::advance`] is called.
    pub fn new(bars: Vec<Bar>, config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        let capacity = bars.len();
        Ok(Self {
            cash: config.cash,
            config,
            data: Data::new(bars),
            orders: Vec::new(),
            trades: Vec::new(),
            closed_trades: Vec::new(),
            equities: Vec::with_capacity(capacity),
            next_order_id: 1,
            next_trade_id: 1,
            ruin: None,
        })
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    /// Pending orders in matching priority.
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }

    /// Open trades.
    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed_trades
    }

    /// Look up a trade, open or closed.
    pub fn trade(&self, id: TradeId) -> Option<&Trade> {
        self.trades
            .iter()
            .chain(self.closed_trades.iter())
            .find(|t| t.id == id)
    }

    /// Equity recorded for each settled bar, indexed like the bar series.
    pub fn equities(&self) -> &[f64] {
        &self.equities
    }

    /// Cash plus unrealized P&L of open trades, marked at the latest close.
    pub fn equity(&self) -> f64 {
        self.cash + self.position().pnl()
    }

    /// Aggregate view over open trades.
    pub fn position(&self) -> Position<'_> {
        Position::new(&self.trades, self.data.last_close().unwrap_or_default())
    }

    /// Ruin outcome, once the account has been blown up.
    pub fn ruin(&self) -> Option<BarOutcome> {
        self.ruin
    }

    // ------------------------------------------------------------------
    // Order submission
    // ------------------------------------------------------------------

    /// Submit a buy order.
    pub fn buy(&mut self, req: OrderRequest) -> Result<OrderId> {
        self.submit(Side::Buy, req)
    }

    /// Submit a sell order.
    pub fn sell(&mut self, req: OrderRequest) -> Result<OrderId> {
        self.submit(Side::Sell, req)
    }

    /// Validate and queue a new order.
    ///
    /// Orders bound to an open trade jump to the front of the queue. Other
    /// orders go to the back; in exclusive mode they first cancel every
    /// pending unbound order and request closure of every open trade.
    pub fn submit(&mut self, side: Side, req: OrderRequest) -> Result<OrderId> {
        self.validate_request(side, &req)?;

        let bound_to_open = req
            .trade
            .map_or(false, |t| self.open_index(t).is_some());
        let id = self.alloc_order_id();
        let order = Order::from_request(id, side, req);
        debug!(order = %id, %side, size = order.size, stop = ?order.stop, limit = ?order.limit,
            "order submitted");

        if bound_to_open {
            self.orders.insert(0, order);
        } else {
            if self.config.exclusive_orders {
                let stale: Vec<OrderId> = self
                    .orders
                    .iter()
                    .filter(|o| !o.is_contingent())
                    .map(|o| o.id)
                    .collect();
                for stale_id in stale {
                    self.cancel_order(stale_id);
                }
                let open: Vec<TradeId> = self.trades.iter().map(|t| t.id).collect();
                for trade in open {
                    self.close_trade(trade)?;
                }
            }
            self.orders.push(order);
        }
        Ok(id)
    }

    fn validate_request(&self, side: Side, req: &OrderRequest) -> Result<()> {
        if !self.config.fractional && req.size > 1.0 && req.size.fract() != 0.0 {
            return Err(Error::FractionalSize { size: req.size });
        }

        let prices = [
            ("stop", req.stop),
            ("limit", req.limit),
            ("stop loss", req.stop_loss),
            ("take profit", req.take_profit),
        ];
        for (field, price) in prices {
            if let Some(price) = price {
                if !price.is_finite() || price <= 0.0 {
                    return Err(Error::InvalidPrice { field, price });
                }
            }
        }

        if let Some(trade) = req.trade {
            if self.trade(trade).is_none() {
                return Err(Error::UnknownTrade(trade));
            }
        }

        if req.stop_loss.is_none() && req.take_profit.is_none() {
            return Ok(());
        }

        let price = match req.limit.or(req.stop) {
            Some(price) => price,
            None => self.data.last_close().ok_or_else(|| {
                Error::no_data("stop loss / take profit need a reference close price")
            })?,
        };
        let (sl_ok, tp_ok) = match side {
            Side::Buy => (
                req.stop_loss.map_or(true, |sl| sl < price),
                req.take_profit.map_or(true, |tp| tp > price),
            ),
            Side::Sell => (
                req.stop_loss.map_or(true, |sl| sl > price),
                req.take_profit.map_or(true, |tp| tp < price),
            ),
        };
        if sl_ok && tp_ok {
            Ok(())
        } else {
            Err(Error::BracketOrdering {
                side,
                stop_loss: req.stop_loss,
                price,
                take_profit: req.take_profit,
            })
        }
    }

    /// Cancel a pending order. Returns false if it is no longer queued.
    pub fn cancel_order(&mut self, id: OrderId) -> bool {
        let removed = self.remove_order(id).is_some();
        if removed {
            debug!(order = %id, "order cancelled");
        }
        removed
    }

    /// Request closure of an open trade with a market order at the front
    /// of the queue. The trade closes when the order settles.
    pub fn close_trade(&mut self, trade: TradeId) -> Result<OrderId> {
        let i = self.open_index(trade).ok_or(Error::UnknownTrade(trade))?;
        let (side, size) = (self.trades[i].side.reverse(), self.trades[i].size);
        let id = self.alloc_order_id();
        let req = OrderRequest::new().size(size).trade(trade);
        self.orders.insert(0, Order::from_request(id, side, req));
        debug!(order = %id, trade = %trade, size, "close requested");
        Ok(id)
    }

    /// Request closure of every open trade.
    pub fn close_position(&mut self) -> Result<Vec<OrderId>> {
        let open: Vec<TradeId> = self.trades.iter().map(|t| t.id).collect();
        open.into_iter().map(|t| self.close_trade(t)).collect()
    }

    /// Attach or replace the stop-loss leg of an open trade.
    pub fn set_stop_loss(&mut self, trade: TradeId, price: f64) -> Result<OrderId> {
        self.set_leg(trade, LegKind::StopLoss, price)
    }

    /// Attach or replace the take-profit leg of an open trade.
    pub fn set_take_profit(&mut self, trade: TradeId, price: f64) -> Result<OrderId> {
        self.set_leg(trade, LegKind::TakeProfit, price)
    }

    fn set_leg(&mut self, trade: TradeId, kind: LegKind, price: f64) -> Result<OrderId> {
        if !price.is_finite() || price <= 0.0 {
            let field = match kind {
                LegKind::StopLoss => "stop loss",
                LegKind::TakeProfit => "take profit",
            };
            return Err(Error::InvalidPrice { field, price });
        }
        let i = self.open_index(trade).ok_or(Error::UnknownTrade(trade))?;
        if let Some(prev) = self.trades[i].leg(kind) {
            self.remove_order(prev);
        }

        let (side, size) = (self.trades[i].side.reverse(), self.trades[i].size);
        let req = OrderRequest::new().size(size).trade(trade);
        let req = match kind {
            LegKind::StopLoss => req.stop(price),
            LegKind::TakeProfit => req.limit(price),
        };
        let id = self.alloc_order_id();
        self.orders.insert(0, Order::from_request(id, side, req));
        self.trades[i].set_leg(kind, Some(id));
        debug!(order = %id, trade = %trade, ?kind, price, "leg attached");
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Per-bar processing
    // ------------------------------------------------------------------

    /// Reveal the next bar. Returns false once the series is exhausted.
    pub fn advance(&mut self) -> bool {
        self.data.advance()
    }

    /// Settle the latest revealed bar: match the order queue, record equity
    /// and liquidate on account ruin.
    pub fn next(&mut self) -> Result<BarOutcome> {
        if let Some(ruin) = self.ruin {
            return Ok(ruin);
        }
        let bar_index = self
            .data
            .len()
            .checked_sub(1)
            .ok_or_else(|| Error::no_data("no bar revealed yet"))?;
        if self.equities.len() != bar_index {
            return Err(Error::Settlement {
                bar: bar_index,
                expected: self.equities.len(),
            });
        }

        self.process_orders(bar_index)?;

        let equity = self.equity();
        self.equities.push(equity);
        trace!(bar = bar_index, equity, cash = self.cash, "bar settled");

        if equity <= 0.0 {
            let close = self.data.bars()[bar_index].close;
            let open: Vec<TradeId> = self.trades.iter().map(|t| t.id).collect();
            for trade in open {
                self.close_trade_at(trade, close, bar_index)?;
            }
            self.cash = 0.0;
            warn!(bar = bar_index, equity, "account blown up, all trades liquidated");
            let outcome = BarOutcome::Ruined {
                bar: bar_index,
                equity,
            };
            self.ruin = Some(outcome);
            return Ok(outcome);
        }
        Ok(BarOutcome::Continue)
    }

    /// Run settlement passes over the queue until no same-bar leg is left
    /// to evaluate.
    ///
    /// A further pass is only needed when a market fill opened a trade with
    /// legs attached. Legs never carry legs of their own, so the loop ends.
    fn process_orders(&mut self, bar_index: usize) -> Result<()> {
        let mut pass = 1;
        while self.settle_pass(bar_index)? {
            pass += 1;
            debug!(bar = bar_index, pass, "re-running settlement for same-bar legs");
        }
        Ok(())
    }

    /// One pass over the queue as it stood when the pass began. Returns
    /// whether another pass over the same bar is required.
    fn settle_pass(&mut self, bar_index: usize) -> Result<bool> {
        let bars = self.data.bars();
        let bar = bars[bar_index];
        let prev_bar = bars[bar_index.saturating_sub(1)];
        let queued: Vec<OrderId> = self.orders.iter().map(|o| o.id).collect();
        let mut reprocess = false;

        for id in queued {
            // Gone already: closed along with its parent trade.
            let Some(idx) = self.order_index(id) else {
                continue;
            };
            let Some(price) = self.trigger(idx, &bar, &prev_bar) else {
                continue;
            };
            let order = self.orders[idx].clone();

            let record_bar = if order.trigger == TriggerState::Market && self.config.trade_on_close
            {
                bar_index.saturating_sub(1)
            } else {
                bar_index
            };

            let size = self.resolve_size(order.size, price);
            if size == 0.0 {
                debug!(order = %id, requested = order.size, cash = self.cash, price,
                    "resolved size is zero, order cancelled");
                self.remove_order(id);
                continue;
            }

            if let Some(parent) = order.trade {
                if let Some((side, open)) = self.trade_state(parent) {
                    if side != order.side {
                        if open {
                            debug!(order = %id, side = %order.side, size, price, bar = record_bar,
                                trigger = ?order.trigger, trade = %parent, "order filled");
                            self.apply_to_trade(parent, size, price, record_bar)?;
                        } else {
                            debug!(order = %id, trade = %parent,
                                "parent trade already closed, order cancelled");
                        }
                        self.remove_order(id);
                        continue;
                    }
                }
            }

            debug!(order = %id, side = %order.side, size, price, bar = record_bar,
                trigger = ?order.trigger, "order filled");
            let remaining = self.match_open_trades(order.side, size, price, record_bar)?;
            if remaining > SIZE_EPSILON {
                self.open_trade(
                    order.side,
                    remaining,
                    price,
                    order.stop_loss,
                    order.take_profit,
                    record_bar,
                )?;
                if order.trigger == TriggerState::Market && order.has_bracket() {
                    reprocess = true;
                }
            }

            self.remove_order(id);
        }
        Ok(reprocess)
    }

    /// Resolve stop and limit conditions for the order at `idx`, updating its
    /// trigger state. Returns the fill price, or `None` if it does not fill
    /// on this bar.
    fn trigger(&mut self, idx: usize, bar: &Bar, prev_bar: &Bar) -> Option<f64> {
        let policy = self.config.stop_limit_policy;
        let trade_on_close = self.config.trade_on_close;
        let order = &mut self.orders[idx];

        // A hit stop stays hit; it is never checked again.
        if let Some(stop) = order.stop {
            if !order.trigger.is_triggered() {
                if !order.stop_hit(stop, bar.high, bar.low) {
                    return None;
                }
                order.trigger = order.trigger.advance(TriggerState::Stop);
            }
        }

        let resting_limit = match order.trigger {
            TriggerState::Pending => order.limit,
            TriggerState::Stop if policy == StopLimitPolicy::LimitAfterStop => order.limit,
            _ => None,
        };

        let price = if let Some(limit) = resting_limit {
            if !order.limit_hit(limit, bar.high, bar.low) {
                return None;
            }
            order.trigger = order.trigger.advance(TriggerState::Limit);
            order.limit_price(limit, bar.open)
        } else {
            let base = if trade_on_close {
                prev_bar.close
            } else {
                bar.open
            };
            order.trigger = order.trigger.advance(TriggerState::Market);
            order.market_price(base)
        };
        Some(price)
    }

    /// Turn a requested size into units to trade at `price`.
    ///
    /// Zero means the configured fraction of cash. Without fractional
    /// sizing, results are floored to whole units and a request below one
    /// unit is read as a fraction of cash.
    fn resolve_size(&self, requested: f64, price: f64) -> f64 {
        let of_cash = |fraction: f64| fraction * self.cash / price;
        let size = if self.config.fractional {
            if requested == 0.0 {
                of_cash(self.config.order_size)
            } else {
                requested
            }
        } else if requested == 0.0 {
            of_cash(self.config.order_size).floor()
        } else if requested < 1.0 {
            of_cash(requested).floor()
        } else {
            requested.floor()
        };
        size.max(0.0)
    }

    /// Reduce or close a single trade with an opposite-side fill.
    fn apply_to_trade(&mut self, trade: TradeId, size: f64, price: f64, bar: usize) -> Result<()> {
        let i = self.open_index(trade).ok_or(Error::UnknownTrade(trade))?;
        if size >= self.trades[i].size {
            self.close_trade_at(trade, price, bar)
        } else {
            self.reduce_trade(trade, size, price, bar)
        }
    }

    /// Net a fill against open opposite-side trades in list order. Returns
    /// the size left over.
    fn match_open_trades(&mut self, side: Side, size: f64, price: f64, bar: usize) -> Result<f64> {
        let opposite: Vec<(TradeId, f64)> = self
            .trades
            .iter()
            .filter(|t| t.side != side)
            .map(|t| (t.id, t.size))
            .collect();

        let mut remaining = size;
        for (trade, trade_size) in opposite {
            if remaining >= trade_size {
                self.close_trade_at(trade, price, bar)?;
                remaining -= trade_size;
            } else {
                self.reduce_trade(trade, remaining, price, bar)?;
                remaining = 0.0;
            }
            if remaining <= SIZE_EPSILON {
                break;
            }
        }
        Ok(remaining)
    }

    // ------------------------------------------------------------------
    // Trade lifecycle
    // ------------------------------------------------------------------

    fn open_trade(
        &mut self,
        side: Side,
        size: f64,
        price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        bar: usize,
    ) -> Result<TradeId> {
        let id = TradeId(self.next_trade_id);
        self.next_trade_id += 1;
        self.trades.push(Trade::new(id, side, size, price, bar));
        debug!(trade = %id, %side, size, price, bar, "trade opened");

        if let Some(sl) = stop_loss {
            self.set_stop_loss(id, sl)?;
        }
        if let Some(tp) = take_profit {
            self.set_take_profit(id, tp)?;
        }
        Ok(id)
    }

    /// Close an open trade at `price`, cancel its legs and realize P&L.
    fn close_trade_at(&mut self, trade: TradeId, price: f64, bar: usize) -> Result<()> {
        let i = self.open_index(trade).ok_or(Error::UnknownTrade(trade))?;
        let mut closed = self.trades.remove(i);
        closed.exit_price = Some(price);
        closed.exit_bar = Some(bar);

        let legs: Vec<OrderId> = closed.legs().collect();
        for leg in legs {
            self.remove_order(leg);
        }
        closed.set_leg(LegKind::StopLoss, None);
        closed.set_leg(LegKind::TakeProfit, None);

        let pnl = closed.pnl(price);
        self.cash += pnl;
        debug!(trade = %trade, size = closed.size, price, bar, pnl, "trade closed");
        self.closed_trades.push(closed);
        Ok(())
    }

    /// Reduce an open trade by `size`, recording the reduced part as its own
    /// closed trade. Reducing by the full size closes the trade.
    fn reduce_trade(&mut self, trade: TradeId, size: f64, price: f64, bar: usize) -> Result<()> {
        let i = self.open_index(trade).ok_or(Error::UnknownTrade(trade))?;
        let trade_size = self.trades[i].size;
        let left = trade_size - size;
        if left < -SIZE_EPSILON {
            return Err(Error::ReduceExceedsTrade {
                trade,
                size,
                trade_size,
            });
        }
        if left <= SIZE_EPSILON {
            return self.close_trade_at(trade, price, bar);
        }

        let record_id = TradeId(self.next_trade_id);
        self.next_trade_id += 1;

        let open = &mut self.trades[i];
        open.size = left;
        let legs: Vec<OrderId> = open.legs().collect();
        let mut record = open.clone();
        record.id = record_id;
        record.size = size;
        record.exit_price = Some(price);
        record.exit_bar = Some(bar);
        record.set_leg(LegKind::StopLoss, None);
        record.set_leg(LegKind::TakeProfit, None);

        for order in self.orders.iter_mut().filter(|o| legs.contains(&o.id)) {
            order.size = left;
        }

        let pnl = record.pnl(price);
        self.cash += pnl;
        debug!(trade = %trade, record = %record_id, size, left, price, bar, pnl, "trade reduced");
        self.closed_trades.push(record);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn alloc_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    fn order_index(&self, id: OrderId) -> Option<usize> {
        self.orders.iter().position(|o| o.id == id)
    }

    fn open_index(&self, id: TradeId) -> Option<usize> {
        self.trades.iter().position(|t| t.id == id)
    }

    /// Side of a known trade and whether it is still open.
    fn trade_state(&self, id: TradeId) -> Option<(Side, bool)> {
        self.trade(id).map(|t| (t.side, t.is_open()))
    }

    /// Remove an order from the queue and from its trade's leg slot.
    fn remove_order(&mut self, id: OrderId) -> Option<Order> {
        let i = self.order_index(id)?;
        let order = self.orders.remove(i);
        if let Some(trade) = order.trade {
            if let Some(ti) = self.open_index(trade) {
                self.trades[ti].forget_leg(id);
            }
        }
        Some(order)
    }
}
