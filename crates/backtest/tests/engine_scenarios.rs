//! End-to-end behaviour of the matching engine, driven through the simulator.

use anyhow::Result;
use approx::assert_relative_eq;
use barsim_backtest::{
    BacktestSimulator, Broker, CloseOverSma, OrderRequest, RunStatus, StopLimitPolicy,
    TriggerState,
};
use barsim_core::{Bar, BrokerConfig, OrderId, TradeId};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn make_bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar::new(i * 60_000, open, high, low, close)
}

/// Bars opening at the previous close, one unit of wick on each side.
fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            make_bar(i as i64, open, open.max(close) + 1.0, open.min(close) - 1.0, close)
        })
        .collect()
}

fn config(cash: f64) -> BrokerConfig {
    BrokerConfig {
        cash,
        ..Default::default()
    }
}

/// Index of the bar currently being decided on.
fn current_bar(broker: &Broker) -> usize {
    broker.data().len() - 1
}

#[test]
fn test_default_sizing_scenario() -> Result<()> {
    init_tracing();
    let bars = vec![make_bar(0, 100.0, 105.0, 95.0, 102.0)];
    let mut sim = BacktestSimulator::new(bars, config(10_000.0))?;
    let mut entry = |broker: &mut Broker| -> barsim_core::Result<()> {
        broker.buy(OrderRequest::new())?;
        Ok(())
    };
    let report = sim.run(&mut entry)?;

    assert_eq!(report.status, RunStatus::Completed);
    let trades = sim.broker().trades();
    assert_eq!(trades.len(), 1);
    // floor(0.03 * 10_000 / 100)
    assert_eq!(trades[0].size, 3.0);
    assert_eq!(trades[0].entry_price, 100.0);
    assert!(sim.broker().orders().is_empty());
    // 10_000 + 3 * (102 - 100)
    assert_relative_eq!(report.final_equity, 10_006.0);
    Ok(())
}

#[test]
fn test_equity_written_once_per_bar() -> Result<()> {
    init_tracing();
    let closes = [100.0, 102.0, 101.0, 105.0, 103.0, 99.0, 98.0, 104.0];
    let mut sim = BacktestSimulator::new(bars_from_closes(&closes), config(100_000.0))?;

    let mut checked = 0;
    let mut strategy = |broker: &mut Broker| -> barsim_core::Result<()> {
        let i = current_bar(broker);
        assert_eq!(broker.equities().len(), i);

        // Nothing moves between settling a bar and deciding on the next one.
        if let Some(prev) = broker.data().bar_at(-2) {
            let unrealized: f64 = broker.trades().iter().map(|t| t.pnl(prev.close)).sum();
            assert_relative_eq!(broker.equities()[i - 1], broker.cash() + unrealized);
            checked += 1;
        }

        match i {
            0 => {
                broker.buy(OrderRequest::new().size(5.0))?;
            }
            3 => {
                broker.sell(OrderRequest::new().size(2.0))?;
            }
            5 => {
                broker.close_position()?;
            }
            _ => {}
        }
        Ok(())
    };
    let report = sim.run(&mut strategy)?;

    assert_eq!(checked, closes.len() - 1);
    assert_eq!(report.bars_processed, closes.len());
    assert_eq!(sim.broker().equities().len(), closes.len());
    // (101 - 100) * 2 + (103 - 100) * 3
    assert_relative_eq!(sim.broker().cash(), 100_011.0);
    assert_relative_eq!(report.final_equity, 100_011.0);
    assert!(sim.broker().position().is_flat());
    Ok(())
}

#[test]
fn test_filled_orders_leave_queue() -> Result<()> {
    init_tracing();
    let closes = [10.0, 11.0, 12.0, 13.0, 14.0];
    let mut sim = BacktestSimulator::new(bars_from_closes(&closes), config(1_000.0))?;

    let mut submitted: Vec<OrderId> = Vec::new();
    let mut strategy = |broker: &mut Broker| -> barsim_core::Result<()> {
        for id in &submitted {
            assert!(broker.order(*id).is_none(), "{id} still queued after filling");
        }
        submitted.push(broker.buy(OrderRequest::new().size(1.0))?);
        Ok(())
    };
    sim.run(&mut strategy)?;

    assert!(sim.broker().orders().is_empty());
    assert_eq!(sim.broker().trades().len(), closes.len());
    Ok(())
}

#[test]
fn test_bound_sell_reduces_trade() -> Result<()> {
    init_tracing();
    let bars = vec![
        make_bar(0, 50.0, 51.0, 49.0, 50.0),
        make_bar(1, 53.0, 54.0, 52.0, 53.0),
    ];
    let mut sim = BacktestSimulator::new(bars, config(10_000.0))?;
    let mut strategy = |broker: &mut Broker| -> barsim_core::Result<()> {
        match current_bar(broker) {
            0 => {
                broker.buy(OrderRequest::new().size(10.0))?;
            }
            _ => {
                let trade = broker.trades()[0].id;
                broker.sell(OrderRequest::new().size(4.0).trade(trade))?;
            }
        }
        Ok(())
    };
    sim.run(&mut strategy)?;

    let broker = sim.broker();
    assert_eq!(broker.trades().len(), 1);
    assert_eq!(broker.trades()[0].size, 6.0);
    let closed = broker.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].size, 4.0);
    assert_eq!(closed[0].exit_price, Some(53.0));
    assert_eq!(closed[0].exit_bar, Some(1));
    // (53 - 50) * 4
    assert_relative_eq!(closed[0].pnl(0.0), 12.0);
    assert_relative_eq!(broker.cash(), 10_012.0);
    Ok(())
}

#[test]
fn test_split_reductions_add_up() -> Result<()> {
    init_tracing();
    let bars = vec![
        make_bar(0, 50.0, 51.0, 49.0, 50.0),
        make_bar(1, 52.0, 53.0, 51.0, 52.0),
        make_bar(2, 54.0, 55.0, 53.0, 54.0),
        make_bar(3, 56.0, 57.0, 55.0, 56.0),
    ];
    let mut sim = BacktestSimulator::new(bars, config(10_000.0))?;
    let mut strategy = |broker: &mut Broker| -> barsim_core::Result<()> {
        let size = match current_bar(broker) {
            0 => {
                broker.buy(OrderRequest::new().size(10.0))?;
                return Ok(());
            }
            1 | 2 => 3.0,
            _ => 4.0,
        };
        let trade = broker.trades()[0].id;
        broker.sell(OrderRequest::new().size(size).trade(trade))?;
        Ok(())
    };
    sim.run(&mut strategy)?;

    let broker = sim.broker();
    assert!(broker.trades().is_empty());
    let closed = broker.closed_trades();
    assert_eq!(closed.len(), 3);
    // The final slice closes the parent trade itself.
    assert_eq!(closed[2].id, TradeId(1));
    assert!(closed.iter().all(|t| t.entry_price == 50.0 && t.entry_bar == 0));

    let total_size: f64 = closed.iter().map(|t| t.size).sum();
    assert_relative_eq!(total_size, 10.0);
    let total_pnl: f64 = closed.iter().map(|t| t.pnl(0.0)).sum();
    // 3 * 2 + 3 * 4 + 4 * 6
    assert_relative_eq!(total_pnl, 42.0);
    assert_relative_eq!(broker.cash(), 10_042.0);
    Ok(())
}

#[test]
fn test_reduce_by_full_size_matches_close() -> Result<()> {
    init_tracing();
    let bars = vec![
        make_bar(0, 20.0, 21.0, 19.0, 20.0),
        make_bar(1, 25.0, 26.0, 24.0, 25.0),
    ];

    let mut reduced = Broker::new(bars.clone(), config(1_000.0))?;
    let mut closed = Broker::new(bars, config(1_000.0))?;
    for broker in [&mut reduced, &mut closed] {
        broker.advance();
        broker.buy(OrderRequest::new().size(7.0))?;
        broker.next()?;
        broker.advance();
    }

    let trade = reduced.trades()[0].id;
    reduced.sell(OrderRequest::new().size(7.0).trade(trade))?;
    reduced.next()?;

    let trade = closed.trades()[0].id;
    closed.close_trade(trade)?;
    closed.next()?;

    assert_relative_eq!(reduced.cash(), closed.cash());
    assert_eq!(reduced.closed_trades(), closed.closed_trades());
    assert_eq!(reduced.closed_trades()[0].exit_price, Some(25.0));
    Ok(())
}

#[test]
fn test_triggered_stop_is_sticky() -> Result<()> {
    init_tracing();
    let bars = vec![
        // Stop at 105 is hit, limit at 103 is not.
        make_bar(0, 100.0, 106.0, 104.0, 105.0),
        // Would not hit the stop again, but the limit fills.
        make_bar(1, 103.5, 104.0, 102.5, 103.0),
    ];
    let config = BrokerConfig {
        stop_limit_policy: StopLimitPolicy::LimitAfterStop,
        ..config(10_000.0)
    };
    let mut sim = BacktestSimulator::new(bars, config)?;

    let mut order = None;
    let mut strategy = |broker: &mut Broker| -> barsim_core::Result<()> {
        match (current_bar(broker), order) {
            (0, _) => {
                order = Some(broker.buy(OrderRequest::new().size(1.0).stop(105.0).limit(103.0))?);
            }
            (_, Some(id)) => {
                let pending = broker.order(id).expect("order still queued");
                assert_eq!(pending.trigger, TriggerState::Stop);
            }
            _ => {}
        }
        Ok(())
    };
    sim.run(&mut strategy)?;

    let trades = sim.broker().trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].entry_price, 103.0);
    assert_eq!(trades[0].entry_bar, 1);
    Ok(())
}

#[test]
fn test_stop_limit_fills_at_market_by_default() -> Result<()> {
    init_tracing();
    let bars = vec![make_bar(0, 100.0, 106.0, 104.0, 105.0)];
    let mut sim = BacktestSimulator::new(bars, config(10_000.0))?;
    let mut strategy = |broker: &mut Broker| -> barsim_core::Result<()> {
        broker.buy(OrderRequest::new().size(1.0).stop(105.0).limit(103.0))?;
        Ok(())
    };
    sim.run(&mut strategy)?;

    // Open of 100 clamped up to the stop.
    let trades = sim.broker().trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].entry_price, 105.0);
    Ok(())
}

#[test]
fn test_stop_loss_and_take_profit_same_bar() -> Result<()> {
    init_tracing();
    let bars = vec![
        make_bar(0, 100.0, 100.5, 99.5, 100.0),
        // Breaches both legs.
        make_bar(1, 100.0, 112.0, 94.0, 100.0),
    ];
    let mut sim = BacktestSimulator::new(bars, config(10_000.0))?;
    let mut strategy = |broker: &mut Broker| -> barsim_core::Result<()> {
        if current_bar(broker) == 0 {
            broker.buy(
                OrderRequest::new()
                    .size(2.0)
                    .stop_loss(95.0)
                    .take_profit(110.0),
            )?;
        }
        Ok(())
    };
    sim.run(&mut strategy)?;

    let broker = sim.broker();
    assert!(broker.trades().is_empty());
    assert!(broker.orders().is_empty());
    let closed = broker.closed_trades();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].exit_price, Some(110.0));
    assert_eq!(closed[0].exit_bar, Some(1));
    assert_relative_eq!(broker.cash(), 10_020.0);
    Ok(())
}

#[test]
fn test_account_ruin_scenario() -> Result<()> {
    init_tracing();
    let bars = vec![
        make_bar(0, 10.0, 10.0, 10.0, 10.0),
        make_bar(1, 10.0, 10.0, 5.0, 5.0),
        make_bar(2, 5.0, 6.0, 5.0, 6.0),
    ];
    let mut sim = BacktestSimulator::new(bars, config(100.0))?;
    let mut strategy = |broker: &mut Broker| -> barsim_core::Result<()> {
        if current_bar(broker) == 0 {
            broker.buy(OrderRequest::new().size(21.0))?;
        }
        Ok(())
    };
    let report = sim.run(&mut strategy)?;

    assert_eq!(
        report.status,
        RunStatus::Ruined {
            bar: 1,
            equity: -5.0
        }
    );
    assert_eq!(report.bars_processed, 2);
    let broker = sim.broker();
    assert_eq!(broker.cash(), 0.0);
    assert!(broker.trades().is_empty());
    assert_eq!(broker.closed_trades()[0].exit_price, Some(5.0));
    Ok(())
}

#[test]
fn test_sma_strategy_from_json_config() -> Result<()> {
    init_tracing();
    let config = BrokerConfig::from_json_str(r#"{ "cash": 10000.0, "fractional": true }"#)?;
    let closes = [
        10.0, 9.0, 8.0, 12.0, 13.0, 14.0, 11.0, 9.0, 10.0, 12.0, 13.0, 9.0,
    ];
    let mut sim = BacktestSimulator::new(bars_from_closes(&closes), config)?;
    let report = sim.run(&mut CloseOverSma::new(3))?;

    assert_eq!(report.status, RunStatus::Completed);
    let metrics = sim.metrics();
    assert!(metrics.total_trades > 0);
    assert_relative_eq!(metrics.equity_final, report.final_equity);
    let summary = metrics.to_string();
    assert!(summary.contains("# Trades"));
    assert!(summary.contains("Sharpe Ratio"));
    Ok(())
}
