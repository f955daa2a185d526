#[cfg(test)]
mod risk_manager_tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use trading_core::{AccountInfo, Position, PositionSide, Signal, SignalAction};

    use crate::manager::RiskManager;
    use crate::models::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskParameters::default(), 10_000.0, day(1))
    }

    fn account(balance: f64, positions: Vec<Position>) -> AccountInfo {
        AccountInfo {
            total_balance: balance,
            available_balance: balance,
            margin_used: 0.0,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            open_positions: positions,
            open_orders: 0,
        }
    }

    fn position(instrument: &str, side: PositionSide) -> Position {
        Position {
            id: format!("{}-pos", instrument),
            instrument: instrument.to_string(),
            side,
            entry_price: 100.0,
            current_price: 100.0,
            quantity: 1.0,
            value: 100.0,
            pnl: 0.0,
            pnl_percent: 0.0,
            stop_loss: Some(98.0),
            take_profit: Some(106.0),
            opened_at: Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap(),
            leverage: 1.0,
            strategy: "momentum".to_string(),
            peak_pnl_percent: 0.0,
        }
    }

    fn entry(instrument: &str, action: SignalAction) -> Signal {
        let (stop, target) = match action {
            SignalAction::Sell => (101.0, 97.0),
            _ => (99.0, 103.0),
        };
        Signal::new(instrument, action, "scalping", 0.8, 0.8, Utc::now()).with_levels(100.0, stop, target)
    }

    #[test]
    fn test_valid_entry_passes() {
        let mut rm = manager();
        let check = rm.validate_signal(&entry("BTC", SignalAction::Buy), &account(10_000.0, vec![]));
        assert!(check.valid, "{:?}", check.reason);
    }

    #[test]
    fn test_daily_loss_halt_is_sticky_until_reset() {
        let mut rm = manager();
        rm.record_realized_pnl(-300.0);
        rm.record_realized_pnl(-250.0);
        let acct = account(9_450.0, vec![]);

        for action in [SignalAction::Buy, SignalAction::Sell, SignalAction::Hold] {
            let check = rm.validate_signal(&entry("BTC", action), &acct);
            assert!(!check.valid);
            assert!(check.reason.unwrap().starts_with("Trading halted"));
        }
        assert!(rm.is_halted());

        let close = Signal::new("BTC", SignalAction::Close, "scalping", 1.0, 0.9, Utc::now());
        assert!(rm.validate_signal(&close, &acct).valid);

        // Same day: still halted
        assert!(!rm.check_daily_reset(day(1)));
        assert!(!rm.validate_signal(&entry("ETH", SignalAction::Buy), &acct).valid);

        assert!(rm.check_daily_reset(day(2)));
        assert!(!rm.is_halted());
        let state = rm.state();
        assert_eq!(state.daily_pnl, 0.0);
        assert_eq!(state.daily_start_balance, 10_000.0);
        assert!(rm.validate_signal(&entry("ETH", SignalAction::Buy), &acct).valid);
    }

    #[test]
    fn test_drawdown_halt() {
        let mut rm = manager();
        rm.update_equity(12_000.0);
        let dd = rm.update_equity(10_000.0);
        assert!(dd >= 0.15);
        assert!(rm.is_halted());
        assert!(rm.state().halt_reason.unwrap().starts_with("drawdown"));
    }

    #[test]
    fn test_max_positions_only_gates_new_instruments() {
        let mut rm = manager();
        let positions: Vec<Position> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|i| position(i, PositionSide::Long))
            .collect();
        let acct = account(10_000.0, positions);

        let check = rm.validate_signal(&entry("F", SignalAction::Buy), &acct);
        assert!(!check.valid);
        assert!(check.reason.unwrap().starts_with("Max open positions"));

        // Same-direction signal on an existing position is exempt
        assert!(rm.validate_signal(&entry("A", SignalAction::Buy), &acct).valid);
    }

    #[test]
    fn test_reversal_accepted_unconditionally() {
        let mut rm = manager();
        let acct = account(10_000.0, vec![position("A", PositionSide::Long)]);
        // Poor reward:risk would otherwise be rejected
        let reversal = Signal::new("A", SignalAction::Sell, "momentum", 0.9, 0.9, Utc::now())
            .with_levels(100.0, 101.0, 99.5);
        assert!(rm.validate_signal(&reversal, &acct).valid);
    }

    #[test]
    fn test_reward_risk_floor() {
        let mut rm = manager();
        let poor = Signal::new("BTC", SignalAction::Buy, "scalping", 0.9, 0.9, Utc::now())
            .with_levels(100.0, 99.0, 101.0);
        let check = rm.validate_signal(&poor, &account(10_000.0, vec![]));
        assert!(!check.valid);
        assert!(check.reason.unwrap().starts_with("Reward:risk"));
    }

    #[test]
    fn test_margin_check() {
        let params = RiskParameters {
            leverage: 1.0,
            ..RiskParameters::default()
        };
        let mut rm = RiskManager::new(params, 10_000.0, day(1));
        // risk 200 / 1% stop = 20_000 notional at 1x
        let tight = Signal::new("BTC", SignalAction::Buy, "scalping", 0.9, 0.9, Utc::now())
            .with_levels(100.0, 99.0, 103.0);
        assert!((rm.required_margin(&tight, 10_000.0) - 20_000.0).abs() < 1e-6);
        let check = rm.validate_signal(&tight, &account(10_000.0, vec![]));
        assert!(!check.valid);
        assert!(check.reason.unwrap().starts_with("Required margin"));

        // Default 10x leverage brings it to 2_000
        let rm = manager();
        assert!((rm.required_margin(&tight, 10_000.0) - 2_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_take_profit_closes_at_target_price() {
        let rm = manager();
        let mut p = position("BTC", PositionSide::Long);
        p.update_price(106.5);
        let check = rm.check_position_risk(&p, p.opened_at + Duration::minutes(5));
        assert!(check.should_close);
        assert_eq!(check.trigger, Some(ExitTrigger::TakeProfit));
        assert_eq!(check.reason.as_deref(), Some("take profit hit"));
        assert_eq!(check.exit_price, Some(106.0));
    }

    #[test]
    fn test_stop_loss_short() {
        let rm = manager();
        let mut p = position("BTC", PositionSide::Short);
        p.stop_loss = Some(102.0);
        p.take_profit = Some(94.0);
        p.update_price(102.5);
        let check = rm.check_position_risk(&p, p.opened_at + Duration::minutes(5));
        assert_eq!(check.reason.as_deref(), Some("stop loss hit"));
        assert_eq!(check.exit_price, Some(102.0));
    }

    #[test]
    fn test_stale_position() {
        let rm = manager();
        let mut p = position("BTC", PositionSide::Long);
        p.update_price(100.05);
        assert!(!rm.check_position_risk(&p, p.opened_at + Duration::minutes(30)).should_close);
        let check = rm.check_position_risk(&p, p.opened_at + Duration::minutes(61));
        assert_eq!(check.reason.as_deref(), Some("stale position"));
    }

    #[test]
    fn test_manual_halt_and_resume() {
        let mut rm = manager();
        rm.halt("operator request");
        let check = rm.validate_signal(&entry("BTC", SignalAction::Buy), &account(10_000.0, vec![]));
        assert_eq!(check.reason.as_deref(), Some("Trading halted: operator request"));
        rm.resume_trading();
        assert!(!rm.is_halted());
    }
}
