//! Trade lifecycle: PENDING -> OPEN -> CLOSED
//!
//! A planned trade waits for price to trade through its entry. An unfilled
//! order is voided once price runs a small fraction of the way to target
//! without it. Once open, the stop is checked before the target, so a candle
//! touching both is a loss.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::candles::Candle;
use super::planner::{TradeDirection, TradePlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CloseReason {
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TP")]
    TakeProfit,
    /// Never filled
    #[serde(rename = "INVALID")]
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Pending,
    Open,
    Closed(CloseReason),
}

impl TradeStatus {
    pub fn is_closed(&self) -> bool {
        matches!(self, TradeStatus::Closed(_))
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "PENDING"),
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::Closed(CloseReason::StopLoss) => write!(f, "CLOSED(SL)"),
            TradeStatus::Closed(CloseReason::TakeProfit) => write!(f, "CLOSED(TP)"),
            TradeStatus::Closed(CloseReason::Invalidated) => write!(f, "CLOSED(INVALID)"),
        }
    }
}

/// State change produced by one candle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeTransition {
    Filled { price: f64 },
    StoppedOut { price: f64 },
    TargetReached { price: f64 },
    Invalidated { reached: f64 },
}

/// A trade being managed candle by candle
#[derive(Debug, Clone)]
pub struct PlannedTrade {
    plan: TradePlan,
    status: TradeStatus,
    planned_time: DateTime<Utc>,
    entry_time: Option<DateTime<Utc>>,
    exit_time: Option<DateTime<Utc>>,
    exit_price: Option<f64>,
    /// Fraction of |target - entry| that voids an unfilled order
    invalidation_pct: f64,
    depth: usize,
}

impl PlannedTrade {
    pub fn new(plan: TradePlan, planned_time: DateTime<Utc>, invalidation_pct: f64, depth: usize) -> Self {
        Self {
            plan,
            status: TradeStatus::Pending,
            planned_time,
            entry_time: None,
            exit_time: None,
            exit_price: None,
            invalidation_pct,
            depth,
        }
    }

    pub fn plan(&self) -> &TradePlan {
        &self.plan
    }

    pub fn status(&self) -> TradeStatus {
        self.status
    }

    /// Advance the trade by one candle. Closed trades never change again.
    pub fn step(&mut self, candle: &Candle) -> Vec<TradeTransition> {
        let mut transitions = Vec::new();

        match self.status {
            TradeStatus::Closed(_) => return transitions,
            TradeStatus::Pending => {
                if candle.brackets(self.plan.entry) {
                    self.status = TradeStatus::Open;
                    self.entry_time = Some(candle.time);
                    info!("ENTRY FILLED: {} @ {:.5} ({})", self.plan.direction, self.plan.entry, candle.time);
                    transitions.push(TradeTransition::Filled { price: self.plan.entry });
                } else {
                    if let Some(reached) = self.ran_away(candle) {
                        self.close(candle.time, CloseReason::Invalidated, None);
                        info!(
                            "TRADE INVALID: {} never filled @ {:.5}, price reached {:.5}",
                            self.plan.direction, self.plan.entry, reached
                        );
                        transitions.push(TradeTransition::Invalidated { reached });
                    }
                    return transitions;
                }
            }
            TradeStatus::Open => {}
        }

        if let Some(exit) = self.check_exit(candle) {
            transitions.push(exit);
        }
        transitions
    }

    /// Price extreme toward target when it is far enough to void the order
    fn ran_away(&self, candle: &Candle) -> Option<f64> {
        let distance = self.invalidation_pct * (self.plan.target - self.plan.entry).abs();
        match self.plan.direction {
            TradeDirection::Buy if candle.high >= self.plan.entry + distance => Some(candle.high),
            TradeDirection::Sell if candle.low <= self.plan.entry - distance => Some(candle.low),
            _ => None,
        }
    }

    fn check_exit(&mut self, candle: &Candle) -> Option<TradeTransition> {
        let (stop_hit, target_hit) = match self.plan.direction {
            TradeDirection::Buy => (candle.low <= self.plan.stop, candle.high >= self.plan.target),
            TradeDirection::Sell => (candle.high >= self.plan.stop, candle.low <= self.plan.target),
        };

        if stop_hit {
            let price = self.plan.stop;
            self.close(candle.time, CloseReason::StopLoss, Some(price));
            info!("SL HIT: {} @ {:.5} ({})", self.plan.direction, price, candle.time);
            Some(TradeTransition::StoppedOut { price })
        } else if target_hit {
            let price = self.plan.target;
            self.close(candle.time, CloseReason::TakeProfit, Some(price));
            info!("TP HIT: {} @ {:.5} ({})", self.plan.direction, price, candle.time);
            Some(TradeTransition::TargetReached { price })
        } else {
            None
        }
    }

    fn close(&mut self, time: DateTime<Utc>, reason: CloseReason, exit_price: Option<f64>) {
        self.status = TradeStatus::Closed(reason);
        self.exit_time = Some(time);
        self.exit_price = exit_price;
    }

    /// Snapshot as a trade record; a trade not yet closed is reported as abandoned
    pub fn to_record(&self) -> TradeRecord {
        TradeRecord {
            direction: self.plan.direction,
            entry: self.plan.entry,
            stop: self.plan.stop,
            target: self.plan.target,
            rr: self.plan.rr,
            status: self.status,
            planned_time: self.planned_time,
            entry_time: self.entry_time,
            exit_time: self.exit_time,
            exit_price: self.exit_price,
            depth: self.depth,
        }
    }
}

/// Terminal record of a trade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub direction: TradeDirection,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub rr: f64,
    pub status: TradeStatus,
    pub planned_time: DateTime<Utc>,
    pub entry_time: Option<DateTime<Utc>>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    /// Structure depth the trade was planned at
    pub depth: usize,
}

impl TradeRecord {
    /// Still pending or open when the data ran out
    pub fn is_abandoned(&self) -> bool {
        !self.status.is_closed()
    }

    /// Result in units of risk, for filled and exited trades
    pub fn r_multiple(&self) -> Option<f64> {
        let exit = self.exit_price?;
        let risk = (self.entry - self.stop).abs();
        if risk <= 0.0 {
            return None;
        }
        let move_points = match self.direction {
            TradeDirection::Buy => exit - self.entry,
            TradeDirection::Sell => self.entry - exit,
        };
        Some(move_points / risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::planner::PlanOutcome;
    use crate::trading_core::test_support::{at_min, bear, bull, candle_min};

    fn buy_trade() -> PlannedTrade {
        let PlanOutcome::Planned(plan) = TradePlan::from_levels(TradeDirection::Buy, 1.1000, 1.0960, 3.0) else {
            panic!("plan rejected");
        };
        PlannedTrade::new(plan, at_min(0), 0.02, 0)
    }

    #[test]
    fn test_unfilled_runaway_invalidates() {
        let mut trade = buy_trade();
        // 0.02 * 0.0120 = 0.00024 above entry, never touching 1.1000
        let transitions = trade.step(&bull(at_min(5), 1.10010, 1.10025));

        assert_eq!(transitions.len(), 1);
        assert!(matches!(transitions[0], TradeTransition::Invalidated { .. }));
        assert_eq!(trade.status(), TradeStatus::Closed(CloseReason::Invalidated));
        assert!(trade.to_record().entry_time.is_none());
    }

    #[test]
    fn test_unfilled_small_move_stays_pending() {
        let mut trade = buy_trade();
        assert!(trade.step(&bull(at_min(5), 1.10005, 1.10020)).is_empty());
        assert_eq!(trade.status(), TradeStatus::Pending);
    }

    #[test]
    fn test_fill_then_target() {
        let mut trade = buy_trade();
        let t = trade.step(&bear(at_min(5), 1.0990, 1.1010));
        assert_eq!(t, vec![TradeTransition::Filled { price: 1.1000 }]);
        assert_eq!(trade.status(), TradeStatus::Open);

        let t = trade.step(&bull(at_min(10), 1.1050, 1.1130));
        assert_eq!(t, vec![TradeTransition::TargetReached { price: trade.plan().target }]);

        let record = trade.to_record();
        assert!((record.r_multiple().unwrap() - 3.0).abs() < 1e-9);
        assert!(!record.is_abandoned());
    }

    #[test]
    fn test_stop_wins_on_same_candle() {
        let mut trade = buy_trade();
        // fills, then spans both stop and target
        let t = trade.step(&candle_min(5, 1.1000, 1.1200, 1.0900, 1.1100));
        assert_eq!(
            t,
            vec![
                TradeTransition::Filled { price: 1.1000 },
                TradeTransition::StoppedOut { price: 1.0960 }
            ]
        );
        assert_eq!(trade.status(), TradeStatus::Closed(CloseReason::StopLoss));
        assert!((trade.to_record().r_multiple().unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut trade = buy_trade();
        trade.step(&bear(at_min(5), 1.0950, 1.1010));
        let status = trade.status();
        let record = trade.to_record();

        for i in 0..5 {
            assert!(trade.step(&bull(at_min(10 + i * 5), 1.0, 1.2)).is_empty());
        }
        assert_eq!(trade.status(), status);
        assert_eq!(trade.to_record(), record);
    }

    #[test]
    fn test_open_at_end_is_abandoned() {
        let mut trade = buy_trade();
        trade.step(&bear(at_min(5), 1.0990, 1.1010));
        let record = trade.to_record();
        assert!(record.is_abandoned());
        assert_eq!(record.r_multiple(), None);
    }
}
