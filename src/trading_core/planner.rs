//! Trade planning from a micro-CHOCH leg
//!
//! Two interchangeable strategies implement [`TradePlanner`]:
//! - [`MidpointPlanner`] enters at 50% of the leg range
//! - [`OrderBlockPlanner`] enters at the near edge of the leg's unmitigated
//!   order block closest to price
//!
//! Both put the stop beyond the leg extreme plus a pip buffer and the target
//! at a fixed reward multiple of risk.

use serde::Serialize;

use super::candles::{Candle, Trend};
use super::config::{MapperConfig, PlannerStrategy};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Buy,
    Sell,
}

impl TradeDirection {
    /// Trades are taken against the higher-timeframe trend
    pub fn against(trend: Trend) -> Self {
        match trend {
            Trend::Bullish => TradeDirection::Sell,
            Trend::Bearish => TradeDirection::Buy,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeDirection::Buy => write!(f, "BUY"),
            TradeDirection::Sell => write!(f, "SELL"),
        }
    }
}

/// Entry, stop and target for one trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradePlan {
    pub direction: TradeDirection,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub rr: f64,
}

impl TradePlan {
    /// Build a plan from entry and stop; the target follows from `rr`
    pub fn from_levels(direction: TradeDirection, entry: f64, stop: f64, rr: f64) -> PlanOutcome {
        let risk = match direction {
            TradeDirection::Buy => entry - stop,
            TradeDirection::Sell => stop - entry,
        };
        if risk <= 0.0 {
            return PlanOutcome::NonPositiveRisk;
        }
        let target = match direction {
            TradeDirection::Buy => entry + rr * risk,
            TradeDirection::Sell => entry - rr * risk,
        };
        PlanOutcome::Planned(TradePlan {
            direction,
            entry,
            stop,
            target,
            rr,
        })
    }

    /// |entry - stop|
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanOutcome {
    Planned(TradePlan),
    /// Nothing tradeable in the leg
    NoSetup,
    NonPositiveRisk,
}

pub trait TradePlanner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Plan a trade in `direction` from the CHOCH leg candles
    fn plan(&self, leg: &[Candle], direction: TradeDirection) -> PlanOutcome;
}

/// Build the planner selected in `config`
pub fn planner_for(config: &MapperConfig) -> Box<dyn TradePlanner> {
    match config.planner {
        PlannerStrategy::Midpoint => Box::new(MidpointPlanner {
            stop_buffer: config.stop_buffer(),
            risk_reward: config.risk_reward,
        }),
        PlannerStrategy::OrderBlock => Box::new(OrderBlockPlanner {
            stop_buffer: config.stop_buffer(),
            risk_reward: config.risk_reward,
            displacement_multiplier: config.displacement_multiplier,
        }),
    }
}

fn leg_bounds(leg: &[Candle]) -> (f64, f64) {
    let high = leg.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let low = leg.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    (high, low)
}

fn protective_stop(leg: &[Candle], direction: TradeDirection, buffer: f64) -> f64 {
    let (high, low) = leg_bounds(leg);
    match direction {
        TradeDirection::Buy => low - buffer,
        TradeDirection::Sell => high + buffer,
    }
}

#[derive(Debug, Clone)]
pub struct MidpointPlanner {
    pub stop_buffer: f64,
    pub risk_reward: f64,
}

impl TradePlanner for MidpointPlanner {
    fn name(&self) -> &'static str {
        "midpoint"
    }

    fn plan(&self, leg: &[Candle], direction: TradeDirection) -> PlanOutcome {
        if leg.is_empty() {
            return PlanOutcome::NoSetup;
        }
        let (high, low) = leg_bounds(leg);
        let entry = (high + low) / 2.0;
        let stop = protective_stop(leg, direction, self.stop_buffer);
        TradePlan::from_levels(direction, entry, stop, self.risk_reward)
    }
}

#[derive(Debug, Clone)]
pub struct OrderBlockPlanner {
    pub stop_buffer: f64,
    pub risk_reward: f64,
    pub displacement_multiplier: f64,
}

impl OrderBlockPlanner {
    /// (low, high) of every displacement-backed order block not broken later in the leg
    fn order_blocks(&self, leg: &[Candle], direction: TradeDirection) -> Vec<(f64, f64)> {
        let mut blocks = Vec::new();
        for i in 0..leg.len().saturating_sub(1) {
            let base = &leg[i];
            let next = &leg[i + 1];
            if base.range() <= 0.0 {
                continue;
            }
            let displaced = match direction {
                TradeDirection::Buy => next.is_bullish(),
                TradeDirection::Sell => next.is_bearish(),
            } && next.range() >= self.displacement_multiplier * base.range() - EPSILON;
            if !displaced {
                continue;
            }

            let broken = leg[i + 2..].iter().any(|c| match direction {
                TradeDirection::Buy => c.low < base.low,
                TradeDirection::Sell => c.high > base.high,
            });
            if !broken {
                blocks.push((base.low, base.high));
            }
        }
        blocks
    }
}

impl TradePlanner for OrderBlockPlanner {
    fn name(&self) -> &'static str {
        "order_block"
    }

    fn plan(&self, leg: &[Candle], direction: TradeDirection) -> PlanOutcome {
        let blocks = self.order_blocks(leg, direction);
        let entry = match direction {
            TradeDirection::Buy => blocks.iter().map(|b| b.1).reduce(f64::max),
            TradeDirection::Sell => blocks.iter().map(|b| b.0).reduce(f64::min),
        };
        let Some(entry) = entry else {
            return PlanOutcome::NoSetup;
        };
        let stop = protective_stop(leg, direction, self.stop_buffer);
        TradePlan::from_levels(direction, entry, stop, self.risk_reward)
    }
}
