//! Tunables for the structure engine
//!
//! Every threshold the engine uses is exposed here rather than hard-coded;
//! different deployments run with different pullback settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::candles::Timeframe;
use super::error::AnalysisError;

/// Days of higher-timeframe history the seed window covers by default
const SEED_LOOKBACK_DAYS: usize = 10;

/// Which trade planner turns a micro-CHOCH leg into a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerStrategy {
    /// Entry at 50% of the CHOCH leg's range
    #[default]
    Midpoint,
    /// Entry at the near edge of the leg's best unmitigated order block
    OrderBlock,
}

impl std::fmt::Display for PlannerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlannerStrategy::Midpoint => write!(f, "midpoint"),
            PlannerStrategy::OrderBlock => write!(f, "order_block"),
        }
    }
}

impl std::str::FromStr for PlannerStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "midpoint" | "mid" => Ok(PlannerStrategy::Midpoint),
            "order_block" | "order-block" | "ob" => Ok(PlannerStrategy::OrderBlock),
            other => Err(format!("unknown planner '{}' (expected midpoint or order_block)", other)),
        }
    }
}

/// Configuration for seed detection, structure mapping and trade planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Opposite-colour candles that confirm a higher-timeframe pullback (default: 5)
    pub min_pullback_candles: usize,
    /// Retracement ratio that confirms a pullback on its own (default: 0.35)
    pub pullback_pct: f64,
    /// Displacement/base range ratio for a leg order block (default: 1.8)
    pub ob_multiplier: f64,
    /// Counter-coloured candles forming a liquidity pullback (default: 2)
    pub liq_pullback_candles: usize,
    /// Price value of one pip (default: 0.0001)
    pub pip_value: f64,
    /// Displacement ratio used by the order-block trade planner (default: 1.5)
    pub displacement_multiplier: f64,
    /// Hard cap on structure re-entries (default: 50)
    pub max_depth: usize,
    /// Higher-timeframe candles in the seed lookback (default: 60 = 10 days of 4H)
    pub seed_window_candles: usize,
    /// Pips added beyond the leg extreme for the stop (default: 4)
    pub stop_buffer_pips: f64,
    /// Reward multiple of risk (default: 3)
    pub risk_reward: f64,
    /// Opposite candles confirming a micro swing (default: 2)
    pub micro_min_pullback_candles: usize,
    /// Retracement ratio confirming a micro swing (default: 0.9)
    pub micro_retrace_pct: f64,
    /// Fraction of the entry-to-target distance that voids an unfilled order (default: 0.02)
    pub pending_invalidation_pct: f64,
    /// Fewest higher-timeframe candles a structure frame needs (default: 5)
    pub min_frame_candles: usize,
    pub planner: PlannerStrategy,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            min_pullback_candles: 5,
            pullback_pct: 0.35,
            ob_multiplier: 1.8,
            liq_pullback_candles: 2,
            pip_value: 0.0001,
            displacement_multiplier: 1.5,
            max_depth: 50,
            seed_window_candles: SEED_LOOKBACK_DAYS * Timeframe::H4.candles_per_day(),
            stop_buffer_pips: 4.0,
            risk_reward: 3.0,
            micro_min_pullback_candles: 2,
            micro_retrace_pct: 0.9,
            pending_invalidation_pct: 0.02,
            min_frame_candles: 5,
            planner: PlannerStrategy::Midpoint,
        }
    }
}

impl MapperConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: MapperConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Stop buffer expressed in price
    pub fn stop_buffer(&self) -> f64 {
        self.stop_buffer_pips * self.pip_value
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        let ratio_ok = |v: f64| v > 0.0 && v <= 1.0;

        if !ratio_ok(self.pullback_pct) {
            return Err(AnalysisError::InvalidConfig(format!(
                "pullback_pct must be in (0, 1], got {}",
                self.pullback_pct
            )));
        }
        if !ratio_ok(self.micro_retrace_pct) {
            return Err(AnalysisError::InvalidConfig(format!(
                "micro_retrace_pct must be in (0, 1], got {}",
                self.micro_retrace_pct
            )));
        }
        if self.ob_multiplier <= 0.0 || self.displacement_multiplier <= 0.0 {
            return Err(AnalysisError::InvalidConfig(
                "order block multipliers must be positive".to_string(),
            ));
        }
        if self.pip_value <= 0.0 || self.risk_reward <= 0.0 {
            return Err(AnalysisError::InvalidConfig(
                "pip_value and risk_reward must be positive".to_string(),
            ));
        }
        if self.stop_buffer_pips < 0.0 || self.pending_invalidation_pct < 0.0 {
            return Err(AnalysisError::InvalidConfig(
                "stop_buffer_pips and pending_invalidation_pct cannot be negative".to_string(),
            ));
        }
        if self.min_pullback_candles == 0
            || self.micro_min_pullback_candles == 0
            || self.liq_pullback_candles == 0
            || self.seed_window_candles == 0
        {
            return Err(AnalysisError::InvalidConfig(
                "candle counts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MapperConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.stop_buffer() - 0.0004).abs() < 1e-12);
        // ten days of 4H candles
        assert_eq!(config.seed_window_candles, 60);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: MapperConfig =
            serde_json::from_str(r#"{"pullback_pct": 0.9, "planner": "order_block"}"#).unwrap();
        assert_eq!(config.pullback_pct, 0.9);
        assert_eq!(config.planner, PlannerStrategy::OrderBlock);
        assert_eq!(config.min_pullback_candles, 5);
        assert_eq!(config.max_depth, 50);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let config = MapperConfig {
            pullback_pct: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidConfig(_))));
    }

    #[test]
    fn test_planner_strategy_parse() {
        assert_eq!("ob".parse::<PlannerStrategy>().unwrap(), PlannerStrategy::OrderBlock);
        assert_eq!("midpoint".parse::<PlannerStrategy>().unwrap(), PlannerStrategy::Midpoint);
        assert!("fib".parse::<PlannerStrategy>().is_err());
    }
}
