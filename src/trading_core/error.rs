//! Error types for the structure engine
//!
//! Only data problems live here. "Nothing found" outcomes (no pullback, no
//! break, no setup) are ordinary enum variants on the component results.

use thiserror::Error;

use super::candles::Timeframe;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("not enough data for {what}: need {needed} candles, got {got}")]
    InsufficientData {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("{timeframe} candle {index} is not later than its predecessor")]
    OutOfOrder { timeframe: Timeframe, index: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
