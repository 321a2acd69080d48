//! Trading Core - market structure engine shared by the batch CLI and the live feed
//!
//! This module contains the decision components:
//! - Candle series and resampling
//! - Seed detection (initial bias)
//! - Pullback confirmation and POI detection on the higher timeframe
//! - Micro-structure tracking and trade planning on the execution timeframe
//! - Trade lifecycle and outcome summaries
//! - Recursive structure mapping with an ordered event log
//! - Batch and streaming entry points

pub mod analysis;
pub mod candles;
pub mod config;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod mapper;
pub mod micro;
pub mod planner;
pub mod poi;
pub mod pullback;
pub mod report;
pub mod resample;
pub mod seed;
pub mod stream;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use analysis::{analyze, AnalysisReport};
pub use candles::{Candle, Series, Timeframe, Trend};
pub use config::{MapperConfig, PlannerStrategy};
pub use error::AnalysisError;
pub use events::{AppendRejected, EventKind, EventLog, EventTag, StructureEvent};
pub use lifecycle::{CloseReason, TradeRecord, TradeStatus};
pub use mapper::{MappingResult, StructureMapper, Termination};
pub use planner::{TradeDirection, TradePlan};
pub use poi::{Poi, PoiKind};
pub use report::TradingSummary;
pub use resample::{resample, CandleAggregator};
pub use seed::{detect_seed, SeedOutcome};
pub use stream::{StreamUpdate, StreamingAnalyzer};
