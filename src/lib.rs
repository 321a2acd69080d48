// Library crate - exports the structure engine, file I/O and the live feed driver

pub mod data;
pub mod streams;
pub mod trading_core;

// Re-export commonly used types
pub use trading_core::{analyze, AnalysisError, AnalysisReport, Candle, MapperConfig, Series, Timeframe, Trend};
