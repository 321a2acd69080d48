//! Candle, timeframe and trend primitives shared by every engine component

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::error::AnalysisError;

/// A closed OHLC candle, labelled by its open time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self { time, open, high, low, close }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// High minus low
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// True when `price` lies inside the candle's high/low range (inclusive)
    pub fn brackets(&self, price: f64) -> bool {
        self.low <= price && price <= self.high
    }
}

/// Candle timeframes understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M30 => 30,
            Timeframe::H4 => 240,
        }
    }

    /// Number of candles of this timeframe in one calendar day
    pub fn candles_per_day(&self) -> usize {
        (24 * 60 / self.minutes()) as usize
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timeframe::M1 => write!(f, "1m"),
            Timeframe::M5 => write!(f, "5m"),
            Timeframe::M30 => write!(f, "30m"),
            Timeframe::H4 => write!(f, "4h"),
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1m" | "m1" => Ok(Timeframe::M1),
            "5m" | "m5" => Ok(Timeframe::M5),
            "30m" | "m30" => Ok(Timeframe::M30),
            "4h" | "h4" => Ok(Timeframe::H4),
            other => Err(format!("unknown timeframe '{}' (expected 1m, 5m, 30m or 4h)", other)),
        }
    }
}

/// Direction of market structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
}

impl Trend {
    pub fn opposite(&self) -> Trend {
        match self {
            Trend::Bullish => Trend::Bearish,
            Trend::Bearish => Trend::Bullish,
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Bullish => write!(f, "BULLISH"),
            Trend::Bearish => write!(f, "BEARISH"),
        }
    }
}

/// An ordered candle sequence for one timeframe.
///
/// Times are strictly increasing; gaps are allowed. The engine only ever reads
/// it through sub-slices.
#[derive(Debug, Clone)]
pub struct Series {
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl Series {
    pub fn new(timeframe: Timeframe, candles: Vec<Candle>) -> Result<Self, AnalysisError> {
        if let Some(index) = candles
            .windows(2)
            .position(|pair| pair[1].time <= pair[0].time)
        {
            return Err(AnalysisError::OutOfOrder {
                timeframe,
                index: index + 1,
            });
        }
        Ok(Self { timeframe, candles })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Index of the first candle whose time is `>= time`
    pub fn first_at_or_after(&self, time: DateTime<Utc>) -> usize {
        self.candles.partition_point(|c| c.time < time)
    }

    /// Index of the first candle whose time is `> time`
    pub fn first_after(&self, time: DateTime<Utc>) -> usize {
        self.candles.partition_point(|c| c.time <= time)
    }

    /// Index of the candle whose period contains `time`, if any candle opened at or before it
    pub fn containing(&self, time: DateTime<Utc>) -> Option<usize> {
        self.first_after(time).checked_sub(1)
    }
}
