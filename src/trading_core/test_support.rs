//! Candle fixtures for unit tests

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::candles::Candle;

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
}

/// `hours` after the fixture epoch
pub fn at(hours: i64) -> DateTime<Utc> {
    base_time() + Duration::hours(hours)
}

/// `minutes` after the fixture epoch
pub fn at_min(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

pub fn candle(hours: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle::new(at(hours), open, high, low, close)
}

pub fn candle_min(minutes: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle::new(at_min(minutes), open, high, low, close)
}

/// Bullish candle spanning `low..high`, opening and closing a tenth inside the range
pub fn bull(time: DateTime<Utc>, low: f64, high: f64) -> Candle {
    let pad = (high - low) * 0.1;
    Candle::new(time, low + pad, high, low, high - pad)
}

/// Bearish candle spanning `low..high`
pub fn bear(time: DateTime<Utc>, low: f64, high: f64) -> Candle {
    let pad = (high - low) * 0.1;
    Candle::new(time, high - pad, high, low, low + pad)
}
