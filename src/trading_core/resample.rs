//! Candle resampling from a base (usually 1-minute) feed into engine timeframes
//!
//! Buckets are aligned to the Unix epoch and labelled by their left edge.
//! Buckets that receive no base candle are skipped, never filled.

use chrono::{DateTime, Duration, Utc};

use super::candles::{Candle, Timeframe};

/// Left edge of the `timeframe` bucket containing `time`
pub fn bucket_start(time: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let width = timeframe.minutes() * 60;
    time - Duration::seconds(time.timestamp().rem_euclid(width))
}

/// In-progress candle for one bucket
#[derive(Debug, Clone, Copy)]
struct CandleBuilder {
    time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

impl CandleBuilder {
    fn new(time: DateTime<Utc>, candle: &Candle) -> Self {
        Self {
            time,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
        }
    }

    fn add_candle(&mut self, candle: &Candle) {
        self.high = self.high.max(candle.high);
        self.low = self.low.min(candle.low);
        self.close = candle.close;
    }

    fn to_candle(&self) -> Candle {
        Candle::new(self.time, self.open, self.high, self.low, self.close)
    }
}

/// Incremental resampler: completed buckets come out as the next one starts
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    timeframe: Timeframe,
    current: Option<CandleBuilder>,
}

impl CandleAggregator {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            current: None,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Feed one base candle; returns the previous bucket once it is complete
    pub fn push(&mut self, candle: &Candle) -> Option<Candle> {
        let bucket = bucket_start(candle.time, self.timeframe);

        match &mut self.current {
            Some(builder) if builder.time == bucket => {
                builder.add_candle(candle);
                None
            }
            Some(builder) => {
                let completed = builder.to_candle();
                self.current = Some(CandleBuilder::new(bucket, candle));
                Some(completed)
            }
            None => {
                self.current = Some(CandleBuilder::new(bucket, candle));
                None
            }
        }
    }

    /// Emit the partially built bucket, if any
    pub fn flush(&mut self) -> Option<Candle> {
        self.current.take().map(|b| b.to_candle())
    }
}

/// Resample an ordered base series into `timeframe` candles
pub fn resample(candles: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    let mut aggregator = CandleAggregator::new(timeframe);
    let mut out: Vec<Candle> = candles.iter().filter_map(|c| aggregator.push(c)).collect();
    out.extend(aggregator.flush());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::test_support::{at_min, candle_min};

    #[test]
    fn test_resample_ohlc_and_labels() {
        let minutes = vec![
            candle_min(1, 1.10, 1.12, 1.09, 1.11),
            candle_min(2, 1.11, 1.15, 1.10, 1.14),
            candle_min(4, 1.14, 1.14, 1.05, 1.06),
            candle_min(5, 1.06, 1.08, 1.06, 1.07),
        ];
        let bars = resample(&minutes, Timeframe::M5);

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0], Candle::new(at_min(0), 1.10, 1.15, 1.05, 1.06));
        assert_eq!(bars[1], Candle::new(at_min(5), 1.06, 1.08, 1.06, 1.07));
    }

    #[test]
    fn test_resample_drops_empty_buckets() {
        let minutes = vec![
            candle_min(0, 1.0, 1.1, 0.9, 1.05),
            // 4h-later gap, nothing in between
            candle_min(240, 1.05, 1.2, 1.0, 1.15),
        ];
        let bars = resample(&minutes, Timeframe::M30);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].time, at_min(240));
    }

    #[test]
    fn test_aggregator_emits_on_next_bucket() {
        let mut agg = CandleAggregator::new(Timeframe::M5);
        assert_eq!(agg.push(&candle_min(0, 1.0, 1.1, 0.9, 1.0)), None);
        assert_eq!(agg.push(&candle_min(3, 1.0, 1.2, 0.95, 1.1)), None);

        let done = agg.push(&candle_min(7, 1.1, 1.1, 1.0, 1.05)).unwrap();
        assert_eq!(done, Candle::new(at_min(0), 1.0, 1.2, 0.9, 1.1));

        assert_eq!(agg.flush(), Some(Candle::new(at_min(5), 1.1, 1.1, 1.0, 1.05)));
        assert_eq!(agg.flush(), None);
    }

    #[test]
    fn test_bucket_start_alignment() {
        assert_eq!(bucket_start(at_min(239), Timeframe::H4), at_min(0));
        assert_eq!(bucket_start(at_min(241), Timeframe::H4), at_min(240));
    }
}
