//! Streaming analysis over closed candles
//!
//! Buffers the higher and execution timeframes as candles close and re-runs
//! the batch engine on every higher-timeframe close. Only events that extend
//! the already delivered log are forwarded, so a consumer never sees an event
//! twice or an index move backwards.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::analysis::{analyze, AnalysisReport};
use super::candles::{Candle, Series, Timeframe};
use super::config::MapperConfig;
use super::error::AnalysisError;
use super::events::{EventLog, StructureEvent};
use super::lifecycle::TradeRecord;

/// What one higher-timeframe close produced for consumers
#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamUpdate {
    pub events: Vec<StructureEvent>,
    /// Trades that reached a terminal state since the last update
    pub trades: Vec<TradeRecord>,
}

impl StreamUpdate {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.trades.is_empty()
    }
}

pub struct StreamingAnalyzer {
    config: MapperConfig,
    higher_tf: Timeframe,
    exec_tf: Timeframe,
    higher: Vec<Candle>,
    exec: Vec<Candle>,
    delivered: EventLog,
    delivered_trades: Vec<TradeRecord>,
    /// (planned_time, entry bits) of trades already forwarded
    seen_trades: HashSet<(DateTime<Utc>, u64)>,
    last_report: Option<AnalysisReport>,
}

impl StreamingAnalyzer {
    pub fn new(higher_tf: Timeframe, exec_tf: Timeframe, config: MapperConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        if exec_tf >= higher_tf {
            return Err(AnalysisError::InvalidConfig(format!(
                "execution timeframe {} must be lower than {}",
                exec_tf, higher_tf
            )));
        }
        Ok(Self {
            config,
            higher_tf,
            exec_tf,
            higher: Vec::new(),
            exec: Vec::new(),
            delivered: EventLog::new(),
            delivered_trades: Vec::new(),
            seen_trades: HashSet::new(),
            last_report: None,
        })
    }

    pub fn higher_timeframe(&self) -> Timeframe {
        self.higher_tf
    }

    pub fn exec_timeframe(&self) -> Timeframe {
        self.exec_tf
    }

    /// Every event forwarded so far, in delivery order
    pub fn delivered(&self) -> &EventLog {
        &self.delivered
    }

    pub fn delivered_trades(&self) -> &[TradeRecord] {
        &self.delivered_trades
    }

    /// Most recent full analysis, if the buffers were long enough to run one
    pub fn last_report(&self) -> Option<&AnalysisReport> {
        self.last_report.as_ref()
    }

    /// Route a closed candle to its buffer. Only a higher-timeframe close
    /// triggers analysis.
    ///
    /// # Panics
    /// If `timeframe` is not one of the two configured timeframes, or the
    /// candle does not open strictly after the previous one.
    pub fn push(&mut self, timeframe: Timeframe, candle: Candle) -> StreamUpdate {
        if timeframe == self.exec_tf {
            self.push_exec(candle);
            StreamUpdate::default()
        } else if timeframe == self.higher_tf {
            self.push_higher(candle)
        } else {
            panic!("candle for unconfigured timeframe {}", timeframe);
        }
    }

    pub fn push_exec(&mut self, candle: Candle) {
        append_ordered(&mut self.exec, candle, self.exec_tf);
    }

    pub fn push_higher(&mut self, candle: Candle) -> StreamUpdate {
        append_ordered(&mut self.higher, candle, self.higher_tf);
        self.reanalyze()
    }

    fn reanalyze(&mut self) -> StreamUpdate {
        let report = match self.run_batch() {
            Ok(report) => report,
            Err(e) => {
                debug!("Stream analysis skipped: {}", e);
                return StreamUpdate::default();
            }
        };

        let mut update = StreamUpdate::default();
        for event in &report.events {
            match self.delivered.accept(event) {
                Ok(accepted) => update.events.push(accepted.clone()),
                Err(rejected) => debug!("Not forwarded: {}", rejected),
            }
        }

        for trade in report.trades.iter().filter(|t| !t.is_abandoned()) {
            if self.seen_trades.insert((trade.planned_time, trade.entry.to_bits())) {
                self.delivered_trades.push(trade.clone());
                update.trades.push(trade.clone());
            }
        }

        if !update.is_empty() {
            info!(
                "Stream update: {} new events, {} completed trades",
                update.events.len(),
                update.trades.len()
            );
        }
        self.last_report = Some(report);
        update
    }

    fn run_batch(&self) -> Result<AnalysisReport, AnalysisError> {
        let higher = Series::new(self.higher_tf, self.higher.clone())?;
        let exec = Series::new(self.exec_tf, self.exec.clone())?;
        analyze(&higher, &exec, &self.config)
    }
}

fn append_ordered(buffer: &mut Vec<Candle>, candle: Candle, timeframe: Timeframe) {
    if let Some(last) = buffer.last() {
        assert!(
            candle.time > last.time,
            "{} candle at {} does not follow {}",
            timeframe,
            candle.time,
            last.time
        );
    }
    buffer.push(candle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::events::EventTag;
    use crate::trading_core::test_support::{at, bear, bull};

    fn seeded_higher() -> Vec<Candle> {
        let mut candles: Vec<Candle> = (0..60)
            .map(|i| {
                let low = 1.0 + 0.001 * i as f64;
                bull(at(i * 4), low, low + 0.002)
            })
            .collect();
        candles.push(bear(at(240), 1.058, 1.0605));
        candles.push(bull(at(244), 1.059, 1.065));
        for k in 0..6 {
            let low = 1.062 + 0.004 * k as f64;
            candles.push(bull(at(248 + k * 4), low, low + 0.004));
        }
        candles
    }

    fn analyzer() -> StreamingAnalyzer {
        StreamingAnalyzer::new(Timeframe::H4, Timeframe::M5, MapperConfig::default()).unwrap()
    }

    #[test]
    fn test_stream_waits_for_enough_history() {
        let mut stream = analyzer();
        for candle in seeded_higher().into_iter().take(64) {
            assert!(stream.push_higher(candle).is_empty());
        }
        assert!(stream.last_report().is_none());
    }

    #[test]
    fn test_stream_forwards_each_event_once() {
        let mut stream = analyzer();
        let mut forwarded = Vec::new();
        for candle in seeded_higher() {
            forwarded.extend(stream.push(Timeframe::H4, candle).events);
        }

        let tags: Vec<_> = forwarded.iter().map(|e| e.tag()).collect();
        assert_eq!(
            tags,
            vec![EventTag::SeedPullbackConfirmed, EventTag::SeedBreak, EventTag::FrameStart]
        );
        assert_eq!(stream.delivered().len(), 3);
        let seqs: Vec<_> = forwarded.iter().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    #[should_panic(expected = "does not follow")]
    fn test_stream_panics_on_out_of_order() {
        let mut stream = analyzer();
        stream.push_exec(bull(at(1), 1.0, 1.1));
        stream.push_exec(bull(at(1), 1.0, 1.1));
    }

    #[test]
    fn test_stream_rejects_inverted_timeframes() {
        let result = StreamingAnalyzer::new(Timeframe::M5, Timeframe::H4, MapperConfig::default());
        assert!(matches!(result, Err(AnalysisError::InvalidConfig(_))));
    }
}
