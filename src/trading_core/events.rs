//! Structure event log
//!
//! Every state transition of the engine is appended here as a typed event.
//! Per timeframe the log enforces two rules:
//! - candle indices never go backwards
//! - an `(index, kind)` pair is recorded at most once
//!
//! Each accepted event also receives a per-timeframe sequence number that is
//! strictly increasing, which is what downstream consumers key on when they
//! replay or fan out the log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use super::candles::{Timeframe, Trend};
use super::planner::TradePlan;
use super::poi::Poi;
use super::seed::BreakKind;

/// Why a planned trade was discarded after a micro-CHOCH
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Target lies beyond the higher-timeframe swing extreme
    UnrealisticTarget { target: f64, htf_swing: f64 },
    /// CHOCH leg had fewer than two candles
    LegTooShort { candles: usize },
    /// Planner found nothing to trade
    NoSetup,
    /// Planner produced entry == stop or an inverted stop
    NonPositiveRisk,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::UnrealisticTarget { target, htf_swing } => {
                write!(f, "target {:.5} beyond HTF swing {:.5}", target, htf_swing)
            }
            RejectReason::LegTooShort { candles } => write!(f, "CHOCH leg too short ({} candles)", candles),
            RejectReason::NoSetup => write!(f, "no setup in CHOCH leg"),
            RejectReason::NonPositiveRisk => write!(f, "non-positive risk"),
        }
    }
}

/// Payload of a structure event, one variant per transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    SeedPullbackConfirmed { pullback_high: f64, pullback_low: f64 },
    SeedBreak { break_kind: BreakKind, level: f64 },
    FrameStart { anchor_time: DateTime<Utc>, bos_time: DateTime<Utc> },
    PullbackConfirmed { swing_high: f64, swing_low: f64 },
    PoisDetected { pois: Vec<Poi> },
    Choch { broken_level: f64 },
    BosWithoutPoi { broken_level: f64 },
    PoiInvalidated { poi: Poi, level: f64 },
    PoiTapped { poi: Poi },
    MicroStructureReady { level: f64 },
    MicroBos { previous: f64, level: f64 },
    MicroChoch { broken_level: f64 },
    TradeRejected { reason: RejectReason },
    TradePlanned { trade: TradePlan },
    EntryFilled { price: f64 },
    StopHit { price: f64 },
    TargetHit { price: f64 },
    TradeInvalidated { reached: f64 },
    DepthExhausted { max_depth: usize },
}

/// Payload-free discriminant of [`EventKind`], used for de-duplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    SeedPullbackConfirmed,
    SeedBreak,
    FrameStart,
    PullbackConfirmed,
    PoisDetected,
    Choch,
    BosWithoutPoi,
    PoiInvalidated,
    PoiTapped,
    MicroStructureReady,
    MicroBos,
    MicroChoch,
    TradeRejected,
    TradePlanned,
    EntryFilled,
    StopHit,
    TargetHit,
    TradeInvalidated,
    DepthExhausted,
}

impl EventKind {
    pub fn tag(&self) -> EventTag {
        match self {
            EventKind::SeedPullbackConfirmed { .. } => EventTag::SeedPullbackConfirmed,
            EventKind::SeedBreak { .. } => EventTag::SeedBreak,
            EventKind::FrameStart { .. } => EventTag::FrameStart,
            EventKind::PullbackConfirmed { .. } => EventTag::PullbackConfirmed,
            EventKind::PoisDetected { .. } => EventTag::PoisDetected,
            EventKind::Choch { .. } => EventTag::Choch,
            EventKind::BosWithoutPoi { .. } => EventTag::BosWithoutPoi,
            EventKind::PoiInvalidated { .. } => EventTag::PoiInvalidated,
            EventKind::PoiTapped { .. } => EventTag::PoiTapped,
            EventKind::MicroStructureReady { .. } => EventTag::MicroStructureReady,
            EventKind::MicroBos { .. } => EventTag::MicroBos,
            EventKind::MicroChoch { .. } => EventTag::MicroChoch,
            EventKind::TradeRejected { .. } => EventTag::TradeRejected,
            EventKind::TradePlanned { .. } => EventTag::TradePlanned,
            EventKind::EntryFilled { .. } => EventTag::EntryFilled,
            EventKind::StopHit { .. } => EventTag::StopHit,
            EventKind::TargetHit { .. } => EventTag::TargetHit,
            EventKind::TradeInvalidated { .. } => EventTag::TradeInvalidated,
            EventKind::DepthExhausted { .. } => EventTag::DepthExhausted,
        }
    }
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventTag::SeedPullbackConfirmed => "SEED_PULLBACK",
            EventTag::SeedBreak => "SEED_BREAK",
            EventTag::FrameStart => "START",
            EventTag::PullbackConfirmed => "PULLBACK",
            EventTag::PoisDetected => "POIS",
            EventTag::Choch => "CHOCH",
            EventTag::BosWithoutPoi => "BOS",
            EventTag::PoiInvalidated => "POI_INVALIDATED",
            EventTag::PoiTapped => "POI_TAPPED",
            EventTag::MicroStructureReady => "MICRO_READY",
            EventTag::MicroBos => "MICRO_BOS",
            EventTag::MicroChoch => "MICRO_CHOCH",
            EventTag::TradeRejected => "TRADE_REJECTED",
            EventTag::TradePlanned => "TRADE_PLANNED",
            EventTag::EntryFilled => "ENTRY_FILLED",
            EventTag::StopHit => "SL_HIT",
            EventTag::TargetHit => "TP_HIT",
            EventTag::TradeInvalidated => "TRADE_INVALID",
            EventTag::DepthExhausted => "MAX_DEPTH",
        };
        write!(f, "{}", name)
    }
}

/// Where and when an event happened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventStamp {
    pub timeframe: Timeframe,
    /// Candle index within that timeframe's series
    pub index: usize,
    pub time: DateTime<Utc>,
    pub trend: Trend,
    /// Structure frame depth that produced the event
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureEvent {
    pub timeframe: Timeframe,
    pub index: usize,
    /// Per-timeframe sequence number, strictly increasing
    pub seq: u64,
    pub time: DateTime<Utc>,
    pub trend: Trend,
    pub depth: usize,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl StructureEvent {
    pub fn stamp(&self) -> EventStamp {
        EventStamp {
            timeframe: self.timeframe,
            index: self.index,
            time: self.time,
            trend: self.trend,
            depth: self.depth,
        }
    }

    pub fn tag(&self) -> EventTag {
        self.kind.tag()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppendRejected {
    #[error("{timeframe} index {index} precedes last logged index {last}")]
    Regressed {
        timeframe: Timeframe,
        index: usize,
        last: usize,
    },
    #[error("{timeframe} event {tag} already logged at index {index}")]
    Duplicate {
        timeframe: Timeframe,
        index: usize,
        tag: EventTag,
    },
}

#[derive(Debug, Clone, Default)]
struct Cursor {
    last_index: Option<usize>,
    tags_at_last: Vec<EventTag>,
    next_seq: u64,
}

/// Append-only, per-timeframe ordered event log
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<StructureEvent>,
    cursors: HashMap<Timeframe, Cursor>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, rejecting regressions and duplicates
    pub fn try_append(&mut self, stamp: EventStamp, kind: EventKind) -> Result<&StructureEvent, AppendRejected> {
        let tag = kind.tag();
        let cursor = self.cursors.entry(stamp.timeframe).or_default();

        match cursor.last_index {
            Some(last) if stamp.index < last => {
                return Err(AppendRejected::Regressed {
                    timeframe: stamp.timeframe,
                    index: stamp.index,
                    last,
                });
            }
            Some(last) if stamp.index == last => {
                if cursor.tags_at_last.contains(&tag) {
                    return Err(AppendRejected::Duplicate {
                        timeframe: stamp.timeframe,
                        index: stamp.index,
                        tag,
                    });
                }
                cursor.tags_at_last.push(tag);
            }
            _ => {
                cursor.last_index = Some(stamp.index);
                cursor.tags_at_last.clear();
                cursor.tags_at_last.push(tag);
            }
        }

        let seq = cursor.next_seq;
        cursor.next_seq += 1;

        self.events.push(StructureEvent {
            timeframe: stamp.timeframe,
            index: stamp.index,
            seq,
            time: stamp.time,
            trend: stamp.trend,
            depth: stamp.depth,
            kind,
        });
        Ok(&self.events[self.events.len() - 1])
    }

    /// Append from inside the engine. A rejection here is a logic bug.
    pub fn record(&mut self, stamp: EventStamp, kind: EventKind) -> &StructureEvent {
        match self.try_append(stamp, kind) {
            Ok(event) => event,
            Err(e) => panic!("event log invariant violated: {}", e),
        }
    }

    /// Re-log an event produced elsewhere, assigning it this log's sequence number
    pub fn accept(&mut self, event: &StructureEvent) -> Result<&StructureEvent, AppendRejected> {
        self.try_append(event.stamp(), event.kind.clone())
    }

    pub fn events(&self) -> &[StructureEvent] {
        &self.events
    }

    pub fn for_timeframe(&self, timeframe: Timeframe) -> impl Iterator<Item = &StructureEvent> {
        self.events.iter().filter(move |e| e.timeframe == timeframe)
    }

    pub fn count(&self, tag: EventTag) -> usize {
        self.events.iter().filter(|e| e.tag() == tag).count()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<StructureEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::test_support::at_min;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn stamp(timeframe: Timeframe, index: usize) -> EventStamp {
        EventStamp {
            timeframe,
            index,
            time: at_min(index as i64 * timeframe.minutes()),
            trend: Trend::Bullish,
            depth: 0,
        }
    }

    fn kind_for(choice: u8) -> EventKind {
        match choice % 4 {
            0 => EventKind::Choch { broken_level: 1.0 },
            1 => EventKind::EntryFilled { price: 1.0 },
            2 => EventKind::StopHit { price: 1.0 },
            _ => EventKind::MicroChoch { broken_level: 1.0 },
        }
    }

    #[test]
    fn test_duplicate_and_regression_rejected() {
        let mut log = EventLog::new();
        log.record(stamp(Timeframe::M5, 10), EventKind::EntryFilled { price: 1.1 });
        log.record(stamp(Timeframe::M5, 10), EventKind::StopHit { price: 1.09 });

        let dup = log.try_append(stamp(Timeframe::M5, 10), EventKind::EntryFilled { price: 1.2 });
        assert!(matches!(dup, Err(AppendRejected::Duplicate { tag: EventTag::EntryFilled, .. })));

        let back = log.try_append(stamp(Timeframe::M5, 9), EventKind::Choch { broken_level: 1.0 });
        assert!(matches!(back, Err(AppendRejected::Regressed { last: 10, .. })));

        // Other timeframes keep independent cursors
        assert!(log.try_append(stamp(Timeframe::H4, 0), EventKind::Choch { broken_level: 1.0 }).is_ok());
        assert_eq!(log.len(), 3);
    }

    #[test]
    #[should_panic(expected = "event log invariant violated")]
    fn test_record_panics_on_duplicate() {
        let mut log = EventLog::new();
        log.record(stamp(Timeframe::H4, 3), EventKind::Choch { broken_level: 1.0 });
        log.record(stamp(Timeframe::H4, 3), EventKind::Choch { broken_level: 1.0 });
    }

    #[test]
    fn test_accept_reassigns_sequence() {
        let mut source = EventLog::new();
        source.record(stamp(Timeframe::M5, 1), EventKind::EntryFilled { price: 1.0 });
        source.record(stamp(Timeframe::M5, 4), EventKind::StopHit { price: 0.9 });

        let mut delivered = EventLog::new();
        let second = source.events()[1].clone();
        assert_eq!(delivered.accept(&second).unwrap().seq, 0);
        assert!(delivered.accept(&source.events()[0]).is_err());
    }

    #[test]
    fn test_random_interleaved_appends_keep_order() {
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let mut log = EventLog::new();
            let mut cursor: HashMap<Timeframe, usize> = HashMap::new();

            for _ in 0..200 {
                let tf = if rng.gen_bool(0.5) { Timeframe::H4 } else { Timeframe::M5 };
                let current = *cursor.get(&tf).unwrap_or(&0);
                let delta: i64 = rng.gen_range(-2..=3);
                let index = (current as i64 + delta).max(0) as usize;
                if log.try_append(stamp(tf, index), kind_for(rng.gen())).is_ok() {
                    cursor.insert(tf, index);
                }
            }

            for tf in [Timeframe::H4, Timeframe::M5] {
                let events: Vec<_> = log.for_timeframe(tf).collect();
                let mut seen = HashSet::new();
                for pair in events.windows(2) {
                    assert!(pair[0].index <= pair[1].index);
                    assert!(pair[0].seq < pair[1].seq);
                }
                for e in &events {
                    assert!(seen.insert((e.index, e.tag())), "duplicate ({}, {})", e.index, e.tag());
                }
            }
        }
    }

    #[test]
    fn test_event_serializes_flat() {
        let mut log = EventLog::new();
        log.record(stamp(Timeframe::H4, 2), EventKind::Choch { broken_level: 1.25 });
        let json = serde_json::to_value(&log.events()[0]).unwrap();
        assert_eq!(json["event"], "choch");
        assert_eq!(json["timeframe"], "4h");
        assert_eq!(json["broken_level"], 1.25);
        assert_eq!(json["trend"], "BULLISH");
    }
}
