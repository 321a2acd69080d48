//! Market structure mapper
//!
//! Runs one structure frame at a time over a higher timeframe (bias) and an
//! execution timeframe (entries):
//! 1. Lock the protected swing at the frame anchor
//! 2. Validate a pullback on the higher timeframe from the BOS candle
//! 3. Detect POIs over the leg up to the pullback
//! 4. Scan execution candles in strict priority order:
//!    trade management, HTF CHOCH, BOS without POI, POI invalidation,
//!    POI tap, micro-structure tracking, trade planning
//!
//! A CHOCH or a BOS hands a new frame back to the driver loop instead of
//! recursing, so long histories never grow the call stack. `max_depth` caps
//! the number of frames.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::candles::{Candle, Series, Timeframe, Trend};
use super::config::MapperConfig;
use super::events::{EventKind, EventLog, EventStamp, RejectReason};
use super::lifecycle::{PlannedTrade, TradeRecord, TradeTransition};
use super::micro::{micro_protection, MicroSignal, MicroTracker};
use super::planner::{planner_for, PlanOutcome, TradeDirection, TradePlanner};
use super::poi::{detect_pois, Poi, PoiKind, PoiState};
use super::pullback::confirm_pullback;

/// Mutable state threaded through every frame of one analysis run
#[derive(Debug, Default)]
pub struct AnalysisContext {
    pub log: EventLog,
    pub trades: Vec<TradeRecord>,
}

impl AnalysisContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Why mapping stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Execution candles ran out
    SeriesEnd,
    /// Higher timeframe never confirmed a pullback
    NoPullback,
    /// No execution candle after the pullback
    NoExecutionData,
    /// Frame too short to map
    InsufficientData,
    DepthExhausted,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::SeriesEnd => write!(f, "series end"),
            Termination::NoPullback => write!(f, "no pullback"),
            Termination::NoExecutionData => write!(f, "no execution data"),
            Termination::InsufficientData => write!(f, "insufficient data"),
            Termination::DepthExhausted => write!(f, "max depth reached"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MappingResult {
    pub termination: Termination,
    /// Depth of the last frame
    pub depth: usize,
    /// Trend of the last frame
    pub trend: Trend,
}

/// One structure frame
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Higher-timeframe index of the anchor candle (protected swing)
    htf_start: usize,
    trend: Trend,
    bos_time: DateTime<Utc>,
    depth: usize,
}

enum FrameExit {
    Next(Frame),
    Done(Termination),
}

/// Midpoint invalidation level for the active POI, given the next untouched one.
///
/// Returns `None` for a liquidity pool followed by an order block, which has
/// no defined rule.
pub fn invalidation_level(
    active: &Poi,
    next: Option<&Poi>,
    trend: Trend,
    swing_high: f64,
    swing_low: f64,
) -> Option<f64> {
    let p0_low = active.price_low();
    let p0_high = active.price_high();

    let level = match (trend, active.kind(), next) {
        (Trend::Bullish, PoiKind::OrderBlock, Some(n)) if n.kind() == PoiKind::OrderBlock => {
            (p0_high + n.price_high()) / 2.0
        }
        (Trend::Bullish, PoiKind::OrderBlock, Some(n)) => (p0_high + n.price_low()) / 2.0,
        (Trend::Bullish, PoiKind::Liquidity, Some(n)) if n.kind() == PoiKind::Liquidity => {
            (p0_low + n.price_low()) / 2.0
        }
        (Trend::Bullish, PoiKind::OrderBlock, None) => (p0_high + swing_low) / 2.0,
        (Trend::Bullish, PoiKind::Liquidity, None) => (p0_low + swing_low) / 2.0,

        (Trend::Bearish, PoiKind::OrderBlock, Some(n)) if n.kind() == PoiKind::OrderBlock => {
            (p0_low + n.price_low()) / 2.0
        }
        (Trend::Bearish, PoiKind::OrderBlock, Some(n)) => (p0_low + n.price_high()) / 2.0,
        (Trend::Bearish, PoiKind::Liquidity, Some(n)) if n.kind() == PoiKind::Liquidity => {
            (p0_high + n.price_high()) / 2.0
        }
        (Trend::Bearish, PoiKind::OrderBlock, None) => (p0_low + swing_high) / 2.0,
        (Trend::Bearish, PoiKind::Liquidity, None) => (p0_high + swing_high) / 2.0,

        (_, PoiKind::Liquidity, Some(_)) => return None,
    };
    Some(level)
}

pub struct StructureMapper<'a> {
    higher: &'a Series,
    exec: &'a Series,
    config: &'a MapperConfig,
    planner: Box<dyn TradePlanner>,
}

impl<'a> StructureMapper<'a> {
    pub fn new(higher: &'a Series, exec: &'a Series, config: &'a MapperConfig) -> Self {
        Self {
            higher,
            exec,
            config,
            planner: planner_for(config),
        }
    }

    /// Replace the configured planner
    pub fn with_planner(mut self, planner: Box<dyn TradePlanner>) -> Self {
        self.planner = planner;
        self
    }

    /// Map structure starting at higher-timeframe candle `htf_start`
    pub fn run(
        &self,
        trend: Trend,
        htf_start: usize,
        bos_time: DateTime<Utc>,
        ctx: &mut AnalysisContext,
    ) -> MappingResult {
        let mut frame = Frame {
            htf_start,
            trend,
            bos_time,
            depth: 0,
        };

        loop {
            match self.run_frame(&frame, ctx) {
                FrameExit::Next(next) => frame = next,
                FrameExit::Done(termination) => {
                    info!(
                        "Mapping finished at depth {} ({}): {}",
                        frame.depth, frame.trend, termination
                    );
                    return MappingResult {
                        termination,
                        depth: frame.depth,
                        trend: frame.trend,
                    };
                }
            }
        }
    }

    fn stamp(&self, timeframe: Timeframe, candle: &Candle, index: usize, frame: &Frame) -> EventStamp {
        EventStamp {
            timeframe,
            index,
            time: candle.time,
            trend: frame.trend,
            depth: frame.depth,
        }
    }

    fn run_frame(&self, frame: &Frame, ctx: &mut AnalysisContext) -> FrameExit {
        let htf = self.higher.candles();
        let exec = self.exec.candles();
        let htf_tf = self.higher.timeframe();
        let exec_tf = self.exec.timeframe();
        let trend = frame.trend;

        if frame.htf_start >= htf.len() {
            return FrameExit::Done(Termination::InsufficientData);
        }
        let bos_idx = frame.htf_start.max(self.higher.first_at_or_after(frame.bos_time));
        if bos_idx >= htf.len() {
            info!("[d{}] No {} candle at or after BOS {}", frame.depth, htf_tf, frame.bos_time);
            return FrameExit::Done(Termination::InsufficientData);
        }

        info!(
            "[d{}] Structure start: {} from {} (BOS {})",
            frame.depth, trend, htf[frame.htf_start].time, frame.bos_time
        );
        ctx.log.record(
            self.stamp(htf_tf, &htf[bos_idx], bos_idx, frame),
            EventKind::FrameStart {
                anchor_time: htf[frame.htf_start].time,
                bos_time: frame.bos_time,
            },
        );

        if frame.depth >= self.config.max_depth {
            warn!("[d{}] Max structure depth reached", frame.depth);
            ctx.log.record(
                self.stamp(htf_tf, &htf[bos_idx], bos_idx, frame),
                EventKind::DepthExhausted {
                    max_depth: self.config.max_depth,
                },
            );
            return FrameExit::Done(Termination::DepthExhausted);
        }

        if htf.len() - frame.htf_start < self.config.min_frame_candles {
            info!("[d{}] Not enough {} data after anchor", frame.depth, htf_tf);
            return FrameExit::Done(Termination::InsufficientData);
        }

        // Protected swing
        let anchor = &htf[frame.htf_start];
        let protected = match trend {
            Trend::Bullish => anchor.low,
            Trend::Bearish => anchor.high,
        };

        let Some(pullback) = confirm_pullback(
            &htf[bos_idx..],
            trend,
            protected,
            self.config.min_pullback_candles,
            self.config.pullback_pct,
        ) else {
            info!("[d{}] No valid pullback", frame.depth);
            return FrameExit::Done(Termination::NoPullback);
        };

        let pullback_idx = bos_idx + pullback.index;
        let extreme_idx = bos_idx + pullback.extreme_index;
        let pullback_time = htf[pullback_idx].time;
        let (swing_high, swing_low) = match trend {
            Trend::Bullish => (pullback.extreme, protected),
            Trend::Bearish => (protected, pullback.extreme),
        };
        info!(
            "[d{}] Pullback confirmed ({}) @ {}: swing high {:.5} swing low {:.5}",
            frame.depth, trend, pullback_time, swing_high, swing_low
        );
        ctx.log.record(
            self.stamp(htf_tf, &htf[pullback_idx], pullback_idx, frame),
            EventKind::PullbackConfirmed { swing_high, swing_low },
        );

        let mut pois = detect_pois(
            &htf[frame.htf_start..=pullback_idx],
            trend,
            self.config.ob_multiplier,
            self.config.liq_pullback_candles,
            frame.htf_start,
        );
        info!("[d{}] POIs detected: {}", frame.depth, pois.len());
        if !pois.is_empty() {
            ctx.log.record(
                self.stamp(htf_tf, &htf[pullback_idx], pullback_idx, frame),
                EventKind::PoisDetected { pois: pois.clone() },
            );
        }

        let scan_start = self.exec.first_after(pullback_time);
        if scan_start >= exec.len() {
            info!("[d{}] No {} data after pullback", frame.depth, exec_tf);
            return FrameExit::Done(Termination::NoExecutionData);
        }
        let micro_start = self.exec.first_at_or_after(pullback_time);

        let mut cursor = 0usize;
        let mut micro: Option<MicroTracker> = None;
        let mut trade: Option<PlannedTrade> = None;

        for (i, candle) in exec.iter().enumerate().skip(scan_start) {
            let stamp = self.stamp(exec_tf, candle, i, frame);

            // Trade management
            if let Some(active_trade) = trade.as_mut() {
                for transition in active_trade.step(candle) {
                    let kind = match transition {
                        TradeTransition::Filled { price } => EventKind::EntryFilled { price },
                        TradeTransition::StoppedOut { price } => EventKind::StopHit { price },
                        TradeTransition::TargetReached { price } => EventKind::TargetHit { price },
                        TradeTransition::Invalidated { reached } => EventKind::TradeInvalidated { reached },
                    };
                    ctx.log.record(stamp, kind);
                }
                if active_trade.status().is_closed() {
                    ctx.trades.push(active_trade.to_record());
                    trade = None;
                    micro = None;
                }
                continue;
            }

            // Higher-timeframe CHOCH
            let choch_level = match trend {
                Trend::Bullish if candle.close < swing_low => Some(swing_low),
                Trend::Bearish if candle.close > swing_high => Some(swing_high),
                _ => None,
            };
            if let Some(broken_level) = choch_level {
                info!("[d{}] CHOCH @ {} through {:.5}", frame.depth, candle.time, broken_level);
                ctx.log.record(stamp, EventKind::Choch { broken_level });
                return FrameExit::Next(Frame {
                    htf_start: extreme_idx,
                    trend: trend.opposite(),
                    bos_time: candle.time,
                    depth: frame.depth + 1,
                });
            }

            // BOS without an active POI
            if micro.is_none() {
                let bos_level = match trend {
                    Trend::Bullish if candle.close > swing_high => Some(swing_high),
                    Trend::Bearish if candle.close < swing_low => Some(swing_low),
                    _ => None,
                };
                if let Some(broken_level) = bos_level {
                    info!("[d{}] BOS without POI @ {} through {:.5}", frame.depth, candle.time, broken_level);
                    ctx.log.record(stamp, EventKind::BosWithoutPoi { broken_level });
                    let leg_end = self.higher.containing(candle.time).unwrap_or(pullback_idx);
                    return FrameExit::Next(Frame {
                        htf_start: leg_origin(htf, extreme_idx, leg_end, trend),
                        trend,
                        bos_time: candle.time,
                        depth: frame.depth + 1,
                    });
                }
            }

            // POI invalidation
            if micro.is_some() && cursor < pois.len() {
                let level = invalidation_level(&pois[cursor], pois.get(cursor + 1), trend, swing_high, swing_low);
                let crossed = level.filter(|&level| match trend {
                    Trend::Bullish => candle.low < level,
                    Trend::Bearish => candle.high > level,
                });
                if let Some(level) = crossed {
                    pois[cursor].state = PoiState::Invalidated;
                    info!("[d{}] POI invalidated @ {}: {} (level {:.5})", frame.depth, candle.time, pois[cursor], level);
                    ctx.log.record(
                        stamp,
                        EventKind::PoiInvalidated {
                            poi: pois[cursor].clone(),
                            level,
                        },
                    );
                    cursor += 1;
                    micro = None;
                    continue;
                }
            }

            // POI tap
            if micro.is_none() {
                let Some(poi) = pois.get(cursor) else {
                    continue;
                };
                if !poi.is_tapped_by(candle) {
                    continue;
                }

                info!("[d{}] POI tapped @ {}: {}", frame.depth, candle.time, poi);
                ctx.log.record(stamp, EventKind::PoiTapped { poi: poi.clone() });

                let level = micro_protection(
                    &exec[micro_start..=i],
                    trend.opposite(),
                    self.config.micro_min_pullback_candles,
                    self.config.micro_retrace_pct,
                );
                match level {
                    Some(level) => {
                        info!("[d{}] {} protected point: {:.5}", frame.depth, exec_tf, level);
                        ctx.log.record(stamp, EventKind::MicroStructureReady { level });
                        micro = Some(MicroTracker::new(trend, level, self.config.micro_min_pullback_candles));
                    }
                    // POI stays untouched and can be tapped again
                    None => debug!("[d{}] No usable {} structure at tap", frame.depth, exec_tf),
                }
                continue;
            }

            // Micro-structure tracking
            let Some(tracker) = micro.as_mut() else {
                continue;
            };
            match tracker.process_candle(candle) {
                Some(MicroSignal::Bos { previous, level }) => {
                    debug!("[d{}] Micro BOS @ {}: {:.5} -> {:.5}", frame.depth, candle.time, previous, level);
                    ctx.log.record(stamp, EventKind::MicroBos { previous, level });
                }
                Some(MicroSignal::Choch { broken_level }) => {
                    info!("[d{}] Micro CHOCH @ {} through {:.5}", frame.depth, candle.time, broken_level);
                    ctx.log.record(stamp, EventKind::MicroChoch { broken_level });
                    if let Some(poi) = pois.get_mut(cursor) {
                        poi.state = PoiState::Consumed;
                    }
                    cursor += 1;
                    micro = None;

                    trade = self.plan_trade(&exec[scan_start..=i], trend, swing_high, swing_low, stamp, ctx);
                }
                None => {}
            }
        }

        if let Some(open) = trade {
            info!("[d{}] Series ended with trade {}", frame.depth, open.status());
            ctx.trades.push(open.to_record());
        }
        FrameExit::Done(Termination::SeriesEnd)
    }

    /// Plan over the CHOCH leg and apply the HTF realism check
    fn plan_trade(
        &self,
        leg: &[Candle],
        trend: Trend,
        swing_high: f64,
        swing_low: f64,
        stamp: EventStamp,
        ctx: &mut AnalysisContext,
    ) -> Option<PlannedTrade> {
        let reject = |ctx: &mut AnalysisContext, reason: RejectReason| {
            info!("[d{}] Trade rejected: {}", stamp.depth, reason);
            ctx.log.record(stamp, EventKind::TradeRejected { reason });
        };

        if leg.len() < 2 {
            reject(ctx, RejectReason::LegTooShort { candles: leg.len() });
            return None;
        }

        let direction = TradeDirection::against(trend);
        let plan = match self.planner.plan(leg, direction) {
            PlanOutcome::Planned(plan) => plan,
            PlanOutcome::NoSetup => {
                reject(ctx, RejectReason::NoSetup);
                return None;
            }
            PlanOutcome::NonPositiveRisk => {
                reject(ctx, RejectReason::NonPositiveRisk);
                return None;
            }
        };

        let beyond_swing = match direction {
            TradeDirection::Buy if plan.target >= swing_high => Some(swing_high),
            TradeDirection::Sell if plan.target <= swing_low => Some(swing_low),
            _ => None,
        };
        if let Some(htf_swing) = beyond_swing {
            reject(
                ctx,
                RejectReason::UnrealisticTarget {
                    target: plan.target,
                    htf_swing,
                },
            );
            return None;
        }

        info!(
            "[d{}] TRADE PLANNED ({}): {} entry {:.5} stop {:.5} target {:.5}",
            stamp.depth,
            self.planner.name(),
            plan.direction,
            plan.entry,
            plan.stop,
            plan.target
        );
        ctx.log.record(stamp, EventKind::TradePlanned { trade: plan });
        Some(PlannedTrade::new(
            plan,
            stamp.time,
            self.config.pending_invalidation_pct,
            stamp.depth,
        ))
    }
}

/// Index of the most extreme counter point of the completed leg: the lowest
/// low when bullish, the highest high when bearish.
fn leg_origin(htf: &[Candle], from: usize, to: usize, trend: Trend) -> usize {
    let to = to.max(from).min(htf.len() - 1);
    let mut best = from;
    for i in from..=to {
        let better = match trend {
            Trend::Bullish => htf[i].low < htf[best].low,
            Trend::Bearish => htf[i].high > htf[best].high,
        };
        if better {
            best = i;
        }
    }
    best
}
