//! Batch analysis entry point: seed detection followed by structure mapping

use serde::Serialize;
use tracing::info;

use super::candles::{Series, Timeframe, Trend};
use super::config::MapperConfig;
use super::error::AnalysisError;
use super::events::{EventKind, EventStamp, StructureEvent};
use super::lifecycle::TradeRecord;
use super::mapper::{AnalysisContext, MappingResult, StructureMapper};
use super::seed::{detect_seed, SeedOutcome};

/// Everything one analysis run produced
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub higher_timeframe: Timeframe,
    pub exec_timeframe: Timeframe,
    pub seed: SeedOutcome,
    /// `None` when the seed did not resolve
    pub mapping: Option<MappingResult>,
    pub events: Vec<StructureEvent>,
    pub trades: Vec<TradeRecord>,
}

impl AnalysisReport {
    pub fn final_trend(&self) -> Option<Trend> {
        self.mapping.map(|m| m.trend)
    }
}

/// Run the full engine over a higher-timeframe and an execution series.
///
/// Each call starts from an empty event log.
pub fn analyze(higher: &Series, exec: &Series, config: &MapperConfig) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    if exec.timeframe() >= higher.timeframe() {
        return Err(AnalysisError::InvalidConfig(format!(
            "execution timeframe {} must be lower than {}",
            exec.timeframe(),
            higher.timeframe()
        )));
    }

    let seed = detect_seed(higher.candles(), config.seed_window_candles)?;
    let mut ctx = AnalysisContext::new();

    let mapping = match &seed {
        SeedOutcome::Seeded(seed) => {
            let htf = higher.candles();
            ctx.log.record(
                EventStamp {
                    timeframe: higher.timeframe(),
                    index: seed.pullback_index,
                    time: htf[seed.pullback_index].time,
                    trend: seed.temp_trend,
                    depth: 0,
                },
                EventKind::SeedPullbackConfirmed {
                    pullback_high: seed.pullback_high,
                    pullback_low: seed.pullback_low,
                },
            );
            let level = match seed.trend {
                Trend::Bullish => seed.seed_high,
                Trend::Bearish => seed.seed_low,
            };
            ctx.log.record(
                EventStamp {
                    timeframe: higher.timeframe(),
                    index: seed.break_index,
                    time: seed.break_time,
                    trend: seed.trend,
                    depth: 0,
                },
                EventKind::SeedBreak {
                    break_kind: seed.break_kind,
                    level,
                },
            );

            let mapper = StructureMapper::new(higher, exec, config);
            Some(mapper.run(seed.trend, seed.start_index, seed.break_time, &mut ctx))
        }
        other => {
            info!("Seed unresolved: {:?}", other);
            None
        }
    };

    Ok(AnalysisReport {
        higher_timeframe: higher.timeframe(),
        exec_timeframe: exec.timeframe(),
        seed,
        mapping,
        events: ctx.log.into_events(),
        trades: ctx.trades,
    })
}
