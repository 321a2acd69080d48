//! Real-time driver: minute candles in, structure events out

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::trading_core::{Candle, CandleAggregator, StreamUpdate, StreamingAnalyzer, StructureEvent, TradeRecord};

/// Message published to feed subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum FeedMessage {
    Event(StructureEvent),
    Trade(TradeRecord),
}

/// Drive `analyzer` from a channel of 1-minute candles until the sender closes.
///
/// Minute candles are aggregated into the analyzer's two timeframes; on each
/// bucket boundary the execution candle is delivered before the higher one.
/// Buckets still open when the channel closes are delivered as final candles.
/// Returns the analyzer so callers can inspect what was delivered.
pub async fn run_feed(
    mut rx: mpsc::Receiver<Candle>,
    mut analyzer: StreamingAnalyzer,
    tx: broadcast::Sender<FeedMessage>,
) -> StreamingAnalyzer {
    let mut exec_agg = CandleAggregator::new(analyzer.exec_timeframe());
    let mut higher_agg = CandleAggregator::new(analyzer.higher_timeframe());
    let mut minutes = 0u64;

    info!(
        "Feed started: {} / {}",
        analyzer.higher_timeframe(),
        analyzer.exec_timeframe()
    );

    while let Some(candle) = rx.recv().await {
        minutes += 1;
        if let Some(exec) = exec_agg.push(&candle) {
            analyzer.push_exec(exec);
        }
        if let Some(higher) = higher_agg.push(&candle) {
            publish(&tx, analyzer.push_higher(higher));
        }
    }

    if let Some(exec) = exec_agg.flush() {
        analyzer.push_exec(exec);
    }
    if let Some(higher) = higher_agg.flush() {
        publish(&tx, analyzer.push_higher(higher));
    }

    info!(
        "Feed closed after {} candles: {} events, {} trades delivered",
        minutes,
        analyzer.delivered().len(),
        analyzer.delivered_trades().len()
    );
    analyzer
}

fn publish(tx: &broadcast::Sender<FeedMessage>, update: StreamUpdate) {
    for event in update.events {
        debug!("Publishing {} @ {} #{}", event.tag(), event.time, event.index);
        // No subscribers is not an error for the feed
        let _ = tx.send(FeedMessage::Event(event));
    }
    for trade in update.trades {
        let _ = tx.send(FeedMessage::Trade(trade));
    }
}
