//! Minute-candle input files and analysis output files

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::trading_core::{AnalysisReport, Candle, StructureEvent, TradeRecord, TradingSummary};

/// Find all minute-candle files (.csv or .csv.zst) in a directory
pub fn find_candle_files(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(data_dir)
        .with_context(|| format!("Failed to read directory: {:?}", data_dir))?
    {
        let path = entry?.path();
        if is_candle_file(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn is_candle_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name.ends_with(".csv") || name.ends_with(".csv.zst")
}

/// Load minute candles from a plain or zstd-compressed CSV file
pub fn load_minute_candles(path: &Path) -> Result<Vec<Candle>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;

    let candles = if path.extension().map_or(false, |ext| ext == "zst") {
        let decoder = zstd::stream::Decoder::new(file)
            .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?;
        parse_minute_candles(BufReader::new(decoder))
    } else {
        parse_minute_candles(BufReader::new(file))
    };
    candles.with_context(|| format!("Failed to load candles from: {:?}", path))
}

/// Parse headerless `YYYY.MM.DD,HH:MM,open,high,low,close[,volume]` rows.
///
/// Malformed rows are skipped. Output is sorted by time with duplicate
/// timestamps dropped.
pub fn parse_minute_candles<R: Read>(reader: R) -> Result<Vec<Candle>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut candles = Vec::new();
    let mut skipped = 0u64;

    for result in csv_reader.records() {
        let record = result.with_context(|| "Failed to read CSV row")?;
        match parse_row(&record) {
            Some(candle) => candles.push(candle),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!("Skipped {} malformed rows", skipped);
    }

    candles.sort_by_key(|c| c.time);
    candles.dedup_by_key(|c| c.time);
    Ok(candles)
}

fn parse_row(record: &csv::StringRecord) -> Option<Candle> {
    if record.len() < 6 {
        return None;
    }
    let stamp = format!("{} {}", record.get(0)?, record.get(1)?);
    let time = NaiveDateTime::parse_from_str(&stamp, "%Y.%m.%d %H:%M").ok()?.and_utc();

    let price = |i: usize| record.get(i).and_then(|s| s.parse::<f64>().ok());
    Some(Candle::new(time, price(2)?, price(3)?, price(4)?, price(5)?))
}

/// Flat trade row for CSV export
#[derive(Debug, Serialize)]
struct TradeRow {
    direction: String,
    status: String,
    entry: f64,
    stop: f64,
    target: f64,
    rr: f64,
    planned_time: DateTime<Utc>,
    entry_time: Option<DateTime<Utc>>,
    exit_time: Option<DateTime<Utc>>,
    exit_price: Option<f64>,
    r_multiple: Option<f64>,
    depth: usize,
}

impl From<&TradeRecord> for TradeRow {
    fn from(t: &TradeRecord) -> Self {
        Self {
            direction: t.direction.to_string(),
            status: t.status.to_string(),
            entry: t.entry,
            stop: t.stop,
            target: t.target,
            rr: t.rr,
            planned_time: t.planned_time,
            entry_time: t.entry_time,
            exit_time: t.exit_time,
            exit_price: t.exit_price,
            r_multiple: t.r_multiple(),
            depth: t.depth,
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to write JSON: {:?}", path))?;
    writer.flush()?;
    Ok(())
}

pub fn write_events_json(path: &Path, events: &[StructureEvent]) -> Result<()> {
    write_json(path, events)
}

pub fn write_trades_json(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    write_json(path, trades)
}

pub fn write_trades_csv(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    for trade in trades {
        writer.serialize(TradeRow::from(trade))?;
    }
    writer.flush()?;
    Ok(())
}

/// Write events.json, trades.json, trades.csv and summary.json into `output_dir`
pub fn save_report(report: &AnalysisReport, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;

    write_events_json(&output_dir.join("events.json"), &report.events)?;
    write_trades_json(&output_dir.join("trades.json"), &report.trades)?;
    write_trades_csv(&output_dir.join("trades.csv"), &report.trades)?;
    write_json(
        &output_dir.join("summary.json"),
        &TradingSummary::from_records(&report.trades),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::lifecycle::{CloseReason, TradeStatus};
    use crate::trading_core::TradeDirection;
    use chrono::TimeZone;

    #[test]
    fn test_parse_minute_candles() {
        let data = "\
2023.01.02,17:01,1.06984,1.06990,1.06970,1.06980,0
garbage line
2023.01.02,17:00,1.06950,1.06990,1.06940,1.06984,0
2023.01.02,17:00,9.0,9.0,9.0,9.0,0
2023.01.02,17:02,1.06980,1.07000,bad,1.06990,0
";
        let candles = parse_minute_candles(data.as_bytes()).unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, Utc.with_ymd_and_hms(2023, 1, 2, 17, 0, 0).unwrap());
        assert_eq!(candles[0].open, 1.06950);
        assert_eq!(candles[1].close, 1.06980);
    }

    #[test]
    fn test_zstd_round_trip_through_loader() {
        let dir = std::env::temp_dir().join(format!("structure-mapper-data-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("EURUSD_M1.csv.zst");
        let raw = "2023.01.02,17:00,1.1,1.2,1.0,1.15,0\n";
        std::fs::write(&path, zstd::encode_all(raw.as_bytes(), 3).unwrap()).unwrap();

        let candles = load_minute_candles(&path).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(find_candle_files(&dir).unwrap(), vec![path]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_trades_csv_columns() {
        let dir = std::env::temp_dir().join(format!("structure-mapper-csv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trades.csv");
        let t0 = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let trade = TradeRecord {
            direction: TradeDirection::Sell,
            entry: 1.05,
            stop: 1.06,
            target: 1.02,
            rr: 3.0,
            status: TradeStatus::Closed(CloseReason::TakeProfit),
            planned_time: t0,
            entry_time: Some(t0),
            exit_time: Some(t0),
            exit_price: Some(1.02),
            depth: 0,
        };

        write_trades_csv(&path, &[trade]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("direction,status,entry"));
        assert!(lines.next().unwrap().starts_with("SELL,CLOSED(TP),1.05"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
