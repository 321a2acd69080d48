use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use structure_mapper::data::{find_candle_files, load_minute_candles, save_report};
use structure_mapper::streams::{run_feed, FeedMessage};
use structure_mapper::trading_core::{
    analyze, detect_seed, resample, AnalysisReport, EventTag, MapperConfig, PlannerStrategy, SeedOutcome, Series,
    StreamingAnalyzer, Timeframe, TradingSummary,
};

#[derive(Parser, Debug)]
#[command(name = "structure-mapper")]
#[command(about = "Multi-timeframe market structure analysis and trade planning")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full engine over minute data and write events and trades
    Analyze {
        /// Minute-candle file (.csv / .csv.zst) or a directory of them
        #[arg(short, long, env = "STRUCTURE_INPUT")]
        input: PathBuf,

        /// Output directory for events.json, trades.json and trades.csv
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Run only seed detection and print the resolved bias
    Seed {
        /// Minute-candle file (.csv / .csv.zst)
        #[arg(short, long, env = "STRUCTURE_INPUT")]
        input: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Push a file through the streaming driver and print each published event
    Replay {
        /// Minute-candle file (.csv / .csv.zst)
        #[arg(short, long, env = "STRUCTURE_INPUT")]
        input: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Engine settings shared by every subcommand; flags override the config file
#[derive(clap::Args, Debug)]
struct EngineArgs {
    /// JSON config file (missing fields use defaults)
    #[arg(short, long, env = "STRUCTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Higher timeframe for structure
    #[arg(long, default_value = "4h")]
    higher: Timeframe,

    /// Execution timeframe for micro structure and fills
    #[arg(long, default_value = "5m")]
    exec: Timeframe,

    /// Trade planner: midpoint or order_block
    #[arg(long)]
    planner: Option<PlannerStrategy>,

    /// Opposite-colour candles confirming a pullback
    #[arg(long)]
    min_pullback_candles: Option<usize>,

    /// Retracement ratio confirming a pullback
    #[arg(long)]
    pullback_pct: Option<f64>,

    /// Order block displacement multiplier
    #[arg(long)]
    ob_multiplier: Option<f64>,

    /// Reward multiple of risk
    #[arg(long)]
    risk_reward: Option<f64>,

    /// Stop buffer in pips beyond the leg extreme
    #[arg(long)]
    stop_buffer_pips: Option<f64>,
}

impl EngineArgs {
    fn mapper_config(&self) -> Result<MapperConfig> {
        let mut config = match &self.config {
            Some(path) => MapperConfig::load(path)?,
            None => MapperConfig::default(),
        };

        if let Some(v) = self.planner {
            config.planner = v;
        }
        if let Some(v) = self.min_pullback_candles {
            config.min_pullback_candles = v;
        }
        if let Some(v) = self.pullback_pct {
            config.pullback_pct = v;
        }
        if let Some(v) = self.ob_multiplier {
            config.ob_multiplier = v;
        }
        if let Some(v) = self.risk_reward {
            config.risk_reward = v;
        }
        if let Some(v) = self.stop_buffer_pips {
            config.stop_buffer_pips = v;
        }

        config.validate()?;
        if self.exec >= self.higher {
            bail!("--exec ({}) must be lower than --higher ({})", self.exec, self.higher);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Commands::Analyze { input, output_dir, engine } => {
            run_analyze(&input, &output_dir, &engine)?;
        }
        Commands::Seed { input, engine } => {
            run_seed(&input, &engine)?;
        }
        Commands::Replay { input, engine } => {
            run_replay(&input, &engine).await?;
        }
    }

    Ok(())
}

/// File name without the .csv / .csv.zst suffix
fn run_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "input".to_string());
    name.trim_end_matches(".zst").trim_end_matches(".csv").to_string()
}

fn analyze_file(path: &Path, engine: &EngineArgs, config: &MapperConfig) -> Result<AnalysisReport> {
    let minutes = load_minute_candles(path)?;
    info!("Loaded {} minute candles from {:?}", minutes.len(), path);

    let higher = Series::new(engine.higher, resample(&minutes, engine.higher))?;
    let exec = Series::new(engine.exec, resample(&minutes, engine.exec))?;
    info!(
        "Resampled to {} {} candles and {} {} candles",
        higher.len(),
        engine.higher,
        exec.len(),
        engine.exec
    );

    analyze(&higher, &exec, config).with_context(|| format!("Analysis failed for {:?}", path))
}

fn run_analyze(input: &Path, output_dir: &Path, engine: &EngineArgs) -> Result<()> {
    let config = engine.mapper_config()?;
    info!("Planner: {} | R:R 1:{}", config.planner, config.risk_reward);

    if input.is_dir() {
        let files = find_candle_files(input)?;
        if files.is_empty() {
            bail!("No .csv or .csv.zst files in {:?}", input);
        }
        info!("Analyzing {} files in parallel", files.len());

        let results: Vec<(String, Result<AnalysisReport>)> = files
            .par_iter()
            .map(|path| (run_name(path), analyze_file(path, engine, &config)))
            .collect();

        let mut all_trades = Vec::new();
        for (name, result) in results {
            match result {
                Ok(report) => {
                    save_report(&report, &output_dir.join(&name))?;
                    print_report(&name, &report);
                    all_trades.extend(report.trades);
                }
                Err(e) => warn!("Skipping {}: {:#}", name, e),
            }
        }
        TradingSummary::from_records(&all_trades).print("COMBINED RESULTS");
    } else {
        let report = analyze_file(input, engine, &config)?;
        save_report(&report, output_dir)?;
        print_report(&run_name(input), &report);
    }

    info!("Results written to {:?}", output_dir);
    Ok(())
}

fn print_report(name: &str, report: &AnalysisReport) {
    println!("\n═══════════════════════════════════════════════════════════");
    println!("              STRUCTURE ANALYSIS: {}", name);
    println!("═══════════════════════════════════════════════════════════\n");

    println!("Timeframes:        {} / {}", report.higher_timeframe, report.exec_timeframe);
    match &report.seed {
        SeedOutcome::Seeded(seed) => {
            println!("Seed:              {} {} at {}", seed.break_kind, seed.trend, seed.break_time)
        }
        other => println!("Seed:              unresolved ({:?})", other),
    }
    if let Some(mapping) = &report.mapping {
        println!("Termination:       {}", mapping.termination);
        println!("Final Depth:       {}", mapping.depth);
        println!("Final Trend:       {}", mapping.trend);
    }

    println!("\n─── Events ───");
    println!("Total:             {}", report.events.len());
    for tag in [
        EventTag::Choch,
        EventTag::BosWithoutPoi,
        EventTag::PoiTapped,
        EventTag::MicroChoch,
        EventTag::TradeRejected,
        EventTag::TradePlanned,
    ] {
        let count = report.events.iter().filter(|e| e.tag() == tag).count();
        println!("{:<19}{}", format!("{}:", tag), count);
    }

    TradingSummary::from_records(&report.trades).print("TRADE RESULTS");
}

fn run_seed(input: &Path, engine: &EngineArgs) -> Result<()> {
    let config = engine.mapper_config()?;
    let minutes = load_minute_candles(input)?;
    let higher = resample(&minutes, engine.higher);
    info!("Resampled {} minute candles to {} {} candles", minutes.len(), higher.len(), engine.higher);

    let outcome = detect_seed(&higher, config.seed_window_candles)?;

    println!("\n═══════════════════════════════════════════════════════════");
    println!("              SEED DETECTION");
    println!("═══════════════════════════════════════════════════════════\n");
    match outcome {
        SeedOutcome::Seeded(seed) => {
            println!("Window:            {} candles", config.seed_window_candles);
            println!("Window High/Low:   {:.5} / {:.5}", seed.seed_high, seed.seed_low);
            println!("Temp Trend:        {}", seed.temp_trend);
            println!("Pullback:          {} (H {:.5} L {:.5})", higher[seed.pullback_index].time, seed.pullback_high, seed.pullback_low);
            println!("Break:             {} at {}", seed.break_kind, seed.break_time);
            println!("Trend:             {}", seed.trend);
        }
        SeedOutcome::NoPullback => println!("Result:            no pullback after the window"),
        SeedOutcome::NoBreak => println!("Result:            window high/low never broken"),
    }
    println!("\n═══════════════════════════════════════════════════════════\n");
    Ok(())
}

async fn run_replay(input: &Path, engine: &EngineArgs) -> Result<()> {
    let config = engine.mapper_config()?;
    let minutes = load_minute_candles(input)?;
    info!("Replaying {} minute candles from {:?}", minutes.len(), input);

    let analyzer = StreamingAnalyzer::new(engine.higher, engine.exec, config)?;
    let (candle_tx, candle_rx) = mpsc::channel(1024);
    let (feed_tx, mut feed_rx) = broadcast::channel::<FeedMessage>(1024);

    let printer = tokio::spawn(async move {
        loop {
            match feed_rx.recv().await {
                Ok(message) => match serde_json::to_string(&message) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to serialize feed message: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => warn!("Printer lagged, {} messages dropped", n),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let feed = tokio::spawn(run_feed(candle_rx, analyzer, feed_tx));
    for candle in minutes {
        candle_tx.send(candle).await.context("Feed stopped early")?;
    }
    drop(candle_tx);

    let analyzer = feed.await.context("Feed task failed")?;
    printer.await.context("Printer task failed")?;

    TradingSummary::from_records(analyzer.delivered_trades()).print("REPLAY RESULTS");
    Ok(())
}
