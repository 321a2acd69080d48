//! Trade outcome statistics in units of risk (R)

use serde::Serialize;

use super::lifecycle::{CloseReason, TradeRecord, TradeStatus};

/// Summary of trade records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TradingSummary {
    pub total_trades: u32,
    pub wins: u32,
    pub losses: u32,
    /// Voided before fill
    pub invalidated: u32,
    /// Still pending or open when the data ended
    pub abandoned: u32,
    /// Wins over closed (win + loss) trades, in percent
    pub win_rate: f64,
    pub total_r: f64,
    pub profit_factor: f64,
    pub avg_win_r: f64,
    pub avg_loss_r: f64,
    /// Largest peak-to-trough decline of cumulative R
    pub max_drawdown_r: f64,
}

impl TradingSummary {
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let mut summary = TradingSummary {
            total_trades: records.len() as u32,
            ..Default::default()
        };

        let mut gross_win = 0.0;
        let mut gross_loss = 0.0;
        let mut equity = 0.0f64;
        let mut peak = 0.0f64;

        for record in records {
            match record.status {
                TradeStatus::Closed(CloseReason::Invalidated) => summary.invalidated += 1,
                TradeStatus::Pending | TradeStatus::Open => summary.abandoned += 1,
                TradeStatus::Closed(CloseReason::StopLoss) | TradeStatus::Closed(CloseReason::TakeProfit) => {}
            }

            let Some(r) = record.r_multiple() else {
                continue;
            };
            if r > 0.0 {
                summary.wins += 1;
                gross_win += r;
            } else {
                summary.losses += 1;
                gross_loss += r.abs();
            }

            equity += r;
            peak = peak.max(equity);
            summary.max_drawdown_r = summary.max_drawdown_r.max(peak - equity);
        }

        let closed = summary.wins + summary.losses;
        summary.win_rate = if closed > 0 {
            summary.wins as f64 / closed as f64 * 100.0
        } else {
            0.0
        };
        summary.total_r = gross_win - gross_loss;
        summary.profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        summary.avg_win_r = if summary.wins > 0 { gross_win / summary.wins as f64 } else { 0.0 };
        summary.avg_loss_r = if summary.losses > 0 {
            -(gross_loss / summary.losses as f64)
        } else {
            0.0
        };
        summary
    }

    /// Print the results banner
    pub fn print(&self, title: &str) {
        println!("\n═══════════════════════════════════════════════════════════");
        println!("              {}", title);
        println!("═══════════════════════════════════════════════════════════\n");

        println!("Total Trades:      {}", self.total_trades);
        println!("Wins:              {} ({:.1}%)", self.wins, self.win_rate);
        println!("Losses:            {}", self.losses);
        println!("Invalidated:       {}", self.invalidated);
        println!("Abandoned:         {}", self.abandoned);
        println!();
        println!("Profit Factor:     {:.2}", self.profit_factor);
        println!("Avg Win:           {:+.2} R", self.avg_win_r);
        println!("Avg Loss:          {:+.2} R", self.avg_loss_r);
        println!("Total:             {:+.2} R", self.total_r);
        println!("Max Drawdown:      {:.2} R", self.max_drawdown_r);

        println!("\n═══════════════════════════════════════════════════════════\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::planner::TradeDirection;
    use crate::trading_core::test_support::at;

    fn record(status: TradeStatus, exit_price: Option<f64>) -> TradeRecord {
        TradeRecord {
            direction: TradeDirection::Buy,
            entry: 1.1000,
            stop: 1.0960,
            target: 1.1120,
            rr: 3.0,
            status,
            planned_time: at(0),
            entry_time: exit_price.map(|_| at(1)),
            exit_time: exit_price.map(|_| at(2)),
            exit_price,
            depth: 0,
        }
    }

    #[test]
    fn test_summary_counts_and_r() {
        let records = vec![
            record(TradeStatus::Closed(CloseReason::TakeProfit), Some(1.1120)),
            record(TradeStatus::Closed(CloseReason::StopLoss), Some(1.0960)),
            record(TradeStatus::Closed(CloseReason::StopLoss), Some(1.0960)),
            record(TradeStatus::Closed(CloseReason::Invalidated), None),
            record(TradeStatus::Open, None),
        ];
        let summary = TradingSummary::from_records(&records);

        assert_eq!(summary.total_trades, 5);
        assert_eq!(summary.wins, 1);
        assert_eq!(summary.losses, 2);
        assert_eq!(summary.invalidated, 1);
        assert_eq!(summary.abandoned, 1);
        assert!((summary.win_rate - 100.0 / 3.0).abs() < 1e-9);
        assert!((summary.total_r - 1.0).abs() < 1e-6);
        assert!((summary.profit_factor - 1.5).abs() < 1e-6);
        assert!((summary.max_drawdown_r - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_summary_empty() {
        let summary = TradingSummary::from_records(&[]);
        assert_eq!(summary, TradingSummary::default());
    }
}
