//! JSONL audit trail.
//!
//! Every state-changing command appends one JSON object per line to the
//! audit file: `{"event": ..., "ts": ..., <payload fields>}`. Amounts are
//! written as decimal units.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use paperbook::ledger::{BuyReceipt, SellReceipt};
use paperbook::rebalance::{Outcome, RebalanceReport};
use paperbook::valuation::PortfolioSnapshot;
use paperbook::{AccountId, LedgerError, Quantity, Side};

use crate::error::Result;

#[derive(Serialize)]
struct Entry<'a, T> {
    event: &'a str,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    data: T,
}

#[derive(Serialize)]
struct Empty {}

/// Append-only audit file.
pub struct AuditLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl AuditLog {
    /// Open `path` for appending, creating it and its directory if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `event` with the fields of `data`, which must serialize as a map.
    pub fn log<T: Serialize>(&mut self, event: &str, data: T) -> Result<()> {
        let entry = Entry {
            event,
            ts: Utc::now(),
            data,
        };
        let line = serde_json::to_string(&entry).map_err(io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Append an event with no payload.
    pub fn mark(&mut self, event: &str) -> Result<()> {
        self.log(event, Empty {})
    }
}

#[derive(Serialize)]
struct Opened<'a> {
    account: u64,
    name: &'a str,
    initial_balance: f64,
}

pub fn log_account_opened(audit: &mut AuditLog, account: AccountId, name: &str, balance: f64) -> Result<()> {
    audit.log(
        "account_opened",
        Opened {
            account: account.0,
            name,
            initial_balance: balance,
        },
    )
}

#[derive(Serialize)]
struct Fill<'a> {
    account: u64,
    trade_id: u64,
    code: &'a str,
    qty: Quantity,
    price: f64,
    commission: f64,
    total: f64,
    cash_after: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    avg_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    realized_pl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<Quantity>,
}

pub fn log_buy(audit: &mut AuditLog, account: AccountId, r: &BuyReceipt) -> Result<()> {
    audit.log(
        "buy_executed",
        Fill {
            account: account.0,
            trade_id: r.trade_id.0,
            code: r.code.as_str(),
            qty: r.quantity,
            price: r.price.to_f64(),
            commission: r.commission.to_f64(),
            total: r.total_amount.to_f64(),
            cash_after: r.cash_after.to_f64(),
            avg_price: Some(r.avg_price_after.to_f64()),
            realized_pl: None,
            remaining: None,
        },
    )
}

pub fn log_sell(audit: &mut AuditLog, account: AccountId, r: &SellReceipt) -> Result<()> {
    audit.log(
        "sell_executed",
        Fill {
            account: account.0,
            trade_id: r.trade_id.0,
            code: r.code.as_str(),
            qty: r.quantity,
            price: r.price.to_f64(),
            commission: r.commission.to_f64(),
            total: r.total_amount.to_f64(),
            cash_after: r.cash_after.to_f64(),
            avg_price: None,
            realized_pl: Some(r.realized_pl.to_f64()),
            remaining: Some(r.remaining_quantity),
        },
    )
}

#[derive(Serialize)]
struct Rejected<'a> {
    account: u64,
    side: String,
    code: &'a str,
    qty: Quantity,
    kind: String,
    error: String,
}

/// Log an order the ledger refused, with its error kind.
pub fn log_rejected(
    audit: &mut AuditLog,
    account: AccountId,
    side: Side,
    code: &str,
    qty: Quantity,
    error: &LedgerError,
) -> Result<()> {
    audit.log(
        "order_rejected",
        Rejected {
            account: account.0,
            side: side.to_string(),
            code,
            qty,
            kind: error.kind().to_string(),
            error: error.to_string(),
        },
    )
}

#[derive(Serialize)]
struct Snapshot {
    account: u64,
    date: String,
    total_value: f64,
    cash: f64,
    stock_value: f64,
    return_pct: f64,
}

pub fn log_snapshot(audit: &mut AuditLog, s: &PortfolioSnapshot) -> Result<()> {
    audit.log(
        "snapshot_recorded",
        Snapshot {
            account: s.account_id.0,
            date: s.date.to_string(),
            total_value: s.total_value.to_f64(),
            cash: s.cash_balance.to_f64(),
            stock_value: s.stock_value.to_f64(),
            return_pct: s.return_pct,
        },
    )
}

#[derive(Serialize)]
struct ActionLine<'a> {
    code: &'a str,
    action: String,
    current: f64,
    target: f64,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    qty: Option<Quantity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Serialize)]
struct Rebalanced<'a> {
    account: u64,
    total_value: f64,
    executed: usize,
    skipped: usize,
    failed: usize,
    actions: Vec<ActionLine<'a>>,
}

/// Log every planned action of a rebalance with its outcome.
pub fn log_rebalance(audit: &mut AuditLog, account: AccountId, report: &RebalanceReport) -> Result<()> {
    let actions = report
        .results
        .iter()
        .map(|(a, outcome)| {
            let mut line = ActionLine {
                code: a.code.as_str(),
                action: a.action.to_string(),
                current: a.current_weight,
                target: a.target_weight,
                status: "executed",
                qty: None,
                price: None,
                reason: None,
            };
            match outcome {
                Outcome::Executed(receipt) => {
                    line.qty = Some(receipt.quantity());
                    line.price = Some(receipt.price().to_f64());
                }
                Outcome::Skipped(reason) => {
                    line.status = "skipped";
                    line.reason = Some(reason.to_string());
                }
                Outcome::Failed(e) => {
                    line.status = "failed";
                    line.reason = Some(e.to_string());
                }
            }
            line
        })
        .collect();

    audit.log(
        "rebalance_completed",
        Rebalanced {
            account: account.0,
            total_value: report.total_value.to_f64(),
            executed: report.executed(),
            skipped: report.skipped(),
            failed: report.failed(),
            actions,
        },
    )
}
