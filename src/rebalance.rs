//! Threshold rebalancing of a live account toward target weights.
//!
//! [`plan`] is the pure diff; [`execute`] prices it against the account's
//! marked value and trades each instrument through the ledger. A failure on
//! one instrument is recorded and the rest proceed.

use std::fmt;

use log::{info, warn};

use crate::error::{LedgerError, Result};
use crate::feed::PriceFeed;
use crate::ledger::{BuyReceipt, Ledger, OrderRequest, SellReceipt};
use crate::store::LedgerStore;
use crate::types::{AccountId, InstrumentCode, Money, Quantity};
use crate::valuation::{self, ValuationReport};

/// Weight drift (absolute, as a fraction) tolerated before trading.
pub const DEFAULT_THRESHOLD: f64 = 0.05;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Action {
    Buy,
    Sell,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
        }
    }
}

/// One instrument whose weight drifted past the threshold.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RebalanceAction {
    pub code: InstrumentCode,
    pub action: Action,
    pub current_weight: f64,
    pub target_weight: f64,
}

impl RebalanceAction {
    /// `target - current`, signed.
    pub fn diff(&self) -> f64 {
        self.target_weight - self.current_weight
    }
}

impl fmt::Display for RebalanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<4} {:<8} {:>6.2}% -> {:>6.2}% ({:+.2}pp)",
            self.action,
            self.code,
            self.current_weight * 100.0,
            self.target_weight * 100.0,
            self.diff() * 100.0
        )
    }
}

/// Actions for every target whose weight differs from the current one by
/// more than `threshold`.
///
/// Instruments held but absent from `targets` are left alone. Output follows
/// the order of `targets`.
pub fn plan(
    current: &[(InstrumentCode, f64)],
    targets: &[(InstrumentCode, f64)],
    threshold: f64,
) -> Vec<RebalanceAction> {
    targets
        .iter()
        .filter_map(|&(code, target_weight)| {
            let current_weight = current
                .iter()
                .find(|(c, _)| *c == code)
                .map_or(0.0, |(_, w)| *w);
            if (current_weight - target_weight).abs() <= threshold {
                return None;
            }
            let action = if target_weight > current_weight {
                Action::Buy
            } else {
                Action::Sell
            };
            Some(RebalanceAction {
                code,
                action,
                current_weight,
                target_weight,
            })
        })
        .collect()
}

/// The ledger receipt of an executed action.
#[derive(Debug, Clone, PartialEq)]
pub enum Receipt {
    Buy(BuyReceipt),
    Sell(SellReceipt),
}

impl Receipt {
    pub fn quantity(&self) -> Quantity {
        match self {
            Receipt::Buy(r) => r.quantity,
            Receipt::Sell(r) => r.quantity,
        }
    }

    pub fn price(&self) -> Money {
        match self {
            Receipt::Buy(r) => r.price,
            Receipt::Sell(r) => r.price,
        }
    }
}

/// What happened to one planned action.
#[derive(Debug)]
pub enum Outcome {
    Executed(Receipt),
    /// Nothing traded, with the reason
    Skipped(&'static str),
    Failed(LedgerError),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Executed(r) => write!(f, "executed {} @ {}", r.quantity(), r.price()),
            Outcome::Skipped(reason) => write!(f, "skipped: {reason}"),
            Outcome::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// Result of a rebalance run.
#[derive(Debug)]
pub struct RebalanceReport {
    /// Marked total value the trade sizes were computed from
    pub total_value: Money,
    pub valuation: ValuationReport,
    pub results: Vec<(RebalanceAction, Outcome)>,
}

impl RebalanceReport {
    pub fn executed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Executed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|(_, o)| pred(o)).count()
    }
}

impl fmt::Display for RebalanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rebalance on total value {}", self.total_value)?;
        for (action, outcome) in &self.results {
            writeln!(f, "  {action}  {outcome}")?;
        }
        write!(
            f,
            "  {} executed, {} skipped, {} failed",
            self.executed(),
            self.skipped(),
            self.failed()
        )
    }
}

/// Refresh marks, plan against `targets`, and trade each action.
///
/// Trade value is `(target - current) × total value`; the share count is
/// that value over the latest quote, floored. Sells run before buys so their
/// proceeds can fund the buys.
pub fn execute<S: LedgerStore>(
    ledger: &mut Ledger<S>,
    feed: &dyn PriceFeed,
    account: AccountId,
    targets: &[(InstrumentCode, f64)],
    threshold: f64,
) -> Result<RebalanceReport> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(LedgerError::Validation(format!(
            "threshold must be non-negative, got {threshold}"
        )));
    }
    if let Some((code, w)) = targets
        .iter()
        .find(|(_, w)| !w.is_finite() || !(0.0..=1.0).contains(w))
    {
        return Err(LedgerError::Validation(format!(
            "target weight {w} for {code} outside [0, 1]"
        )));
    }

    let valuation = valuation::refresh(ledger, feed, account)?;
    let view = ledger.portfolio(account)?;
    let total_value = view.total_value;

    let mut actions = plan(&view.weights(), targets, threshold);
    actions.sort_by_key(|a| a.action == Action::Buy);

    let mut results = Vec::with_capacity(actions.len());
    for action in actions {
        let outcome = trade(ledger, feed, account, &action, total_value);
        match &outcome {
            Outcome::Failed(e) => warn!("rebalance {}: {e}", action.code),
            other => info!("rebalance {}: {other}", action.code),
        }
        results.push((action, outcome));
    }

    Ok(RebalanceReport {
        total_value,
        valuation,
        results,
    })
}

fn trade<S: LedgerStore>(
    ledger: &mut Ledger<S>,
    feed: &dyn PriceFeed,
    account: AccountId,
    action: &RebalanceAction,
    total_value: Money,
) -> Outcome {
    let price = match feed.latest_quote(action.code) {
        Ok(p) if p.is_positive() => p,
        Ok(p) => {
            return Outcome::Failed(LedgerError::InvalidPrice {
                code: action.code,
                reason: format!("quote {p} is not positive"),
            });
        }
        Err(e) => {
            return Outcome::Failed(LedgerError::InvalidPrice {
                code: action.code,
                reason: e.to_string(),
            });
        }
    };

    let trade_value = action.diff().abs() * total_value.to_f64();
    let mut quantity = (trade_value / price.to_f64()).floor() as Quantity;
    if action.action == Action::Sell {
        let held = ledger
            .position(account, action.code)
            .map_or(0, |p| p.quantity);
        quantity = quantity.min(held);
    }
    if quantity == 0 {
        return Outcome::Skipped("quantity rounds to zero");
    }

    let reason = format!(
        "rebalance: {:.1}% -> {:.1}%",
        action.current_weight * 100.0,
        action.target_weight * 100.0
    );
    let req = OrderRequest::new(account, action.code, quantity)
        .at_price(price)
        .with_reason(reason);
    let result = match action.action {
        Action::Buy => ledger.execute_buy(req, feed).map(Receipt::Buy),
        Action::Sell => ledger.execute_sell(req, feed).map(Receipt::Sell),
    };
    match result {
        Ok(receipt) => Outcome::Executed(receipt),
        Err(e) => Outcome::Failed(e),
    }
}
