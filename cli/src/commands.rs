//! Command implementations: load state, call the library, print, audit.
//!
//! [`Context`] bundles what every command needs. It is generic over the
//! ledger store so the same code runs against the JSON state file and, in
//! tests, an in-memory store.

use chrono::NaiveDate;
use log::{info, warn};

use paperbook::analytics::{self, RiskParams};
use paperbook::backtest::{self, BacktestConfig};
use paperbook::construct::{self, WeightingStrategy, Window};
use paperbook::feed::{MemoryFeed, UniverseScreener};
use paperbook::ledger::{BuyReceipt, Ledger, OrderRequest, PortfolioView, SellReceipt};
use paperbook::rebalance::{self, RebalanceReport};
use paperbook::store::{JsonFileStore, LedgerStore};
use paperbook::valuation::{self, PortfolioSnapshot};
use paperbook::{AccountId, InstrumentCode, Money, Quantity, Side};

use crate::audit::{self, AuditLog};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::market;

/// Everything a command runs against.
pub struct Context<S: LedgerStore> {
    pub config: Config,
    pub ledger: Ledger<S>,
    pub feed: MemoryFeed,
    /// Analytics are computed as of this date
    pub as_of: NaiveDate,
    pub audit: AuditLog,
}

impl Context<JsonFileStore> {
    /// Open the state file, market data and audit log named by `config`.
    pub fn open(config: Config) -> Result<Self> {
        let store = JsonFileStore::open(config.state_path())?;
        let (feed, latest) = if config.market_path().exists() {
            market::load_feed(&config.market_path())?
        } else {
            warn!(
                "market data {} not found, quotes must be given explicitly",
                config.market_path().display()
            );
            (MemoryFeed::default(), None)
        };
        let audit = AuditLog::open(&config.audit_path())?;
        Context::new(config, store, feed, latest, audit)
    }
}

impl<S: LedgerStore> Context<S> {
    /// `as_of` defaults to today when the market data has no closes.
    pub fn new(
        config: Config,
        store: S,
        feed: MemoryFeed,
        as_of: Option<NaiveDate>,
        audit: AuditLog,
    ) -> Result<Self> {
        let ledger = Ledger::new(store).with_cost_model(config.cost_model()?);
        let as_of = as_of.unwrap_or_else(|| ledger.now().date());
        Ok(Self {
            config,
            ledger,
            feed,
            as_of,
            audit,
        })
    }

    fn account_or_default(&self, account: Option<u64>) -> AccountId {
        account.map_or_else(|| self.config.account_id(), AccountId)
    }

    // === Ledger ===

    /// Open a funded account; name and balance default to the config.
    pub fn open_account(&mut self, name: Option<&str>, balance: Option<Money>) -> Result<AccountId> {
        let name = name.unwrap_or(&self.config.account.name).to_string();
        let balance = match balance {
            Some(b) => b,
            None => self.config.initial_balance()?,
        };
        let id = self.ledger.open_account(&name, balance)?;
        audit::log_account_opened(&mut self.audit, id, &name, balance.to_f64())?;
        println!("Opened account {id} \"{name}\" with {balance}");
        Ok(id)
    }

    pub fn buy(
        &mut self,
        account: Option<u64>,
        code: InstrumentCode,
        quantity: Quantity,
        price: Option<Money>,
        reason: Option<&str>,
    ) -> Result<BuyReceipt> {
        let account = self.account_or_default(account);
        let req = order(account, code, quantity, price, reason);
        match self.ledger.execute_buy(req, &self.feed) {
            Ok(r) => {
                audit::log_buy(&mut self.audit, account, &r)?;
                println!(
                    "BUY {} {} @ {}  commission {}  total {}  avg {}  cash {}",
                    r.quantity, r.code, r.price, r.commission, r.total_amount, r.avg_price_after, r.cash_after
                );
                Ok(r)
            }
            Err(e) => {
                audit::log_rejected(&mut self.audit, account, Side::Buy, code.as_str(), quantity, &e)?;
                Err(e.into())
            }
        }
    }

    pub fn sell(
        &mut self,
        account: Option<u64>,
        code: InstrumentCode,
        quantity: Quantity,
        price: Option<Money>,
        reason: Option<&str>,
    ) -> Result<SellReceipt> {
        let account = self.account_or_default(account);
        let req = order(account, code, quantity, price, reason);
        match self.ledger.execute_sell(req, &self.feed) {
            Ok(r) => {
                audit::log_sell(&mut self.audit, account, &r)?;
                println!(
                    "SELL {} {} @ {}  commission {}  total {}  P&L {} ({:+.2}%)  remaining {}  cash {}",
                    r.quantity,
                    r.code,
                    r.price,
                    r.commission,
                    r.total_amount,
                    r.realized_pl,
                    r.realized_pl_pct,
                    r.remaining_quantity,
                    r.cash_after
                );
                Ok(r)
            }
            Err(e) => {
                audit::log_rejected(&mut self.audit, account, Side::Sell, code.as_str(), quantity, &e)?;
                Err(e.into())
            }
        }
    }

    pub fn show_portfolio(&self, account: Option<u64>) -> Result<PortfolioView> {
        let view = self.ledger.portfolio(self.account_or_default(account))?;
        print_portfolio(&view);
        Ok(view)
    }

    pub fn show_trades(&self, account: Option<u64>, limit: usize) -> Result<()> {
        let account = self.account_or_default(account);
        self.ledger.account(account)?;
        let trades = self.ledger.recent_trades(account, limit);
        if trades.is_empty() {
            println!("No trades.");
            return Ok(());
        }
        println!(
            "  {:<6} {:<19} {:<4} {:<8} {:>8} {:>14} {:>12} {:>16}  reason",
            "id", "time", "side", "code", "qty", "price", "commission", "total"
        );
        for t in trades {
            println!(
                "  {:<6} {:<19} {:<4} {:<8} {:>8} {:>14} {:>12} {:>16}  {}",
                t.id.to_string(),
                t.trade_time.format("%Y-%m-%d %H:%M:%S").to_string(),
                t.side.to_string(),
                t.code.as_str(),
                t.quantity,
                t.price.to_string(),
                t.commission.to_string(),
                t.total_amount.to_string(),
                t.reason
            );
        }
        Ok(())
    }

    // === Valuation ===

    /// Mark positions at the latest quotes and list exit signals.
    pub fn refresh(&mut self, account: Option<u64>) -> Result<()> {
        let account = self.account_or_default(account);
        let report = valuation::refresh(&mut self.ledger, &self.feed, account)?;
        println!("{report}");
        let signals = valuation::exit_signals(&self.ledger, account, self.config.exit_rule())?;
        for s in &signals {
            println!(
                "  {:<11} {:<8} {:>8} @ {} (avg {}, {:+.2}%)",
                s.kind.to_string(),
                s.code.as_str(),
                s.quantity,
                s.current_price,
                s.avg_price,
                s.unrealized_pl_pct
            );
        }
        Ok(())
    }

    /// Refresh and record the snapshot for `date` (default: the market date).
    pub fn snapshot(&mut self, account: Option<u64>, date: Option<NaiveDate>) -> Result<PortfolioSnapshot> {
        let account = self.account_or_default(account);
        let date = date.unwrap_or(self.as_of);
        let snapshot = valuation::record_snapshot(&mut self.ledger, &self.feed, account, date)?;
        audit::log_snapshot(&mut self.audit, &snapshot)?;
        println!(
            "Snapshot {} {}: total {}  cash {}  stock {}  ({:+.2}%)",
            account, snapshot.date, snapshot.total_value, snapshot.cash_balance, snapshot.stock_value, snapshot.return_pct
        );
        Ok(snapshot)
    }

    pub fn show_history(&self, account: Option<u64>, days: usize) -> Result<()> {
        let account = self.account_or_default(account);
        self.ledger.account(account)?;
        let snapshots = valuation::history(&self.ledger, account, days);
        if snapshots.is_empty() {
            println!("No snapshots.");
            return Ok(());
        }
        println!(
            "  {:<10} {:>18} {:>18} {:>18} {:>9}",
            "date", "total", "cash", "stock", "return%"
        );
        for s in &snapshots {
            println!(
                "  {:<10} {:>18} {:>18} {:>18} {:>9.2}",
                s.date.to_string(),
                s.total_value.to_string(),
                s.cash_balance.to_string(),
                s.stock_value.to_string(),
                s.return_pct
            );
        }
        Ok(())
    }

    // === Analytics ===

    /// Refresh marks, then print the account performance report.
    pub fn show_metrics(&mut self, account: Option<u64>, days: Option<usize>) -> Result<()> {
        let account = self.account_or_default(account);
        valuation::refresh(&mut self.ledger, &self.feed, account)?;
        let days = days.unwrap_or(self.config.analytics.report_days);
        let report = analytics::performance_report(&self.ledger, account, days)?;
        println!("{report}");
        Ok(())
    }

    /// Risk of one instrument, a weighted basket, or the account's holdings.
    ///
    /// With no codes, the holdings of `account` at their current weights are
    /// analysed.
    pub fn show_risk(
        &self,
        account: Option<u64>,
        codes: &[InstrumentCode],
        weights: Option<&[f64]>,
    ) -> Result<()> {
        let params = self.config.risk_params();
        match codes {
            [code] => {
                let profile = analytics::instrument_risk(&self.feed, *code, self.as_of, &params)?;
                println!("{profile}");
            }
            [] => {
                let view = self.ledger.portfolio(self.account_or_default(account))?;
                let held = view.weights();
                if held.is_empty() {
                    println!("No positions.");
                    return Ok(());
                }
                self.print_basket_risk(&held, &params)?;
            }
            _ => {
                let weights = match weights {
                    Some(w) if w.len() != codes.len() => {
                        return Err(paperbook::LedgerError::Validation(format!(
                            "{} instruments but {} weights",
                            codes.len(),
                            w.len()
                        ))
                        .into());
                    }
                    Some(w) => w.to_vec(),
                    None => vec![1.0 / codes.len() as f64; codes.len()],
                };
                let basket: Vec<(InstrumentCode, f64)> = codes.iter().copied().zip(weights).collect();
                self.print_basket_risk(&basket, &params)?;
            }
        }
        Ok(())
    }

    fn print_basket_risk(&self, basket: &[(InstrumentCode, f64)], params: &RiskParams) -> Result<()> {
        let codes: Vec<InstrumentCode> = basket.iter().map(|(c, _)| *c).collect();
        let sum: f64 = basket.iter().map(|(_, w)| w).sum();
        let weights: Vec<f64> = basket.iter().map(|(_, w)| w / sum).collect();
        let risk = analytics::portfolio_risk(&self.feed, &codes, Some(&weights), self.as_of, params)?;
        println!("{risk}");
        if !risk.skipped.is_empty() {
            let skipped: Vec<&str> = risk.skipped.iter().map(|c| c.as_str()).collect();
            println!("  skipped (short history): {}", skipped.join(", "));
        }
        Ok(())
    }

    // === Construction ===

    /// Build target weights over `codes`, or the screened universe when empty.
    pub fn construct(
        &self,
        strategy: WeightingStrategy,
        codes: &[InstrumentCode],
        top_n: Option<usize>,
    ) -> Result<construct::Allocation> {
        let codes = if codes.is_empty() {
            let n = top_n.unwrap_or(self.config.backtest.top_n);
            self.feed
                .screen(n)
                .map_err(|e| Error::MarketData(e.to_string()))?
        } else {
            codes.to_vec()
        };
        let window = Window::trailing(self.as_of, self.config.analytics.lookback);
        let allocation = construct::construct(strategy, &codes, &self.feed, &self.feed, window)?;
        println!("{allocation}");

        let sectors = construct::sector_diversification(&allocation.codes(), &self.feed)?;
        println!("{sectors}");

        match construct::simulate_performance(
            &self.feed,
            &allocation.weights,
            window,
            self.config.analytics.risk_free,
        ) {
            Ok(sim) => println!("{sim}"),
            Err(e) => warn!("simulation skipped: {e}"),
        }
        Ok(allocation)
    }

    // === Rebalance ===

    /// Preview, confirm and execute a rebalance toward `targets`.
    pub fn rebalance(
        &mut self,
        account: Option<u64>,
        targets: &[(InstrumentCode, f64)],
        opts: &RebalanceOptions,
    ) -> Result<Option<RebalanceReport>> {
        let account = self.account_or_default(account);
        let threshold = opts.threshold.unwrap_or(self.config.rebalance.threshold);
        construct::validate_weights(targets)?;

        valuation::refresh(&mut self.ledger, &self.feed, account)?;
        let view = self.ledger.portfolio(account)?;
        let plan = rebalance::plan(&view.weights(), targets, threshold);

        if plan.is_empty() {
            println!("No rebalancing needed: every weight is within {:.1}%.", threshold * 100.0);
            self.audit.mark("no_rebalance_needed")?;
            return Ok(None);
        }

        println!("Rebalance plan (total value {}):", view.total_value);
        for action in &plan {
            println!("  {action}");
        }

        if opts.dry_run {
            println!("\n[DRY RUN] No orders executed.");
            return Ok(None);
        }

        if !opts.force {
            let confirmed = dialoguer::Confirm::new()
                .with_prompt("Execute?")
                .default(false)
                .interact()
                .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))?;

            if !confirmed {
                self.audit.log("user_confirmed", serde_json::json!({"approved": false}))?;
                return Err(Error::Aborted("rebalance not confirmed".into()));
            }
            self.audit.log("user_confirmed", serde_json::json!({"approved": true}))?;
        }

        let report = rebalance::execute(&mut self.ledger, &self.feed, account, targets, threshold)?;
        audit::log_rebalance(&mut self.audit, account, &report)?;
        info!(
            "{account}: rebalance executed {} skipped {} failed {}",
            report.executed(),
            report.skipped(),
            report.failed()
        );
        println!("{report}");
        Ok(Some(report))
    }

    // === Backtest ===

    /// Backtest settings from the config, overridden by command arguments.
    pub fn backtest_config(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        strategy: WeightingStrategy,
        top_n: Option<usize>,
    ) -> Result<BacktestConfig> {
        let b = &self.config.backtest;
        Ok(BacktestConfig::new(start, end)
            .with_strategy(strategy)
            .with_top_n(top_n.unwrap_or(b.top_n))
            .with_benchmark(self.config.benchmark()?)
            .with_rebalance_months(b.rebalance_months)
            .with_lookback_days(b.lookback_days)
            .with_risk_free(self.config.analytics.risk_free))
    }

    pub fn backtest(&self, config: &BacktestConfig) -> Result<backtest::BacktestResult> {
        let result = backtest::run_backtest(config, &self.feed, &self.feed, &self.feed)?;
        println!("{result}");
        Ok(result)
    }

    pub fn compare(
        &self,
        config: &BacktestConfig,
        strategies: &[WeightingStrategy],
    ) -> Result<backtest::StrategyComparison> {
        let comparison = backtest::compare_strategies(config, strategies, &self.feed);
        println!("{comparison}");
        Ok(comparison)
    }
}

/// Flags of the rebalance command.
#[derive(Debug, Clone, Default)]
pub struct RebalanceOptions {
    /// Show the plan without trading
    pub dry_run: bool,
    /// Skip the confirmation prompt
    pub force: bool,
    /// Overrides the configured threshold
    pub threshold: Option<f64>,
}

fn order(
    account: AccountId,
    code: InstrumentCode,
    quantity: Quantity,
    price: Option<Money>,
    reason: Option<&str>,
) -> OrderRequest {
    let mut req = OrderRequest::new(account, code, quantity);
    if let Some(p) = price {
        req = req.at_price(p);
    }
    if let Some(r) = reason {
        req = req.with_reason(r);
    }
    req
}

fn print_portfolio(view: &PortfolioView) {
    let a = &view.account;
    println!("Account {} \"{}\"", a.id, a.name);
    println!("  Cash:            {:>18}", a.cash_balance.to_string());
    println!("  Stock value:     {:>18}", view.stock_value.to_string());
    println!("  Total value:     {:>18}", view.total_value.to_string());
    println!("  Return:          {:>17.2}%", view.return_pct);
    if view.positions.is_empty() {
        return;
    }
    println!(
        "\n  {:<8} {:>8} {:>14} {:>14} {:>16} {:>9} {:>7}",
        "code", "qty", "avg", "price", "value", "P&L%", "weight"
    );
    let weights = view.weights();
    for p in &view.positions {
        let weight = weights
            .iter()
            .find(|(c, _)| *c == p.code)
            .map_or(0.0, |(_, w)| *w);
        let (price, pl_pct) = match &p.mark {
            Some(m) => (m.price.to_string(), format!("{:+.2}", m.unrealized_pl_pct)),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "  {:<8} {:>8} {:>14} {:>14} {:>16} {:>9} {:>6.2}%",
            p.code.as_str(),
            p.quantity,
            p.avg_price.to_string(),
            price,
            p.carrying_value().to_string(),
            pl_pct,
            weight * 100.0
        );
    }
}

/// Parse `CODE=WEIGHT` (weight as a fraction or with a `%` suffix).
pub fn parse_target(s: &str) -> std::result::Result<(InstrumentCode, f64), String> {
    let (code, weight) = s
        .split_once('=')
        .ok_or_else(|| format!("expected CODE=WEIGHT, got {s:?}"))?;
    let code: InstrumentCode = code.parse().map_err(|e| format!("{e}"))?;
    let weight = match weight.trim().strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f64>().map(|w| w / 100.0),
        None => weight.trim().parse::<f64>(),
    }
    .map_err(|e| format!("bad weight in {s:?}: {e}"))?;
    Ok((code, weight))
}
