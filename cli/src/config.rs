//! TOML configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use paperbook::analytics::RiskParams;
use paperbook::analytics::risk::DEFAULT_RISK_FREE;
use paperbook::backtest::MAX_LOOKBACK_DAYS;
use paperbook::ledger::CostModel;
use paperbook::valuation::ExitRule;
use paperbook::{AccountId, InstrumentCode, Money};

use crate::error::{Error, Result};

/// Top-level configuration. Every section may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub backtest: BacktestDefaults,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Account used when a command is not given `--account`
    #[serde(default = "default_account_id")]
    pub id: u64,
    #[serde(default = "default_account_name")]
    pub name: String,
    /// Opening cash, as a decimal string
    #[serde(default = "default_initial_balance")]
    pub initial_balance: String,
}

fn default_account_id() -> u64 {
    1
}
fn default_account_name() -> String {
    "paper".into()
}
fn default_initial_balance() -> String {
    "10000000".into()
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            id: default_account_id(),
            name: default_account_name(),
            initial_balance: default_initial_balance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Commission in parts per million of notional (150 = 0.015%)
    #[serde(default = "default_commission_ppm")]
    pub commission_ppm: u32,
    /// Minimum fee per trade, as a decimal string
    #[serde(default = "default_min_fee")]
    pub min_fee: String,
}

fn default_commission_ppm() -> u32 {
    CostModel::DEFAULT_COMMISSION_PPM
}
fn default_min_fee() -> String {
    "0".into()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            commission_ppm: default_commission_ppm(),
            min_fee: default_min_fee(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_risk_free")]
    pub risk_free: f64,
    #[serde(default = "default_var_confidence")]
    pub var_confidence: f64,
    /// Closes analysed per instrument
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Snapshots included in the performance report
    #[serde(default = "default_report_days")]
    pub report_days: usize,
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: f64,
}

fn default_risk_free() -> f64 {
    DEFAULT_RISK_FREE
}
fn default_var_confidence() -> f64 {
    0.95
}
fn default_lookback() -> usize {
    252
}
fn default_report_days() -> usize {
    30
}
fn default_stop_loss() -> f64 {
    -10.0
}
fn default_take_profit() -> f64 {
    20.0
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            risk_free: default_risk_free(),
            var_confidence: default_var_confidence(),
            lookback: default_lookback(),
            report_days: default_report_days(),
            stop_loss_pct: default_stop_loss(),
            take_profit_pct: default_take_profit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceConfig {
    /// Weight difference that triggers a trade (0.05 = 5 points)
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    paperbook::rebalance::DEFAULT_THRESHOLD
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BacktestDefaults {
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_rebalance_months")]
    pub rebalance_months: u32,
}

fn default_benchmark() -> String {
    paperbook::backtest::DEFAULT_BENCHMARK.into()
}
fn default_top_n() -> usize {
    10
}
fn default_lookback_days() -> i64 {
    paperbook::backtest::DEFAULT_LOOKBACK_DAYS
}
fn default_rebalance_months() -> u32 {
    1
}

impl Default for BacktestDefaults {
    fn default() -> Self {
        Self {
            benchmark: default_benchmark(),
            top_n: default_top_n(),
            lookback_days: default_lookback_days(),
            rebalance_months: default_rebalance_months(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Ledger state (JSON)
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Quotes, history and metadata (JSON)
    #[serde(default = "default_market_file")]
    pub market_file: String,
}

fn default_state_file() -> String {
    "./data/ledger.json".into()
}
fn default_market_file() -> String {
    "./data/market.json".into()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            market_file: default_market_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.account.id == 0 {
            return Err(Error::Config("account id must be > 0".into()));
        }
        let initial = self.initial_balance()?;
        if initial.is_negative() {
            return Err(Error::Config("initial_balance must be >= 0".into()));
        }
        if self.ledger.commission_ppm > 100_000 {
            return Err(Error::Config("commission_ppm must be <= 100000 (10%)".into()));
        }
        if self.cost_model()?.min_fee.is_negative() {
            return Err(Error::Config("min_fee must be >= 0".into()));
        }
        let a = &self.analytics;
        if !(0.0..1.0).contains(&a.var_confidence) || a.var_confidence == 0.0 {
            return Err(Error::Config("var_confidence must be in (0.0, 1.0)".into()));
        }
        if a.lookback < 2 {
            return Err(Error::Config("lookback must be >= 2".into()));
        }
        if a.stop_loss_pct >= 0.0 {
            return Err(Error::Config("stop_loss_pct must be negative".into()));
        }
        if a.take_profit_pct <= 0.0 {
            return Err(Error::Config("take_profit_pct must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.rebalance.threshold) {
            return Err(Error::Config("threshold must be in [0.0, 1.0]".into()));
        }
        if self.backtest.top_n == 0 {
            return Err(Error::Config("top_n must be > 0".into()));
        }
        if !(0..=MAX_LOOKBACK_DAYS).contains(&self.backtest.lookback_days) {
            return Err(Error::Config(format!("lookback_days must be in 0..={MAX_LOOKBACK_DAYS}")));
        }
        self.benchmark()?;
        Ok(())
    }

    pub fn account_id(&self) -> AccountId {
        AccountId(self.account.id)
    }

    pub fn initial_balance(&self) -> Result<Money> {
        parse_money("initial_balance", &self.account.initial_balance)
    }

    pub fn cost_model(&self) -> Result<CostModel> {
        Ok(CostModel {
            commission_ppm: self.ledger.commission_ppm,
            min_fee: parse_money("min_fee", &self.ledger.min_fee)?,
        })
    }

    pub fn risk_params(&self) -> RiskParams {
        RiskParams {
            risk_free: self.analytics.risk_free,
            var_confidence: self.analytics.var_confidence,
            lookback: self.analytics.lookback,
        }
    }

    pub fn exit_rule(&self) -> ExitRule {
        ExitRule {
            stop_loss_pct: self.analytics.stop_loss_pct,
            take_profit_pct: self.analytics.take_profit_pct,
        }
    }

    pub fn benchmark(&self) -> Result<InstrumentCode> {
        self.backtest
            .benchmark
            .parse()
            .map_err(|e| Error::Config(format!("benchmark: {e}")))
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(&self.data.state_file)
    }

    pub fn market_path(&self) -> PathBuf {
        PathBuf::from(&self.data.market_file)
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}

fn parse_money(field: &str, value: &str) -> Result<Money> {
    value
        .parse()
        .map_err(|e| Error::Config(format!("{field}: {e}")))
}
