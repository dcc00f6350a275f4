//! CLI entry point for paperbook.

use std::path::PathBuf;
use std::process;

use anyhow::Context as _;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use paperbook::construct::WeightingStrategy;
use paperbook::{InstrumentCode, Money};
use paperbook_cli::commands::{Context, RebalanceOptions, parse_target};
use paperbook_cli::config::Config;
use paperbook_cli::error::Error;

#[derive(Parser)]
#[command(name = "paperbook")]
#[command(about = "Paper trading ledger with portfolio analytics")]
#[command(version)]
struct Cli {
    /// Path to paperbook.toml
    #[arg(long, default_value = "paperbook.toml")]
    config: PathBuf,

    /// Account id (defaults to [account].id)
    #[arg(long, global = true)]
    account: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Open a funded account
    Open {
        /// Account name (defaults to [account].name)
        #[arg(long)]
        name: Option<String>,
        /// Opening cash (defaults to [account].initial_balance)
        #[arg(long)]
        balance: Option<Money>,
    },

    /// Buy shares at a limit price or the latest quote
    Buy {
        code: InstrumentCode,
        quantity: u64,
        #[arg(long)]
        price: Option<Money>,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Sell shares at a limit price or the latest quote
    Sell {
        code: InstrumentCode,
        quantity: u64,
        #[arg(long)]
        price: Option<Money>,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show cash, holdings and totals
    Portfolio,

    /// Mark positions at the latest quotes and list exit signals
    Refresh,

    /// Record today's portfolio snapshot
    Snapshot {
        /// Snapshot date (defaults to the latest market date)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Show recorded snapshots
    History {
        #[arg(long, default_value_t = 30)]
        days: usize,
    },

    /// Show recent trades, newest first
    Trades {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Performance report: P&L, trade stats, Sharpe and drawdown
    Metrics {
        #[arg(long)]
        days: Option<usize>,
    },

    /// Risk profile of instruments, or of the current holdings
    Risk {
        codes: Vec<InstrumentCode>,
        /// Weights matching CODES (equal when omitted)
        #[arg(long, value_delimiter = ',')]
        weights: Option<Vec<f64>>,
    },

    /// Build target weights
    Construct {
        /// equal_weight, market_cap or risk_parity
        #[arg(long, default_value = "equal_weight")]
        strategy: WeightingStrategy,
        /// Instruments (defaults to the screened universe)
        codes: Vec<InstrumentCode>,
        #[arg(long)]
        top_n: Option<usize>,
    },

    /// Trade toward target weights
    Rebalance {
        /// Targets as CODE=WEIGHT
        #[arg(required = true, value_parser = parse_target)]
        targets: Vec<(InstrumentCode, f64)>,

        /// Weight difference that triggers a trade
        #[arg(long)]
        threshold: Option<f64>,

        /// Show plan without executing
        #[arg(long)]
        dry_run: bool,

        /// Skip confirmation prompt (for automation/cron)
        #[arg(long)]
        force: bool,
    },

    /// Backtest one strategy against the benchmark
    Backtest {
        start: NaiveDate,
        end: NaiveDate,
        #[arg(long, default_value = "equal_weight")]
        strategy: WeightingStrategy,
        #[arg(long)]
        top_n: Option<usize>,
    },

    /// Backtest every strategy over the same period
    Compare {
        start: NaiveDate,
        end: NaiveDate,
        #[arg(long)]
        top_n: Option<usize>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<Error>() {
            Some(err) if err.is_rejection() => {
                eprintln!("Rejected: {err}");
                process::exit(2);
            }
            Some(Error::Aborted(msg)) => {
                eprintln!("Aborted: {msg}");
                process::exit(0);
            }
            _ => {
                eprintln!("Error: {e:#}");
                process::exit(1);
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = if cli.config.exists() {
        Config::load(&cli.config)
            .with_context(|| format!("loading config {}", cli.config.display()))?
    } else {
        log::info!("{} not found, using defaults", cli.config.display());
        Config::from_toml("")?
    };
    let mut ctx = Context::open(config)?;
    let account = cli.account;

    match cli.command {
        Command::Open { name, balance } => {
            ctx.open_account(name.as_deref(), balance)?;
        }
        Command::Buy {
            code,
            quantity,
            price,
            reason,
        } => {
            ctx.buy(account, code, quantity, price, reason.as_deref())?;
        }
        Command::Sell {
            code,
            quantity,
            price,
            reason,
        } => {
            ctx.sell(account, code, quantity, price, reason.as_deref())?;
        }
        Command::Portfolio => {
            ctx.show_portfolio(account)?;
        }
        Command::Refresh => ctx.refresh(account)?,
        Command::Snapshot { date } => {
            ctx.snapshot(account, date)?;
        }
        Command::History { days } => ctx.show_history(account, days)?,
        Command::Trades { limit } => ctx.show_trades(account, limit)?,
        Command::Metrics { days } => ctx.show_metrics(account, days)?,
        Command::Risk { codes, weights } => ctx.show_risk(account, &codes, weights.as_deref())?,
        Command::Construct {
            strategy,
            codes,
            top_n,
        } => {
            ctx.construct(strategy, &codes, top_n)?;
        }
        Command::Rebalance {
            targets,
            threshold,
            dry_run,
            force,
        } => {
            let opts = RebalanceOptions {
                dry_run,
                force,
                threshold,
            };
            ctx.rebalance(account, &targets, &opts)?;
        }
        Command::Backtest {
            start,
            end,
            strategy,
            top_n,
        } => {
            let cfg = ctx.backtest_config(start, end, strategy, top_n)?;
            ctx.backtest(&cfg)?;
        }
        Command::Compare { start, end, top_n } => {
            let cfg = ctx.backtest_config(start, end, WeightingStrategy::EqualWeight, top_n)?;
            let comparison = ctx.compare(&cfg, &WeightingStrategy::ALL)?;
            if comparison.runs.is_empty() {
                anyhow::bail!("no strategy completed");
            }
        }
    }
    Ok(())
}
