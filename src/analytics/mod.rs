//! Risk and performance calculator.
//!
//! Pure functions over price and return series ([`series`], [`risk`],
//! [`metrics`]) plus read-only account aggregates ([`performance`]).

pub mod metrics;
pub mod performance;
pub mod risk;
pub mod series;

pub use metrics::{Metrics, Tally, annualize, compute_metrics};
pub use performance::{
    HistoryStats, PerformanceReport, TradeReplay, TradeSummary, history_stats,
    performance_report, replay_trades, trade_summary,
};
pub use risk::{
    Drawdown, PortfolioRisk, RiskGrade, RiskParams, RiskProfile, beta, downside_deviation,
    historical_var, instrument_risk, max_drawdown, portfolio_risk, risk_profile, risk_score,
    sharpe_ratio, sortino_ratio, volatility, win_rate,
};
