pub mod backtest;
pub mod decision;
pub mod ledger;
pub mod metrics;
pub mod results;

pub use backtest::{BacktestEngine, BacktestSettings, HistoryBar};
pub use decision::{evaluate, Action, Decision, RebalanceTrigger};
pub use ledger::{CashAmount, PortfolioLedger, PortfolioState};
pub use metrics::PortfolioMetrics;
pub use results::BacktestReport;
