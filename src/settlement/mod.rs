//! Per-team debts, the running account, and register totals.

pub mod balance;
pub mod debts;
pub mod totals;

pub use balance::{fold_balance, BalanceAggregator, LedgerMovement, MovementSource, Side};
pub use debts::DebtAggregator;
pub use totals::{RegisterSheet, TotalsCalculator};
