//! Planilla backend library
//!
//! Match-day cash registers ("planillas") with per-team settlements, the
//! register closing workflow, and provider invoice affectation.

pub mod affectation;
pub mod api;
pub mod closing;
pub mod config;
pub mod error;
pub mod expenses;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod money;
pub mod register;
pub mod registry;
pub mod settlement;
pub mod store;

pub use error::{LedgerError, LedgerResult};
pub use ledger::Ledger;
pub use store::Store;
