//! FairShare: expense splitting between people and groups.
//!
//! The core is pure: [`split::derive_debts`] turns an expense into debts owed
//! to its payer, [`balance::aggregate_balances`] totals pending debts per user,
//! and [`exchange::suggest_exchanges`] proposes transfers that clear them.
//! [`ledger::Ledger`] wires that core to the document store behind
//! [`repository::Repository`], and [`routes`] exposes it over HTTP.

pub mod auth;
pub mod balance;
pub mod config;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod mongo;
pub mod repository;
pub mod retry;
pub mod routes;
pub mod schemas;
pub mod split;

pub use error::{Error, InvalidInput, Result};
