//! wallet-ledger - Wallet Ledger & Atomic Transfer Engine
//!
//! Shared library for services that move user balances: maintains
//! per-(user, currency, tenant) wallets with real/bonus/locked balance
//! fields, an append-only transaction ledger, and double-entry transfers
//! with deferred-approval support, all under single-transaction atomicity
//! with bounded commit retry.
//!
//! # Modules
//!
//! - [`ledger`] - wallet store, transaction ledger, transfer orchestrator,
//!   approval state machine, commit engine and reconciliation
//! - [`db`] - PostgreSQL pool wrapper and schema bootstrap
//! - [`config`] - yaml service configuration
//! - [`logging`] - tracing setup

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;

pub use config::{AppConfig, LedgerConfig};
pub use db::Database;
pub use ledger::{
    ApprovalMode, BalanceKind, Charge, CreateTransactionParams, CreateTransferParams, LedgerEngine,
    LedgerError, Transaction, Transfer, TransferOutcome, Wallet,
};
