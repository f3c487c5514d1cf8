//! Wallet Ledger & Atomic Transfer Engine
//!
//! Balance state lives in wallets; how it got there lives in an
//! append-only transaction ledger; user-to-user movement is double-entry
//! (one transfer, one debit leg, one credit leg) committed as a single
//! atomic unit. Money never appears or disappears: every wallet field is
//! the signed sum of its committed ledger entries, and the
//! [`reconcile::Reconciler`] verifies exactly that.

pub mod approval;
pub mod cache;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod transaction;
pub mod transfer;
pub mod types;
pub mod wallet;

pub use approval::Approval;
pub use cache::{CacheError, CacheInvalidator, MemoryCache, NoopCache};
pub use engine::LedgerEngine;
pub use error::LedgerError;
pub use reconcile::{BalanceCheck, ReconciliationReport, Reconciler};
pub use transaction::{Transaction, TransactionLedger};
pub use transfer::{Transfer, TransferOrchestrator, TransferOutcome};
pub use types::{
    ApprovalMode, BalanceKind, Charge, CreateTransactionParams, CreateTransferParams, ObjectModel,
    TransactionId, TransferDetails, TransferId, TransferMethod, TransferStatus, TxStatus, WalletId,
};
pub use wallet::{Wallet, WalletDelta, WalletPolicy, WalletStatus, WalletStore};
