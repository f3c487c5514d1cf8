//! Ledger error taxonomy
//!
//! Business errors are rejected before any write and are never retried;
//! only serialization conflicts surfaced by the driver are.

use thiserror::Error;

use super::types::{TransferStatus, WalletId};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Insufficient balance: wallet {wallet_id} holds {available}, debit of {requested} refused")]
    InsufficientBalance {
        wallet_id: WalletId,
        available: i64,
        requested: i64,
    },

    #[error("Credit limit exceeded: wallet {wallet_id} would reach {resulting}, limit is -{limit}")]
    CreditLimitExceeded {
        wallet_id: WalletId,
        limit: i64,
        resulting: i64,
    },

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Wallet {wallet_id} is {status}, refusing {operation}")]
    WalletInactive {
        wallet_id: WalletId,
        status: &'static str,
        operation: &'static str,
    },

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Invalid transfer state: transfer {transfer_id} is {actual}, expected pending")]
    InvalidTransferState {
        transfer_id: String,
        actual: TransferStatus,
    },

    #[error("Transfer {0} is missing its transaction references")]
    MissingTransactionIds(String),

    #[error("Duplicate external_ref: {0}")]
    DuplicateExternalRef(String),

    #[error("Invalid amount: must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("Invalid fee: {fee} exceeds amount {amount}")]
    InvalidFee { fee: i64, amount: i64 },

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    #[error("Transaction commit failed after {attempts} attempts: {source}")]
    CommitFailed { attempts: u32, source: sqlx::Error },
}

impl LedgerError {
    /// Whether the underlying driver error is a transient transaction
    /// conflict worth re-running the unit of work for.
    ///
    /// 40001 = serialization_failure, 40P01 = deadlock_detected.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Database(e) => is_transient(e),
            _ => false,
        }
    }

    /// Map a unique-violation (SQLSTATE 23505) on an external_ref index to
    /// the typed duplicate error; anything else passes through.
    pub fn from_insert(e: sqlx::Error, external_ref: Option<&str>) -> Self {
        if let sqlx::Error::Database(db) = &e
            && db.code().as_deref() == Some("23505")
            && db
                .constraint()
                .is_some_and(|c| c.contains("external_ref"))
        {
            return LedgerError::DuplicateExternalRef(
                external_ref.unwrap_or("<unset>").to_string(),
            );
        }
        LedgerError::Database(e)
    }
}

pub(crate) fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::WalletId;

    #[test]
    fn test_business_errors_not_retryable() {
        let err = LedgerError::InsufficientBalance {
            wallet_id: WalletId::new(),
            available: 500,
            requested: 501,
        };
        assert!(!err.is_retryable());

        let err = LedgerError::InvalidTransferState {
            transfer_id: "x".to_string(),
            actual: TransferStatus::Approved,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_non_database_insert_error_passthrough() {
        let err = LedgerError::from_insert(sqlx::Error::RowNotFound, Some("ref-1"));
        assert!(matches!(err, LedgerError::Database(sqlx::Error::RowNotFound)));
    }
}
