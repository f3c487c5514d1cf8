//! Approval State Machine
//!
//! Governs transfers created in pending mode: `pending -> approved`
//! applies both wallet deltas and completes the legs; `pending -> failed`
//! marks the legs failed and leaves wallets untouched. Both transitions
//! are terminal.

use sqlx::PgConnection;
use tracing::info;

use super::error::LedgerError;
use super::transaction::TransactionLedger;
use super::transfer::{self, Transfer, TransferOrchestrator};
use super::types::{TransactionId, TransferId, TransferStatus, TxStatus};
use super::wallet::WalletStore;

pub struct Approval;

impl Approval {
    /// Approve a pending transfer: apply both wallet deltas (exactly as a
    /// direct-mode creation would have), complete both legs and mark the
    /// transfer approved, all inside the caller's transaction.
    pub async fn approve(
        conn: &mut PgConnection,
        transfer_id: &TransferId,
    ) -> Result<Transfer, LedgerError> {
        let mut transfer = Self::load_pending(conn, transfer_id).await?;
        let (debit_tx_id, credit_tx_id) = transaction_ids(&transfer)?;

        // Wallets are addressed by the ids captured at creation time;
        // zero matched rows on the delta update is fatal
        transfer::load_transfer_wallets(conn, &transfer).await?;
        for delta in transfer::build_wallet_deltas(&transfer) {
            WalletStore::apply_delta(conn, &delta).await?;
        }

        TransactionLedger::mark_status(conn, &debit_tx_id, TxStatus::Completed, None).await?;
        TransactionLedger::mark_status(conn, &credit_tx_id, TxStatus::Completed, None).await?;
        TransferOrchestrator::set_status(conn, transfer_id, TransferStatus::Approved, None).await?;
        transfer.status = TransferStatus::Approved;

        info!(
            transfer_id = %transfer_id,
            from_user_id = transfer.from_user_id,
            to_user_id = transfer.to_user_id,
            amount = transfer.amount,
            currency = %transfer.currency,
            "Transfer approved"
        );

        Ok(transfer)
    }

    /// Decline a pending transfer: both legs become `failed` with the
    /// given reason; no balance moves.
    pub async fn decline(
        conn: &mut PgConnection,
        transfer_id: &TransferId,
        reason: Option<&str>,
    ) -> Result<Transfer, LedgerError> {
        let mut transfer = Self::load_pending(conn, transfer_id).await?;
        let (debit_tx_id, credit_tx_id) = transaction_ids(&transfer)?;

        TransactionLedger::mark_status(conn, &debit_tx_id, TxStatus::Failed, reason).await?;
        TransactionLedger::mark_status(conn, &credit_tx_id, TxStatus::Failed, reason).await?;
        TransferOrchestrator::set_status(conn, transfer_id, TransferStatus::Failed, reason).await?;
        transfer.status = TransferStatus::Failed;
        transfer.decline_reason = reason.map(str::to_string);

        info!(
            transfer_id = %transfer_id,
            from_user_id = transfer.from_user_id,
            to_user_id = transfer.to_user_id,
            reason = reason.unwrap_or("<none>"),
            "Transfer declined"
        );

        Ok(transfer)
    }

    async fn load_pending(
        conn: &mut PgConnection,
        transfer_id: &TransferId,
    ) -> Result<Transfer, LedgerError> {
        let transfer = TransferOrchestrator::get_for_update(conn, transfer_id)
            .await?
            .ok_or_else(|| LedgerError::TransferNotFound(transfer_id.to_string()))?;

        if transfer.status != TransferStatus::Pending {
            return Err(LedgerError::InvalidTransferState {
                transfer_id: transfer_id.to_string(),
                actual: transfer.status,
            });
        }
        Ok(transfer)
    }
}

fn transaction_ids(transfer: &Transfer) -> Result<(TransactionId, TransactionId), LedgerError> {
    match (transfer.from_transaction_id, transfer.to_transaction_id) {
        (Some(debit), Some(credit)) => Ok((debit, credit)),
        _ => Err(LedgerError::MissingTransactionIds(
            transfer.transfer_id.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::{BalanceKind, TransferMethod, WalletId};
    use chrono::Utc;

    fn pending_transfer() -> Transfer {
        Transfer {
            transfer_id: TransferId::new(),
            from_user_id: 1,
            to_user_id: 2,
            tenant_id: "default".to_string(),
            currency: "EUR".to_string(),
            amount: 100,
            fee_amount: 0,
            net_amount: 100,
            status: TransferStatus::Pending,
            method: TransferMethod::Transfer,
            from_balance: BalanceKind::Real,
            to_balance: BalanceKind::Real,
            from_wallet_id: WalletId::new(),
            to_wallet_id: WalletId::new(),
            from_transaction_id: Some(TransactionId::new()),
            to_transaction_id: Some(TransactionId::new()),
            external_ref: None,
            description: None,
            decline_reason: None,
            details: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_transaction_ids_present() {
        let transfer = pending_transfer();
        assert!(transaction_ids(&transfer).is_ok());
    }

    #[test]
    fn test_missing_transaction_ids_is_corruption() {
        let mut transfer = pending_transfer();
        transfer.to_transaction_id = None;
        assert!(matches!(
            transaction_ids(&transfer),
            Err(LedgerError::MissingTransactionIds(_))
        ));
    }
}
