//! Transfer Orchestrator
//!
//! Builds one Transfer record plus exactly two ledger entries (debit leg,
//! credit leg) for any user-to-user value movement, including same-user
//! transfers such as bonus conversion. Wallet balances move in the same
//! transaction when the approval mode is direct; pending transfers leave
//! wallets untouched until the approval state machine acts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use tracing::info;

use super::error::LedgerError;
use super::transaction::{Transaction, TransactionLedger};
use super::types::{
    ApprovalMode, BalanceKind, Charge, CreateTransactionParams, CreateTransferParams, ObjectModel,
    TransactionId, TransferDetails, TransferId, TransferMethod, TransferStatus, TxStatus, WalletId,
};
use super::wallet::{Wallet, WalletDelta, WalletPolicy, WalletStore};

/// One record per value movement; always paired with two transactions
/// referencing it via `transfer_id`.
#[derive(Debug, Clone, Serialize)]
pub struct Transfer {
    pub transfer_id: TransferId,
    pub from_user_id: i64,
    pub to_user_id: i64,
    pub tenant_id: String,
    pub currency: String,
    /// Gross amount leaving the `from` wallet
    pub amount: i64,
    pub fee_amount: i64,
    /// `amount - fee_amount`; what the `to` wallet receives
    pub net_amount: i64,
    pub status: TransferStatus,
    pub method: TransferMethod,
    pub from_balance: BalanceKind,
    pub to_balance: BalanceKind,
    pub from_wallet_id: WalletId,
    pub to_wallet_id: WalletId,
    pub from_transaction_id: Option<TransactionId>,
    pub to_transaction_id: Option<TransactionId>,
    pub external_ref: Option<String>,
    pub description: Option<String>,
    pub decline_reason: Option<String>,
    pub details: Option<TransferDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full result of a transfer creation, including generated ids
#[derive(Debug, Clone, Serialize)]
pub struct TransferOutcome {
    pub transfer: Transfer,
    pub debit_tx: Transaction,
    pub credit_tx: Transaction,
}

const TRANSFER_COLUMNS: &str = "transfer_id, from_user_id, to_user_id, tenant_id, currency, \
     amount, fee_amount, net_amount, status, method, from_balance_kind, to_balance_kind, \
     from_wallet_id, to_wallet_id, from_transaction_id, to_transaction_id, external_ref, \
     description, decline_reason, details, created_at, updated_at";

pub struct TransferOrchestrator;

impl TransferOrchestrator {
    /// Create a transfer with its double-entry legs inside the caller's
    /// transaction.
    ///
    /// Direct mode additionally advances the transfer to `approved` and
    /// applies both wallet deltas before returning; pending mode stops
    /// after the documents are persisted.
    pub async fn create_with_transactions(
        conn: &mut PgConnection,
        params: CreateTransferParams,
    ) -> Result<TransferOutcome, LedgerError> {
        if params.amount <= 0 {
            return Err(LedgerError::InvalidAmount(params.amount));
        }
        if params.fee_amount < 0 || params.fee_amount > params.amount {
            return Err(LedgerError::InvalidFee {
                fee: params.fee_amount,
                amount: params.amount,
            });
        }

        let (from_kind, to_kind) = params.route();
        let tenant = params.tenant().to_string();
        let same_user = params.from_user_id == params.to_user_id;

        let from_wallet = WalletStore::get_or_create(
            conn,
            params.from_user_id,
            &params.currency,
            &tenant,
            WalletPolicy::default(),
        )
        .await?;
        // Same-user transfers (e.g. bonus conversion) reuse the one wallet;
        // the row lock is already held
        let to_wallet = if same_user {
            from_wallet.clone()
        } else {
            WalletStore::get_or_create(
                conn,
                params.to_user_id,
                &params.currency,
                &tenant,
                WalletPolicy::default(),
            )
            .await?
        };

        WalletStore::validate_debit(&from_wallet, params.amount, from_kind)?;
        WalletStore::validate_credit(&to_wallet)?;

        let transfer_id = TransferId::new();
        let net_amount = params.amount - params.fee_amount;
        let leg_status = match params.approval_mode {
            ApprovalMode::Direct => TxStatus::Completed,
            ApprovalMode::Pending => TxStatus::Pending,
        };
        let object_id = params
            .object_id
            .clone()
            .unwrap_or_else(|| transfer_id.to_string());
        let object_model = params.object_model.unwrap_or(ObjectModel::Transfer);

        let mut debit_params = CreateTransactionParams::new(
            params.from_user_id,
            params.amount,
            &params.currency,
            Charge::Debit,
        );
        debit_params.tenant_id = Some(tenant.clone());
        debit_params.balance = from_kind;
        debit_params.fee_amount = params.fee_amount;
        debit_params.status = leg_status;
        debit_params.object_id = Some(object_id.clone());
        debit_params.object_model = Some(object_model);
        debit_params.external_ref = params.external_ref.clone();
        debit_params.description = params.description.clone();
        debit_params.transfer_id = Some(transfer_id);

        let mut credit_params = debit_params.clone();
        credit_params.user_id = params.to_user_id;
        credit_params.charge = Charge::Credit;
        credit_params.balance = to_kind;

        let debit_tx = TransactionLedger::build(
            &debit_params,
            &from_wallet,
            from_wallet.balance_of(from_kind),
        )?;
        // When both legs address the same wallet field, the credit leg
        // must see the post-debit balance
        let credit_base = if same_user && to_kind == from_kind {
            to_wallet.balance_of(to_kind) - params.amount
        } else {
            to_wallet.balance_of(to_kind)
        };
        let credit_tx = TransactionLedger::build(&credit_params, &to_wallet, credit_base)?;

        let mut transfer = Transfer {
            transfer_id,
            from_user_id: params.from_user_id,
            to_user_id: params.to_user_id,
            tenant_id: tenant,
            currency: params.currency.clone(),
            amount: params.amount,
            fee_amount: params.fee_amount,
            net_amount,
            status: TransferStatus::Pending,
            method: params.method,
            from_balance: from_kind,
            to_balance: to_kind,
            from_wallet_id: from_wallet.wallet_id,
            to_wallet_id: to_wallet.wallet_id,
            from_transaction_id: Some(debit_tx.transaction_id),
            to_transaction_id: Some(credit_tx.transaction_id),
            external_ref: params.external_ref.clone(),
            description: params.description.clone(),
            decline_reason: None,
            details: params.details.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        Self::insert(conn, &transfer).await?;
        TransactionLedger::insert(conn, &debit_tx).await?;
        TransactionLedger::insert(conn, &credit_tx).await?;

        if params.approval_mode == ApprovalMode::Direct {
            Self::set_status(conn, &transfer_id, TransferStatus::Approved, None).await?;
            transfer.status = TransferStatus::Approved;
            for delta in build_wallet_deltas(&transfer) {
                WalletStore::apply_delta(conn, &delta).await?;
            }
        }

        info!(
            transfer_id = %transfer_id,
            from_user_id = params.from_user_id,
            to_user_id = params.to_user_id,
            amount = params.amount,
            fee_amount = params.fee_amount,
            currency = %params.currency,
            method = %params.method,
            status = %transfer.status,
            "Transfer created"
        );

        Ok(TransferOutcome {
            transfer,
            debit_tx,
            credit_tx,
        })
    }

    async fn insert(conn: &mut PgConnection, transfer: &Transfer) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO transfers \
                (transfer_id, from_user_id, to_user_id, tenant_id, currency, amount, fee_amount, \
                 net_amount, status, method, from_balance_kind, to_balance_kind, from_wallet_id, \
                 to_wallet_id, from_transaction_id, to_transaction_id, external_ref, description, \
                 details, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
                     $18, $19, $20, $21)",
        )
        .bind(transfer.transfer_id.to_string())
        .bind(transfer.from_user_id)
        .bind(transfer.to_user_id)
        .bind(&transfer.tenant_id)
        .bind(&transfer.currency)
        .bind(transfer.amount)
        .bind(transfer.fee_amount)
        .bind(transfer.net_amount)
        .bind(transfer.status.id())
        .bind(transfer.method.as_str())
        .bind(transfer.from_balance.id())
        .bind(transfer.to_balance.id())
        .bind(transfer.from_wallet_id.to_string())
        .bind(transfer.to_wallet_id.to_string())
        .bind(transfer.from_transaction_id.map(|t| t.to_string()))
        .bind(transfer.to_transaction_id.map(|t| t.to_string()))
        .bind(&transfer.external_ref)
        .bind(&transfer.description)
        .bind(transfer.details.as_ref().map(sqlx::types::Json))
        .bind(transfer.created_at)
        .bind(transfer.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| LedgerError::from_insert(e, transfer.external_ref.as_deref()))?;
        Ok(())
    }

    pub(crate) async fn set_status(
        conn: &mut PgConnection,
        transfer_id: &TransferId,
        status: TransferStatus,
        decline_reason: Option<&str>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE transfers SET status = $2, decline_reason = COALESCE($3, decline_reason), \
                 updated_at = NOW() \
             WHERE transfer_id = $1",
        )
        .bind(transfer_id.to_string())
        .bind(status.id())
        .bind(decline_reason)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::TransferNotFound(transfer_id.to_string()));
        }
        Ok(())
    }

    pub async fn get(
        conn: &mut PgConnection,
        transfer_id: &TransferId,
    ) -> Result<Option<Transfer>, LedgerError> {
        let query = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE transfer_id = $1");
        let row = sqlx::query(&query)
            .bind(transfer_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|r| row_to_transfer(&r)).transpose()
    }

    /// Load and lock a transfer for a state transition
    pub(crate) async fn get_for_update(
        conn: &mut PgConnection,
        transfer_id: &TransferId,
    ) -> Result<Option<Transfer>, LedgerError> {
        let query =
            format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE transfer_id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(transfer_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|r| row_to_transfer(&r)).transpose()
    }
}

/// Wallet deltas for a transfer's two legs: gross out of the `from`
/// field, net into the `to` field. Same-wallet transfers collapse into a
/// single combined delta so both fields move in one update.
pub(crate) fn build_wallet_deltas(transfer: &Transfer) -> Vec<WalletDelta> {
    let mut from_delta = WalletDelta::new(transfer.from_wallet_id);
    from_delta.debit(transfer.from_balance, transfer.amount);

    let mut to_delta = WalletDelta::new(transfer.to_wallet_id);
    to_delta.credit(transfer.to_balance, transfer.net_amount, transfer.fee_amount);

    if transfer.from_wallet_id == transfer.to_wallet_id {
        from_delta.merge(&to_delta);
        vec![from_delta]
    } else {
        vec![from_delta, to_delta]
    }
}

/// Both wallets referenced by a transfer, loaded by the ids captured at
/// creation time. Missing rows are fatal (stale wallet id).
pub(crate) async fn load_transfer_wallets(
    conn: &mut PgConnection,
    transfer: &Transfer,
) -> Result<(Wallet, Option<Wallet>), LedgerError> {
    let from_wallet = WalletStore::get_by_id(conn, &transfer.from_wallet_id)
        .await?
        .ok_or_else(|| LedgerError::WalletNotFound(transfer.from_wallet_id.to_string()))?;

    if transfer.from_wallet_id == transfer.to_wallet_id {
        return Ok((from_wallet, None));
    }

    let to_wallet = WalletStore::get_by_id(conn, &transfer.to_wallet_id)
        .await?
        .ok_or_else(|| LedgerError::WalletNotFound(transfer.to_wallet_id.to_string()))?;
    Ok((from_wallet, Some(to_wallet)))
}

pub(crate) fn row_to_transfer(row: &PgRow) -> Result<Transfer, LedgerError> {
    let parse_id = |s: &str, what: &str| -> Result<ulid::Ulid, LedgerError> {
        ulid::Ulid::from_string(s.trim())
            .map_err(|_| LedgerError::InvalidRecord(format!("Invalid {what}: {s}")))
    };

    let transfer_id_str: String = row.get("transfer_id");
    let transfer_id = TransferId::from_ulid(parse_id(&transfer_id_str, "transfer_id")?);

    let status_id: i16 = row.get("status");
    let status = TransferStatus::from_id(status_id).ok_or_else(|| {
        LedgerError::InvalidRecord(format!("Invalid transfer status: {status_id}"))
    })?;

    let method_str: String = row.get("method");
    let method = TransferMethod::parse(&method_str)
        .ok_or_else(|| LedgerError::InvalidRecord(format!("Invalid method: {method_str}")))?;

    let from_kind_id: i16 = row.get("from_balance_kind");
    let from_balance = BalanceKind::from_id(from_kind_id).ok_or_else(|| {
        LedgerError::InvalidRecord(format!("Invalid from_balance_kind: {from_kind_id}"))
    })?;
    let to_kind_id: i16 = row.get("to_balance_kind");
    let to_balance = BalanceKind::from_id(to_kind_id).ok_or_else(|| {
        LedgerError::InvalidRecord(format!("Invalid to_balance_kind: {to_kind_id}"))
    })?;

    let from_wallet_str: String = row.get("from_wallet_id");
    let to_wallet_str: String = row.get("to_wallet_id");

    let from_transaction_id = row
        .get::<Option<String>, _>("from_transaction_id")
        .map(|s| parse_id(&s, "from_transaction_id").map(TransactionId::from_ulid))
        .transpose()?;
    let to_transaction_id = row
        .get::<Option<String>, _>("to_transaction_id")
        .map(|s| parse_id(&s, "to_transaction_id").map(TransactionId::from_ulid))
        .transpose()?;

    let details = row
        .get::<Option<sqlx::types::Json<TransferDetails>>, _>("details")
        .map(|j| j.0);

    Ok(Transfer {
        transfer_id,
        from_user_id: row.get("from_user_id"),
        to_user_id: row.get("to_user_id"),
        tenant_id: row.get("tenant_id"),
        currency: row.get("currency"),
        amount: row.get("amount"),
        fee_amount: row.get("fee_amount"),
        net_amount: row.get("net_amount"),
        status,
        method,
        from_balance,
        to_balance,
        from_wallet_id: WalletId::from_ulid(parse_id(&from_wallet_str, "from_wallet_id")?),
        to_wallet_id: WalletId::from_ulid(parse_id(&to_wallet_str, "to_wallet_id")?),
        from_transaction_id,
        to_transaction_id,
        external_ref: row.get("external_ref"),
        description: row.get("description"),
        decline_reason: row.get("decline_reason"),
        details,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer_fixture(same_wallet: bool) -> Transfer {
        let from_wallet_id = WalletId::new();
        let to_wallet_id = if same_wallet {
            from_wallet_id
        } else {
            WalletId::new()
        };
        Transfer {
            transfer_id: TransferId::new(),
            from_user_id: 1001,
            to_user_id: if same_wallet { 1001 } else { 2002 },
            tenant_id: "default".to_string(),
            currency: "EUR".to_string(),
            amount: 10_000,
            fee_amount: 290,
            net_amount: 9_710,
            status: TransferStatus::Pending,
            method: TransferMethod::Transfer,
            from_balance: BalanceKind::Real,
            to_balance: BalanceKind::Real,
            from_wallet_id,
            to_wallet_id,
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
    fn test_deltas_two_wallets_gross_and_net() {
        let transfer = transfer_fixture(false);
        let deltas = build_wallet_deltas(&transfer);
        assert_eq!(deltas.len(), 2);

        let from = &deltas[0];
        assert_eq!(from.wallet_id, transfer.from_wallet_id);
        assert_eq!(from.real, -10_000);
        assert_eq!(from.withdrawals, 10_000);
        assert_eq!(from.fees, 0);

        let to = &deltas[1];
        assert_eq!(to.wallet_id, transfer.to_wallet_id);
        assert_eq!(to.real, 9_710);
        assert_eq!(to.deposits, 9_710);
        // Fee lands on the receiving real wallet's lifetime counter
        assert_eq!(to.fees, 290);
    }

    #[test]
    fn test_deltas_same_wallet_combined() {
        let mut transfer = transfer_fixture(true);
        transfer.from_balance = BalanceKind::Bonus;
        transfer.to_balance = BalanceKind::Real;
        transfer.fee_amount = 0;
        transfer.net_amount = 10_000;

        let deltas = build_wallet_deltas(&transfer);
        assert_eq!(deltas.len(), 1);
        let delta = &deltas[0];
        assert_eq!(delta.bonus, -10_000);
        assert_eq!(delta.real, 10_000);
    }

    #[test]
    fn test_deltas_bonus_credit_skips_lifetime_counters() {
        let mut transfer = transfer_fixture(false);
        transfer.to_balance = BalanceKind::Bonus;
        let deltas = build_wallet_deltas(&transfer);
        let to = &deltas[1];
        assert_eq!(to.bonus, 9_710);
        assert_eq!(to.deposits, 0);
        assert_eq!(to.fees, 0);
    }
}
