//! Transaction Ledger
//!
//! Append-only records of balance movement, one per (user, charge
//! direction) event. Financial columns never change after insert; the
//! approval state machine may only move `status`/`decline_reason`.
//!
//! [`TransactionLedger::build`] is the pure document builder reused by the
//! single-transaction path and by the transfer orchestrator's two legs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use std::collections::HashMap;

use super::error::LedgerError;
use super::types::{
    BalanceKind, Charge, CreateTransactionParams, ObjectModel, TransactionId, TransferId,
    TxStatus, WalletId,
};
use super::wallet::{Wallet, WalletDelta, WalletPolicy, WalletStore};

/// Immutable ledger entry. `amount` is the positive magnitude of this
/// leg (net of fee on credits); `balance_after` is the addressed balance
/// field after this entry is applied.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub user_id: i64,
    pub wallet_id: WalletId,
    pub tenant_id: String,
    pub currency: String,
    pub amount: i64,
    pub balance_after: i64,
    pub charge: Charge,
    pub balance_kind: BalanceKind,
    pub status: TxStatus,
    pub fee_amount: i64,
    pub object_id: Option<String>,
    pub object_model: Option<ObjectModel>,
    pub transfer_id: Option<TransferId>,
    pub external_ref: Option<String>,
    pub description: Option<String>,
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

const TX_COLUMNS: &str = "transaction_id, user_id, wallet_id, tenant_id, currency, amount, \
     balance_after, charge, balance_kind, status, fee_amount, object_id, object_model, \
     transfer_id, external_ref, description, decline_reason, created_at";

/// Ledger entry operations
pub struct TransactionLedger;

impl TransactionLedger {
    /// Build a transaction document without touching storage.
    ///
    /// `current_balance` is the addressed balance field as of now; the
    /// recorded amount is `amount - fee_amount` for credits and the gross
    /// `amount` for debits, so `balance_after - recorded` (credit) or
    /// `balance_after + recorded` (debit) always reproduces the prior
    /// balance.
    pub fn build(
        params: &CreateTransactionParams,
        wallet: &Wallet,
        current_balance: i64,
    ) -> Result<Transaction, LedgerError> {
        if params.amount <= 0 {
            return Err(LedgerError::InvalidAmount(params.amount));
        }
        if params.fee_amount < 0 || params.fee_amount > params.amount {
            return Err(LedgerError::InvalidFee {
                fee: params.fee_amount,
                amount: params.amount,
            });
        }

        let (recorded, balance_after) = match params.charge {
            Charge::Credit => {
                let net = params.amount - params.fee_amount;
                (net, current_balance + net)
            }
            Charge::Debit => (params.amount, current_balance - params.amount),
        };

        Ok(Transaction {
            transaction_id: TransactionId::new(),
            user_id: params.user_id,
            wallet_id: wallet.wallet_id,
            tenant_id: params.tenant().to_string(),
            currency: params.currency.clone(),
            amount: recorded,
            balance_after,
            charge: params.charge,
            balance_kind: params.balance,
            status: params.status,
            fee_amount: params.fee_amount,
            object_id: params.object_id.clone(),
            object_model: params.object_model,
            transfer_id: params.transfer_id,
            external_ref: params.external_ref.clone(),
            description: params.description.clone(),
            decline_reason: None,
            created_at: Utc::now(),
        })
    }

    /// Insert one ledger entry. A unique-index hit on `external_ref` maps
    /// to [`LedgerError::DuplicateExternalRef`].
    pub async fn insert(conn: &mut PgConnection, tx: &Transaction) -> Result<(), LedgerError> {
        sqlx::query(
            "INSERT INTO transactions \
                (transaction_id, user_id, wallet_id, tenant_id, currency, amount, balance_after, \
                 charge, balance_kind, status, fee_amount, object_id, object_model, transfer_id, \
                 external_ref, description, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(tx.transaction_id.to_string())
        .bind(tx.user_id)
        .bind(tx.wallet_id.to_string())
        .bind(&tx.tenant_id)
        .bind(&tx.currency)
        .bind(tx.amount)
        .bind(tx.balance_after)
        .bind(tx.charge.id())
        .bind(tx.balance_kind.id())
        .bind(tx.status.id())
        .bind(tx.fee_amount)
        .bind(&tx.object_id)
        .bind(tx.object_model.map(|m| m.as_str()))
        .bind(tx.transfer_id.map(|t| t.to_string()))
        .bind(&tx.external_ref)
        .bind(&tx.description)
        .bind(tx.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| LedgerError::from_insert(e, tx.external_ref.as_deref()))?;
        Ok(())
    }

    /// Create one ledger entry and mutate its wallet in the caller's
    /// transaction. Used for non-transfer events (purchases, refunds,
    /// adjustments).
    pub async fn create_transaction(
        conn: &mut PgConnection,
        params: CreateTransactionParams,
    ) -> Result<Transaction, LedgerError> {
        let wallet = WalletStore::get_or_create(
            conn,
            params.user_id,
            &params.currency,
            params.tenant(),
            WalletPolicy::default(),
        )
        .await?;

        match params.charge {
            Charge::Debit => WalletStore::validate_debit(&wallet, params.amount, params.balance)?,
            Charge::Credit => WalletStore::validate_credit(&wallet)?,
        }

        let tx = Self::build(&params, &wallet, wallet.balance_of(params.balance))?;
        Self::insert(conn, &tx).await?;

        // Wallets only move for committed value; pending entries wait for
        // the approval machine
        if tx.status == TxStatus::Completed {
            let mut delta = WalletDelta::new(wallet.wallet_id);
            match tx.charge {
                Charge::Credit => delta.credit(tx.balance_kind, tx.amount, tx.fee_amount),
                Charge::Debit => delta.debit(tx.balance_kind, tx.amount),
            }
            WalletStore::apply_delta(conn, &delta).await?;
        }

        Ok(tx)
    }

    /// Batched variant: coalesces wallet increments into a single update
    /// per (user, currency, tenant) key to minimize write amplification.
    /// Debits are validated against the running balance within the batch.
    pub async fn create_transactions(
        conn: &mut PgConnection,
        batch: Vec<CreateTransactionParams>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut wallets: HashMap<(i64, String, String), Wallet> = HashMap::new();
        for params in &batch {
            let key = (
                params.user_id,
                params.currency.clone(),
                params.tenant().to_string(),
            );
            if !wallets.contains_key(&key) {
                let wallet = WalletStore::get_or_create(
                    conn,
                    params.user_id,
                    &params.currency,
                    params.tenant(),
                    WalletPolicy::default(),
                )
                .await?;
                wallets.insert(key, wallet);
            }
        }

        let (txs, deltas) = plan_batch(&mut wallets, &batch)?;

        for tx in &txs {
            Self::insert(conn, tx).await?;
        }
        for delta in deltas.values() {
            WalletStore::apply_delta(conn, delta).await?;
        }

        Ok(txs)
    }

    /// Move a ledger entry's status; the only mutation transactions allow
    pub async fn mark_status(
        conn: &mut PgConnection,
        transaction_id: &TransactionId,
        status: TxStatus,
        decline_reason: Option<&str>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE transactions SET status = $2, decline_reason = COALESCE($3, decline_reason) \
             WHERE transaction_id = $1",
        )
        .bind(transaction_id.to_string())
        .bind(status.id())
        .bind(decline_reason)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::TransactionNotFound(transaction_id.to_string()));
        }
        Ok(())
    }

    pub async fn get(
        conn: &mut PgConnection,
        transaction_id: &TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        let query = format!("SELECT {TX_COLUMNS} FROM transactions WHERE transaction_id = $1");
        let row = sqlx::query(&query)
            .bind(transaction_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|r| row_to_transaction(&r)).transpose()
    }
}

/// Pure planning step of the batch path: builds every transaction against
/// the running balances of the pre-fetched wallets and coalesces one
/// [`WalletDelta`] per wallet.
fn plan_batch(
    wallets: &mut HashMap<(i64, String, String), Wallet>,
    batch: &[CreateTransactionParams],
) -> Result<(Vec<Transaction>, HashMap<WalletId, WalletDelta>), LedgerError> {
    let mut txs = Vec::with_capacity(batch.len());
    let mut deltas: HashMap<WalletId, WalletDelta> = HashMap::new();

    for params in batch {
        let key = (
            params.user_id,
            params.currency.clone(),
            params.tenant().to_string(),
        );
        let wallet = wallets
            .get_mut(&key)
            .ok_or_else(|| LedgerError::WalletNotFound(format!("{key:?}")))?;

        match params.charge {
            Charge::Debit => WalletStore::validate_debit(wallet, params.amount, params.balance)?,
            Charge::Credit => WalletStore::validate_credit(wallet)?,
        }

        let tx = TransactionLedger::build(params, wallet, wallet.balance_of(params.balance))?;

        if tx.status == TxStatus::Completed {
            let delta = deltas
                .entry(wallet.wallet_id)
                .or_insert_with(|| WalletDelta::new(wallet.wallet_id));
            match tx.charge {
                Charge::Credit => delta.credit(tx.balance_kind, tx.amount, tx.fee_amount),
                Charge::Debit => delta.debit(tx.balance_kind, tx.amount),
            }
            // Advance the running balance so later batch items validate
            // and record against post-entry state
            match (tx.charge, tx.balance_kind) {
                (Charge::Credit, BalanceKind::Real) => wallet.balance += tx.amount,
                (Charge::Credit, BalanceKind::Bonus) => wallet.bonus_balance += tx.amount,
                (Charge::Credit, BalanceKind::Locked) => wallet.locked_balance += tx.amount,
                (Charge::Debit, BalanceKind::Real) => wallet.balance -= tx.amount,
                (Charge::Debit, BalanceKind::Bonus) => wallet.bonus_balance -= tx.amount,
                (Charge::Debit, BalanceKind::Locked) => wallet.locked_balance -= tx.amount,
            }
        }

        txs.push(tx);
    }

    Ok((txs, deltas))
}

pub(crate) fn row_to_transaction(row: &PgRow) -> Result<Transaction, LedgerError> {
    let id_str: String = row.get("transaction_id");
    let transaction_id = id_str
        .trim()
        .parse()
        .map_err(|_| LedgerError::InvalidRecord(format!("Invalid transaction_id: {id_str}")))?;

    let wallet_id_str: String = row.get("wallet_id");
    let wallet_id = wallet_id_str
        .trim()
        .parse()
        .map_err(|_| LedgerError::InvalidRecord(format!("Invalid wallet_id: {wallet_id_str}")))?;

    let charge_id: i16 = row.get("charge");
    let charge = Charge::from_id(charge_id)
        .ok_or_else(|| LedgerError::InvalidRecord(format!("Invalid charge: {charge_id}")))?;

    let kind_id: i16 = row.get("balance_kind");
    let balance_kind = BalanceKind::from_id(kind_id)
        .ok_or_else(|| LedgerError::InvalidRecord(format!("Invalid balance_kind: {kind_id}")))?;

    let status_id: i16 = row.get("status");
    let status = TxStatus::from_id(status_id)
        .ok_or_else(|| LedgerError::InvalidRecord(format!("Invalid tx status: {status_id}")))?;

    let object_model = row
        .get::<Option<String>, _>("object_model")
        .map(|s| {
            ObjectModel::parse(&s)
                .ok_or_else(|| LedgerError::InvalidRecord(format!("Invalid object_model: {s}")))
        })
        .transpose()?;

    let transfer_id = row
        .get::<Option<String>, _>("transfer_id")
        .map(|s| {
            s.trim()
                .parse::<TransferId>()
                .map_err(|_| LedgerError::InvalidRecord(format!("Invalid transfer_id: {s}")))
        })
        .transpose()?;

    Ok(Transaction {
        transaction_id,
        user_id: row.get("user_id"),
        wallet_id,
        tenant_id: row.get("tenant_id"),
        currency: row.get("currency"),
        amount: row.get("amount"),
        balance_after: row.get("balance_after"),
        charge,
        balance_kind,
        status,
        fee_amount: row.get("fee_amount"),
        object_id: row.get("object_id"),
        object_model,
        transfer_id,
        external_ref: row.get("external_ref"),
        description: row.get("description"),
        decline_reason: row.get("decline_reason"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::wallet::test_wallet;

    fn params(amount: i64, charge: Charge) -> CreateTransactionParams {
        CreateTransactionParams::new(1001, amount, "EUR", charge)
    }

    #[test]
    fn test_build_credit_records_net_of_fee() {
        let wallet = test_wallet(0, WalletPolicy::default());
        let mut p = params(10_000, Charge::Credit);
        p.fee_amount = 290;

        let tx = TransactionLedger::build(&p, &wallet, 0).unwrap();
        assert_eq!(tx.amount, 9710);
        assert_eq!(tx.balance_after, 9710);
        assert_eq!(tx.fee_amount, 290);
        // balance_before reproduction invariant
        assert_eq!(tx.balance_after - tx.amount, 0);
    }

    #[test]
    fn test_build_debit_records_gross() {
        let wallet = test_wallet(10_000, WalletPolicy::default());
        let mut p = params(10_000, Charge::Debit);
        p.fee_amount = 290;

        let tx = TransactionLedger::build(&p, &wallet, 10_000).unwrap();
        assert_eq!(tx.amount, 10_000);
        assert_eq!(tx.balance_after, 0);
        assert_eq!(tx.balance_after + tx.amount, 10_000);
    }

    #[test]
    fn test_build_rejects_bad_amounts() {
        let wallet = test_wallet(0, WalletPolicy::default());
        assert!(matches!(
            TransactionLedger::build(&params(0, Charge::Credit), &wallet, 0),
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            TransactionLedger::build(&params(-5, Charge::Debit), &wallet, 0),
            Err(LedgerError::InvalidAmount(-5))
        ));
        let mut p = params(100, Charge::Credit);
        p.fee_amount = 101;
        assert!(matches!(
            TransactionLedger::build(&p, &wallet, 0),
            Err(LedgerError::InvalidFee {
                fee: 101,
                amount: 100
            })
        ));
    }

    #[test]
    fn test_plan_batch_coalesces_per_wallet() {
        let wallet = test_wallet(1000, WalletPolicy::default());
        let key = (1001i64, "EUR".to_string(), "default".to_string());
        let mut wallets = HashMap::from([(key, wallet.clone())]);

        let batch = vec![
            params(300, Charge::Credit),
            params(200, Charge::Debit),
            params(50, Charge::Credit),
        ];
        let (txs, deltas) = plan_batch(&mut wallets, &batch).unwrap();

        assert_eq!(txs.len(), 3);
        // Running balances: 1000 -> 1300 -> 1100 -> 1150
        assert_eq!(txs[0].balance_after, 1300);
        assert_eq!(txs[1].balance_after, 1100);
        assert_eq!(txs[2].balance_after, 1150);

        assert_eq!(deltas.len(), 1);
        let delta = &deltas[&wallet.wallet_id];
        assert_eq!(delta.real, 150);
        assert_eq!(delta.deposits, 350);
        assert_eq!(delta.withdrawals, 200);
    }

    #[test]
    fn test_plan_batch_debit_validated_against_running_balance() {
        let wallet = test_wallet(100, WalletPolicy::default());
        let key = (1001i64, "EUR".to_string(), "default".to_string());
        let mut wallets = HashMap::from([(key, wallet)]);

        // 100 available, first debit takes 80, second would need 30
        let batch = vec![params(80, Charge::Debit), params(30, Charge::Debit)];
        let err = plan_batch(&mut wallets, &batch).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_plan_batch_pending_entries_do_not_move_balances() {
        let wallet = test_wallet(500, WalletPolicy::default());
        let key = (1001i64, "EUR".to_string(), "default".to_string());
        let mut wallets = HashMap::from([(key, wallet)]);

        let mut p = params(400, Charge::Credit);
        p.status = TxStatus::Pending;
        let (txs, deltas) = plan_batch(&mut wallets, &[p].to_vec()).unwrap();

        assert_eq!(txs[0].status, TxStatus::Pending);
        assert!(deltas.is_empty());
    }
}
