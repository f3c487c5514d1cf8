//! Reconciliation Reporter
//!
//! Diagnostic consistency check: the signed sum of all completed ledger
//! entries for a (user, currency, balance kind) must equal the stored
//! wallet field at any commit boundary. Mismatches are reported, never
//! repaired.

use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::warn;

use super::error::LedgerError;
use super::types::{BalanceKind, Charge, TxStatus, WalletId};
use super::wallet::WalletStore;

/// One balance field compared against its ledger sum
#[derive(Debug, Clone, Serialize)]
pub struct BalanceCheck {
    pub kind: BalanceKind,
    pub ledger_sum: i64,
    pub wallet_balance: i64,
    /// `wallet_balance - ledger_sum`; zero when consistent
    pub delta: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub wallet_id: WalletId,
    pub user_id: i64,
    pub currency: String,
    pub tenant_id: String,
    pub checks: Vec<BalanceCheck>,
    pub balanced: bool,
}

pub struct Reconciler;

impl Reconciler {
    /// Compare ledger sums against the stored wallet balances.
    ///
    /// Credits add, debits subtract; recorded amounts are already net of
    /// fee, so no fee adjustment is needed here. Only `completed` entries
    /// count - pending and failed legs never moved a wallet.
    pub async fn reconcile_wallet(
        pool: &PgPool,
        user_id: i64,
        currency: &str,
        tenant_id: &str,
    ) -> Result<ReconciliationReport, LedgerError> {
        let mut conn = pool.acquire().await?;
        let wallet = WalletStore::find(&mut *conn, user_id, currency, tenant_id)
            .await?
            .ok_or_else(|| {
                LedgerError::WalletNotFound(format!("{user_id}/{currency}/{tenant_id}"))
            })?;

        let rows = sqlx::query(
            "SELECT balance_kind, \
                    COALESCE(SUM(CASE WHEN charge = $4 THEN amount ELSE -amount END), 0)::BIGINT AS total \
             FROM transactions \
             WHERE wallet_id = $1 AND currency = $2 AND tenant_id = $3 AND status = $5 \
             GROUP BY balance_kind",
        )
        .bind(wallet.wallet_id.to_string())
        .bind(currency)
        .bind(&wallet.tenant_id)
        .bind(Charge::Credit.id())
        .bind(TxStatus::Completed.id())
        .fetch_all(&mut *conn)
        .await?;

        let mut sums = [0i64; 3];
        for row in rows {
            let kind_id: i16 = row.get("balance_kind");
            let kind = BalanceKind::from_id(kind_id).ok_or_else(|| {
                LedgerError::InvalidRecord(format!("Invalid balance_kind: {kind_id}"))
            })?;
            sums[kind.id() as usize - 1] = row.get("total");
        }

        let mut checks = Vec::with_capacity(3);
        let mut balanced = true;
        for kind in [BalanceKind::Real, BalanceKind::Bonus, BalanceKind::Locked] {
            let ledger_sum = sums[kind.id() as usize - 1];
            let wallet_balance = wallet.balance_of(kind);
            let delta = wallet_balance - ledger_sum;
            if delta != 0 {
                balanced = false;
                warn!(
                    wallet_id = %wallet.wallet_id,
                    user_id,
                    currency,
                    balance_kind = %kind,
                    ledger_sum,
                    wallet_balance,
                    delta,
                    "Reconciliation mismatch"
                );
            }
            checks.push(BalanceCheck {
                kind,
                ledger_sum,
                wallet_balance,
                delta,
            });
        }

        Ok(ReconciliationReport {
            wallet_id: wallet.wallet_id,
            user_id,
            currency: currency.to_string(),
            tenant_id: wallet.tenant_id.clone(),
            checks,
            balanced,
        })
    }
}
