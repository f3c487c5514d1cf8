//! Atomic Commit Engine
//!
//! [`LedgerEngine`] owns the transaction lifecycle for standalone calls:
//! every write-path operation runs inside one `REPEATABLE READ`
//! transaction covering all of its document writes, with a bounded retry
//! on serialization conflicts. Composed callers (sagas) use the `*_in`
//! associated functions against their own open transaction and keep
//! commit/abort control.
//!
//! Post-commit cache invalidation is best effort: a failure is logged and
//! swallowed, never surfaced to the financial operation.

use futures::future::BoxFuture;
use rand::Rng;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::LedgerConfig;

use super::approval::Approval;
use super::cache::{CacheInvalidator, NoopCache, wallet_patterns};
use super::error::{LedgerError, is_transient};
use super::reconcile::{ReconciliationReport, Reconciler};
use super::transaction::{Transaction, TransactionLedger};
use super::transfer::{Transfer, TransferOrchestrator, TransferOutcome};
use super::types::{CreateTransactionParams, CreateTransferParams, TransferId};
use super::wallet::{Wallet, WalletPolicy, WalletStore};

pub struct LedgerEngine {
    pool: PgPool,
    config: LedgerConfig,
    cache: Arc<dyn CacheInvalidator>,
}

impl LedgerEngine {
    /// Build an engine over an injected pool; no module-level connection
    /// state exists anywhere in this crate.
    pub fn new(pool: PgPool, config: LedgerConfig) -> Self {
        Self {
            pool,
            config,
            cache: Arc::new(NoopCache),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // === Owned plane: the engine begins, retries and commits ===

    /// Execute a transfer as one atomic unit and invalidate wallet caches
    /// after commit.
    pub async fn create_transfer(
        &self,
        params: CreateTransferParams,
    ) -> Result<TransferOutcome, LedgerError> {
        let captured = params.clone();
        let result = self
            .run_owned(move |conn| {
                let params = captured.clone();
                Box::pin(
                    async move { TransferOrchestrator::create_with_transactions(conn, params).await },
                )
            })
            .await;

        match result {
            Ok(outcome) => {
                self.invalidate_wallet_cache(&outcome.transfer.tenant_id, outcome.transfer.from_user_id)
                    .await;
                if outcome.transfer.to_user_id != outcome.transfer.from_user_id {
                    self.invalidate_wallet_cache(&outcome.transfer.tenant_id, outcome.transfer.to_user_id)
                        .await;
                }
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    from_user_id = params.from_user_id,
                    to_user_id = params.to_user_id,
                    amount = params.amount,
                    currency = %params.currency,
                    error = %e,
                    "Transfer failed"
                );
                Err(e)
            }
        }
    }

    /// Single non-transfer ledger entry as one atomic unit
    pub async fn create_transaction(
        &self,
        params: CreateTransactionParams,
    ) -> Result<Transaction, LedgerError> {
        let tenant = params.tenant().to_string();
        let user_id = params.user_id;
        let captured = params;
        let tx = self
            .run_owned(move |conn| {
                let params = captured.clone();
                Box::pin(async move { TransactionLedger::create_transaction(conn, params).await })
            })
            .await?;
        self.invalidate_wallet_cache(&tenant, user_id).await;
        Ok(tx)
    }

    /// Batched ledger entries; one wallet update per (user, currency,
    /// tenant) key
    pub async fn create_transactions(
        &self,
        batch: Vec<CreateTransactionParams>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut touched: Vec<(String, i64)> = batch
            .iter()
            .map(|p| (p.tenant().to_string(), p.user_id))
            .collect();
        touched.sort();
        touched.dedup();

        let captured = batch;
        let txs = self
            .run_owned(move |conn| {
                let batch = captured.clone();
                Box::pin(async move { TransactionLedger::create_transactions(conn, batch).await })
            })
            .await?;

        for (tenant, user_id) in touched {
            self.invalidate_wallet_cache(&tenant, user_id).await;
        }
        Ok(txs)
    }

    /// Approve a pending transfer, moving both wallets atomically
    pub async fn approve_transfer(&self, transfer_id: TransferId) -> Result<Transfer, LedgerError> {
        let transfer = self
            .run_owned(move |conn| {
                Box::pin(async move { Approval::approve(conn, &transfer_id).await })
            })
            .await?;
        self.invalidate_wallet_cache(&transfer.tenant_id, transfer.from_user_id)
            .await;
        if transfer.to_user_id != transfer.from_user_id {
            self.invalidate_wallet_cache(&transfer.tenant_id, transfer.to_user_id)
                .await;
        }
        Ok(transfer)
    }

    /// Decline a pending transfer; wallets are untouched so no cache
    /// invalidation is needed
    pub async fn decline_transfer(
        &self,
        transfer_id: TransferId,
        reason: Option<&str>,
    ) -> Result<Transfer, LedgerError> {
        let reason = reason.map(str::to_string);
        self.run_owned(move |conn| {
            let reason = reason.clone();
            Box::pin(async move { Approval::decline(conn, &transfer_id, reason.as_deref()).await })
        })
        .await
    }

    /// Fetch the wallet for (user, currency, tenant), creating it with the
    /// given policy when absent. The policy only applies on creation;
    /// existing wallets keep theirs.
    pub async fn get_or_create_wallet(
        &self,
        user_id: i64,
        currency: &str,
        tenant_id: &str,
        policy: WalletPolicy,
    ) -> Result<Wallet, LedgerError> {
        let currency = currency.to_string();
        let tenant_id = tenant_id.to_string();
        self.run_owned(move |conn| {
            let currency = currency.clone();
            let tenant_id = tenant_id.clone();
            Box::pin(async move {
                WalletStore::get_or_create(conn, user_id, &currency, &tenant_id, policy).await
            })
        })
        .await
    }

    pub async fn get_wallet(
        &self,
        user_id: i64,
        currency: &str,
        tenant_id: &str,
    ) -> Result<Option<Wallet>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        WalletStore::find(&mut conn, user_id, currency, tenant_id).await
    }

    pub async fn get_transfer(
        &self,
        transfer_id: TransferId,
    ) -> Result<Option<Transfer>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        TransferOrchestrator::get(&mut conn, &transfer_id).await
    }

    /// On-demand ledger-vs-wallet consistency check (diagnostic only)
    pub async fn reconcile_wallet(
        &self,
        user_id: i64,
        currency: &str,
        tenant_id: &str,
    ) -> Result<ReconciliationReport, LedgerError> {
        Reconciler::reconcile_wallet(&self.pool, user_id, currency, tenant_id).await
    }

    // === Composed plane: the caller owns the transaction ===

    /// Transfer creation inside a caller-owned transaction. The caller
    /// commits/aborts and is responsible for post-commit cache
    /// invalidation via [`LedgerEngine::invalidate_wallet_cache`].
    pub async fn create_transfer_in(
        conn: &mut PgConnection,
        params: CreateTransferParams,
    ) -> Result<TransferOutcome, LedgerError> {
        TransferOrchestrator::create_with_transactions(conn, params).await
    }

    pub async fn create_transaction_in(
        conn: &mut PgConnection,
        params: CreateTransactionParams,
    ) -> Result<Transaction, LedgerError> {
        TransactionLedger::create_transaction(conn, params).await
    }

    pub async fn create_transactions_in(
        conn: &mut PgConnection,
        batch: Vec<CreateTransactionParams>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        TransactionLedger::create_transactions(conn, batch).await
    }

    pub async fn approve_transfer_in(
        conn: &mut PgConnection,
        transfer_id: &TransferId,
    ) -> Result<Transfer, LedgerError> {
        Approval::approve(conn, transfer_id).await
    }

    pub async fn decline_transfer_in(
        conn: &mut PgConnection,
        transfer_id: &TransferId,
        reason: Option<&str>,
    ) -> Result<Transfer, LedgerError> {
        Approval::decline(conn, transfer_id, reason).await
    }

    // === Internals ===

    /// Run a unit of work in an owned `REPEATABLE READ` transaction with
    /// bounded retry on serialization conflicts.
    ///
    /// The callback performs no external side effects before commit, so
    /// re-executing it on a conflict is safe; business errors are never
    /// retried.
    async fn run_owned<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<T, LedgerError>>,
    {
        let max_attempts = self.config.max_commit_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let mut tx = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .execute(&mut *tx)
                .await?;

            match f(&mut *tx).await {
                Ok(value) => match tx.commit().await {
                    Ok(()) => return Ok(value),
                    Err(e) if is_transient(&e) && attempt < max_attempts => {
                        debug!(attempt, error = %e, "Commit conflict, retrying");
                        self.backoff(attempt).await;
                    }
                    Err(e) => {
                        return Err(LedgerError::CommitFailed {
                            attempts: attempt,
                            source: e,
                        });
                    }
                },
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "Rollback failed after aborted unit of work");
                    }
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    if attempt < max_attempts {
                        debug!(attempt, error = %e, "Serialization conflict, retrying");
                        self.backoff(attempt).await;
                        continue;
                    }
                    // Retry budget exhausted on a transient conflict
                    return Err(match e {
                        LedgerError::Database(source) => LedgerError::CommitFailed {
                            attempts: attempt,
                            source,
                        },
                        other => other,
                    });
                }
            }
        }
    }

    /// Exponential backoff with jitter between commit attempts
    async fn backoff(&self, attempt: u32) {
        let base = self.config.retry_backoff_ms << (attempt - 1).min(8);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        tokio::time::sleep(Duration::from_millis(base + jitter)).await;
    }

    /// Best-effort pattern invalidation; never fails the caller
    pub async fn invalidate_wallet_cache(&self, tenant_id: &str, user_id: i64) {
        for pattern in wallet_patterns(tenant_id, user_id) {
            if let Err(e) = self.cache.invalidate(&pattern).await {
                warn!(pattern = %pattern, error = %e, "Cache invalidation failed");
            }
        }
    }
}
