//! Wallet Store
//!
//! Owns per-(user, currency, tenant) balance documents with three balance
//! fields (real/bonus/locked), negative-balance policy and lifetime
//! counters. Wallets are created lazily on first reference and never
//! deleted, only status-transitioned.
//!
//! All mutation goes through [`WalletDelta`] applied as a single
//! `col = col + $n` update, so concurrent commits never lose increments.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use std::fmt;

use super::error::LedgerError;
use super::types::{BalanceKind, WalletId};

/// Wallet lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum WalletStatus {
    Active = 1,
    Frozen = 2,
    Closed = 3,
}

impl WalletStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(WalletStatus::Active),
            2 => Some(WalletStatus::Frozen),
            3 => Some(WalletStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Negative-balance policy applied when a wallet is first created
#[derive(Debug, Clone, Copy, Default)]
pub struct WalletPolicy {
    pub allow_negative: bool,
    /// Lower bound `balance >= -credit_limit`; meaningful only with
    /// `allow_negative`
    pub credit_limit: Option<i64>,
}

/// One wallet per (user, currency, tenant). Amounts are minor units.
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    pub wallet_id: WalletId,
    pub user_id: i64,
    pub currency: String,
    pub tenant_id: String,
    pub balance: i64,
    pub bonus_balance: i64,
    pub locked_balance: i64,
    pub allow_negative: bool,
    pub credit_limit: Option<i64>,
    pub lifetime_deposits: i64,
    pub lifetime_withdrawals: i64,
    pub lifetime_fees: i64,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Wallet {
    /// Resolve the balance field addressed by `kind`
    pub fn balance_of(&self, kind: BalanceKind) -> i64 {
        match kind {
            BalanceKind::Real => self.balance,
            BalanceKind::Bonus => self.bonus_balance,
            BalanceKind::Locked => self.locked_balance,
        }
    }
}

/// Coalescable set of increments for one wallet.
///
/// The transfer orchestrator merges both legs of a same-wallet transfer
/// into a single delta; the batch transaction path merges per-wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletDelta {
    pub wallet_id: WalletId,
    pub real: i64,
    pub bonus: i64,
    pub locked: i64,
    pub deposits: i64,
    pub withdrawals: i64,
    pub fees: i64,
}

impl WalletDelta {
    pub fn new(wallet_id: WalletId) -> Self {
        Self {
            wallet_id,
            real: 0,
            bonus: 0,
            locked: 0,
            deposits: 0,
            withdrawals: 0,
            fees: 0,
        }
    }

    fn field_mut(&mut self, kind: BalanceKind) -> &mut i64 {
        match kind {
            BalanceKind::Real => &mut self.real,
            BalanceKind::Bonus => &mut self.bonus,
            BalanceKind::Locked => &mut self.locked,
        }
    }

    /// Credit `net` to the addressed field. Lifetime counters move only
    /// for real-balance events.
    pub fn credit(&mut self, kind: BalanceKind, net: i64, fee: i64) {
        *self.field_mut(kind) += net;
        if kind == BalanceKind::Real {
            self.deposits += net;
            self.fees += fee;
        }
    }

    /// Debit the gross `amount` from the addressed field
    pub fn debit(&mut self, kind: BalanceKind, amount: i64) {
        *self.field_mut(kind) -= amount;
        if kind == BalanceKind::Real {
            self.withdrawals += amount;
        }
    }

    /// Fold another delta for the same wallet into this one
    pub fn merge(&mut self, other: &WalletDelta) {
        debug_assert_eq!(self.wallet_id, other.wallet_id);
        self.real += other.real;
        self.bonus += other.bonus;
        self.locked += other.locked;
        self.deposits += other.deposits;
        self.withdrawals += other.withdrawals;
        self.fees += other.fees;
    }
}

const WALLET_COLUMNS: &str = "wallet_id, user_id, currency, tenant_id, balance, bonus_balance, \
     locked_balance, allow_negative, credit_limit, lifetime_deposits, \
     lifetime_withdrawals, lifetime_fees, status, created_at, updated_at, last_activity_at";

/// Wallet persistence operations.
///
/// Every method takes the caller's open connection so that wallet reads
/// and writes share the surrounding transaction.
pub struct WalletStore;

impl WalletStore {
    /// Return the wallet for (user, currency, tenant), creating a
    /// zero-balance wallet with the given policy when absent.
    ///
    /// Runs inside the caller's transaction and locks the row, so two
    /// concurrent callers cannot both "create". When a wallet exists for
    /// the same (user, currency) under a different tenant it is reused
    /// with a warning rather than duplicated.
    pub async fn get_or_create(
        conn: &mut PgConnection,
        user_id: i64,
        currency: &str,
        tenant_id: &str,
        policy: WalletPolicy,
    ) -> Result<Wallet, LedgerError> {
        let query = format!(
            "SELECT {WALLET_COLUMNS} FROM wallets \
             WHERE user_id = $1 AND currency = $2 AND tenant_id = $3 FOR UPDATE"
        );
        if let Some(row) = sqlx::query(&query)
            .bind(user_id)
            .bind(currency)
            .bind(tenant_id)
            .fetch_optional(&mut *conn)
            .await?
        {
            return row_to_wallet(&row);
        }

        // Same (user, currency) under another tenant: reuse, do not duplicate
        let fallback = format!(
            "SELECT {WALLET_COLUMNS} FROM wallets \
             WHERE user_id = $1 AND currency = $2 ORDER BY created_at LIMIT 1 FOR UPDATE"
        );
        if let Some(row) = sqlx::query(&fallback)
            .bind(user_id)
            .bind(currency)
            .fetch_optional(&mut *conn)
            .await?
        {
            let wallet = row_to_wallet(&row)?;
            tracing::warn!(
                user_id,
                currency,
                requested_tenant = tenant_id,
                wallet_tenant = %wallet.tenant_id,
                wallet_id = %wallet.wallet_id,
                "Wallet exists under a different tenant - reusing"
            );
            return Ok(wallet);
        }

        let wallet_id = WalletId::new();
        let insert = format!(
            "INSERT INTO wallets (wallet_id, user_id, currency, tenant_id, allow_negative, credit_limit, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, currency, tenant_id) DO NOTHING \
             RETURNING {WALLET_COLUMNS}"
        );
        let inserted = sqlx::query(&insert)
            .bind(wallet_id.to_string())
            .bind(user_id)
            .bind(currency)
            .bind(tenant_id)
            .bind(policy.allow_negative)
            .bind(policy.credit_limit)
            .bind(WalletStatus::Active.id())
            .fetch_optional(&mut *conn)
            .await?;

        match inserted {
            Some(row) => {
                let wallet = row_to_wallet(&row)?;
                tracing::info!(
                    wallet_id = %wallet.wallet_id,
                    user_id,
                    currency,
                    tenant_id,
                    "Wallet created"
                );
                Ok(wallet)
            }
            // Lost the create race; the row exists now
            None => {
                let row = sqlx::query(&query)
                    .bind(user_id)
                    .bind(currency)
                    .bind(tenant_id)
                    .fetch_one(&mut *conn)
                    .await?;
                row_to_wallet(&row)
            }
        }
    }

    /// Load a wallet by its id, as captured at transfer creation time
    pub async fn get_by_id(
        conn: &mut PgConnection,
        wallet_id: &WalletId,
    ) -> Result<Option<Wallet>, LedgerError> {
        let query = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE wallet_id = $1");
        let row = sqlx::query(&query)
            .bind(wallet_id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|r| row_to_wallet(&r)).transpose()
    }

    /// Load a wallet by its natural key without locking (diagnostics)
    pub async fn find(
        conn: &mut PgConnection,
        user_id: i64,
        currency: &str,
        tenant_id: &str,
    ) -> Result<Option<Wallet>, LedgerError> {
        let query = format!(
            "SELECT {WALLET_COLUMNS} FROM wallets \
             WHERE user_id = $1 AND currency = $2 AND tenant_id = $3"
        );
        let row = sqlx::query(&query)
            .bind(user_id)
            .bind(currency)
            .bind(tenant_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|r| row_to_wallet(&r)).transpose()
    }

    /// Reject a debit that would violate the wallet's balance policy.
    ///
    /// Runs before any write; a rejected debit leaves no trace.
    pub fn validate_debit(
        wallet: &Wallet,
        amount: i64,
        kind: BalanceKind,
    ) -> Result<(), LedgerError> {
        match wallet.status {
            WalletStatus::Active => {}
            WalletStatus::Frozen | WalletStatus::Closed => {
                return Err(LedgerError::WalletInactive {
                    wallet_id: wallet.wallet_id,
                    status: wallet.status.as_str(),
                    operation: "debit",
                });
            }
        }

        let available = wallet.balance_of(kind);
        let resulting = available - amount;

        if !wallet.allow_negative {
            if resulting < 0 {
                return Err(LedgerError::InsufficientBalance {
                    wallet_id: wallet.wallet_id,
                    available,
                    requested: amount,
                });
            }
        } else if let Some(limit) = wallet.credit_limit
            && resulting < -limit
        {
            return Err(LedgerError::CreditLimitExceeded {
                wallet_id: wallet.wallet_id,
                limit,
                resulting,
            });
        }

        Ok(())
    }

    /// Closed wallets accept no credits; frozen wallets still may
    /// (e.g. a refund landing while an account is under review)
    pub fn validate_credit(wallet: &Wallet) -> Result<(), LedgerError> {
        if wallet.status == WalletStatus::Closed {
            return Err(LedgerError::WalletInactive {
                wallet_id: wallet.wallet_id,
                status: wallet.status.as_str(),
                operation: "credit",
            });
        }
        Ok(())
    }

    /// Apply a coalesced delta as one atomic increment update.
    ///
    /// Zero matched rows means the captured wallet id went stale, which is
    /// fatal to the surrounding operation.
    pub async fn apply_delta(
        conn: &mut PgConnection,
        delta: &WalletDelta,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            "UPDATE wallets SET \
                balance = balance + $2, \
                bonus_balance = bonus_balance + $3, \
                locked_balance = locked_balance + $4, \
                lifetime_deposits = lifetime_deposits + $5, \
                lifetime_withdrawals = lifetime_withdrawals + $6, \
                lifetime_fees = lifetime_fees + $7, \
                updated_at = NOW(), \
                last_activity_at = NOW() \
             WHERE wallet_id = $1",
        )
        .bind(delta.wallet_id.to_string())
        .bind(delta.real)
        .bind(delta.bonus)
        .bind(delta.locked)
        .bind(delta.deposits)
        .bind(delta.withdrawals)
        .bind(delta.fees)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::WalletNotFound(delta.wallet_id.to_string()));
        }
        Ok(())
    }
}

pub(crate) fn row_to_wallet(row: &PgRow) -> Result<Wallet, LedgerError> {
    let wallet_id_str: String = row.get("wallet_id");
    let wallet_id: WalletId = wallet_id_str
        .trim()
        .parse()
        .map_err(|_| LedgerError::InvalidRecord(format!("Invalid wallet_id: {wallet_id_str}")))?;

    let status_id: i16 = row.get("status");
    let status = WalletStatus::from_id(status_id)
        .ok_or_else(|| LedgerError::InvalidRecord(format!("Invalid wallet status: {status_id}")))?;

    Ok(Wallet {
        wallet_id,
        user_id: row.get("user_id"),
        currency: row.get::<String, _>("currency"),
        tenant_id: row.get("tenant_id"),
        balance: row.get("balance"),
        bonus_balance: row.get("bonus_balance"),
        locked_balance: row.get("locked_balance"),
        allow_negative: row.get("allow_negative"),
        credit_limit: row.get("credit_limit"),
        lifetime_deposits: row.get("lifetime_deposits"),
        lifetime_withdrawals: row.get("lifetime_withdrawals"),
        lifetime_fees: row.get("lifetime_fees"),
        status,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_activity_at: row.get("last_activity_at"),
    })
}

#[cfg(test)]
pub(crate) fn test_wallet(balance: i64, policy: WalletPolicy) -> Wallet {
    let now = Utc::now();
    Wallet {
        wallet_id: WalletId::new(),
        user_id: 1001,
        currency: "EUR".to_string(),
        tenant_id: "default".to_string(),
        balance,
        bonus_balance: 0,
        locked_balance: 0,
        allow_negative: policy.allow_negative,
        credit_limit: policy.credit_limit,
        lifetime_deposits: 0,
        lifetime_withdrawals: 0,
        lifetime_fees: 0,
        status: WalletStatus::Active,
        created_at: now,
        updated_at: now,
        last_activity_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debit_rejected_without_allow_negative() {
        let wallet = test_wallet(500, WalletPolicy::default());
        assert!(WalletStore::validate_debit(&wallet, 500, BalanceKind::Real).is_ok());
        let err = WalletStore::validate_debit(&wallet, 501, BalanceKind::Real).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 500,
                requested: 501,
                ..
            }
        ));
    }

    #[test]
    fn test_credit_limit_boundary() {
        let policy = WalletPolicy {
            allow_negative: true,
            credit_limit: Some(1000),
        };
        let wallet = test_wallet(0, policy);
        // -999 stays above the -1000 floor
        assert!(WalletStore::validate_debit(&wallet, 999, BalanceKind::Real).is_ok());
        assert!(WalletStore::validate_debit(&wallet, 1000, BalanceKind::Real).is_ok());
        let err = WalletStore::validate_debit(&wallet, 1001, BalanceKind::Real).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::CreditLimitExceeded {
                limit: 1000,
                resulting: -1001,
                ..
            }
        ));
    }

    #[test]
    fn test_allow_negative_without_limit_is_unbounded() {
        let policy = WalletPolicy {
            allow_negative: true,
            credit_limit: None,
        };
        let wallet = test_wallet(0, policy);
        assert!(WalletStore::validate_debit(&wallet, 1_000_000_000, BalanceKind::Real).is_ok());
    }

    #[test]
    fn test_policy_applies_to_addressed_field() {
        let mut wallet = test_wallet(10_000, WalletPolicy::default());
        wallet.bonus_balance = 300;
        // Real balance is ample but the bonus field is what is debited
        let err = WalletStore::validate_debit(&wallet, 400, BalanceKind::Bonus).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_frozen_wallet_refuses_debit_but_accepts_credit() {
        let mut wallet = test_wallet(1000, WalletPolicy::default());
        wallet.status = WalletStatus::Frozen;
        assert!(matches!(
            WalletStore::validate_debit(&wallet, 1, BalanceKind::Real),
            Err(LedgerError::WalletInactive { .. })
        ));
        assert!(WalletStore::validate_credit(&wallet).is_ok());

        wallet.status = WalletStatus::Closed;
        assert!(matches!(
            WalletStore::validate_credit(&wallet),
            Err(LedgerError::WalletInactive { .. })
        ));
    }

    #[test]
    fn test_delta_lifetime_counters_real_only() {
        let mut delta = WalletDelta::new(WalletId::new());
        delta.credit(BalanceKind::Real, 9710, 290);
        delta.debit(BalanceKind::Bonus, 500);

        assert_eq!(delta.real, 9710);
        assert_eq!(delta.bonus, -500);
        assert_eq!(delta.deposits, 9710);
        assert_eq!(delta.fees, 290);
        // Bonus debit leaves withdrawal counter untouched
        assert_eq!(delta.withdrawals, 0);
    }

    #[test]
    fn test_delta_merge_same_user_conversion() {
        let wallet_id = WalletId::new();
        let mut debit_leg = WalletDelta::new(wallet_id);
        debit_leg.debit(BalanceKind::Bonus, 1000);
        let mut credit_leg = WalletDelta::new(wallet_id);
        credit_leg.credit(BalanceKind::Real, 1000, 0);

        debit_leg.merge(&credit_leg);
        assert_eq!(debit_leg.bonus, -1000);
        assert_eq!(debit_leg.real, 1000);
        assert_eq!(debit_leg.deposits, 1000);
        assert_eq!(debit_leg.withdrawals, 0);
    }

    #[test]
    fn test_balance_of_resolves_field() {
        let mut wallet = test_wallet(100, WalletPolicy::default());
        wallet.bonus_balance = 200;
        wallet.locked_balance = 300;
        assert_eq!(wallet.balance_of(BalanceKind::Real), 100);
        assert_eq!(wallet.balance_of(BalanceKind::Bonus), 200);
        assert_eq!(wallet.balance_of(BalanceKind::Locked), 300);
    }
}
