//! Ledger Core Types
//!
//! Identifiers, enums and request payloads shared by the wallet store,
//! transaction ledger, transfer orchestrator and approval state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Wallet identifier - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed (no machine_id)
/// - 128-bit with good entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(ulid::Ulid);

/// Transaction identifier (ULID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(ulid::Ulid);

/// Transfer identifier (ULID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(ulid::Ulid);

macro_rules! impl_ulid_id {
    ($name:ident) => {
        impl $name {
            /// Generate a new unique identifier
            pub fn new() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Get the inner ULID value
            pub fn inner(&self) -> ulid::Ulid {
                self.0
            }

            /// Wrap an already-parsed ULID
            pub fn from_ulid(ulid: ulid::Ulid) -> Self {
                Self(ulid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(ulid::Ulid::from_string(s)?))
            }
        }
    };
}

impl_ulid_id!(WalletId);
impl_ulid_id!(TransactionId);
impl_ulid_id!(TransferId);

/// Which of a wallet's three balance fields a ledger entry affects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum BalanceKind {
    Real = 1,
    Bonus = 2,
    Locked = 3,
}

impl BalanceKind {
    /// Numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(BalanceKind::Real),
            2 => Some(BalanceKind::Bonus),
            3 => Some(BalanceKind::Locked),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceKind::Real => "real",
            BalanceKind::Bonus => "bonus",
            BalanceKind::Locked => "locked",
        }
    }
}

impl fmt::Display for BalanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Charge direction of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum Charge {
    Credit = 1,
    Debit = 2,
}

impl Charge {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Charge::Credit),
            2 => Some(Charge::Debit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Charge::Credit => "credit",
            Charge::Debit => "debit",
        }
    }
}

impl fmt::Display for Charge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction lifecycle status
///
/// Financial fields of a transaction are append-only; status is the one
/// column the approval state machine may move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TxStatus {
    Pending = 0,
    Completed = 1,
    Failed = 2,
}

impl TxStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TxStatus::Pending),
            1 => Some(TxStatus::Completed),
            2 => Some(TxStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transfer lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum TransferStatus {
    Pending = 0,
    Approved = 1,
    Canceled = 2,
    Failed = 3,
}

impl TransferStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransferStatus::Pending),
            1 => Some(TransferStatus::Approved),
            2 => Some(TransferStatus::Canceled),
            3 => Some(TransferStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Canceled => "canceled",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a transfer's wallet effects apply in the creating commit
/// (`Direct`) or only after a later explicit approval (`Pending`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    #[default]
    Direct,
    Pending,
}

/// Transfer method; infers the default balance-kind route when the caller
/// does not override it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    Deposit,
    Withdrawal,
    Transfer,
    Purchase,
    Refund,
    Adjustment,
    BonusAward,
    BonusConvert,
    BonusForfeit,
}

impl TransferMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMethod::Deposit => "deposit",
            TransferMethod::Withdrawal => "withdrawal",
            TransferMethod::Transfer => "transfer",
            TransferMethod::Purchase => "purchase",
            TransferMethod::Refund => "refund",
            TransferMethod::Adjustment => "adjustment",
            TransferMethod::BonusAward => "bonus_award",
            TransferMethod::BonusConvert => "bonus_convert",
            TransferMethod::BonusForfeit => "bonus_forfeit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransferMethod::Deposit),
            "withdrawal" => Some(TransferMethod::Withdrawal),
            "transfer" => Some(TransferMethod::Transfer),
            "purchase" => Some(TransferMethod::Purchase),
            "refund" => Some(TransferMethod::Refund),
            "adjustment" => Some(TransferMethod::Adjustment),
            "bonus_award" => Some(TransferMethod::BonusAward),
            "bonus_convert" => Some(TransferMethod::BonusConvert),
            "bonus_forfeit" => Some(TransferMethod::BonusForfeit),
            _ => None,
        }
    }

    /// Default (from, to) balance route for this method.
    ///
    /// Bonus operations move value between the real and bonus fields;
    /// everything else is real-to-real unless the caller overrides.
    pub fn default_route(&self) -> (BalanceKind, BalanceKind) {
        match self {
            TransferMethod::BonusAward => (BalanceKind::Real, BalanceKind::Bonus),
            TransferMethod::BonusConvert => (BalanceKind::Bonus, BalanceKind::Real),
            TransferMethod::BonusForfeit => (BalanceKind::Bonus, BalanceKind::Real),
            _ => (BalanceKind::Real, BalanceKind::Real),
        }
    }
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entity kind a transaction's polymorphic object pointer refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectModel {
    Transfer,
    Bonus,
    Bet,
    Purchase,
    Deposit,
    Withdrawal,
    Adjustment,
}

impl ObjectModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectModel::Transfer => "transfer",
            ObjectModel::Bonus => "bonus",
            ObjectModel::Bet => "bet",
            ObjectModel::Purchase => "purchase",
            ObjectModel::Deposit => "deposit",
            ObjectModel::Withdrawal => "withdrawal",
            ObjectModel::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "transfer" => Some(ObjectModel::Transfer),
            "bonus" => Some(ObjectModel::Bonus),
            "bet" => Some(ObjectModel::Bet),
            "purchase" => Some(ObjectModel::Purchase),
            "deposit" => Some(ObjectModel::Deposit),
            "withdrawal" => Some(ObjectModel::Withdrawal),
            "adjustment" => Some(ObjectModel::Adjustment),
            _ => None,
        }
    }
}

/// Method-family specific transfer details.
///
/// Replaces the source system's open `meta` bag with a tagged union per
/// method family; `Other` keeps a flattened extension map for genuinely
/// unknown fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TransferDetails {
    Card {
        scheme: String,
        last4: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issuer_country: Option<String>,
    },
    Bank {
        bank_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account_last4: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reference: Option<String>,
    },
    Crypto {
        network: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx_hash: Option<String>,
    },
    MobileMoney {
        provider: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msisdn_last4: Option<String>,
    },
    BonusOp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        campaign_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bonus_id: Option<String>,
    },
    Other {
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

/// Tenant used when the caller does not scope the call
pub const DEFAULT_TENANT: &str = "default";

/// Request payload for a user-to-user (or same-user) transfer.
///
/// Amounts are positive integers in minor units; `fee_amount` is deducted
/// from the credit leg (`net = amount - fee_amount`).
#[derive(Debug, Clone)]
pub struct CreateTransferParams {
    pub from_user_id: i64,
    pub to_user_id: i64,
    /// Gross amount moved out of the `from` wallet
    pub amount: i64,
    pub currency: String,
    pub tenant_id: Option<String>,
    pub fee_amount: i64,
    pub method: TransferMethod,
    pub approval_mode: ApprovalMode,
    /// Overrides the route inferred from `method`
    pub from_balance: Option<BalanceKind>,
    pub to_balance: Option<BalanceKind>,
    /// Polymorphic pointer to the causing entity; defaults to the transfer itself
    pub object_id: Option<String>,
    pub object_model: Option<ObjectModel>,
    /// Caller-supplied idempotency key, deduplicated by unique index
    pub external_ref: Option<String>,
    pub description: Option<String>,
    pub details: Option<TransferDetails>,
}

impl CreateTransferParams {
    pub fn new(from_user_id: i64, to_user_id: i64, amount: i64, currency: &str) -> Self {
        Self {
            from_user_id,
            to_user_id,
            amount,
            currency: currency.to_string(),
            tenant_id: None,
            fee_amount: 0,
            method: TransferMethod::Transfer,
            approval_mode: ApprovalMode::Direct,
            from_balance: None,
            to_balance: None,
            object_id: None,
            object_model: None,
            external_ref: None,
            description: None,
            details: None,
        }
    }

    /// Resolved (from, to) balance route: explicit override wins over the
    /// method default
    pub fn route(&self) -> (BalanceKind, BalanceKind) {
        let (from, to) = self.method.default_route();
        (
            self.from_balance.unwrap_or(from),
            self.to_balance.unwrap_or(to),
        )
    }

    pub fn tenant(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(DEFAULT_TENANT)
    }
}

/// Request payload for a single (non-transfer) ledger entry
#[derive(Debug, Clone)]
pub struct CreateTransactionParams {
    pub user_id: i64,
    /// Gross amount of the event; the recorded credit leg is net of fee
    pub amount: i64,
    pub currency: String,
    pub charge: Charge,
    pub tenant_id: Option<String>,
    pub balance: BalanceKind,
    pub fee_amount: i64,
    pub status: TxStatus,
    pub object_id: Option<String>,
    pub object_model: Option<ObjectModel>,
    pub external_ref: Option<String>,
    pub description: Option<String>,
    /// Set by the transfer orchestrator on double-entry legs
    pub transfer_id: Option<TransferId>,
}

impl CreateTransactionParams {
    pub fn new(user_id: i64, amount: i64, currency: &str, charge: Charge) -> Self {
        Self {
            user_id,
            amount,
            currency: currency.to_string(),
            charge,
            tenant_id: None,
            balance: BalanceKind::Real,
            fee_amount: 0,
            status: TxStatus::Completed,
            object_id: None,
            object_model: None,
            external_ref: None,
            description: None,
            transfer_id: None,
        }
    }

    pub fn tenant(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(DEFAULT_TENANT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_kind_roundtrip() {
        for kind in [BalanceKind::Real, BalanceKind::Bonus, BalanceKind::Locked] {
            assert_eq!(BalanceKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(BalanceKind::from_id(0), None);
        assert_eq!(BalanceKind::from_id(4), None);
    }

    #[test]
    fn test_transfer_status_terminal() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(TransferStatus::Approved.is_terminal());
        assert!(TransferStatus::Canceled.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
    }

    #[test]
    fn test_method_default_routes() {
        assert_eq!(
            TransferMethod::BonusAward.default_route(),
            (BalanceKind::Real, BalanceKind::Bonus)
        );
        assert_eq!(
            TransferMethod::BonusConvert.default_route(),
            (BalanceKind::Bonus, BalanceKind::Real)
        );
        assert_eq!(
            TransferMethod::Transfer.default_route(),
            (BalanceKind::Real, BalanceKind::Real)
        );
    }

    #[test]
    fn test_route_override_wins() {
        let mut params = CreateTransferParams::new(1, 2, 1000, "EUR");
        params.method = TransferMethod::BonusAward;
        params.from_balance = Some(BalanceKind::Locked);
        assert_eq!(params.route(), (BalanceKind::Locked, BalanceKind::Bonus));
    }

    #[test]
    fn test_tenant_default() {
        let params = CreateTransferParams::new(1, 2, 1000, "EUR");
        assert_eq!(params.tenant(), "default");
        let mut scoped = params.clone();
        scoped.tenant_id = Some("brand-a".to_string());
        assert_eq!(scoped.tenant(), "brand-a");
    }

    #[test]
    fn test_transfer_details_tagged_serde() {
        let details = TransferDetails::Card {
            scheme: "visa".to_string(),
            last4: "4242".to_string(),
            issuer_country: None,
        };
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["family"], "card");
        assert_eq!(json["last4"], "4242");
        assert!(json.get("issuer_country").is_none());

        let parsed: TransferDetails = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, details);
    }

    #[test]
    fn test_transfer_details_other_flattens_unknown_fields() {
        let json = serde_json::json!({
            "family": "other",
            "gateway": "legacy-psp",
            "attempt": 2
        });
        let parsed: TransferDetails = serde_json::from_value(json.clone()).unwrap();
        match &parsed {
            TransferDetails::Other { extra } => {
                assert_eq!(extra["gateway"], "legacy-psp");
                assert_eq!(extra["attempt"], 2);
            }
            other => panic!("expected Other, got {:?}", other),
        }
        assert_eq!(serde_json::to_value(&parsed).unwrap(), json);
    }

    #[test]
    fn test_id_parse_roundtrip() {
        let id = TransferId::new();
        let parsed: TransferId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-ulid".parse::<TransferId>().is_err());
    }
}
