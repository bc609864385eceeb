//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (validation, ledger
/// invariants, state transitions). Storage and transport failures belong to the
/// infrastructure layer, which wraps this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input to a constructor or operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Two monetary values (or a value and an account) disagree on currency.
    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    /// Amount is negative or carries more fractional digits than the currency allows.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The account is deactivated and cannot be mutated.
    #[error("account is not active: {0}")]
    AccountInactive(String),

    /// A credit (or a subtraction) would drive a balance below zero.
    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    /// The transaction is not in `Pending` status.
    #[error("transaction is not pending")]
    TransactionNotPending,

    /// A ledger entry does not belong to the transaction it is added to.
    #[error("ledger entry belongs to a different transaction")]
    EntryTransactionMismatch,

    /// A transaction needs at least two entries before it can complete.
    #[error("transaction has {0} entries, at least 2 are required")]
    TooFewEntries(usize),

    /// Debits and credits do not sum to the same amount.
    #[error("double-entry invariant violated: debits {debits} != credits {credits}")]
    UnbalancedEntries { debits: Decimal, credits: Decimal },

    /// The currency code is not in the registry.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// A status transition that the transaction lifecycle does not allow.
    #[error("invalid status transition: {0}")]
    InvalidStatusTransition(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Optimistic concurrency check failed on an aggregate.
    #[error("version conflict: {0}")]
    VersionConflict(String),
}

impl DomainError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn currency_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::CurrencyMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidStatusTransition(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::VersionConflict(msg.into())
    }

    /// Stable, machine-readable kind name (used by callers mapping to responses).
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::InvalidArgument(_) => "invalid_argument",
            DomainError::CurrencyMismatch { .. } => "currency_mismatch",
            DomainError::InvalidAmount(_) => "invalid_amount",
            DomainError::AccountInactive(_) => "account_inactive",
            DomainError::InsufficientBalance { .. } => "insufficient_balance",
            DomainError::TransactionNotPending => "transaction_not_pending",
            DomainError::EntryTransactionMismatch => "entry_transaction_mismatch",
            DomainError::TooFewEntries(_) => "too_few_entries",
            DomainError::UnbalancedEntries { .. } => "unbalanced_entries",
            DomainError::UnsupportedCurrency(_) => "unsupported_currency",
            DomainError::InvalidStatusTransition(_) => "invalid_status_transition",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::VersionConflict(_) => "version_conflict",
        }
    }
}
