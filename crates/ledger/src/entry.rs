use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wallet_core::{AccountId, DomainError, Entity, EntryId, TransactionId};

use crate::money::Money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn flipped(self) -> Self {
        match self {
            EntryType::Debit => EntryType::Credit,
            EntryType::Credit => EntryType::Debit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Debit => "debit",
            EntryType::Credit => "credit",
        }
    }
}

impl core::str::FromStr for EntryType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(EntryType::Debit),
            "credit" => Ok(EntryType::Credit),
            other => Err(DomainError::invalid_argument(format!(
                "unknown entry type '{other}'"
            ))),
        }
    }
}

/// One side of a double-entry posting.
///
/// Immutable once built: there are no setters, and stores only ever insert
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    id: EntryId,
    account_id: AccountId,
    transaction_id: TransactionId,
    entry_type: EntryType,
    amount: Money,
    /// Account balance right after this entry was applied.
    balance_after: Decimal,
    created_at: DateTime<Utc>,
    description: String,
}

impl LedgerEntry {
    pub fn new(
        account_id: AccountId,
        transaction_id: TransactionId,
        entry_type: EntryType,
        amount: Money,
        balance_after: Decimal,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::restore(
            EntryId::new(),
            account_id,
            transaction_id,
            entry_type,
            amount,
            balance_after,
            description,
            created_at,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: EntryId,
        account_id: AccountId,
        transaction_id: TransactionId,
        entry_type: EntryType,
        amount: Money,
        balance_after: Decimal,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            account_id,
            transaction_id,
            entry_type,
            amount,
            balance_after,
            created_at,
            description: description.into(),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn is_debit(&self) -> bool {
        self.entry_type == EntryType::Debit
    }

    pub fn amount(&self) -> &Money {
        &self.amount
    }

    pub fn balance_after(&self) -> Decimal {
        self.balance_after
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl Entity for LedgerEntry {
    type Id = EntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
