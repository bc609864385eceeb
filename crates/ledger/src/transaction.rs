use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wallet_core::{AccountId, AuditInfo, DomainError, DomainResult, TransactionId};
use wallet_events::Event;

use crate::entry::{EntryType, LedgerEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
        }
    }
}

impl core::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "reversed" => Ok(TransactionStatus::Reversed),
            other => Err(DomainError::invalid_argument(format!(
                "unknown transaction status '{other}'"
            ))),
        }
    }
}

/// One account movement as carried on a published event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub balance_after: Decimal,
}

/// Event: a transaction reached `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyTransferred {
    pub transaction_id: TransactionId,
    pub reference: String,
    pub description: String,
    pub idempotency_key: String,
    pub amount: Decimal,
    pub currency: String,
    pub postings: Vec<Posting>,
    pub reversal_of: Option<TransactionId>,
    pub occurred_at: DateTime<Utc>,
}

impl MoneyTransferred {
    /// Account whose balance was credited (funds left it).
    pub fn source_account(&self) -> Option<AccountId> {
        self.postings
            .iter()
            .find(|p| p.entry_type == EntryType::Credit)
            .map(|p| p.account_id)
    }

    /// Account whose balance was debited (funds arrived).
    pub fn destination_account(&self) -> Option<AccountId> {
        self.postings
            .iter()
            .find(|p| p.entry_type == EntryType::Debit)
            .map(|p| p.account_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    MoneyTransferred(MoneyTransferred),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::MoneyTransferred(_) => "ledger.transaction.money_transferred",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::MoneyTransferred(e) => e.occurred_at,
        }
    }
}

/// Persisted form of a transaction and its entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub id: TransactionId,
    pub reference: String,
    pub description: String,
    pub idempotency_key: String,
    pub status: TransactionStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub reversal_of: Option<TransactionId>,
    pub entries: Vec<LedgerEntry>,
    pub audit: AuditInfo,
}

/// Aggregate root: a set of balanced ledger entries.
///
/// Status only moves forward: `Pending -> Completed | Failed`, then
/// `Completed -> Reversed`. Entries are immutable once posted, so stores
/// update a transaction's status without a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    reference: String,
    description: String,
    idempotency_key: String,
    status: TransactionStatus,
    completed_at: Option<DateTime<Utc>>,
    reversal_of: Option<TransactionId>,
    entries: Vec<LedgerEntry>,
    audit: AuditInfo,
}

impl Transaction {
    pub fn new(
        reference: impl Into<String>,
        description: impl Into<String>,
        idempotency_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let reference = reference.into();
        let idempotency_key = idempotency_key.into();

        if reference.trim().is_empty() {
            return Err(DomainError::invalid_argument("reference cannot be empty"));
        }
        if idempotency_key.trim().is_empty() {
            return Err(DomainError::invalid_argument("idempotency key cannot be empty"));
        }

        Ok(Self {
            id: TransactionId::new(),
            reference,
            description: description.into(),
            idempotency_key,
            status: TransactionStatus::Pending,
            completed_at: None,
            reversal_of: None,
            entries: Vec::new(),
            audit: AuditInfo::created(now),
        })
    }

    pub fn restore(snapshot: TransactionSnapshot) -> DomainResult<Self> {
        if snapshot
            .entries
            .iter()
            .any(|e| e.transaction_id() != snapshot.id)
        {
            return Err(DomainError::EntryTransactionMismatch);
        }

        Ok(Self {
            id: snapshot.id,
            reference: snapshot.reference,
            description: snapshot.description,
            idempotency_key: snapshot.idempotency_key,
            status: snapshot.status,
            completed_at: snapshot.completed_at,
            reversal_of: snapshot.reversal_of,
            entries: snapshot.entries,
            audit: snapshot.audit,
        })
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        TransactionSnapshot {
            id: self.id,
            reference: self.reference.clone(),
            description: self.description.clone(),
            idempotency_key: self.idempotency_key.clone(),
            status: self.status,
            completed_at: self.completed_at,
            reversal_of: self.reversal_of,
            entries: self.entries.clone(),
            audit: self.audit,
        }
    }

    pub fn id_typed(&self) -> TransactionId {
        self.id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn reversal_of(&self) -> Option<TransactionId> {
        self.reversal_of
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn audit(&self) -> &AuditInfo {
        &self.audit
    }

    pub fn total_debits(&self) -> Decimal {
        self.sum_of(EntryType::Debit)
    }

    pub fn total_credits(&self) -> Decimal {
        self.sum_of(EntryType::Credit)
    }

    fn sum_of(&self, entry_type: EntryType) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.entry_type() == entry_type)
            .map(|e| e.amount().amount())
            .sum()
    }

    pub fn add_entry(&mut self, entry: LedgerEntry) -> DomainResult<()> {
        if self.status != TransactionStatus::Pending {
            return Err(DomainError::TransactionNotPending);
        }
        if entry.transaction_id() != self.id {
            return Err(DomainError::EntryTransactionMismatch);
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Verify the double-entry invariant and move to `Completed`.
    ///
    /// The returned event is the only record of the transition; callers
    /// publish it once the transaction has been persisted.
    pub fn complete(&mut self, now: DateTime<Utc>) -> DomainResult<LedgerEvent> {
        if self.status != TransactionStatus::Pending {
            return Err(DomainError::TransactionNotPending);
        }
        if self.entries.len() < 2 {
            return Err(DomainError::TooFewEntries(self.entries.len()));
        }

        let currency = self.entries[0].amount().currency().clone();
        if let Some(other) = self
            .entries
            .iter()
            .find(|e| e.amount().currency() != &currency)
        {
            return Err(DomainError::currency_mismatch(
                currency.code(),
                other.amount().currency().code(),
            ));
        }

        let debits = self.total_debits();
        let credits = self.total_credits();
        if debits != credits {
            return Err(DomainError::UnbalancedEntries { debits, credits });
        }

        self.status = TransactionStatus::Completed;
        self.completed_at = Some(now);
        self.audit.touch(now);

        Ok(LedgerEvent::MoneyTransferred(MoneyTransferred {
            transaction_id: self.id,
            reference: self.reference.clone(),
            description: self.description.clone(),
            idempotency_key: self.idempotency_key.clone(),
            amount: debits,
            currency: currency.code().to_string(),
            postings: self
                .entries
                .iter()
                .map(|e| Posting {
                    account_id: e.account_id(),
                    entry_type: e.entry_type(),
                    amount: e.amount().amount(),
                    balance_after: e.balance_after(),
                })
                .collect(),
            reversal_of: self.reversal_of,
            occurred_at: now,
        }))
    }

    pub fn fail(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != TransactionStatus::Pending {
            return Err(DomainError::TransactionNotPending);
        }
        self.status = TransactionStatus::Failed;
        self.audit.touch(now);
        Ok(())
    }

    /// Start a pending reversal of this (completed) transaction.
    ///
    /// The reversal carries no entries yet; it becomes balanced through the
    /// usual `add_entry`/`complete` sequence (see `TransferService::reverse`).
    pub fn create_reversal(
        &self,
        reference: impl Into<String>,
        idempotency_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Transaction> {
        if self.status != TransactionStatus::Completed {
            return Err(DomainError::invalid_transition(format!(
                "only completed transactions can be reversed ({} is {})",
                self.reference,
                self.status.as_str()
            )));
        }

        let mut reversal = Transaction::new(
            reference,
            format!("Reversal of {}", self.reference),
            idempotency_key,
            now,
        )?;
        reversal.reversal_of = Some(self.id);
        Ok(reversal)
    }

    pub fn mark_reversed(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status != TransactionStatus::Completed {
            return Err(DomainError::invalid_transition(format!(
                "{} -> reversed",
                self.status.as_str()
            )));
        }
        self.status = TransactionStatus::Reversed;
        self.audit.touch(now);
        Ok(())
    }
}
