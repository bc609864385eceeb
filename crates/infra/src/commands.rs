//! Financial commands and their receipts.
//!
//! A receipt is what gets cached against the idempotency key, so a replay
//! returns exactly what the first execution returned.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wallet_core::{AccountId, TransactionId, UserId};
use wallet_ledger::{EntryType, Transaction, TransactionStatus};

use crate::idempotency::IdempotentCommand;

/// Move funds between two user accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCommand {
    pub user_id: Option<UserId>,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
}

/// Fund a user account from the currency's reserve account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositCommand {
    pub user_id: Option<UserId>,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
}

/// Pay out of a user account into the currency's fee-income account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawCommand {
    pub user_id: Option<UserId>,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
}

impl IdempotentCommand for TransferCommand {
    const KIND: &'static str = "ledger.transfer";

    fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    fn canonical(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(Self {
            amount: self.amount.normalize(),
            ..self.clone()
        })
    }
}

impl IdempotentCommand for DepositCommand {
    const KIND: &'static str = "ledger.deposit";

    fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    fn canonical(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(Self {
            amount: self.amount.normalize(),
            ..self.clone()
        })
    }
}

impl IdempotentCommand for WithdrawCommand {
    const KIND: &'static str = "ledger.withdraw";

    fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    fn canonical(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(Self {
            amount: self.amount.normalize(),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptEntry {
    pub account_id: AccountId,
    pub entry_type: EntryType,
    pub amount: Decimal,
    pub currency: String,
    pub balance_after: Decimal,
}

/// Result of a completed money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transaction_id: TransactionId,
    pub reference: String,
    pub description: String,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub currency: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub entries: Vec<ReceiptEntry>,
}

impl TransferReceipt {
    pub fn from_transaction(transaction: &Transaction) -> Self {
        let entries: Vec<ReceiptEntry> = transaction
            .entries()
            .iter()
            .map(|e| ReceiptEntry {
                account_id: e.account_id(),
                entry_type: e.entry_type(),
                amount: e.amount().amount(),
                currency: e.amount().currency().code().to_string(),
                balance_after: e.balance_after(),
            })
            .collect();

        Self {
            transaction_id: transaction.id_typed(),
            reference: transaction.reference().to_string(),
            description: transaction.description().to_string(),
            status: transaction.status(),
            amount: transaction.total_debits(),
            currency: entries
                .first()
                .map(|e| e.currency.clone())
                .unwrap_or_default(),
            completed_at: transaction.completed_at(),
            entries,
        }
    }

    /// Entry posted against `account_id`, if any.
    pub fn entry_for(&self, account_id: AccountId) -> Option<&ReceiptEntry> {
        self.entries.iter().find(|e| e.account_id == account_id)
    }
}

/// What a command execution returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub receipt: TransferReceipt,
    /// `true` when served from the idempotency cache.
    pub replayed: bool,
}
