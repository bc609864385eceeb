//! Transfer orchestration (pure domain service).
//!
//! Builds a balanced two-entry transaction and mutates both account balances
//! in memory. Nothing here performs IO: the caller persists the accounts and
//! the transaction in one atomic unit and publishes the returned event only
//! after that unit commits.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use wallet_core::{DomainError, DomainResult};

use crate::account::Account;
use crate::entry::{EntryType, LedgerEntry};
use crate::money::Money;
use crate::transaction::{LedgerEvent, Transaction, TransactionStatus};

/// Globally unique, human-readable transaction reference (`TXN-<32 hex>`).
pub fn generate_reference() -> String {
    format!("TXN-{}", Uuid::now_v7().simple())
}

/// Completed transaction plus the event raised by its completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub transaction: Transaction,
    pub event: LedgerEvent,
}

#[derive(Debug, Default, Copy, Clone)]
pub struct TransferService;

impl TransferService {
    pub fn new() -> Self {
        Self
    }

    /// Move `amount` from `from` to `to`.
    ///
    /// Preconditions are checked in a fixed order before anything is mutated:
    /// arguments, account activity, currency, then funds.
    pub fn transfer(
        &self,
        from: &mut Account,
        to: &mut Account,
        amount: &Money,
        description: &str,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<TransferOutcome> {
        if from.id_typed() == to.id_typed() {
            return Err(DomainError::invalid_argument(
                "source and destination accounts must differ",
            ));
        }
        if amount.is_zero() {
            return Err(DomainError::invalid_argument("transfer amount must be positive"));
        }
        if idempotency_key.trim().is_empty() {
            return Err(DomainError::invalid_argument("idempotency key is required"));
        }

        for account in [&*from, &*to] {
            if !account.is_active() {
                return Err(DomainError::AccountInactive(account.id_typed().to_string()));
            }
        }

        for account in [&*from, &*to] {
            if account.currency() != amount.currency() {
                return Err(DomainError::currency_mismatch(
                    account.currency().code(),
                    amount.currency().code(),
                ));
            }
        }

        if from.balance_amount() < amount.amount() {
            return Err(DomainError::InsufficientBalance {
                available: from.balance_amount(),
                requested: amount.amount(),
            });
        }

        let mut transaction =
            Transaction::new(generate_reference(), description, idempotency_key, now)?;

        let credit = LedgerEntry::new(
            from.id_typed(),
            transaction.id_typed(),
            EntryType::Credit,
            amount.clone(),
            from.balance_amount() - amount.amount(),
            format!("Transfer to {}", to.name()),
            now,
        );
        let debit = LedgerEntry::new(
            to.id_typed(),
            transaction.id_typed(),
            EntryType::Debit,
            amount.clone(),
            to.balance_amount() + amount.amount(),
            format!("Transfer from {}", from.name()),
            now,
        );

        from.apply_credit(amount, now)?;
        to.apply_debit(amount, now)?;

        transaction.add_entry(credit)?;
        transaction.add_entry(debit)?;
        let event = transaction.complete(now)?;

        Ok(TransferOutcome { transaction, event })
    }

    /// Reverse a completed two-party transfer.
    ///
    /// `from` and `to` are the accounts of the *original* transfer. Money
    /// flows back from `to` to `from` with flipped entry types. Nothing is
    /// mutated unless the whole reversal succeeds; on success `original` is
    /// marked `Reversed`.
    pub fn reverse(
        &self,
        original: &mut Transaction,
        from: &mut Account,
        to: &mut Account,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<TransferOutcome> {
        if original.status() != TransactionStatus::Completed {
            return Err(DomainError::invalid_transition(format!(
                "only completed transactions can be reversed ({} is {})",
                original.reference(),
                original.status().as_str()
            )));
        }
        for entry in original.entries() {
            let expected = match entry.entry_type() {
                EntryType::Credit => from.id_typed(),
                EntryType::Debit => to.id_typed(),
            };
            if entry.account_id() != expected {
                return Err(DomainError::invalid_argument(format!(
                    "account {} does not match entry of {}",
                    entry.account_id(),
                    original.reference()
                )));
            }
        }

        let mut reversal = original.create_reversal(generate_reference(), idempotency_key, now)?;
        let reversal_id = reversal.id_typed();
        let mut from_next = from.clone();
        let mut to_next = to.clone();

        for entry in original.entries() {
            let flipped = entry.entry_type().flipped();
            let account = if entry.account_id() == from_next.id_typed() {
                &mut from_next
            } else {
                &mut to_next
            };

            match flipped {
                EntryType::Debit => account.apply_debit(entry.amount(), now)?,
                EntryType::Credit => account.apply_credit(entry.amount(), now)?,
            }

            reversal.add_entry(LedgerEntry::new(
                account.id_typed(),
                reversal_id,
                flipped,
                entry.amount().clone(),
                account.balance_amount(),
                format!("Reversal of {}", original.reference()),
                now,
            ))?;
        }

        let event = reversal.complete(now)?;
        original.mark_reversed(now)?;
        *from = from_next;
        *to = to_next;

        Ok(TransferOutcome {
            transaction: reversal,
            event,
        })
    }
}
