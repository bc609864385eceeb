//! Wallet ledger (double-entry bookkeeping).
//!
//! Pure domain logic only: no IO, no persistence, no logging. Callers persist
//! the mutated accounts and transactions atomically and publish returned
//! events after commit.

pub mod account;
pub mod currency;
pub mod entry;
pub mod money;
pub mod reconcile;
pub mod transaction;
pub mod transfer;

pub use account::{Account, AccountKind, AccountSnapshot};
pub use currency::{Currency, CurrencyRegistry};
pub use entry::{EntryType, LedgerEntry};
pub use money::Money;
pub use reconcile::{ReconciliationReport, reconcile};
pub use transaction::{
    LedgerEvent, MoneyTransferred, Posting, Transaction, TransactionSnapshot, TransactionStatus,
};
pub use transfer::{TransferOutcome, TransferService, generate_reference};
