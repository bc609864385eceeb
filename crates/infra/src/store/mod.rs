//! Persistence gateway for the ledger.
//!
//! A [`LedgerStore`] hands out [`UnitOfWork`]s: one database transaction at a
//! requested isolation level, with repository operations for accounts,
//! transactions and idempotency records. Nothing is visible to other units
//! of work until [`UnitOfWork::commit`] succeeds; dropping or rolling back a
//! unit discards every write made through it.
//!
//! ## Error mapping
//!
//! | Cause | `StoreError` |
//! |-------|--------------|
//! | serialization failure / deadlock (SQLSTATE `40001`, `40P01`) | `TransientConflict` |
//! | unique violation racing on the same key (`23505`) | `TransientConflict` |
//! | optimistic version mismatch on an account | `TransientConflict` |
//! | row required by the operation is absent | `NotFound` |
//! | stored data cannot be decoded into domain types | `Serialization` |
//! | anything else (pool closed, network, ...) | `Backend` |

pub mod in_memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use thiserror::Error;

use wallet_core::{AccountId, DomainError, TransactionId};
use wallet_ledger::{Account, Transaction};

use crate::idempotency::IdempotencyRecord;

pub use in_memory::{InMemoryLedgerStore, InMemoryUnitOfWork};
pub use postgres::{PgUnitOfWork, PostgresLedgerStore};

/// Transaction isolation requested when a unit of work begins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store aborted the unit of work because of a concurrent writer.
    /// Safe to retry the whole command.
    #[error("transient conflict: {0}")]
    TransientConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("stored data could not be decoded: {0}")]
    Serialization(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::TransientConflict(_))
    }

    /// A failed `ExpectedVersion::check` on `what`. Retrying with a fresh
    /// load resolves it.
    pub(crate) fn stale(what: impl core::fmt::Display, err: DomainError) -> Self {
        StoreError::TransientConflict(format!("{what}: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 200;

/// One page of the transactions that touched an account, newest first.
///
/// `from` and `to` bound the transaction creation time, both inclusive.
/// Pages start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub account_id: AccountId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

impl HistoryQuery {
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            from: None,
            to: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn page(mut self, page: u32, page_size: u32) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    /// Page 0 becomes 1; a page size outside `1..=MAX_PAGE_SIZE` falls back
    /// to [`DEFAULT_PAGE_SIZE`].
    pub fn normalized(&self) -> Self {
        let page_size = if (1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            self.page_size
        } else {
            DEFAULT_PAGE_SIZE
        };
        Self {
            page: self.page.max(1),
            page_size,
            ..self.clone()
        }
    }

    /// Rows to skip, for a normalized query.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    pub fn covers(&self, created_at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| created_at >= from) && self.to.is_none_or(|to| created_at <= to)
    }
}

/// Source of units of work.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    type Uow: UnitOfWork;

    async fn begin(&self, isolation: IsolationLevel) -> StoreResult<Self::Uow>;
}

/// One atomic, isolated unit of work.
///
/// Reads observe this unit's own writes. `commit` and `rollback` consume the
/// unit so it cannot be used afterwards.
#[async_trait::async_trait]
pub trait UnitOfWork: Send {
    async fn load_account(&mut self, id: AccountId) -> StoreResult<Option<Account>>;

    async fn insert_account(&mut self, account: &Account) -> StoreResult<()>;

    /// Persist balance/activity changes.
    ///
    /// The stored version must still equal `account.version()` (the version it
    /// was loaded at); it is bumped by one on success.
    async fn save_account(&mut self, account: &Account) -> StoreResult<()>;

    async fn load_transaction(&mut self, id: TransactionId) -> StoreResult<Option<Transaction>>;

    async fn find_transaction_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<Transaction>>;

    /// Insert a new transaction with its entries, or update the status of an
    /// existing one (entries are never rewritten).
    async fn save_transaction(&mut self, transaction: &Transaction) -> StoreResult<()>;

    /// All transactions in creation order.
    async fn list_transactions(&mut self) -> StoreResult<Vec<Transaction>>;

    /// Transactions with an entry on `query.account_id`, newest first.
    /// Callers pass a [`HistoryQuery::normalized`] query.
    async fn transactions_for_account(
        &mut self,
        query: &HistoryQuery,
    ) -> StoreResult<Vec<Transaction>>;

    async fn load_idempotency_record(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>>;

    /// Insert or replace the record stored under `record.key`.
    async fn put_idempotency_record(&mut self, record: &IdempotencyRecord) -> StoreResult<()>;

    async fn delete_idempotency_record(&mut self, key: &str) -> StoreResult<()>;

    async fn commit(self) -> StoreResult<()>;

    async fn rollback(self) -> StoreResult<()>;
}


#[async_trait::async_trait]
impl<S> LedgerStore for std::sync::Arc<S>
where
    S: LedgerStore + ?Sized,
{
    type Uow = S::Uow;

    async fn begin(&self, isolation: IsolationLevel) -> StoreResult<Self::Uow> {
        (**self).begin(isolation).await
    }
}
