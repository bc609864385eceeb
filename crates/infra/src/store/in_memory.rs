use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};

use wallet_core::{AccountId, AggregateRoot, ExpectedVersion, TransactionId};
use wallet_ledger::{Account, AccountSnapshot, Transaction, TransactionSnapshot};

use super::{HistoryQuery, IsolationLevel, LedgerStore, StoreError, StoreResult, UnitOfWork};
use crate::idempotency::IdempotencyRecord;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: HashMap<AccountId, AccountSnapshot>,
    transactions: HashMap<TransactionId, TransactionSnapshot>,
    transaction_order: Vec<TransactionId>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A unit of work holds the store lock from `begin`
/// until it commits or is dropped, so units are trivially serializable
/// whatever isolation level is requested. Writes go to a private copy that
/// replaces the shared state on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    injected_conflicts: Arc<AtomicU32>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with [`StoreError::TransientConflict`].
    pub fn inject_transient_conflicts(&self, n: u32) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Uow = InMemoryUnitOfWork;

    async fn begin(&self, _isolation: IsolationLevel) -> StoreResult<Self::Uow> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryUnitOfWork {
            guard,
            working,
            store: self.clone(),
        })
    }
}

/// Unit of work over [`InMemoryLedgerStore`].
pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
    store: InMemoryLedgerStore,
}

impl core::fmt::Debug for InMemoryUnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryUnitOfWork")
            .field("accounts", &self.working.accounts.len())
            .field("transactions", &self.working.transactions.len())
            .finish()
    }
}

fn decode<T>(result: wallet_core::DomainResult<T>) -> StoreResult<T> {
    result.map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait::async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn load_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        self.working
            .accounts
            .get(&id)
            .cloned()
            .map(|s| decode(Account::restore(s)))
            .transpose()
    }

    async fn insert_account(&mut self, account: &Account) -> StoreResult<()> {
        let id = account.id_typed();
        if self.working.accounts.contains_key(&id) {
            return Err(StoreError::Backend(format!("account {id} already exists")));
        }
        self.working.accounts.insert(id, account.snapshot());
        Ok(())
    }

    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        let id = account.id_typed();
        let stored = self
            .working
            .accounts
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))?;

        ExpectedVersion::Exact(account.version())
            .check(stored.version)
            .map_err(|e| StoreError::stale(format_args!("account {id}"), e))?;

        let mut snapshot = account.snapshot();
        snapshot.version = account.version() + 1;
        self.working.accounts.insert(id, snapshot);
        Ok(())
    }

    async fn load_transaction(&mut self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        self.working
            .transactions
            .get(&id)
            .cloned()
            .map(|s| decode(Transaction::restore(s)))
            .transpose()
    }

    async fn find_transaction_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<Transaction>> {
        self.working
            .transactions
            .values()
            .find(|s| s.idempotency_key == key)
            .cloned()
            .map(|s| decode(Transaction::restore(s)))
            .transpose()
    }

    async fn save_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        let id = transaction.id_typed();
        let snapshot = transaction.snapshot();

        if let Some(existing) = self.working.transactions.get_mut(&id) {
            existing.status = snapshot.status;
            existing.completed_at = snapshot.completed_at;
            existing.audit = snapshot.audit;
            return Ok(());
        }

        let duplicate = self
            .working
            .transactions
            .values()
            .any(|s| s.idempotency_key == snapshot.idempotency_key);
        if duplicate {
            return Err(StoreError::TransientConflict(format!(
                "transaction with idempotency key '{}' already exists",
                snapshot.idempotency_key
            )));
        }

        self.working.transaction_order.push(id);
        self.working.transactions.insert(id, snapshot);
        Ok(())
    }

    async fn list_transactions(&mut self) -> StoreResult<Vec<Transaction>> {
        let mut out = Vec::with_capacity(self.working.transaction_order.len());
        for id in &self.working.transaction_order {
            if let Some(snapshot) = self.working.transactions.get(id) {
                out.push(decode(Transaction::restore(snapshot.clone()))?);
            }
        }
        Ok(out)
    }

    async fn transactions_for_account(
        &mut self,
        query: &HistoryQuery,
    ) -> StoreResult<Vec<Transaction>> {
        let mut matching: Vec<&TransactionSnapshot> = self
            .working
            .transaction_order
            .iter()
            .rev()
            .filter_map(|id| self.working.transactions.get(id))
            .filter(|s| s.entries.iter().any(|e| e.account_id() == query.account_id))
            .filter(|s| query.covers(s.audit.created_at))
            .collect();
        // Stable, so equal timestamps keep newest-inserted first.
        matching.sort_by(|a, b| b.audit.created_at.cmp(&a.audit.created_at));

        let skip = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        matching
            .into_iter()
            .skip(skip)
            .take(query.page_size as usize)
            .map(|s| decode(Transaction::restore(s.clone())))
            .collect()
    }

    async fn load_idempotency_record(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        Ok(self.working.idempotency.get(key).cloned())
    }

    async fn put_idempotency_record(&mut self, record: &IdempotencyRecord) -> StoreResult<()> {
        self.working
            .idempotency
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn delete_idempotency_record(&mut self, key: &str) -> StoreResult<()> {
        self.working.idempotency.remove(key);
        Ok(())
    }

    async fn commit(self) -> StoreResult<()> {
        let Self {
            mut guard,
            working,
            store,
        } = self;

        if store.take_injected_conflict() {
            tracing::debug!("discarding unit of work: injected conflict");
            return Err(StoreError::TransientConflict(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        Ok(())
    }
}
