//! Postgres-backed ledger store.
//!
//! Every unit of work is one database transaction opened with
//! `SET TRANSACTION ISOLATION LEVEL ...` as its first statement. Balances and
//! amounts are `NUMERIC(19,4)` mapped to `rust_decimal::Decimal`; currencies
//! are stored by code and resolved through the registry on load.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (serialization failure) | `40001` | `TransientConflict` |
//! | Database (deadlock detected) | `40P01` | `TransientConflict` |
//! | Database (unique violation) | `23505` | `TransientConflict` |
//! | Database (other) | Any other | `Backend` |
//! | ColumnDecode / Decode | N/A | `Serialization` |
//! | PoolClosed, Io, other | N/A | `Backend` |

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row};
use tracing::instrument;
use uuid::Uuid;

use wallet_core::{
    AccountId, AggregateRoot, AuditInfo, DomainResult, Entity, EntryId, ExpectedVersion,
    TransactionId, UserId,
};
use wallet_ledger::{
    Account, AccountSnapshot, CurrencyRegistry, LedgerEntry, Money, Transaction,
    TransactionSnapshot,
};

use super::{HistoryQuery, IsolationLevel, LedgerStore, StoreError, StoreResult, UnitOfWork};
use crate::config::Settings;
use crate::idempotency::IdempotencyRecord;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id          UUID PRIMARY KEY,
        user_id     UUID NOT NULL,
        kind        TEXT NOT NULL,
        currency    CHAR(3) NOT NULL,
        balance     NUMERIC(19,4) NOT NULL CHECK (balance >= 0),
        name        TEXT NOT NULL,
        is_active   BOOLEAN NOT NULL,
        version     BIGINT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id               UUID PRIMARY KEY,
        seq              BIGSERIAL,
        reference        TEXT NOT NULL UNIQUE,
        description      TEXT NOT NULL,
        idempotency_key  TEXT NOT NULL UNIQUE,
        status           TEXT NOT NULL,
        completed_at     TIMESTAMPTZ,
        reversal_of      UUID REFERENCES transactions(id),
        created_at       TIMESTAMPTZ NOT NULL,
        updated_at       TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id              UUID PRIMARY KEY,
        seq             BIGSERIAL,
        transaction_id  UUID NOT NULL REFERENCES transactions(id),
        account_id      UUID NOT NULL REFERENCES accounts(id),
        entry_type      TEXT NOT NULL,
        amount          NUMERIC(19,4) NOT NULL CHECK (amount >= 0),
        currency        CHAR(3) NOT NULL,
        balance_after   NUMERIC(19,4) NOT NULL,
        description     TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ledger_entries_account_idx ON ledger_entries (account_id)",
    "CREATE INDEX IF NOT EXISTS ledger_entries_transaction_idx ON ledger_entries (transaction_id)",
    "CREATE INDEX IF NOT EXISTS transactions_created_idx ON transactions (created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS idempotent_requests (
        key           TEXT PRIMARY KEY,
        request_hash  TEXT,
        response      JSONB,
        is_processed  BOOLEAN NOT NULL,
        created_at    TIMESTAMPTZ NOT NULL,
        expires_at    TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Postgres-backed ledger store.
///
/// `Send + Sync`; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from `DATABASE_URL` / `DATABASE_MAX_CONNECTIONS`.
    pub async fn connect(settings: &Settings) -> anyhow::Result<Self> {
        let url = settings.require_database_url()?;

        let pool = PgPoolOptions::new()
            .max_connections(settings.database_max_connections)
            .connect(url)
            .await
            .context("failed to connect to Postgres")?;

        Ok(Self::new(pool))
    }

    /// Create the ledger tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .context("failed to create ledger schema")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Uow = PgUnitOfWork;

    #[instrument(skip(self), fields(isolation = isolation.as_sql()), err)]
    async fn begin(&self, isolation: IsolationLevel) -> StoreResult<Self::Uow> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let statement = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        Ok(PgUnitOfWork { tx })
    }
}

/// One Postgres transaction.
///
/// Dropping it without calling `commit` rolls the transaction back.
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl core::fmt::Debug for PgUnitOfWork {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PgUnitOfWork").finish_non_exhaustive()
    }
}

impl PgUnitOfWork {
    async fn entries_for(
        &mut self,
        transaction_ids: &[Uuid],
    ) -> StoreResult<HashMap<Uuid, Vec<LedgerEntry>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, transaction_id, account_id, entry_type, amount, currency,
                   balance_after, description, created_at
            FROM ledger_entries
            WHERE transaction_id = ANY($1)
            ORDER BY seq ASC
            "#,
        )
        .bind(transaction_ids)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_entries", e))?;

        let mut grouped: HashMap<Uuid, Vec<LedgerEntry>> = HashMap::new();
        for row in rows {
            let entry = EntryRow::from_row(&row).map_err(|e| map_sqlx_error("load_entries", e))?;
            let transaction_id = entry.transaction_id;
            grouped
                .entry(transaction_id)
                .or_default()
                .push(entry.into_entry()?);
        }
        Ok(grouped)
    }

    async fn hydrate(&mut self, rows: Vec<PgRow>) -> StoreResult<Vec<Transaction>> {
        let headers = rows
            .iter()
            .map(TransactionRow::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("load_transaction", e))?;

        let ids: Vec<Uuid> = headers.iter().map(|h| h.id).collect();
        let mut entries = self.entries_for(&ids).await?;

        headers
            .into_iter()
            .map(|h| {
                let own = entries.remove(&h.id).unwrap_or_default();
                h.into_transaction(own)
            })
            .collect()
    }

    async fn fetch_transactions(
        &mut self,
        operation: &str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        self.hydrate(rows).await
    }
}

const TRANSACTION_COLUMNS: &str = "id, reference, description, idempotency_key, status, \
     completed_at, reversal_of, created_at, updated_at";

#[async_trait::async_trait]
impl UnitOfWork for PgUnitOfWork {
    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn load_account(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, kind, currency, balance, name, is_active, version,
                   created_at, updated_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_account", e))?;

        row.map(|r| {
            AccountRow::from_row(&r)
                .map_err(|e| map_sqlx_error("load_account", e))?
                .into_account()
        })
        .transpose()
    }

    #[instrument(skip(self, account), fields(account_id = %account.id_typed()), err)]
    async fn insert_account(&mut self, account: &Account) -> StoreResult<()> {
        let s = account.snapshot();
        sqlx::query(
            r#"
            INSERT INTO accounts
                (id, user_id, kind, currency, balance, name, is_active, version,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(s.user_id.as_uuid())
        .bind(s.kind.as_str())
        .bind(s.currency.code())
        .bind(s.balance)
        .bind(&s.name)
        .bind(s.is_active)
        .bind(to_db_version(s.version)?)
        .bind(s.audit.created_at)
        .bind(s.audit.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Backend(format!("account {} already exists", s.id))
            } else {
                map_sqlx_error("insert_account", e)
            }
        })?;
        Ok(())
    }

    #[instrument(
        skip(self, account),
        fields(account_id = %account.id_typed(), version = account.version()),
        err
    )]
    async fn save_account(&mut self, account: &Account) -> StoreResult<()> {
        let s = account.snapshot();
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $1, is_active = $2, updated_at = $3, version = version + 1
            WHERE id = $4 AND version = $5
            "#,
        )
        .bind(s.balance)
        .bind(s.is_active)
        .bind(s.audit.updated_at)
        .bind(s.id.as_uuid())
        .bind(to_db_version(s.version)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_account", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<i64> = sqlx::query_scalar("SELECT version FROM accounts WHERE id = $1")
            .bind(s.id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_account", e))?;

        match current {
            None => Err(StoreError::NotFound(format!("account {}", s.id))),
            Some(found) => {
                let found = u64::try_from(found).unwrap_or_default();
                ExpectedVersion::Exact(s.version)
                    .check(found)
                    .map_err(|e| StoreError::stale(format_args!("account {}", s.id), e))?;
                Err(StoreError::Backend(format!("account {} was not updated", s.id)))
            }
        }
    }

    #[instrument(skip(self), fields(transaction_id = %id), err)]
    async fn load_transaction(&mut self, id: TransactionId) -> StoreResult<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1");
        let query = sqlx::query(&sql).bind(*id.as_uuid());
        Ok(self
            .fetch_transactions("load_transaction", query)
            .await?
            .into_iter()
            .next())
    }

    #[instrument(skip(self), err)]
    async fn find_transaction_by_idempotency_key(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<Transaction>> {
        let sql =
            format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE idempotency_key = $1");
        let query = sqlx::query(&sql).bind(key.to_string());
        Ok(self
            .fetch_transactions("find_transaction_by_idempotency_key", query)
            .await?
            .into_iter()
            .next())
    }

    #[instrument(
        skip(self, transaction),
        fields(transaction_id = %transaction.id_typed(), status = transaction.status().as_str()),
        err
    )]
    async fn save_transaction(&mut self, transaction: &Transaction) -> StoreResult<()> {
        let s = transaction.snapshot();

        let updated = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $1, completed_at = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(s.status.as_str())
        .bind(s.completed_at)
        .bind(s.audit.updated_at)
        .bind(s.id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_transaction", e))?;

        if updated.rows_affected() == 1 {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, reference, description, idempotency_key, status, completed_at,
                 reversal_of, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(&s.reference)
        .bind(&s.description)
        .bind(&s.idempotency_key)
        .bind(s.status.as_str())
        .bind(s.completed_at)
        .bind(s.reversal_of.map(|r| *r.as_uuid()))
        .bind(s.audit.created_at)
        .bind(s.audit.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_transaction", e))?;

        for entry in &s.entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries
                    (id, transaction_id, account_id, entry_type, amount, currency,
                     balance_after, description, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(entry.id().as_uuid())
            .bind(s.id.as_uuid())
            .bind(entry.account_id().as_uuid())
            .bind(entry.entry_type().as_str())
            .bind(entry.amount().amount())
            .bind(entry.amount().currency().code())
            .bind(entry.balance_after())
            .bind(entry.description())
            .bind(entry.created_at())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_transaction", e))?;
        }

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_transactions(&mut self) -> StoreResult<Vec<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY seq ASC");
        let query = sqlx::query(&sql);
        self.fetch_transactions("list_transactions", query).await
    }

    #[instrument(
        skip(self, query),
        fields(account_id = %query.account_id, page = query.page, page_size = query.page_size),
        err
    )]
    async fn transactions_for_account(
        &mut self,
        query: &HistoryQuery,
    ) -> StoreResult<Vec<Transaction>> {
        let offset = i64::try_from(query.offset())
            .map_err(|_| StoreError::Backend(format!("page {} is out of range", query.page)))?;
        let sql = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS} FROM transactions t
            WHERE EXISTS (
                SELECT 1 FROM ledger_entries e
                WHERE e.transaction_id = t.id AND e.account_id = $1
            )
              AND ($2::timestamptz IS NULL OR t.created_at >= $2)
              AND ($3::timestamptz IS NULL OR t.created_at <= $3)
            ORDER BY t.created_at DESC, t.seq DESC
            LIMIT $4 OFFSET $5
            "#
        );
        let query = sqlx::query(&sql)
            .bind(*query.account_id.as_uuid())
            .bind(query.from)
            .bind(query.to)
            .bind(i64::from(query.page_size))
            .bind(offset);
        self.fetch_transactions("transactions_for_account", query)
            .await
    }

    #[instrument(skip(self), err)]
    async fn load_idempotency_record(
        &mut self,
        key: &str,
    ) -> StoreResult<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, request_hash, response, is_processed, created_at, expires_at
            FROM idempotent_requests
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_idempotency_record", e))?;

        row.map(|r| {
            IdempotencyRow::from_row(&r)
                .map(IdempotencyRecord::from)
                .map_err(|e| map_sqlx_error("load_idempotency_record", e))
        })
        .transpose()
    }

    #[instrument(skip(self, record), fields(key = %record.key, processed = record.is_processed), err)]
    async fn put_idempotency_record(&mut self, record: &IdempotencyRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotent_requests
                (key, request_hash, response, is_processed, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO UPDATE SET
                request_hash = EXCLUDED.request_hash,
                response = EXCLUDED.response,
                is_processed = EXCLUDED.is_processed,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&record.key)
        .bind(&record.request_hash)
        .bind(&record.response)
        .bind(record.is_processed)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("put_idempotency_record", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_idempotency_record(&mut self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM idempotent_requests WHERE key = $1")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_idempotency_record", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn commit(self) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self), err)]
    async fn rollback(self) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn to_db_version(version: u64) -> StoreResult<i64> {
    i64::try_from(version)
        .map_err(|_| StoreError::Serialization(format!("version {version} out of range")))
}

fn decode<T>(result: DomainResult<T>) -> StoreResult<T> {
    result.map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // serialization_failure, deadlock_detected, unique_violation
                Some("40001") | Some("40P01") | Some("23505") => StoreError::TransientConflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

// SQLx row types

#[derive(Debug)]
struct AccountRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    currency: String,
    balance: Decimal,
    name: String,
    is_active: bool,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            kind: row.try_get("kind")?,
            currency: row.try_get("currency")?,
            balance: row.try_get("balance")?,
            name: row.try_get("name")?,
            is_active: row.try_get("is_active")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl AccountRow {
    fn into_account(self) -> StoreResult<Account> {
        let version = u64::try_from(self.version).map_err(|_| {
            StoreError::Serialization(format!("account {} has negative version", self.id))
        })?;
        decode(Account::restore(AccountSnapshot {
            id: AccountId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            kind: decode(self.kind.parse())?,
            currency: decode(CurrencyRegistry::from_code(self.currency.trim()))?,
            balance: self.balance,
            name: self.name,
            is_active: self.is_active,
            version,
            audit: AuditInfo {
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
        }))
    }
}

#[derive(Debug)]
struct TransactionRow {
    id: Uuid,
    reference: String,
    description: String,
    idempotency_key: String,
    status: String,
    completed_at: Option<DateTime<Utc>>,
    reversal_of: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for TransactionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            reference: row.try_get("reference")?,
            description: row.try_get("description")?,
            idempotency_key: row.try_get("idempotency_key")?,
            status: row.try_get("status")?,
            completed_at: row.try_get("completed_at")?,
            reversal_of: row.try_get("reversal_of")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TransactionRow {
    fn into_transaction(self, entries: Vec<LedgerEntry>) -> StoreResult<Transaction> {
        decode(Transaction::restore(TransactionSnapshot {
            id: TransactionId::from_uuid(self.id),
            reference: self.reference,
            description: self.description,
            idempotency_key: self.idempotency_key,
            status: decode(self.status.parse())?,
            completed_at: self.completed_at,
            reversal_of: self.reversal_of.map(TransactionId::from_uuid),
            entries,
            audit: AuditInfo {
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
        }))
    }
}

#[derive(Debug)]
struct EntryRow {
    id: Uuid,
    transaction_id: Uuid,
    account_id: Uuid,
    entry_type: String,
    amount: Decimal,
    currency: String,
    balance_after: Decimal,
    description: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for EntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(EntryRow {
            id: row.try_get("id")?,
            transaction_id: row.try_get("transaction_id")?,
            account_id: row.try_get("account_id")?,
            entry_type: row.try_get("entry_type")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            balance_after: row.try_get("balance_after")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl EntryRow {
    fn into_entry(self) -> StoreResult<LedgerEntry> {
        let currency = decode(CurrencyRegistry::from_code(self.currency.trim()))?;
        Ok(LedgerEntry::restore(
            EntryId::from_uuid(self.id),
            AccountId::from_uuid(self.account_id),
            TransactionId::from_uuid(self.transaction_id),
            decode(self.entry_type.parse())?,
            decode(Money::new(self.amount, currency))?,
            self.balance_after.normalize(),
            self.description,
            self.created_at,
        ))
    }
}

#[derive(Debug)]
struct IdempotencyRow {
    key: String,
    request_hash: Option<String>,
    response: Option<serde_json::Value>,
    is_processed: bool,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for IdempotencyRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(IdempotencyRow {
            key: row.try_get("key")?,
            request_hash: row.try_get("request_hash")?,
            response: row.try_get("response")?,
            is_processed: row.try_get("is_processed")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl From<IdempotencyRow> for IdempotencyRecord {
    fn from(row: IdempotencyRow) -> Self {
        IdempotencyRecord {
            key: row.key,
            request_hash: row.request_hash,
            response: row.response,
            is_processed: row.is_processed,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}
