//! Transactional command execution.
//!
//! ```text
//! Command
//!   ↓
//! 1. Validate (amount, accounts, key, currency)
//!   ↓
//! 2. Begin SERIALIZABLE unit of work
//!   ↓
//! 3. try_begin(scoped key) ── taken ──> replay cached receipt / DuplicateInProgress
//!   ↓
//! 4. Load accounts, TransferService::transfer (pure)
//!   ↓
//! 5. Save accounts + transaction, cache receipt
//!   ↓
//! 6. Commit
//!   ↓
//! 7. Publish MoneyTransferred
//! ```
//!
//! A `TransientConflict` anywhere in 2..6 discards the unit of work and
//! re-runs the whole command from step 2 with fresh domain objects, up to
//! `max_retries` times. The event is published only after a successful
//! commit; a publish failure is reported but never undoes the commit.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use wallet_core::{AccountId, Clock, DomainError, SystemClock, UserId};
use wallet_events::{EventBus, EventEnvelope};
use wallet_ledger::{
    Account, AccountKind, CurrencyRegistry, EntryType, LedgerEvent, Money, ReconciliationReport,
    Transaction, TransferService, reconcile,
};

use crate::commands::{
    CommandOutcome, DepositCommand, TransferCommand, TransferReceipt, WithdrawCommand,
};
use crate::config::{Settings, SystemAccounts, SystemPurpose};
use crate::idempotency::{IdempotencyStore, IdempotentCommand, default_ttl};
use crate::store::{HistoryQuery, IsolationLevel, LedgerStore, StoreError, UnitOfWork};

/// Longest accepted command description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 500;

const AGGREGATE_TYPE: &str = "transaction";

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Another attempt holds the idempotency key and has not finished.
    #[error("a request with idempotency key '{key}' is already in progress")]
    DuplicateInProgress { key: String },

    /// Still conflicting after every retry.
    #[error("transient conflict after {attempts} attempt(s): {message}")]
    TransientConflict { attempts: u32, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(StoreError),

    /// The command committed but its event could not be published.
    #[error("event publication failed: {0}")]
    Publish(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ExecutionError {
    /// Whether re-submitting the same command may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::TransientConflict { .. })
    }
}

impl From<StoreError> for ExecutionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::TransientConflict(message) => ExecutionError::TransientConflict {
                attempts: 1,
                message,
            },
            StoreError::NotFound(what) => ExecutionError::NotFound(what),
            other => ExecutionError::Store(other),
        }
    }
}

fn encoding_error(err: serde_json::Error) -> ExecutionError {
    ExecutionError::Store(StoreError::Serialization(err.to_string()))
}

/// Where the idempotency reservation is committed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum IdempotencyScope {
    /// Reservation, ledger writes and cached receipt commit together.
    #[default]
    SharedTransaction,
    /// Reservation commits on its own before the ledger writes. A failed
    /// command releases it; a crash leaves it until its TTL expires.
    SeparateTransaction,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    pub idempotency_ttl: Duration,
    pub scope: IdempotencyScope,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            idempotency_ttl: default_ttl(),
            scope: IdempotencyScope::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.transfer_max_retries,
            idempotency_ttl: settings.idempotency_ttl,
            scope: IdempotencyScope::default(),
        }
    }
}

/// A validated money movement, ready to run.
#[derive(Debug, Clone)]
struct Movement {
    kind: &'static str,
    key: String,
    request_hash: String,
    from: AccountId,
    to: AccountId,
    amount: Money,
    description: String,
}

impl Movement {
    /// Whether `posted` is the ledger effect of this movement.
    fn matches(&self, posted: &Transaction) -> bool {
        let leg = |side: EntryType| posted.entries().iter().find(|e| e.entry_type() == side);
        let (Some(credit), Some(debit)) = (leg(EntryType::Credit), leg(EntryType::Debit)) else {
            return false;
        };

        posted.entries().len() == 2
            && posted.description() == self.description
            && credit.account_id() == self.from
            && debit.account_id() == self.to
            && credit.amount().amount() == self.amount.amount()
            && credit.amount().currency().code() == self.amount.currency().code()
    }
}

fn key_reused() -> ExecutionError {
    DomainError::invalid_argument("idempotency key reused with a different request").into()
}

enum Step {
    Replayed(TransferReceipt),
    /// Key was reclaimed after expiry but its transaction is already posted.
    Recovered(TransferReceipt),
    Executed {
        receipt: TransferReceipt,
        event: LedgerEvent,
    },
}

/// Runs deposit, withdraw and transfer commands exactly once each.
pub struct CommandExecutor<S, B> {
    store: S,
    bus: B,
    clock: Arc<dyn Clock>,
    system_accounts: SystemAccounts,
    config: ExecutorConfig,
    service: TransferService,
}

impl<S, B> core::fmt::Debug for CommandExecutor<S, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("config", &self.config)
            .field("system_accounts", &self.system_accounts.len())
            .finish_non_exhaustive()
    }
}

impl<S, B> CommandExecutor<S, B> {
    pub fn new(store: S, bus: B, system_accounts: SystemAccounts, config: ExecutorConfig) -> Self {
        Self {
            store,
            bus,
            clock: Arc::new(SystemClock),
            system_accounts,
            config,
            service: TransferService::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

impl<S, B> CommandExecutor<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<LedgerEvent>>,
{
    /// Move funds between two accounts.
    #[instrument(
        skip(self, cmd, cancel),
        fields(from = %cmd.from_account, to = %cmd.to_account, amount = %cmd.amount),
        err
    )]
    pub async fn transfer(
        &self,
        cmd: &TransferCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, ExecutionError> {
        let movement = self.movement(
            cmd,
            cmd.from_account,
            cmd.to_account,
            cmd.amount,
            &cmd.currency,
            &cmd.description,
        )?;
        self.execute(movement, cancel).await
    }

    /// Transfer from the currency's reserve account into `cmd.account_id`.
    #[instrument(skip(self, cmd, cancel), fields(account = %cmd.account_id, amount = %cmd.amount), err)]
    pub async fn deposit(
        &self,
        cmd: &DepositCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, ExecutionError> {
        CurrencyRegistry::from_code(&cmd.currency)?;
        let reserve = self.system_account(&cmd.currency, SystemPurpose::Reserve)?;
        let movement = self.movement(
            cmd,
            reserve,
            cmd.account_id,
            cmd.amount,
            &cmd.currency,
            &cmd.description,
        )?;
        self.execute(movement, cancel).await
    }

    /// Transfer from `cmd.account_id` into the currency's fee-income account.
    #[instrument(skip(self, cmd, cancel), fields(account = %cmd.account_id, amount = %cmd.amount), err)]
    pub async fn withdraw(
        &self,
        cmd: &WithdrawCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, ExecutionError> {
        CurrencyRegistry::from_code(&cmd.currency)?;
        let payout = self.system_account(&cmd.currency, SystemPurpose::FeeIncome)?;
        let movement = self.movement(
            cmd,
            cmd.account_id,
            payout,
            cmd.amount,
            &cmd.currency,
            &cmd.description,
        )?;
        self.execute(movement, cancel).await
    }

    /// Double-entry check over every stored transaction.
    #[instrument(skip(self, cancel), err)]
    pub async fn reconcile(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, ExecutionError> {
        ensure_active(cancel)?;
        let mut uow = self.store.begin(IsolationLevel::RepeatableRead).await?;
        let transactions = match uow.list_transactions().await {
            Ok(txs) => txs,
            Err(e) => {
                discard(uow).await;
                return Err(e.into());
            }
        };
        uow.rollback().await?;

        let report = reconcile(&transactions);
        if !report.is_balanced {
            warn!(
                discrepancies = report.discrepancies.len(),
                difference = %report.difference,
                "ledger is out of balance"
            );
        }
        Ok(report)
    }

    /// Current state of an account, including its balance.
    #[instrument(skip(self), fields(account_id = %id), err)]
    pub async fn account(&self, id: AccountId) -> Result<Account, ExecutionError> {
        let mut uow = self.store.begin(IsolationLevel::ReadCommitted).await?;
        let account = load_account(&mut uow, id).await;
        discard(uow).await;
        account
    }

    /// A page of the transactions that touched an account, newest first.
    ///
    /// Out-of-range paging is normalized rather than rejected. An unknown
    /// account is `NotFound`.
    #[instrument(
        skip(self, query, cancel),
        fields(account_id = %query.account_id, page = query.page),
        err
    )]
    pub async fn transaction_history(
        &self,
        query: &HistoryQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<TransferReceipt>, ExecutionError> {
        ensure_active(cancel)?;
        let query = query.normalized();

        let mut uow = self.store.begin(IsolationLevel::RepeatableRead).await?;
        let page = match load_account(&mut uow, query.account_id).await {
            Ok(_) => uow
                .transactions_for_account(&query)
                .await
                .map_err(ExecutionError::from),
            Err(e) => Err(e),
        };
        discard(uow).await;

        Ok(page?.iter().map(TransferReceipt::from_transaction).collect())
    }

    /// Open and persist a new account.
    #[instrument(skip(self, name), fields(user_id = %user_id, kind = kind.as_str()), err)]
    pub async fn open_account(
        &self,
        user_id: UserId,
        kind: AccountKind,
        currency: &str,
        name: &str,
    ) -> Result<Account, ExecutionError> {
        let currency = CurrencyRegistry::from_code(currency)?;
        let account = Account::open(user_id, kind, currency, name, self.clock.now())?;

        let mut uow = self.store.begin(IsolationLevel::Serializable).await?;
        if let Err(e) = uow.insert_account(&account).await {
            discard(uow).await;
            return Err(e.into());
        }
        uow.commit().await?;
        Ok(account)
    }

    fn system_account(
        &self,
        currency: &str,
        purpose: SystemPurpose,
    ) -> Result<AccountId, ExecutionError> {
        self.system_accounts
            .resolve(currency, purpose)
            .ok_or_else(|| {
                ExecutionError::Config(format!(
                    "no {} system account configured for {currency}",
                    purpose.as_str()
                ))
            })
    }

    fn movement<C: IdempotentCommand>(
        &self,
        cmd: &C,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        currency: &str,
        description: &str,
    ) -> Result<Movement, ExecutionError> {
        if cmd.idempotency_key().trim().is_empty() {
            return Err(DomainError::invalid_argument("idempotency key is required").into());
        }
        if amount <= Decimal::ZERO {
            return Err(DomainError::invalid_argument("amount must be greater than zero").into());
        }
        if from == to {
            return Err(DomainError::invalid_argument(
                "source and destination accounts must differ",
            )
            .into());
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(DomainError::invalid_argument(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            ))
            .into());
        }

        let currency = CurrencyRegistry::from_code(currency)?;
        let amount = Money::new(amount, currency)?;

        Ok(Movement {
            kind: C::KIND,
            key: cmd.scoped_key(),
            request_hash: cmd.request_hash().map_err(encoding_error)?,
            from,
            to,
            amount,
            description: description.to_string(),
        })
    }

    async fn execute(
        &self,
        movement: Movement,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, ExecutionError> {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            ensure_active(cancel)?;

            let result = match self.config.scope {
                IdempotencyScope::SharedTransaction => self.attempt_shared(&movement, cancel).await,
                IdempotencyScope::SeparateTransaction => {
                    self.attempt_separate(&movement, cancel).await
                }
            };

            match result {
                Ok(step) => return self.finish(&movement, step),
                Err(ExecutionError::TransientConflict { message, .. }) if attempt < max_attempts => {
                    warn!(
                        kind = movement.kind,
                        key = %movement.key,
                        attempt,
                        error = %message,
                        "transient conflict, retrying command"
                    );
                }
                Err(ExecutionError::TransientConflict { message, .. }) => {
                    return Err(ExecutionError::TransientConflict {
                        attempts: attempt,
                        message,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn finish(&self, movement: &Movement, step: Step) -> Result<CommandOutcome, ExecutionError> {
        match step {
            Step::Replayed(receipt) | Step::Recovered(receipt) => {
                debug!(
                    key = %movement.key,
                    reference = %receipt.reference,
                    "replaying cached response"
                );
                Ok(CommandOutcome {
                    receipt,
                    replayed: true,
                })
            }
            Step::Executed { receipt, event } => {
                info!(
                    kind = movement.kind,
                    key = %movement.key,
                    transaction_id = %receipt.transaction_id,
                    reference = %receipt.reference,
                    amount = %movement.amount,
                    "command committed"
                );

                let envelope =
                    EventEnvelope::wrap(*receipt.transaction_id.as_uuid(), AGGREGATE_TYPE, event)
                        .with_correlation_id(movement.key.clone());
                self.bus
                    .publish(envelope)
                    .map_err(|e| ExecutionError::Publish(e.to_string()))?;

                Ok(CommandOutcome {
                    receipt,
                    replayed: false,
                })
            }
        }
    }

    async fn attempt_shared(
        &self,
        movement: &Movement,
        cancel: &CancellationToken,
    ) -> Result<Step, ExecutionError> {
        let mut uow = self.store.begin(IsolationLevel::Serializable).await?;

        let step = match self.reserve_and_apply(&mut uow, movement, cancel).await {
            Ok(step) => step,
            Err(e) => {
                discard(uow).await;
                return Err(e);
            }
        };

        match step {
            Step::Replayed(_) => uow.rollback().await?,
            Step::Executed { .. } | Step::Recovered(_) => {
                if cancel.is_cancelled() {
                    discard(uow).await;
                    return Err(ExecutionError::Cancelled);
                }
                uow.commit().await?;
            }
        }
        Ok(step)
    }

    async fn reserve_and_apply(
        &self,
        uow: &mut S::Uow,
        movement: &Movement,
        cancel: &CancellationToken,
    ) -> Result<Step, ExecutionError> {
        let now = self.clock.now();
        let acquired = uow
            .try_begin(&movement.key, self.config.idempotency_ttl, now)
            .await?;
        if !acquired {
            return self.replay(uow, movement).await.map(Step::Replayed);
        }
        if let Some(receipt) = self.recover(uow, movement).await? {
            return Ok(Step::Recovered(receipt));
        }
        uow.set_request_hash(&movement.key, &movement.request_hash)
            .await?;

        ensure_active(cancel)?;
        self.apply(uow, movement, cancel).await
    }

    async fn attempt_separate(
        &self,
        movement: &Movement,
        cancel: &CancellationToken,
    ) -> Result<Step, ExecutionError> {
        let now = self.clock.now();

        let mut reservation = self.store.begin(IsolationLevel::Serializable).await?;
        let acquired = match reservation
            .try_begin(&movement.key, self.config.idempotency_ttl, now)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                discard(reservation).await;
                return Err(e.into());
            }
        };
        if !acquired {
            let replay = self.replay(&mut reservation, movement).await;
            discard(reservation).await;
            return replay.map(Step::Replayed);
        }
        match self.recover(&mut reservation, movement).await {
            Ok(Some(receipt)) => {
                reservation.commit().await?;
                return Ok(Step::Recovered(receipt));
            }
            Ok(None) => {}
            Err(e) => {
                discard(reservation).await;
                return Err(e);
            }
        }
        if let Err(e) = reservation
            .set_request_hash(&movement.key, &movement.request_hash)
            .await
        {
            discard(reservation).await;
            return Err(e.into());
        }
        reservation.commit().await?;

        match self.apply_in_own_unit(movement, cancel).await {
            Ok(step) => Ok(step),
            Err(e) => {
                self.release(&movement.key).await;
                Err(e)
            }
        }
    }

    async fn apply_in_own_unit(
        &self,
        movement: &Movement,
        cancel: &CancellationToken,
    ) -> Result<Step, ExecutionError> {
        ensure_active(cancel)?;
        let mut uow = self.store.begin(IsolationLevel::Serializable).await?;
        let applied = match self.recover(&mut uow, movement).await {
            Ok(Some(receipt)) => Ok(Step::Recovered(receipt)),
            Ok(None) => self.apply(&mut uow, movement, cancel).await,
            Err(e) => Err(e),
        };
        match applied {
            Ok(step) => {
                if cancel.is_cancelled() {
                    discard(uow).await;
                    return Err(ExecutionError::Cancelled);
                }
                uow.commit().await?;
                Ok(step)
            }
            Err(e) => {
                discard(uow).await;
                Err(e)
            }
        }
    }

    /// Best-effort: drop a reservation whose command did not commit.
    async fn release(&self, key: &str) {
        let result: Result<(), StoreError> = async {
            let mut uow = self.store.begin(IsolationLevel::Serializable).await?;
            uow.release(key).await?;
            uow.commit().await
        }
        .await;

        if let Err(e) = result {
            warn!(key, error = %e, "failed to release idempotency reservation; it expires at TTL");
        }
    }

    async fn replay(
        &self,
        uow: &mut S::Uow,
        movement: &Movement,
    ) -> Result<TransferReceipt, ExecutionError> {
        let cached = uow
            .get_cached_response(&movement.key, self.clock.now())
            .await?;

        let Some(cached) = cached else {
            warn!(key = %movement.key, "duplicate request while original is in flight");
            return Err(ExecutionError::DuplicateInProgress {
                key: movement.key.clone(),
            });
        };

        if let Some(stored) = cached.request_hash.as_deref() {
            if stored != movement.request_hash {
                return Err(key_reused());
            }
        }

        serde_json::from_value(cached.response).map_err(encoding_error)
    }

    /// Rebuild the receipt of a reclaimed key whose transaction is already
    /// posted. The record is only rewritten once the posted transaction is
    /// known to be this movement.
    async fn recover(
        &self,
        uow: &mut S::Uow,
        movement: &Movement,
    ) -> Result<Option<TransferReceipt>, ExecutionError> {
        let Some(posted) = uow.find_transaction_by_idempotency_key(&movement.key).await? else {
            return Ok(None);
        };
        if !movement.matches(&posted) {
            warn!(
                key = %movement.key,
                transaction_id = %posted.id_typed(),
                "expired idempotency key reused with a different request"
            );
            return Err(key_reused());
        }

        uow.set_request_hash(&movement.key, &movement.request_hash)
            .await?;
        let receipt = TransferReceipt::from_transaction(&posted);
        let response = serde_json::to_value(&receipt).map_err(encoding_error)?;
        uow.cache_response(
            &movement.key,
            response,
            self.config.idempotency_ttl,
            self.clock.now(),
        )
        .await?;
        Ok(Some(receipt))
    }

    /// Load, transfer and persist inside `uow`. Accounts are read in id order.
    async fn apply(
        &self,
        uow: &mut S::Uow,
        movement: &Movement,
        cancel: &CancellationToken,
    ) -> Result<Step, ExecutionError> {
        let now = self.clock.now();

        let (low, high) = if movement.from <= movement.to {
            (movement.from, movement.to)
        } else {
            (movement.to, movement.from)
        };
        let first = load_account(uow, low).await?;
        let second = load_account(uow, high).await?;
        let (mut from, mut to) = if movement.from <= movement.to {
            (first, second)
        } else {
            (second, first)
        };

        ensure_active(cancel)?;

        let outcome = self.service.transfer(
            &mut from,
            &mut to,
            &movement.amount,
            &movement.description,
            &movement.key,
            now,
        )?;

        uow.save_account(&from).await?;
        uow.save_account(&to).await?;
        uow.save_transaction(&outcome.transaction).await?;

        let receipt = TransferReceipt::from_transaction(&outcome.transaction);
        let response = serde_json::to_value(&receipt).map_err(encoding_error)?;
        uow.cache_response(&movement.key, response, self.config.idempotency_ttl, now)
            .await?;

        Ok(Step::Executed {
            receipt,
            event: outcome.event,
        })
    }
}

async fn load_account<U: UnitOfWork>(uow: &mut U, id: AccountId) -> Result<Account, ExecutionError> {
    uow.load_account(id)
        .await?
        .ok_or_else(|| ExecutionError::NotFound(format!("account {id}")))
}

async fn discard<U: UnitOfWork>(uow: U) {
    if let Err(e) = uow.rollback().await {
        warn!(error = %e, "rollback failed");
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), ExecutionError> {
    if cancel.is_cancelled() {
        Err(ExecutionError::Cancelled)
    } else {
        Ok(())
    }
}
