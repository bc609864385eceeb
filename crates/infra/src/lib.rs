//! Infrastructure layer: persistence, idempotency, command execution, config.

pub mod commands;
pub mod config;
pub mod executor;
pub mod idempotency;
pub mod store;

mod integration_tests;

pub use commands::{
    CommandOutcome, DepositCommand, ReceiptEntry, TransferCommand, TransferReceipt,
    WithdrawCommand,
};
pub use config::{ConfigError, Settings, SystemAccounts, SystemPurpose};
pub use executor::{CommandExecutor, ExecutionError, ExecutorConfig, IdempotencyScope};
pub use idempotency::{IdempotencyRecord, IdempotencyStore, IdempotentCommand};
pub use store::{
    HistoryQuery, InMemoryLedgerStore, IsolationLevel, LedgerStore, PostgresLedgerStore, StoreError,
    StoreResult, UnitOfWork,
};
