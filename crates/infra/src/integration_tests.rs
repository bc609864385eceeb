//! End-to-end tests for the command pipeline.
//!
//! Tests: Command → UnitOfWork (InMemoryLedgerStore) → commit → EventBus
//!
//! Verifies:
//! - Balances move exactly once per idempotency key
//! - Events are published only for committed commands
//! - Transient conflicts are retried, cancellation leaves no trace

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tokio_util::sync::CancellationToken;

    use wallet_core::{AccountId, AggregateRoot, Clock, DomainError, ManualClock, UserId};
    use wallet_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
    use wallet_ledger::{
        Account, AccountKind, Currency, EntryType, LedgerEvent, Money, TransactionStatus,
    };

    use crate::commands::{DepositCommand, TransferCommand, WithdrawCommand};
    use crate::config::{SystemAccounts, SystemPurpose};
    use crate::executor::{CommandExecutor, ExecutionError, ExecutorConfig, IdempotencyScope};
    use crate::idempotency::{IdempotencyStore, IdempotentCommand};
    use crate::store::{
        HistoryQuery, InMemoryLedgerStore, IsolationLevel, LedgerStore, UnitOfWork,
    };

    type Bus = Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>>;
    type Executor = CommandExecutor<InMemoryLedgerStore, Bus>;

    struct Harness {
        executor: Arc<Executor>,
        store: InMemoryLedgerStore,
        bus: Bus,
        clock: Arc<ManualClock>,
        reserve: AccountId,
        fees: AccountId,
    }

    async fn seed(store: &InMemoryLedgerStore, kind: AccountKind, balance: Decimal) -> AccountId {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut account =
            Account::open(UserId::new(), kind, Currency::usd(), kind.as_str(), at).unwrap();
        if !balance.is_zero() {
            account
                .apply_debit(&Money::new(balance, Currency::usd()).unwrap(), at)
                .unwrap();
        }

        let mut uow = store.begin(IsolationLevel::Serializable).await.unwrap();
        uow.insert_account(&account).await.unwrap();
        uow.commit().await.unwrap();
        account.id_typed()
    }

    async fn balance(store: &InMemoryLedgerStore, id: AccountId) -> Decimal {
        let mut uow = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let account = uow.load_account(id).await.unwrap().unwrap();
        uow.rollback().await.unwrap();
        account.balance_amount()
    }

    async fn harness_with(config: ExecutorConfig) -> Harness {
        wallet_observability::init_for_tests();

        let store = InMemoryLedgerStore::new();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));

        let reserve = seed(&store, AccountKind::SystemReserve, dec!(1000000)).await;
        let fees = seed(&store, AccountKind::FeeIncome, Decimal::ZERO).await;
        let system_accounts = SystemAccounts::new()
            .with("USD", SystemPurpose::Reserve, reserve)
            .with("USD", SystemPurpose::FeeIncome, fees);

        let executor = CommandExecutor::new(store.clone(), bus.clone(), system_accounts, config)
            .with_clock(clock.clone());

        Harness {
            executor: Arc::new(executor),
            store,
            bus,
            clock,
            reserve,
            fees,
        }
    }

    async fn harness() -> Harness {
        harness_with(ExecutorConfig::default()).await
    }

    fn transfer(from: AccountId, to: AccountId, amount: Decimal, key: &str) -> TransferCommand {
        TransferCommand {
            user_id: None,
            from_account: from,
            to_account: to,
            amount,
            currency: "USD".into(),
            description: "Payment".into(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_publishes_after_commit() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let sub = h.bus.subscribe();

        let cmd = transfer(a, b, dec!(400), "k-1");
        let outcome = h
            .executor
            .transfer(&cmd, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.replayed);
        let receipt = &outcome.receipt;
        assert_eq!(receipt.status, TransactionStatus::Completed);
        assert_eq!(receipt.amount, dec!(400));
        assert_eq!(receipt.currency, "USD");
        assert!(receipt.reference.starts_with("TXN-"));

        let credit = receipt.entry_for(a).unwrap();
        assert_eq!(credit.entry_type, EntryType::Credit);
        assert_eq!(credit.balance_after, dec!(600));
        let debit = receipt.entry_for(b).unwrap();
        assert_eq!(debit.entry_type, EntryType::Debit);
        assert_eq!(debit.balance_after, dec!(400));

        assert_eq!(balance(&h.store, a).await, dec!(600));
        assert_eq!(balance(&h.store, b).await, dec!(400));

        let published = sub.drain();
        assert_eq!(published.len(), 1);
        let envelope = &published[0];
        assert_eq!(envelope.aggregate_id(), *receipt.transaction_id.as_uuid());
        assert_eq!(envelope.correlation_id(), Some(cmd.scoped_key().as_str()));
        assert_eq!(
            envelope.payload().event_type(),
            "ledger.transaction.money_transferred"
        );
        let LedgerEvent::MoneyTransferred(event) = envelope.payload();
        assert_eq!(event.source_account(), Some(a));
        assert_eq!(event.destination_account(), Some(b));
    }

    #[tokio::test]
    async fn retried_command_replays_cached_receipt() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let sub = h.bus.subscribe();
        let cancel = CancellationToken::new();

        let cmd = transfer(a, b, dec!(400), "k-1");
        let first = h.executor.transfer(&cmd, &cancel).await.unwrap();
        let second = h.executor.transfer(&cmd, &cancel).await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.receipt, second.receipt);
        assert_eq!(balance(&h.store, a).await, dec!(600));
        assert_eq!(balance(&h.store, b).await, dec!(400));
        assert_eq!(sub.drain().len(), 1);
        assert_eq!(h.bus.published_count(), 1);
    }

    #[tokio::test]
    async fn reformatted_amount_replays() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();

        let first = h
            .executor
            .transfer(&transfer(a, b, dec!(10), "k-fmt"), &cancel)
            .await
            .unwrap();
        let again = h
            .executor
            .transfer(&transfer(a, b, dec!(10.00), "k-fmt"), &cancel)
            .await
            .unwrap();

        assert!(again.replayed);
        assert_eq!(again.receipt.transaction_id, first.receipt.transaction_id);
        assert_eq!(balance(&h.store, b).await, dec!(10));
    }

    #[tokio::test]
    async fn reused_key_with_different_request_is_rejected() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();

        h.executor
            .transfer(&transfer(a, b, dec!(400), "k-1"), &cancel)
            .await
            .unwrap();
        let err = h
            .executor
            .transfer(&transfer(a, b, dec!(300), "k-1"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Domain(DomainError::InvalidArgument(_))));
        assert_eq!(balance(&h.store, a).await, dec!(600));
    }

    #[tokio::test]
    async fn same_key_from_different_users_does_not_collide() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();

        let mut first = transfer(a, b, dec!(100), "shared");
        first.user_id = Some(UserId::new());
        let mut second = first.clone();
        second.user_id = Some(UserId::new());

        let r1 = h.executor.transfer(&first, &cancel).await.unwrap();
        let r2 = h.executor.transfer(&second, &cancel).await.unwrap();

        assert!(!r2.replayed);
        assert_ne!(r1.receipt.transaction_id, r2.receipt.transaction_id);
        assert_eq!(balance(&h.store, b).await, dec!(200));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_identical_commands_apply_once() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let sub = h.bus.subscribe();
        let cmd = transfer(a, b, dec!(250), "k-concurrent");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let executor = h.executor.clone();
            let cmd = cmd.clone();
            handles.push(tokio::spawn(async move {
                executor.transfer(&cmd, &CancellationToken::new()).await
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        let executed = outcomes.iter().filter(|o| !o.replayed).count();
        assert_eq!(executed, 1);
        let reference = &outcomes[0].receipt.reference;
        assert!(outcomes.iter().all(|o| &o.receipt.reference == reference));

        assert_eq!(balance(&h.store, a).await, dec!(750));
        assert_eq!(balance(&h.store, b).await, dec!(250));
        assert_eq!(sub.drain().len(), 1);
    }

    #[tokio::test]
    async fn failed_transfer_leaves_no_trace() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(100)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let sub = h.bus.subscribe();
        let cancel = CancellationToken::new();

        let err = h
            .executor
            .transfer(&transfer(a, b, dec!(400), "k-1"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Domain(DomainError::InsufficientBalance { .. })
        ));
        assert_eq!(balance(&h.store, a).await, dec!(100));
        assert!(sub.drain().is_empty());

        // The reservation rolled back with the failure, so the key is free.
        let ok = h
            .executor
            .transfer(&transfer(a, b, dec!(50), "k-1"), &cancel)
            .await
            .unwrap();
        assert!(!ok.replayed);
        assert_eq!(balance(&h.store, a).await, dec!(50));
    }

    #[tokio::test]
    async fn deposit_and_withdraw_use_system_accounts() {
        let h = harness().await;
        let user = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();

        let deposit = DepositCommand {
            user_id: None,
            account_id: user,
            amount: dec!(250),
            currency: "USD".into(),
            description: "Top up".into(),
            idempotency_key: "dep-1".into(),
        };
        let out = h.executor.deposit(&deposit, &cancel).await.unwrap();
        assert_eq!(out.receipt.entry_for(h.reserve).unwrap().entry_type, EntryType::Credit);

        let withdraw = WithdrawCommand {
            user_id: None,
            account_id: user,
            amount: dec!(100),
            currency: "USD".into(),
            description: "Cash out".into(),
            idempotency_key: "wd-1".into(),
        };
        h.executor.withdraw(&withdraw, &cancel).await.unwrap();

        assert_eq!(balance(&h.store, user).await, dec!(150));
        assert_eq!(balance(&h.store, h.reserve).await, dec!(999750));
        assert_eq!(balance(&h.store, h.fees).await, dec!(100));

        let report = h.executor.reconcile(&cancel).await.unwrap();
        assert!(report.is_balanced);
        assert_eq!(report.total_debits, dec!(350));
        assert_eq!(report.total_credits, dec!(350));
    }

    #[tokio::test]
    async fn missing_system_account_or_currency_is_rejected() {
        let h = harness().await;
        let user = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();

        let mut deposit = DepositCommand {
            user_id: None,
            account_id: user,
            amount: dec!(10),
            currency: "EUR".into(),
            description: String::new(),
            idempotency_key: "dep-eur".into(),
        };
        let err = h.executor.deposit(&deposit, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Config(_)));

        deposit.currency = "XYZ".into();
        let err = h.executor.deposit(&deposit, &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Domain(DomainError::UnsupportedCurrency(_))
        ));
    }

    #[tokio::test]
    async fn invalid_commands_fail_before_touching_the_store() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(100)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();

        let cases = [
            transfer(a, b, Decimal::ZERO, "k-zero"),
            transfer(a, b, dec!(-5), "k-neg"),
            transfer(a, a, dec!(5), "k-self"),
            transfer(a, b, dec!(5), "   "),
            TransferCommand {
                description: "x".repeat(501),
                ..transfer(a, b, dec!(5), "k-long")
            },
        ];
        for cmd in &cases {
            let err = h.executor.transfer(cmd, &cancel).await.unwrap_err();
            assert!(
                matches!(err, ExecutionError::Domain(DomainError::InvalidArgument(_))),
                "unexpected {err:?}"
            );
        }

        let err = h
            .executor
            .transfer(&transfer(a, b, dec!(1.005), "k-scale"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Domain(DomainError::InvalidAmount(_))));

        let err = h
            .executor
            .transfer(&transfer(a, AccountId::new(), dec!(1), "k-missing"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NotFound(_)));

        assert_eq!(balance(&h.store, a).await, dec!(100));
    }

    #[tokio::test]
    async fn transient_conflicts_are_retried() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let sub = h.bus.subscribe();

        h.store.inject_transient_conflicts(2);
        let out = h
            .executor
            .transfer(&transfer(a, b, dec!(10), "k-retry"), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!out.replayed);
        assert_eq!(balance(&h.store, a).await, dec!(990));
        assert_eq!(sub.drain().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_conflict() {
        let h = harness_with(ExecutorConfig {
            max_retries: 2,
            ..ExecutorConfig::default()
        })
        .await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let sub = h.bus.subscribe();

        h.store.inject_transient_conflicts(10);
        let err = h
            .executor
            .transfer(&transfer(a, b, dec!(10), "k-retry"), &CancellationToken::new())
            .await
            .unwrap_err();
        h.store.inject_transient_conflicts(0);

        assert!(err.is_retryable());
        assert!(matches!(err, ExecutionError::TransientConflict { attempts: 3, .. }));
        assert_eq!(balance(&h.store, a).await, dec!(1000));
        assert!(sub.drain().is_empty());
    }

    #[tokio::test]
    async fn cancelled_command_changes_nothing() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = h
            .executor
            .transfer(&transfer(a, b, dec!(10), "k-cancel"), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Cancelled));
        assert_eq!(balance(&h.store, a).await, dec!(1000));

        let mut uow = h.store.begin(IsolationLevel::Serializable).await.unwrap();
        assert!(uow.list_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_flight_key_is_reported_until_it_expires() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cmd = transfer(a, b, dec!(10), "k-stuck");
        let ttl = h.executor.config().idempotency_ttl;

        // A crashed attempt that reserved the key and never finished.
        let mut uow = h.store.begin(IsolationLevel::Serializable).await.unwrap();
        assert!(uow
            .try_begin(&cmd.scoped_key(), ttl, h.clock.now())
            .await
            .unwrap());
        uow.commit().await.unwrap();

        let err = h
            .executor
            .transfer(&cmd, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::DuplicateInProgress { .. }));

        h.clock.advance(ttl + Duration::seconds(1));
        let out = h
            .executor
            .transfer(&cmd, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.replayed);
        assert_eq!(balance(&h.store, b).await, dec!(10));
    }

    #[tokio::test]
    async fn expired_key_is_recovered_from_the_ledger() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cmd = transfer(a, b, dec!(10), "k-old");
        let cancel = CancellationToken::new();

        let first = h.executor.transfer(&cmd, &cancel).await.unwrap();
        h.clock.advance(Duration::hours(1));
        let again = h.executor.transfer(&cmd, &cancel).await.unwrap();

        assert!(again.replayed);
        assert_eq!(again.receipt.transaction_id, first.receipt.transaction_id);
        assert_eq!(balance(&h.store, b).await, dec!(10));
    }

    async fn expired_key_keeps_its_original_request(scope: IdempotencyScope) {
        let h = harness_with(ExecutorConfig {
            scope,
            ..ExecutorConfig::default()
        })
        .await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();
        let original = transfer(a, b, dec!(10), "k-x");
        let altered = transfer(a, b, dec!(999), "k-x");

        let first = h.executor.transfer(&original, &cancel).await.unwrap();
        let err = h.executor.transfer(&altered, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Domain(DomainError::InvalidArgument(_))));

        h.clock.advance(Duration::hours(1));
        let err = h.executor.transfer(&altered, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Domain(DomainError::InvalidArgument(_))));

        let again = h.executor.transfer(&original, &cancel).await.unwrap();
        assert!(again.replayed);
        assert_eq!(again.receipt.transaction_id, first.receipt.transaction_id);
        assert_eq!(again.receipt.amount, dec!(10));

        let err = h.executor.transfer(&altered, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Domain(DomainError::InvalidArgument(_))));
        assert_eq!(balance(&h.store, a).await, dec!(990));
        assert_eq!(balance(&h.store, b).await, dec!(10));
    }

    #[tokio::test]
    async fn expired_key_rejects_a_different_request() {
        expired_key_keeps_its_original_request(IdempotencyScope::SharedTransaction).await;
    }

    #[tokio::test]
    async fn expired_key_rejects_a_different_request_with_separate_reservation() {
        expired_key_keeps_its_original_request(IdempotencyScope::SeparateTransaction).await;
    }

    #[tokio::test]
    async fn separate_scope_releases_reservation_on_failure() {
        let h = harness_with(ExecutorConfig {
            scope: IdempotencyScope::SeparateTransaction,
            ..ExecutorConfig::default()
        })
        .await;
        let a = seed(&h.store, AccountKind::Personal, dec!(100)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();

        let failing = transfer(a, b, dec!(500), "k-sep");
        let err = h.executor.transfer(&failing, &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Domain(DomainError::InsufficientBalance { .. })
        ));

        let mut uow = h.store.begin(IsolationLevel::Serializable).await.unwrap();
        assert!(uow
            .load_idempotency_record(&failing.scoped_key())
            .await
            .unwrap()
            .is_none());
        drop(uow);

        let ok = transfer(a, b, dec!(60), "k-sep");
        let first = h.executor.transfer(&ok, &cancel).await.unwrap();
        let second = h.executor.transfer(&ok, &cancel).await.unwrap();
        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(balance(&h.store, a).await, dec!(40));
    }

    #[tokio::test]
    async fn publish_failure_does_not_undo_commit() {
        #[derive(Debug)]
        struct Broken;

        impl std::fmt::Display for Broken {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("broker unavailable")
            }
        }

        struct FailingBus;

        impl EventBus<EventEnvelope<LedgerEvent>> for FailingBus {
            type Error = Broken;

            fn publish(&self, _message: EventEnvelope<LedgerEvent>) -> Result<(), Self::Error> {
                Err(Broken)
            }

            fn subscribe(&self) -> wallet_events::Subscription<EventEnvelope<LedgerEvent>> {
                let (_tx, rx) = std::sync::mpsc::channel();
                wallet_events::Subscription::new(rx)
            }
        }

        let store = InMemoryLedgerStore::new();
        let a = seed(&store, AccountKind::Personal, dec!(100)).await;
        let b = seed(&store, AccountKind::Personal, Decimal::ZERO).await;
        let executor = CommandExecutor::new(
            store.clone(),
            FailingBus,
            SystemAccounts::new(),
            ExecutorConfig::default(),
        );
        let cancel = CancellationToken::new();
        let cmd = transfer(a, b, dec!(30), "k-pub");

        let err = executor.transfer(&cmd, &cancel).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Publish(_)));
        assert_eq!(balance(&store, b).await, dec!(30));

        let replay = executor.transfer(&cmd, &cancel).await.unwrap();
        assert!(replay.replayed);
    }

    #[tokio::test]
    async fn reconcile_spans_every_committed_transaction() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let cancel = CancellationToken::new();

        for (i, amount) in [dec!(1.25), dec!(10), dec!(0.75)].into_iter().enumerate() {
            h.executor
                .transfer(&transfer(a, b, amount, &format!("k-{i}")), &cancel)
                .await
                .unwrap();
        }

        let report = h.executor.reconcile(&cancel).await.unwrap();
        assert!(report.is_balanced);
        assert_eq!(report.total_debits, dec!(12));
        assert_eq!(report.difference, Decimal::ZERO);
        assert!(report.discrepancies.is_empty());
    }

    #[tokio::test]
    async fn history_pages_newest_first_within_bounds() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(1000)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;
        let c = seed(&h.store, AccountKind::Personal, dec!(50)).await;
        let cancel = CancellationToken::new();

        let start = h.clock.now();
        let mut references = Vec::new();
        for (i, amount) in [dec!(1), dec!(2), dec!(3)].into_iter().enumerate() {
            let out = h
                .executor
                .transfer(&transfer(a, b, amount, &format!("k-h{i}")), &cancel)
                .await
                .unwrap();
            references.push(out.receipt.reference);
            h.clock.advance(Duration::hours(1));
        }
        h.executor
            .transfer(&transfer(c, b, dec!(5), "k-other"), &cancel)
            .await
            .unwrap();

        let all = h
            .executor
            .transaction_history(&HistoryQuery::new(a), &cancel)
            .await
            .unwrap();
        let got: Vec<&str> = all.iter().map(|r| r.reference.as_str()).collect();
        assert_eq!(got, vec![&references[2], &references[1], &references[0]]);

        let second_page = h
            .executor
            .transaction_history(&HistoryQuery::new(a).page(2, 2), &cancel)
            .await
            .unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].reference, references[0]);

        let bounded = h
            .executor
            .transaction_history(
                &HistoryQuery::new(a).between(
                    Some(start + Duration::hours(1)),
                    Some(start + Duration::hours(2)),
                ),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(bounded.len(), 2);
        assert_eq!(bounded[0].amount, dec!(3));
        assert_eq!(bounded[1].amount, dec!(2));

        let for_b = h
            .executor
            .transaction_history(&HistoryQuery::new(b).page(0, 500), &cancel)
            .await
            .unwrap();
        assert_eq!(for_b.len(), 4);
        assert!(for_b.iter().all(|r| r.entry_for(b).is_some()));
    }

    #[tokio::test]
    async fn unknown_account_has_no_history_or_balance() {
        let h = harness().await;
        let missing = AccountId::new();

        let err = h
            .executor
            .transaction_history(&HistoryQuery::new(missing), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::NotFound(_)));
        assert!(matches!(
            h.executor.account(missing).await.unwrap_err(),
            ExecutionError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn account_read_reflects_committed_balance() {
        let h = harness().await;
        let a = seed(&h.store, AccountKind::Personal, dec!(80)).await;
        let b = seed(&h.store, AccountKind::Personal, Decimal::ZERO).await;

        h.executor
            .transfer(&transfer(a, b, dec!(30), "k-bal"), &CancellationToken::new())
            .await
            .unwrap();

        let account = h.executor.account(a).await.unwrap();
        assert_eq!(account.balance_amount(), dec!(50));
        assert_eq!(account.version(), 1);
    }

    #[tokio::test]
    async fn opened_account_is_persisted() {
        let h = harness().await;
        let user = UserId::new();
        let account = h
            .executor
            .open_account(user, AccountKind::Business, "NGN", "Shop")
            .await
            .unwrap();

        let mut uow = h.store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        let loaded = uow.load_account(account.id_typed()).await.unwrap().unwrap();
        assert_eq!(loaded.user_id(), user);
        assert_eq!(loaded.currency(), &Currency::ngn());
        assert!(loaded.is_active());
        assert!(loaded.balance().is_zero());
    }
}
