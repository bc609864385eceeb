use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use rust_decimal::Decimal;
use wallet_core::UserId;
use wallet_ledger::{Account, AccountKind, Currency, Money, TransferService, reconcile};

fn funded_pair() -> (Account, Account) {
    let now = Utc::now();
    let mut from =
        Account::open(UserId::new(), AccountKind::Personal, Currency::usd(), "From", now).unwrap();
    let to =
        Account::open(UserId::new(), AccountKind::Personal, Currency::usd(), "To", now).unwrap();
    let seed = Money::new(Decimal::new(1_000_000_000, 2), Currency::usd()).unwrap();
    from.apply_debit(&seed, now).unwrap();
    (from, to)
}

fn bench_transfer_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_latency");
    group.sample_size(1000);

    group.bench_function("transfer_two_accounts", |b| {
        let svc = TransferService::new();
        let (mut from, mut to) = funded_pair();
        let amount = Money::from_smallest_unit(125, Currency::usd()).unwrap();

        b.iter(|| {
            // Swap direction each time so balances never run out.
            let out = svc
                .transfer(&mut from, &mut to, black_box(&amount), "bench", "bench-key", Utc::now())
                .unwrap();
            std::mem::swap(&mut from, &mut to);
            black_box(out);
        });
    });

    group.finish();
}

fn bench_reconcile_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_throughput");

    for count in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("reconcile", count), count, |b, &n| {
            let svc = TransferService::new();
            let (mut from, mut to) = funded_pair();
            let amount = Money::from_smallest_unit(1, Currency::usd()).unwrap();
            let txs: Vec<_> = (0..n)
                .map(|_| {
                    svc.transfer(&mut from, &mut to, &amount, "", "k", Utc::now())
                        .unwrap()
                        .transaction
                })
                .collect();

            b.iter(|| black_box(reconcile(&txs)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_transfer_latency, bench_reconcile_throughput);
criterion_main!(benches);
