use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;

/// Ledger-wide double-entry check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub is_balanced: bool,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub difference: Decimal,
    pub discrepancies: Vec<String>,
}

/// Sum debits and credits per transaction and across the whole set.
///
/// Every transaction whose own debits differ from its credits is listed in
/// `discrepancies`; the report is balanced only if that list is empty.
pub fn reconcile<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> ReconciliationReport {
    let mut total_debits = Decimal::ZERO;
    let mut total_credits = Decimal::ZERO;
    let mut discrepancies = Vec::new();

    for tx in transactions {
        let debits = tx.total_debits();
        let credits = tx.total_credits();
        if debits != credits {
            discrepancies.push(format!(
                "Transaction {}: Debits {} != Credits {}",
                tx.reference(),
                debits,
                credits
            ));
        }
        total_debits += debits;
        total_credits += credits;
    }

    ReconciliationReport {
        is_balanced: discrepancies.is_empty(),
        total_debits,
        total_credits,
        difference: total_debits - total_credits,
        discrepancies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::Currency;
    use crate::entry::{EntryType, LedgerEntry};
    use crate::money::Money;
    use crate::transaction::TransactionStatus;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use wallet_core::{AccountId, AuditInfo, TransactionId};

    fn restored(reference: &str, debit: Decimal, credit: Decimal) -> Transaction {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let id = TransactionId::new();
        let entry = |t, amount| {
            LedgerEntry::new(
                AccountId::new(),
                id,
                t,
                Money::new(amount, Currency::usd()).unwrap(),
                Decimal::ZERO,
                "",
                at,
            )
        };
        Transaction::restore(crate::transaction::TransactionSnapshot {
            id,
            reference: reference.to_string(),
            description: String::new(),
            idempotency_key: format!("key-{reference}"),
            status: TransactionStatus::Completed,
            completed_at: Some(at),
            reversal_of: None,
            entries: vec![entry(EntryType::Debit, debit), entry(EntryType::Credit, credit)],
            audit: AuditInfo::created(at),
        })
        .unwrap()
    }

    #[test]
    fn balanced_ledger_reports_no_discrepancies() {
        let txs = [restored("TXN-A", dec!(10), dec!(10)), restored("TXN-B", dec!(2.5), dec!(2.5))];
        let report = reconcile(&txs);
        assert!(report.is_balanced);
        assert_eq!(report.total_debits, dec!(12.5));
        assert_eq!(report.difference, Decimal::ZERO);
    }

    #[test]
    fn corrupted_transaction_is_listed() {
        let txs = [restored("TXN-A", dec!(10), dec!(10)), restored("TXN-B", dec!(7), dec!(5))];
        let report = reconcile(&txs);
        assert!(!report.is_balanced);
        assert_eq!(report.difference, dec!(2));
        assert_eq!(report.discrepancies, vec!["Transaction TXN-B: Debits 7 != Credits 5".to_string()]);
    }
}
