use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use wallet_core::{AccountId, AggregateRoot, AuditInfo, DomainError, DomainResult, UserId};

use crate::currency::Currency;
use crate::money::{Money, fractional_digits};

/// What an account is used for.
///
/// `SystemReserve` funds deposits and `FeeIncome` receives withdrawals; both
/// are owned by the platform rather than by a wallet user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Personal,
    Business,
    SystemReserve,
    FeeIncome,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Personal => "personal",
            AccountKind::Business => "business",
            AccountKind::SystemReserve => "system_reserve",
            AccountKind::FeeIncome => "fee_income",
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, AccountKind::SystemReserve | AccountKind::FeeIncome)
    }
}

impl core::str::FromStr for AccountKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(AccountKind::Personal),
            "business" => Ok(AccountKind::Business),
            "system_reserve" => Ok(AccountKind::SystemReserve),
            "fee_income" => Ok(AccountKind::FeeIncome),
            other => Err(DomainError::invalid_argument(format!(
                "unknown account kind '{other}'"
            ))),
        }
    }
}

/// Persisted form of an account (what a store loads and saves).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub user_id: UserId,
    pub kind: AccountKind,
    pub currency: Currency,
    pub balance: Decimal,
    pub name: String,
    pub is_active: bool,
    pub version: u64,
    pub audit: AuditInfo,
}

/// A wallet account holding a non-negative balance in one currency.
///
/// Sign convention: a debit increases the balance and a credit decreases it.
/// Balances only change through [`Account::apply_debit`] and
/// [`Account::apply_credit`]; accounts are deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    user_id: UserId,
    kind: AccountKind,
    currency: Currency,
    balance: Decimal,
    name: String,
    is_active: bool,
    version: u64,
    audit: AuditInfo,
}

impl Account {
    /// Open a new, active account with a zero balance.
    pub fn open(
        user_id: UserId,
        kind: AccountKind,
        currency: Currency,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        Self::open_with_id(AccountId::new(), user_id, kind, currency, name, now)
    }

    pub fn open_with_id(
        id: AccountId,
        user_id: UserId,
        kind: AccountKind,
        currency: Currency,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::invalid_argument("account name cannot be empty"));
        }

        Ok(Self {
            id,
            user_id,
            kind,
            currency,
            balance: Decimal::ZERO,
            name,
            is_active: true,
            version: 0,
            audit: AuditInfo::created(now),
        })
    }

    /// Rehydrate from storage, re-checking the balance invariants.
    pub fn restore(snapshot: AccountSnapshot) -> DomainResult<Self> {
        if snapshot.balance.is_sign_negative() && !snapshot.balance.is_zero() {
            return Err(DomainError::invalid_amount(format!(
                "stored balance of account {} is negative",
                snapshot.id
            )));
        }
        if fractional_digits(snapshot.balance) > snapshot.currency.decimal_places() {
            return Err(DomainError::invalid_amount(format!(
                "stored balance of account {} exceeds {} scale",
                snapshot.id,
                snapshot.currency.code()
            )));
        }

        Ok(Self {
            id: snapshot.id,
            user_id: snapshot.user_id,
            kind: snapshot.kind,
            currency: snapshot.currency,
            balance: snapshot.balance.normalize(),
            name: snapshot.name,
            is_active: snapshot.is_active,
            version: snapshot.version,
            audit: snapshot.audit,
        })
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id,
            user_id: self.user_id,
            kind: self.kind,
            currency: self.currency.clone(),
            balance: self.balance,
            name: self.name.clone(),
            is_active: self.is_active,
            version: self.version,
            audit: self.audit,
        }
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn kind(&self) -> AccountKind {
        self.kind
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn balance_amount(&self) -> Decimal {
        self.balance
    }

    pub fn balance(&self) -> Money {
        // Balance only ever moves by validated Money, so it stays within scale.
        Money::from_parts(self.balance, self.currency.clone())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn audit(&self) -> &AuditInfo {
        &self.audit
    }

    /// Increase the balance.
    pub fn apply_debit(&mut self, amount: &Money, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_can_post(amount)?;
        self.balance = self
            .balance
            .checked_add(amount.amount())
            .ok_or_else(|| DomainError::invalid_amount("account balance overflowed"))?;
        self.audit.touch(now);
        Ok(())
    }

    /// Decrease the balance; never below zero.
    pub fn apply_credit(&mut self, amount: &Money, now: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_can_post(amount)?;
        if self.balance < amount.amount() {
            return Err(DomainError::InsufficientBalance {
                available: self.balance,
                requested: amount.amount(),
            });
        }
        self.balance -= amount.amount();
        self.audit.touch(now);
        Ok(())
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.is_active = true;
        self.audit.touch(now);
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.audit.touch(now);
    }

    fn ensure_can_post(&self, amount: &Money) -> DomainResult<()> {
        if amount.currency() != &self.currency {
            return Err(DomainError::currency_mismatch(
                self.currency.code(),
                amount.currency().code(),
            ));
        }
        if !self.is_active {
            return Err(DomainError::AccountInactive(self.id.to_string()));
        }
        Ok(())
    }
}

impl AggregateRoot for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
