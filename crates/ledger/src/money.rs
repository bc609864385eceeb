use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use wallet_core::{DomainError, DomainResult, ValueObject};

use crate::currency::Currency;

/// Non-negative amount in a specific currency.
///
/// The amount never carries more fractional digits than the currency allows
/// (trailing zeros are ignored, so `10.100 USD` is accepted as `10.10`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr", into = "MoneyRepr")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

#[derive(Serialize, Deserialize)]
struct MoneyRepr {
    amount: Decimal,
    currency: Currency,
}

impl TryFrom<MoneyRepr> for Money {
    type Error = DomainError;

    fn try_from(value: MoneyRepr) -> Result<Self, Self::Error> {
        Money::new(value.amount, value.currency)
    }
}

impl From<Money> for MoneyRepr {
    fn from(value: Money) -> Self {
        Self {
            amount: value.amount,
            currency: value.currency,
        }
    }
}

/// Number of significant fractional digits.
pub(crate) fn fractional_digits(amount: Decimal) -> u32 {
    amount.normalize().scale()
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> DomainResult<Self> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(DomainError::invalid_amount(format!(
                "money amount cannot be negative: {amount}"
            )));
        }

        let digits = fractional_digits(amount);
        if digits > currency.decimal_places() {
            return Err(DomainError::invalid_amount(format!(
                "amount {amount} has {digits} decimal places, {} allows {}",
                currency.code(),
                currency.decimal_places()
            )));
        }

        Ok(Self {
            amount: amount.normalize(),
            currency,
        })
    }

    /// Skip validation for values derived from already-validated money.
    pub(crate) fn from_parts(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    /// Build from the currency's minor unit (e.g. cents): `1050 USD -> 10.50`.
    pub fn from_smallest_unit(units: i64, currency: Currency) -> DomainResult<Self> {
        let amount = Decimal::try_new(units, currency.decimal_places())
            .map_err(|e| DomainError::invalid_amount(e.to_string()))?;
        Self::new(amount, currency)
    }

    /// Round a raw decimal to the currency scale, then validate.
    pub fn rounded(
        amount: Decimal,
        currency: Currency,
        strategy: RoundingStrategy,
    ) -> DomainResult<Self> {
        let amount = amount.round_dp_with_strategy(currency.decimal_places(), strategy);
        Self::new(amount, currency)
    }

    /// Round to the currency scale with the given strategy.
    pub fn round(&self, strategy: RoundingStrategy) -> Self {
        Self {
            amount: self
                .amount
                .round_dp_with_strategy(self.currency.decimal_places(), strategy)
                .normalize(),
            currency: self.currency.clone(),
        }
    }

    /// Banker's rounding to the currency scale.
    pub fn round_half_even(&self) -> Self {
        self.round(RoundingStrategy::MidpointNearestEven)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn add(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::invalid_amount("money addition overflowed"))?;
        Money::new(amount, self.currency.clone())
    }

    pub fn subtract(&self, other: &Money) -> DomainResult<Money> {
        self.ensure_same_currency(other)?;
        if self.amount < other.amount {
            return Err(DomainError::InsufficientBalance {
                available: self.amount,
                requested: other.amount,
            });
        }
        Money::new(self.amount - other.amount, self.currency.clone())
    }

    fn ensure_same_currency(&self, other: &Money) -> DomainResult<()> {
        if self.currency != other.currency {
            return Err(DomainError::currency_mismatch(
                self.currency.code(),
                other.currency.code(),
            ));
        }
        Ok(())
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut shown = self.amount;
        shown.rescale(self.currency.decimal_places());
        write!(f, "{}{}", self.currency.symbol(), shown)
    }
}

impl ValueObject for Money {}
