use serde::{Deserialize, Serialize};

use wallet_core::{DomainError, DomainResult, ValueObject};

/// Upper bound on decimal places (matches the precision of `rust_decimal`).
pub const MAX_DECIMAL_PLACES: u32 = 28;

/// ISO-4217 style currency.
///
/// Equality and hashing consider the code only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Currency {
    code: String,
    decimal_places: u32,
    symbol: String,
    name: String,
}

impl Currency {
    pub fn new(
        code: impl Into<String>,
        decimal_places: u32,
        symbol: impl Into<String>,
        name: impl Into<String>,
    ) -> DomainResult<Self> {
        let code = code.into();
        let symbol = symbol.into();
        let name = name.into();

        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::invalid_argument(format!(
                "currency code must be a 3-letter ISO code, got '{code}'"
            )));
        }
        if decimal_places > MAX_DECIMAL_PLACES {
            return Err(DomainError::invalid_argument(format!(
                "decimal places must be between 0 and {MAX_DECIMAL_PLACES}, got {decimal_places}"
            )));
        }
        if symbol.trim().is_empty() {
            return Err(DomainError::invalid_argument("currency symbol cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::invalid_argument("currency name cannot be empty"));
        }

        Ok(Self {
            code,
            decimal_places,
            symbol,
            name,
        })
    }

    fn builtin(code: &str, decimal_places: u32, symbol: &str, name: &str) -> Self {
        Self {
            code: code.to_string(),
            decimal_places,
            symbol: symbol.to_string(),
            name: name.to_string(),
        }
    }

    pub fn ngn() -> Self {
        Self::builtin("NGN", 2, "₦", "Naira")
    }

    pub fn usd() -> Self {
        Self::builtin("USD", 2, "$", "US Dollar")
    }

    pub fn eur() -> Self {
        Self::builtin("EUR", 2, "€", "Euro")
    }

    pub fn gbp() -> Self {
        Self::builtin("GBP", 2, "£", "Pounds")
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn decimal_places(&self) -> u32 {
        self.decimal_places
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Currency {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for Currency {}

impl core::hash::Hash for Currency {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.code.hash(state);
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} ({})", self.code, self.symbol)
    }
}

impl ValueObject for Currency {}

/// Fixed set of currencies the wallet accepts.
#[derive(Debug, Default, Copy, Clone)]
pub struct CurrencyRegistry;

impl CurrencyRegistry {
    pub fn supported() -> Vec<Currency> {
        vec![Currency::ngn(), Currency::usd(), Currency::eur(), Currency::gbp()]
    }

    pub fn is_supported(code: &str) -> bool {
        Self::supported().iter().any(|c| c.code() == code)
    }

    /// Resolve a code (exact, case-sensitive) to a registered currency.
    pub fn from_code(code: &str) -> DomainResult<Currency> {
        Self::supported()
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or_else(|| DomainError::UnsupportedCurrency(code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_codes() {
        let usd = CurrencyRegistry::from_code("USD").unwrap();
        assert_eq!(usd.decimal_places(), 2);
        assert_eq!(usd.symbol(), "$");
        assert!(CurrencyRegistry::is_supported("NGN"));
        assert_eq!(CurrencyRegistry::supported().len(), 4);
    }

    #[test]
    fn unknown_code_is_unsupported() {
        let err = CurrencyRegistry::from_code("JPY").unwrap_err();
        assert_eq!(err, DomainError::UnsupportedCurrency("JPY".into()));
        assert!(CurrencyRegistry::from_code("usd").is_err());
    }

    #[test]
    fn equality_is_by_code_only() {
        let custom = Currency::new("USD", 4, "US$", "Dollar").unwrap();
        assert_eq!(custom, Currency::usd());
        assert_ne!(Currency::eur(), Currency::usd());
    }

    #[test]
    fn new_validates_fields() {
        assert!(Currency::new("US", 2, "$", "x").is_err());
        assert!(Currency::new("USD", 29, "$", "x").is_err());
        assert!(Currency::new("USD", 2, " ", "x").is_err());
        assert!(Currency::new("USD", 2, "$", "").is_err());
        assert!(Currency::new("JPY", 0, "¥", "Yen").is_ok());
    }
}
