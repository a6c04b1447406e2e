//! Amount types
//!
//! Domain primitives for monetary values. All amounts are validated at
//! construction time, so an invalid value never reaches the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum magnitude of a single amount (1 trillion)
const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// Maximum decimal places
const MAX_SCALE: u32 = 4;

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Maximum 4 decimal places
/// - Maximum value is 1 trillion
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use reseller_ledger::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(2550, 2)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(2550, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "AmountInput", into = "String")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount must not be zero")]
    Zero,

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

/// Checks shared by positive and signed amounts.
fn check_bounds(value: Decimal) -> Result<Decimal, AmountError> {
    // Trailing zeros ("10.5000") are not extra precision
    let value = value.normalize();
    if value.scale() > MAX_SCALE {
        return Err(AmountError::TooManyDecimals(value.scale()));
    }
    if value.abs() > Decimal::from(MAX_AMOUNT) {
        return Err(AmountError::Overflow);
    }
    Ok(value)
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::TooManyDecimals` if more than 4 decimal places
    /// - `AmountError::Overflow` if value > 1 trillion
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        check_bounds(value).map(Self)
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        format!("{:.4}", amount.0)
    }
}

/// Wire form of an amount: the admin panel sends both `"12.50"` and `12.5`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    /// Raw text as sent, for commands that validate later
    pub fn into_text(self) -> String {
        match self {
            AmountInput::Text(s) => s,
            AmountInput::Number(n) => n.to_string(),
        }
    }

    fn into_decimal(self) -> Result<Decimal, AmountError> {
        let raw = self.into_text();
        Decimal::from_str(raw.trim())
            .or_else(|_| Decimal::from_scientific(raw.trim()))
            .map_err(|e| AmountError::ParseError(e.to_string()))
    }
}

impl TryFrom<AmountInput> for Amount {
    type Error = AmountError;

    fn try_from(value: AmountInput) -> Result<Self, Self::Error> {
        Amount::new(value.into_decimal()?)
    }
}

/// SignedAmount is a non-zero correction applied by an administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AmountInput", into = "String")]
pub struct SignedAmount(Decimal);

impl SignedAmount {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_zero() {
            return Err(AmountError::Zero);
        }
        check_bounds(value).map(Self)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl FromStr for SignedAmount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        SignedAmount::new(decimal)
    }
}

impl TryFrom<AmountInput> for SignedAmount {
    type Error = AmountError;

    fn try_from(value: AmountInput) -> Result<Self, Self::Error> {
        SignedAmount::new(value.into_decimal()?)
    }
}

impl From<SignedAmount> for String {
    fn from(amount: SignedAmount) -> Self {
        format!("{:.4}", amount.0)
    }
}

impl fmt::Display for SignedAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(amount.value(), dec!(100));
    }

    #[test]
    fn test_amount_zero_and_negative_rejected() {
        assert!(matches!(Amount::new(Decimal::ZERO), Err(AmountError::NotPositive(_))));
        assert!(matches!(Amount::new(dec!(-5)), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_too_many_decimals() {
        assert!(matches!(
            Amount::new(dec!(0.12345)),
            Err(AmountError::TooManyDecimals(5))
        ));
    }

    #[test]
    fn test_amount_trailing_zeros_accepted() {
        let amount: Amount = "10.500000".parse().unwrap();
        assert_eq!(amount.value(), dec!(10.5));
    }

    #[test]
    fn test_amount_overflow() {
        assert!(matches!(
            Amount::new(dec!(1000000000000.0001)),
            Err(AmountError::Overflow)
        ));
        assert!(Amount::new(dec!(1000000000000)).is_ok());
    }

    #[test]
    fn test_amount_deserialize_string_and_number() {
        let from_text: Amount = serde_json::from_str("\"25.75\"").unwrap();
        let from_number: Amount = serde_json::from_str("25.75").unwrap();
        assert_eq!(from_text, from_number);

        let bad: Result<Amount, _> = serde_json::from_str("\"-3\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_amount_serializes_as_fixed_string() {
        let amount = Amount::new(dec!(7.5)).unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"7.5000\"");
    }

    #[test]
    fn test_signed_amount() {
        let debit = SignedAmount::new(dec!(-12.5)).unwrap();
        assert_eq!(debit.value(), dec!(-12.5));

        assert!(matches!(SignedAmount::new(Decimal::ZERO), Err(AmountError::Zero)));
    }
}
