//! Monetary quantities (§3).
//!
//! A monetary amount is always a `{amount, currency}` pair. The engine never
//! converts currencies — any operation mixing two currencies fails rather
//! than silently guessing an exchange rate.

use crate::error::Error;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO-4217-shaped three letter currency code, stored uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency([u8; 3]);

impl Currency {
    pub fn new(code: &str) -> Result<Self, Error> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(Error::invalid_input(
                "/currency",
                "currency must be a 3-letter code",
            ));
        }
        let mut buf = [0u8; 3];
        for (i, b) in bytes.iter().enumerate() {
            buf[i] = b.to_ascii_uppercase();
        }
        Ok(Currency(buf))
    }

    pub fn usd() -> Self {
        Currency::new("USD").unwrap()
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Currency::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    fn check_currency(&self, other: &Money) -> Result<(), Error> {
        if self.currency != other.currency {
            return Err(Error::invalid_input(
                "/currency",
                format!(
                    "cross-currency operation: {} vs {}",
                    self.currency, other.currency
                ),
            ));
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, Error> {
        self.check_currency(other)?;
        Ok(Money::new(self.amount + other.amount, self.currency))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, Error> {
        self.check_currency(other)?;
        Ok(Money::new(self.amount - other.amount, self.currency))
    }

    /// Percentage as a decimal fraction, e.g. `dec!(0.025)` for 2.5%.
    pub fn percentage(&self, fraction: Decimal) -> Money {
        Money::new(self.amount * fraction, self.currency)
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.currency != other.currency {
            return None;
        }
        self.amount.partial_cmp(&other.amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cross_currency_add_fails() {
        let usd = Money::new(dec!(10), Currency::usd());
        let eur = Money::new(dec!(10), Currency::new("EUR").unwrap());
        assert!(usd.checked_add(&eur).is_err());
    }

    #[test]
    fn same_currency_add_succeeds() {
        let a = Money::new(dec!(10), Currency::usd());
        let b = Money::new(dec!(5), Currency::usd());
        let sum = a.checked_add(&b).unwrap();
        assert_eq!(sum.amount, dec!(15));
    }

    #[test]
    fn percentage_computes_fee() {
        let price = Money::new(dec!(100), Currency::usd());
        let fee = price.percentage(dec!(0.025));
        assert_eq!(fee.amount, dec!(2.500));
    }
}
