//! Decimal token amounts.
//!
//! On-chain amounts routinely exceed the range of native integers and floats, so
//! every amount that flows between the API, the adapters and the stores is a
//! decimal string backed by [`BigDecimal`]. A string that does not parse is kept
//! as the NaN amount: it never compares as greater, less or equal to anything
//! and is detectable with [`Amount::is_nan`].

mod format;

use alloy_primitives::U256;
use bigdecimal::{
    num_bigint::{BigInt, Sign},
    BigDecimal, Zero,
};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{cmp::Ordering, convert::Infallible, fmt, str::FromStr};

/// Most significant digits a parsed amount may carry.
pub const MAX_DIGITS: u64 = 1024;
/// Largest power of ten a parsed amount may be scaled by, either way.
pub const MAX_SCALE: u64 = 1024;
const MAX_INPUT_LEN: usize = 4096;

/// A decimal amount, or NaN when the source string was not a number.
#[derive(Clone)]
pub struct Amount(Option<BigDecimal>);

impl Amount {
    /// Parse a decimal string. Invalid input yields the NaN amount, and so
    /// does input beyond [`MAX_DIGITS`] digits or a [`MAX_SCALE`] exponent.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.len() > MAX_INPUT_LEN {
            return Self::nan();
        }
        Self(
            BigDecimal::from_str(value)
                .ok()
                .filter(|value| {
                    value.digits() <= MAX_DIGITS
                        && value.fractional_digit_count().unsigned_abs() <= MAX_SCALE
                }),
        )
    }

    pub fn zero() -> Self {
        Self(Some(BigDecimal::zero()))
    }

    pub const fn nan() -> Self {
        Self(None)
    }

    pub const fn is_nan(&self) -> bool {
        self.0.is_none()
    }

    pub fn is_zero(&self) -> bool {
        self.0.as_ref().is_some_and(Zero::is_zero)
    }

    /// Convert base units (e.g. wei) into a decimal amount.
    pub fn from_units(value: U256, decimals: u8) -> Self {
        let int = BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>());
        Self(Some(BigDecimal::new(int, i64::from(decimals))))
    }

    /// Convert into base units, truncating precision beyond `decimals`.
    ///
    /// Returns `None` for NaN, negative or out-of-range amounts.
    pub fn to_units(&self, decimals: u8) -> Option<U256> {
        let value = self.0.as_ref()?;
        if *value < BigDecimal::zero() {
            return None;
        }

        let scale = BigDecimal::new(BigInt::from(1), -i64::from(decimals));
        let (int, _) = (value * scale).with_scale(0).as_bigint_and_exponent();
        let (_, bytes) = int.to_bytes_be();
        if bytes.len() > 32 {
            return None;
        }
        U256::try_from_be_slice(&bytes)
    }

    pub fn plus(&self, other: &Self) -> Self {
        self.zip(other, |a, b| Some(a + b))
    }

    pub fn minus(&self, other: &Self) -> Self {
        self.zip(other, |a, b| Some(a - b))
    }

    pub fn mul(&self, other: &Self) -> Self {
        self.zip(other, |a, b| Some(a * b))
    }

    /// Division by zero yields NaN.
    pub fn div(&self, other: &Self) -> Self {
        self.zip(other, |a, b| if b.is_zero() { None } else { Some(a / b) })
    }

    pub fn gt(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Greater)
    }

    pub fn gte(&self, other: &Self) -> bool {
        matches!(
            self.compare(other),
            Some(Ordering::Greater | Ordering::Equal)
        )
    }

    pub fn lt(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Less)
    }

    pub fn lte(&self, other: &Self) -> bool {
        matches!(self.compare(other), Some(Ordering::Less | Ordering::Equal))
    }

    pub fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Sum of all amounts. NaN if any element is NaN.
    pub fn total<'a>(amounts: impl IntoIterator<Item = &'a Self>) -> Self {
        amounts
            .into_iter()
            .fold(Self::zero(), |acc, amount| acc.plus(amount))
    }

    fn compare(&self, other: &Self) -> Option<Ordering> {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn zip(
        &self,
        other: &Self,
        op: impl FnOnce(&BigDecimal, &BigDecimal) -> Option<BigDecimal>,
    ) -> Self {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Self(op(a, b)),
            _ => Self::nan(),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => f.write_str(&format::plain(&value.normalized())),
            None => f.write_str("NaN"),
        }
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({self})")
    }
}

impl FromStr for Amount {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(Some(BigDecimal::from(value)))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl de::Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                Ok(Amount::parse(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                Ok(Amount::from(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                Ok(Amount(Some(BigDecimal::from(v))))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                Ok(Amount::parse(&v.to_string()))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Amount, E> {
                Ok(Amount::nan())
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

pub fn is_nan(value: &str) -> bool {
    Amount::parse(value).is_nan()
}

pub fn gt(a: &str, b: &str) -> bool {
    Amount::parse(a).gt(&Amount::parse(b))
}

pub fn gte(a: &str, b: &str) -> bool {
    Amount::parse(a).gte(&Amount::parse(b))
}

pub fn lt(a: &str, b: &str) -> bool {
    Amount::parse(a).lt(&Amount::parse(b))
}

pub fn lte(a: &str, b: &str) -> bool {
    Amount::parse(a).lte(&Amount::parse(b))
}

pub fn eq(a: &str, b: &str) -> bool {
    Amount::parse(a).eq(&Amount::parse(b))
}

pub fn plus(a: &str, b: &str) -> Amount {
    Amount::parse(a).plus(&Amount::parse(b))
}

pub fn minus(a: &str, b: &str) -> Amount {
    Amount::parse(a).minus(&Amount::parse(b))
}

pub fn mul(a: &str, b: &str) -> Amount {
    Amount::parse(a).mul(&Amount::parse(b))
}

pub fn div(a: &str, b: &str) -> Amount {
    Amount::parse(a).div(&Amount::parse(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_strings_are_nan() {
        for invalid in ["", "abc", "1.2.3", "NaN", "0x10", "  "] {
            assert!(is_nan(invalid), "{invalid:?} should be NaN");
            assert!(!gt(invalid, "1"));
            assert!(!gte(invalid, "1"));
            assert!(!lt(invalid, "1"));
            assert!(!lte(invalid, "1"));
            assert!(!eq(invalid, "1"));
            assert!(!gt("1", invalid));
            assert!(!lte("1", invalid));
        }
        assert!(!eq("NaN", "NaN"));
        assert!(!gte("abc", "abc"));
    }

    #[test]
    fn test_comparisons() {
        assert!(gt("2", "1.999999999999999999999"));
        assert!(gte("1.0", "1"));
        assert!(lt("-1", "0"));
        assert!(lte("0.5", "0.50"));
        assert!(eq("100", "1e2"));
    }

    #[test]
    fn test_arithmetic_keeps_precision() {
        assert_eq!(plus("0.1", "0.2").to_string(), "0.3");
        assert_eq!(
            plus("123456789012345678901234567890", "1").to_string(),
            "123456789012345678901234567891"
        );
        assert_eq!(
            minus("1", "0.000000000000000000000001").to_string(),
            "0.999999999999999999999999"
        );
        assert_eq!(mul("1.5", "1.5").to_string(), "2.25");
        assert_eq!(div("10", "4").to_string(), "2.5");
    }

    #[test]
    fn test_nan_propagates() {
        assert!(plus("x", "1").is_nan());
        assert!(mul("1", "").is_nan());
        assert!(div("1", "0").is_nan());
        assert!(Amount::total([&Amount::from(1), &Amount::nan()]).is_nan());
    }

    #[test]
    fn test_oversized_input_is_nan() {
        for oversized in ["1e999999999", "1e-999999999", "-5E+4000000000000"] {
            assert!(is_nan(oversized), "{oversized:?} should be NaN");
        }
        assert!(is_nan(&"9".repeat(MAX_DIGITS as usize + 1)));
        assert!(is_nan(&"1".repeat(MAX_INPUT_LEN + 1)));
        assert!(serde_json::from_str::<Amount>("\"1e999999999\"").unwrap().is_nan());

        let largest = format!("1e{MAX_SCALE}");
        assert_eq!(Amount::parse(&largest).to_string().len(), MAX_SCALE as usize + 1);
        assert_eq!(Amount::parse(&"9".repeat(MAX_DIGITS as usize)).to_string().len(), 1024);
    }

    #[test]
    fn test_total() {
        let values = [
            Amount::parse("1.5"),
            Amount::parse("2.25"),
            Amount::parse("0.25"),
        ];
        assert_eq!(Amount::total(&values).to_string(), "4");
        assert!(Amount::total([]).is_zero());
    }

    #[test]
    fn test_units_conversion() {
        let wei = U256::from(1_500_000_000_000_000_000u128);
        let amount = Amount::from_units(wei, 18);
        assert_eq!(amount.to_string(), "1.5");
        assert_eq!(amount.to_units(18), Some(wei));

        // Truncates precision below the token decimals.
        assert_eq!(Amount::parse("1.0000019").to_units(6), Some(U256::from(1_000_001)));

        assert_eq!(Amount::parse("-1").to_units(18), None);
        assert_eq!(Amount::nan().to_units(18), None);
        assert_eq!(Amount::parse("1e100").to_units(0), None);
    }

    #[test]
    fn test_serde() {
        let amount: Amount = serde_json::from_str("\"12.5\"").unwrap();
        assert_eq!(amount.to_string(), "12.5");

        let amount: Amount = serde_json::from_str("42").unwrap();
        assert!(amount.eq(&Amount::from(42)));

        let amount: Amount = serde_json::from_str("\"oops\"").unwrap();
        assert!(amount.is_nan());

        assert_eq!(
            serde_json::to_string(&Amount::parse("0.10")).unwrap(),
            "\"0.1\""
        );
    }
}
