//! Exact fixed-point decimal arithmetic.
//!
//! All expected results, parsed answers and error magnitudes are carried as
//! arbitrary-precision integers or scaled decimals. Binary floating point is
//! never used for a value that is compared against a model's answer.

use crate::variant::Domain;
use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits carried by fixed-point operands
pub const OPERAND_SCALE: u32 = 2;

/// Fractional digits of fixed-point results, parsed answers and errors
pub const RESULT_SCALE: u32 = 4;

/// Error returned when a decimal literal is malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid decimal literal: {0:?}")]
pub struct ParseDecimalError(pub String);

/// Exact decimal value `mantissa / 10^scale`
#[derive(Debug, Clone)]
pub struct Decimal {
    mantissa: BigInt,
    scale: u32,
}

/// `10^exp` as a big integer
#[must_use]
pub fn pow10(exp: u32) -> BigInt {
    num_traits::pow(BigInt::from(10u8), exp as usize)
}

/// Divide `n / d` rounding half to even. `d` must be non-zero.
fn div_round_half_even(n: &BigInt, d: &BigInt) -> BigInt {
    let (n, d) = if d.is_negative() {
        (-n, -d)
    } else {
        (n.clone(), d.clone())
    };
    // Truncating division: the remainder carries the sign of `n`.
    let (mut q, r) = n.div_rem(&d);
    if r.is_zero() {
        return q;
    }
    let step = if r.is_negative() {
        -BigInt::one()
    } else {
        BigInt::one()
    };
    let twice = r.abs() * 2u8;
    match twice.cmp(&d) {
        Ordering::Greater => q += step,
        Ordering::Equal if q.is_odd() => q += step,
        _ => {}
    }
    q
}

impl Decimal {
    /// Create from a scaled mantissa
    #[must_use]
    pub const fn new(mantissa: BigInt, scale: u32) -> Self {
        Self { mantissa, scale }
    }

    /// Create an integral decimal with scale 0
    #[must_use]
    pub const fn from_int(value: BigInt) -> Self {
        Self::new(value, 0)
    }

    /// Zero at the given scale
    #[must_use]
    pub fn zero(scale: u32) -> Self {
        Self::new(BigInt::zero(), scale)
    }

    /// Scaled integer representation
    #[must_use]
    pub const fn mantissa(&self) -> &BigInt {
        &self.mantissa
    }

    /// Number of fractional digits
    #[must_use]
    pub const fn scale(&self) -> u32 {
        self.scale
    }

    /// True when the value is zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    /// Absolute value
    #[must_use]
    pub fn abs(&self) -> Self {
        Self::new(self.mantissa.abs(), self.scale)
    }

    fn mantissa_at(&self, scale: u32) -> BigInt {
        debug_assert!(scale >= self.scale);
        &self.mantissa * pow10(scale - self.scale)
    }

    /// Rescale to exactly `scale` fractional digits, rounding half to even
    #[must_use]
    pub fn quantize(&self, scale: u32) -> Self {
        if scale >= self.scale {
            return Self::new(self.mantissa_at(scale), scale);
        }
        let divisor = pow10(self.scale - scale);
        Self::new(div_round_half_even(&self.mantissa, &divisor), scale)
    }

    /// Exact quotient rounded half to even at `scale` digits; `None` on division by zero
    #[must_use]
    pub fn div_quantized(&self, other: &Self, scale: u32) -> Option<Self> {
        if other.is_zero() {
            return None;
        }
        let numerator = &self.mantissa * pow10(scale + other.scale);
        let denominator = &other.mantissa * pow10(self.scale);
        Some(Self::new(
            div_round_half_even(&numerator, &denominator),
            scale,
        ))
    }

    /// Integer part, truncated toward zero
    #[must_use]
    pub fn trunc(&self) -> BigInt {
        // BigInt division truncates toward zero.
        &self.mantissa / pow10(self.scale)
    }

    /// True when the value has no fractional part
    #[must_use]
    pub fn is_integral(&self) -> bool {
        (&self.mantissa % pow10(self.scale)).is_zero()
    }

    /// Lossy conversion for rates and display only
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(0.0)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let scale = self.scale.max(other.scale);
        self.mantissa_at(scale).cmp(&other.mantissa_at(scale))
    }
}

impl Add for &Decimal {
    type Output = Decimal;

    fn add(self, rhs: Self) -> Decimal {
        let scale = self.scale.max(rhs.scale);
        Decimal::new(self.mantissa_at(scale) + rhs.mantissa_at(scale), scale)
    }
}

impl Sub for &Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Self) -> Decimal {
        let scale = self.scale.max(rhs.scale);
        Decimal::new(self.mantissa_at(scale) - rhs.mantissa_at(scale), scale)
    }
}

impl Mul for &Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Self) -> Decimal {
        Decimal::new(&self.mantissa * &rhs.mantissa, self.scale + rhs.scale)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.abs().to_string();
        let sign = if self.mantissa.is_negative() { "-" } else { "" };
        if self.scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let scale = self.scale as usize;
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    /// Parse `[+-]digits[.digits]`; either side of the point may be empty but not both
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDecimalError(s.to_string());
        let trimmed = s.trim();
        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !all_digits(int_part)
            || !all_digits(frac_part)
        {
            return Err(err());
        }
        let digits = format!("{int_part}{frac_part}");
        let mut mantissa: BigInt = digits.parse().map_err(|_| err())?;
        if negative {
            mantissa = -mantissa;
        }
        let scale = u32::try_from(frac_part.len()).map_err(|_| err())?;
        Ok(Self::new(mantissa, scale))
    }
}

impl Serialize for Decimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Decimal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A value in one of the two numeric domains
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Arbitrary-precision integer
    Int(BigInt),
    /// Fixed-point decimal
    Fixed(Decimal),
}

impl Value {
    /// Domain this value belongs to
    #[must_use]
    pub const fn domain(&self) -> Domain {
        match self {
            Self::Int(_) => Domain::Int,
            Self::Fixed(_) => Domain::Float,
        }
    }

    /// View as a decimal (integers get scale 0)
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        match self {
            Self::Int(i) => Decimal::from_int(i.clone()),
            Self::Fixed(d) => d.clone(),
        }
    }

    /// Parse a literal into the given domain's canonical form.
    ///
    /// Integers accept float-formatted literals (`15.0`, `15.`) and truncate
    /// toward zero; fixed-point values are quantized to [`RESULT_SCALE`].
    ///
    /// # Errors
    ///
    /// Returns `ParseDecimalError` if the literal is malformed.
    pub fn parse_in(domain: Domain, literal: &str) -> Result<Self, ParseDecimalError> {
        let decimal: Decimal = literal.parse()?;
        Ok(match domain {
            Domain::Int => Self::Int(decimal.trunc()),
            Domain::Float => Self::Fixed(decimal.quantize(RESULT_SCALE)),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Fixed(d) => write!(f, "{d}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(dec("84.00").to_string(), "84.00");
        assert_eq!(dec("-0.5").to_string(), "-0.5");
        assert_eq!(dec("62.").to_string(), "62");
        assert_eq!(dec(".25").to_string(), "0.25");
        assert_eq!(dec("+7").to_string(), "7");
        assert_eq!(dec("0.0007").to_string(), "0.0007");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<Decimal>().is_err());
        assert!(".".parse::<Decimal>().is_err());
        assert!("-".parse::<Decimal>().is_err());
        assert!("1.2.3".parse::<Decimal>().is_err());
        assert!("1e5".parse::<Decimal>().is_err());
        assert!("12a".parse::<Decimal>().is_err());
    }

    #[test]
    fn test_equality_ignores_scale() {
        assert_eq!(dec("7"), dec("7.0000"));
        assert_eq!(dec("1.50"), dec("1.5"));
        assert_ne!(dec("1.5"), dec("1.05"));
        assert!(dec("-2") < dec("1.99"));
    }

    #[test]
    fn test_add_sub_mul_exact() {
        assert_eq!((&dec("0.10") + &dec("0.20")).to_string(), "0.30");
        assert_eq!((&dec("10.00") - &dec("12.25")).to_string(), "-2.25");
        assert_eq!((&dec("12.34") * &dec("56.78")).to_string(), "700.6652");
    }

    #[test]
    fn test_quantize_half_even() {
        assert_eq!(dec("2.5").quantize(0).to_string(), "2");
        assert_eq!(dec("3.5").quantize(0).to_string(), "4");
        assert_eq!(dec("-2.5").quantize(0).to_string(), "-2");
        assert_eq!(dec("-3.5").quantize(0).to_string(), "-4");
        assert_eq!(dec("1.23456").quantize(4).to_string(), "1.2346");
        assert_eq!(dec("1.23445").quantize(4).to_string(), "1.2344");
        assert_eq!(dec("7").quantize(4).to_string(), "7.0000");
    }

    #[test]
    fn test_div_quantized() {
        let q = dec("84.00").div_quantized(&dec("12.00"), RESULT_SCALE).unwrap();
        assert_eq!(q.to_string(), "7.0000");

        let q = dec("1").div_quantized(&dec("3"), RESULT_SCALE).unwrap();
        assert_eq!(q.to_string(), "0.3333");

        let q = dec("-2").div_quantized(&dec("3"), RESULT_SCALE).unwrap();
        assert_eq!(q.to_string(), "-0.6667");

        assert!(dec("1").div_quantized(&dec("0.00"), 4).is_none());
    }

    #[test]
    fn test_trunc_toward_zero() {
        assert_eq!(dec("15.9").trunc(), BigInt::from(15));
        assert_eq!(dec("-15.9").trunc(), BigInt::from(-15));
        assert!(dec("15.000").is_integral());
        assert!(!dec("15.001").is_integral());
    }

    #[test]
    fn test_value_parse_in_domain() {
        assert_eq!(
            Value::parse_in(Domain::Int, "15.0").unwrap(),
            Value::Int(BigInt::from(15))
        );
        let v = Value::parse_in(Domain::Float, "7").unwrap();
        assert_eq!(v.to_string(), "7.0000");
        assert_eq!(v.domain(), Domain::Float);
    }

    #[test]
    fn test_large_values_stay_exact() {
        let a = dec("99999999999999999999.99");
        let b = dec("99999999999999999999.99");
        assert_eq!(
            (&a * &b).to_string(),
            "9999999999999999999998000000000000000000.0001"
        );
    }

    #[test]
    fn test_decimal_serde_string() {
        let d = dec("5.0000");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"5.0000\"");
        let back: Decimal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), "5.0000");
    }
}
