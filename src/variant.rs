//! Variant enumeration: numeric domain x arithmetic operation.
//!
//! Every behavior that differs by domain or operation matches on these
//! enums exhaustively instead of inspecting variant-name strings.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a variant name cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown variant: {0} (expected one of int_add, int_sub, int_mul, int_div, float_add, float_sub, float_mul, float_div)")]
pub struct UnknownVariant(pub String);

/// Numeric domain of the operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    /// Arbitrary-precision integers
    Int,
    /// Fixed-point decimals with two fractional digits
    Float,
}

impl Domain {
    /// Name used in variant identifiers
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
        }
    }
}

/// Arithmetic operation under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division (exact by construction)
    Div,
}

impl Operation {
    /// Name used in variant identifiers
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
        }
    }

    /// Symbol rendered into prompts
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "×",
            Self::Div => "÷",
        }
    }
}

/// A (domain, operation) pair under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variant {
    /// Numeric domain
    pub domain: Domain,
    /// Operation
    pub operation: Operation,
}

impl Variant {
    /// All eight variants in canonical order (int before float, add/sub/mul/div)
    pub const ALL: [Self; 8] = [
        Self::new(Domain::Int, Operation::Add),
        Self::new(Domain::Int, Operation::Sub),
        Self::new(Domain::Int, Operation::Mul),
        Self::new(Domain::Int, Operation::Div),
        Self::new(Domain::Float, Operation::Add),
        Self::new(Domain::Float, Operation::Sub),
        Self::new(Domain::Float, Operation::Mul),
        Self::new(Domain::Float, Operation::Div),
    ];

    /// Create a variant
    #[must_use]
    pub const fn new(domain: Domain, operation: Operation) -> Self {
        Self { domain, operation }
    }

    /// Position in [`Variant::ALL`]
    #[must_use]
    pub const fn index(self) -> usize {
        let d = match self.domain {
            Domain::Int => 0,
            Domain::Float => 4,
        };
        let o = match self.operation {
            Operation::Add => 0,
            Operation::Sub => 1,
            Operation::Mul => 2,
            Operation::Div => 3,
        };
        d + o
    }

    /// Identifier such as `int_add`
    #[must_use]
    pub fn name(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.domain.as_str(), self.operation.as_str())
    }
}

impl FromStr for Variant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, operation) = s
            .trim()
            .split_once('_')
            .ok_or_else(|| UnknownVariant(s.to_string()))?;
        let domain = match domain.to_lowercase().as_str() {
            "int" => Domain::Int,
            "float" => Domain::Float,
            _ => return Err(UnknownVariant(s.to_string())),
        };
        let operation = match operation.to_lowercase().as_str() {
            "add" => Operation::Add,
            "sub" => Operation::Sub,
            "mul" => Operation::Mul,
            "div" => Operation::Div,
            _ => return Err(UnknownVariant(s.to_string())),
        };
        Ok(Self::new(domain, operation))
    }
}

impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_all_variants_names() {
        let names: Vec<String> = Variant::ALL.iter().map(|v| v.name()).collect();
        assert_eq!(
            names,
            vec![
                "int_add",
                "int_sub",
                "int_mul",
                "int_div",
                "float_add",
                "float_sub",
                "float_mul",
                "float_div"
            ]
        );
    }

    #[test]
    fn test_index_matches_position() {
        for (i, variant) in Variant::ALL.iter().enumerate() {
            assert_eq!(variant.index(), i);
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        for variant in Variant::ALL {
            assert_eq!(variant.name().parse::<Variant>().unwrap(), variant);
        }
        assert_eq!(
            "FLOAT_DIV".parse::<Variant>().unwrap(),
            Variant::new(Domain::Float, Operation::Div)
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert!("int_pow".parse::<Variant>().is_err());
        assert!("complex_add".parse::<Variant>().is_err());
        let err = "add".parse::<Variant>().unwrap_err();
        assert!(err.to_string().contains("add"));
    }

    #[test]
    fn test_serde_as_string() {
        let v = Variant::new(Domain::Int, Operation::Mul);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"int_mul\"");
        let back: Variant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_operation_symbols() {
        assert_eq!(Operation::Add.symbol(), "+");
        assert_eq!(Operation::Sub.symbol(), "-");
        assert_eq!(Operation::Mul.symbol(), "×");
        assert_eq!(Operation::Div.symbol(), "÷");
    }
}
