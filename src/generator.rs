//! Operand generation for arithmetic trials.
//!
//! Operands for digit depth `d` have integer magnitude in `[10^(d-1), 10^d - 1]`.
//! Fixed-point operands carry two fractional digits. Division operands are
//! built as `dividend = divisor * quotient` so that the quotient is exact and
//! has the requested depth; the dividend may have more digits than `d`.
//!
//! Every trial draws from its own `ChaCha8Rng`, seeded from
//! `(seed, variant, depth, trial index)`, so a resumed run reproduces the
//! operands an uninterrupted run would have used.

use crate::exact::{pow10, Decimal, Value, OPERAND_SCALE};
use crate::variant::{Domain, Operation, Variant};
use num_bigint::{BigInt, RandBigInt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

/// Errors that can occur during operand generation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Invalid digit depth: {0} (must be at least 1)")]
    InvalidDepth(u32),
}

/// Left and right operand of one trial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperandPair {
    /// Left-hand operand (the dividend for division)
    pub lhs: Value,
    /// Right-hand operand (the divisor for division)
    pub rhs: Value,
}

/// Seeded operand generator
#[derive(Debug, Clone, Copy)]
pub struct OperandGenerator {
    seed: u64,
}

impl OperandGenerator {
    /// Create a generator with a base seed
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Base seed
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Deterministic RNG for one trial of one cell
    #[must_use]
    pub fn rng_for(&self, variant: Variant, depth: u32, index: u64) -> ChaCha8Rng {
        let mut h = self.seed;
        for part in [variant.index() as u64, u64::from(depth), index] {
            h = splitmix64(h ^ part);
        }
        ChaCha8Rng::seed_from_u64(h)
    }

    /// Generate the operands of trial `index` in cell `(variant, depth)`
    ///
    /// # Errors
    ///
    /// Returns `GenerationError::InvalidDepth` if `depth` is zero.
    pub fn generate(
        &self,
        variant: Variant,
        depth: u32,
        index: u64,
    ) -> Result<OperandPair, GenerationError> {
        let mut rng = self.rng_for(variant, depth, index);
        generate_with(&mut rng, variant, depth)
    }
}

impl Default for OperandGenerator {
    fn default() -> Self {
        Self::new(42)
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Inclusive integer bounds `[10^(d-1), 10^d - 1]`
///
/// # Errors
///
/// Returns `GenerationError::InvalidDepth` if `depth` is zero.
pub fn depth_bounds(depth: u32) -> Result<(BigInt, BigInt), GenerationError> {
    if depth == 0 {
        return Err(GenerationError::InvalidDepth(depth));
    }
    Ok((pow10(depth - 1), pow10(depth) - 1u8))
}

fn draw_int<R: Rng + ?Sized>(rng: &mut R, low: &BigInt, high: &BigInt) -> BigInt {
    rng.gen_bigint_range(low, &(high + 1u8))
}

fn draw_fixed<R: Rng + ?Sized>(rng: &mut R, low: &BigInt, high: &BigInt) -> Decimal {
    let unit = pow10(OPERAND_SCALE);
    let scaled_low = low * &unit;
    let scaled_high = (high + 1u8) * &unit - 1u8;
    Decimal::new(draw_int(rng, &scaled_low, &scaled_high), OPERAND_SCALE)
}

/// Generate one operand pair from an explicit RNG
///
/// # Errors
///
/// Returns `GenerationError::InvalidDepth` if `depth` is zero.
pub fn generate_with<R: Rng + ?Sized>(
    rng: &mut R,
    variant: Variant,
    depth: u32,
) -> Result<OperandPair, GenerationError> {
    let (low, high) = depth_bounds(depth)?;

    let pair = match (variant.domain, variant.operation) {
        (Domain::Int, Operation::Div) => {
            let divisor = draw_int(rng, &low, &high);
            let quotient = draw_int(rng, &low, &high);
            OperandPair {
                lhs: Value::Int(&divisor * &quotient),
                rhs: Value::Int(divisor),
            }
        }
        (Domain::Int, _) => OperandPair {
            lhs: Value::Int(draw_int(rng, &low, &high)),
            rhs: Value::Int(draw_int(rng, &low, &high)),
        },
        (Domain::Float, Operation::Div) => {
            // Integral quotient keeps the dividend at two fractional digits.
            let divisor = draw_fixed(rng, &low, &high);
            let quotient = Decimal::from_int(draw_int(rng, &low, &high));
            OperandPair {
                lhs: Value::Fixed(&divisor * &quotient),
                rhs: Value::Fixed(divisor),
            }
        }
        (Domain::Float, _) => OperandPair {
            lhs: Value::Fixed(draw_fixed(rng, &low, &high)),
            rhs: Value::Fixed(draw_fixed(rng, &low, &high)),
        },
    };

    Ok(pair)
}
