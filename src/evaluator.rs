//! Exact expected results for operand pairs.

use crate::exact::{Decimal, Value, RESULT_SCALE};
use crate::generator::OperandPair;
use crate::variant::{Domain, Operation, Variant};
use num_integer::Integer;
use num_traits::Zero;
use thiserror::Error;

/// Errors that can occur while computing an expected result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("Division by zero in {0}")]
    DivisionByZero(Variant),

    #[error("Operand domain does not match variant {0}")]
    DomainMismatch(Variant),
}

/// Compute the exact expected result of `lhs <op> rhs`.
///
/// Integer division is floor division (exact for generated operands).
/// Fixed-point results are quantized to [`RESULT_SCALE`] digits with
/// round-half-even.
///
/// # Errors
///
/// Returns an error on a zero divisor or when the operands are not in the
/// variant's domain.
pub fn evaluate(variant: Variant, pair: &OperandPair) -> Result<Value, EvalError> {
    match variant.domain {
        Domain::Int => {
            let (Value::Int(lhs), Value::Int(rhs)) = (&pair.lhs, &pair.rhs) else {
                return Err(EvalError::DomainMismatch(variant));
            };
            let result = match variant.operation {
                Operation::Add => lhs + rhs,
                Operation::Sub => lhs - rhs,
                Operation::Mul => lhs * rhs,
                Operation::Div => {
                    if rhs.is_zero() {
                        return Err(EvalError::DivisionByZero(variant));
                    }
                    lhs.div_floor(rhs)
                }
            };
            Ok(Value::Int(result))
        }
        Domain::Float => {
            let (Value::Fixed(lhs), Value::Fixed(rhs)) = (&pair.lhs, &pair.rhs) else {
                return Err(EvalError::DomainMismatch(variant));
            };
            let result: Decimal = match variant.operation {
                Operation::Add => lhs + rhs,
                Operation::Sub => lhs - rhs,
                Operation::Mul => lhs * rhs,
                Operation::Div => lhs
                    .div_quantized(rhs, RESULT_SCALE)
                    .ok_or(EvalError::DivisionByZero(variant))?,
            };
            Ok(Value::Fixed(result.quantize(RESULT_SCALE)))
        }
    }
}
