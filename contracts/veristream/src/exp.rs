//! Fixed-point ratios stored as a mantissa scaled by 10^18.
//!
//! Composes the checked arithmetic in [`crate::math`] and propagates its
//! failures unchanged. The ledger's own balance math stays in plain checked
//! integers; this is the generic utility for ratio-shaped quantities.

use crate::math::{checked_div, checked_mul, MathError};

pub const EXP_SCALE: i128 = 1_000_000_000_000_000_000;

/// A ratio `mantissa / 10^18`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Exp {
    pub mantissa: i128,
}

/// Builds `num / denom` as an [`Exp`].
pub fn exp(num: i128, denom: i128) -> Result<Exp, MathError> {
    let scaled = checked_mul(num, EXP_SCALE)?;
    let mantissa = checked_div(scaled, denom)?;
    Ok(Exp { mantissa })
}

/// Multiplies a natural number by an exponential, truncating the result.
pub fn mul_scalar_truncate(e: Exp, scalar: i128) -> Result<i128, MathError> {
    let product = checked_mul(e.mantissa, scalar)?;
    checked_div(product, EXP_SCALE)
}

/// Divides a natural number by an exponential.
pub fn div_scalar_by_exp(scalar: i128, divisor: Exp) -> Result<Exp, MathError> {
    let numerator = checked_mul(scalar, EXP_SCALE)?;
    exp(numerator, divisor.mantissa)
}
