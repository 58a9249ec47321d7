//! Decimal coercion for monetary and quantity fields.

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use super::ValueType;
use crate::error::ValueError;

/// Any string that reads as a finite floating-point number.
pub struct CoercibleDecimal;

impl ValueType for CoercibleDecimal {
    type Value = Decimal;
    const KIND: &'static str = "decimal";

    fn parse(raw: &str) -> Result<Self::Value, ValueError> {
        let trimmed = raw.trim();

        let float: f64 = trimmed
            .parse()
            .map_err(|_| ValueError::new(Self::KIND, raw, "not a number"))?;

        if !float.is_finite() {
            return Err(ValueError::new(Self::KIND, raw, "not a finite number"));
        }

        // Exact decimal text first so "0.10" keeps its scale.
        Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .ok()
            .or_else(|| Decimal::from_f64(float))
            .ok_or_else(|| ValueError::new(Self::KIND, raw, "out of decimal range"))
    }
}
