//! Validated value types for NFe fields.
//!
//! Each type checks a raw string taken from the XML document and, when it
//! passes, yields the coerced value. Nothing here has side effects.

pub mod fiscal_key;
pub mod number_list;
pub mod numeric;
pub mod patterns;
pub mod timestamp;

pub use fiscal_key::FiscalKey;
pub use number_list::NumberList;
pub use numeric::CoercibleDecimal;
pub use timestamp::Timestamp;

use crate::error::ValueError;

/// A format rule over raw strings.
pub trait ValueType {
    /// The coerced value produced by a successful parse.
    type Value;

    /// Human readable name used in error messages.
    const KIND: &'static str;

    /// Validate and coerce a raw value.
    fn parse(raw: &str) -> Result<Self::Value, ValueError>;

    /// Whether `raw` would parse.
    fn is_valid(raw: &str) -> bool {
        Self::parse(raw).is_ok()
    }
}
