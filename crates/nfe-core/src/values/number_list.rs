//! ';'-joined number lists used for payment methods and amounts.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use super::patterns::NUMBER_LIST;
use super::ValueType;
use crate::error::ValueError;

/// Separator between list elements.
pub const SEPARATOR: char = ';';

/// A validated list of non-negative numbers with its raw textual form.
///
/// The raw text is kept as found in the document (e.g. `"01;03"`) so stored
/// rows reflect the source exactly; [`NumberList::values`] gives the numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberList {
    raw: String,
    values: Vec<Decimal>,
}

impl NumberList {
    /// Join raw element strings and validate the result.
    pub fn join<S: AsRef<str>>(parts: &[S]) -> Result<Self, ValueError> {
        let raw = parts
            .iter()
            .map(|p| p.as_ref().trim())
            .collect::<Vec<_>>()
            .join(&SEPARATOR.to_string());
        <Self as ValueType>::parse(&raw)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn values(&self) -> &[Decimal] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl ValueType for NumberList {
    type Value = NumberList;
    const KIND: &'static str = "number list";

    fn parse(raw: &str) -> Result<Self::Value, ValueError> {
        if !NUMBER_LIST.is_match(raw) {
            return Err(ValueError::new(
                Self::KIND,
                raw,
                "expected numbers separated by ';'",
            ));
        }

        let values = raw
            .split(SEPARATOR)
            .map(|part| {
                Decimal::from_str(part)
                    .map_err(|e| ValueError::new(Self::KIND, raw, format!("{part}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NumberList {
            raw: raw.to_string(),
            values,
        })
    }
}

impl fmt::Display for NumberList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_single_value() {
        let list = NumberList::parse("996.85").unwrap();
        assert_eq!(list.values(), &[dec("996.85")]);
        assert_eq!(list.to_string(), "996.85");
    }

    #[test]
    fn test_round_trip() {
        let numbers = [Decimal::from(1), Decimal::from(4)].map(|d| d.to_string());
        let list = NumberList::join(&numbers).unwrap();
        assert_eq!(list.as_str(), "1;4");

        let reparsed = NumberList::parse(list.as_str()).unwrap();
        assert_eq!(reparsed.values(), &[dec("1.0"), dec("4.0")]);
    }

    #[test]
    fn test_keeps_leading_zeros_in_raw() {
        let list = NumberList::join(&["01", "03"]).unwrap();
        assert_eq!(list.as_str(), "01;03");
        assert_eq!(list.values(), &[Decimal::ONE, Decimal::from(3)]);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(!NumberList::is_valid("abc"));
        assert!(!NumberList::is_valid("1;;2"));
        assert!(!NumberList::is_valid("-1"));
        assert!(NumberList::join(&["10.00", "x"]).is_err());
    }
}
