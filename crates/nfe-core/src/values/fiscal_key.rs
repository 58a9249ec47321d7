//! Fiscal key (chave de acesso) validation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ValueType;
use crate::error::ValueError;

/// Number of digits in a fiscal key.
pub const FISCAL_KEY_LEN: usize = 44;

/// A 44-digit NFe access key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FiscalKey(String);

impl FiscalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueType for FiscalKey {
    type Value = FiscalKey;
    const KIND: &'static str = "fiscal key";

    fn parse(raw: &str) -> Result<Self::Value, ValueError> {
        let len = raw.chars().count();
        if len != FISCAL_KEY_LEN {
            return Err(ValueError::new(
                Self::KIND,
                raw,
                format!("expected {FISCAL_KEY_LEN} digits, found {len} characters"),
            ));
        }
        if let Some(c) = raw.chars().find(|c| !c.is_ascii_digit()) {
            return Err(ValueError::new(
                Self::KIND,
                raw,
                format!("non-digit character {c:?}"),
            ));
        }
        Ok(FiscalKey(raw.to_string()))
    }
}

impl TryFrom<String> for FiscalKey {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        <FiscalKey as ValueType>::parse(&value)
    }
}

impl From<FiscalKey> for String {
    fn from(key: FiscalKey) -> Self {
        key.0
    }
}

impl fmt::Display for FiscalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
