//! Validated row records for the fact and line tables.
//!
//! A [`Row`] is built from raw strings plus an ordered schema. Every field is
//! run through its value type; construction either yields a complete row or
//! the full list of field errors, never a partial row.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{RowError, ValueError};
use crate::values::{CoercibleDecimal, FiscalKey, NumberList, Timestamp, ValueType};

/// Raw field values keyed by column name.
pub type RawFields = HashMap<&'static str, String>;

/// The value type a column is validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    FiscalKey,
    Timestamp,
    NumberList,
    Decimal,
    /// Free text or codes, stored verbatim.
    Text,
}

impl FieldType {
    fn coerce(&self, raw: &str) -> Result<FieldValue, ValueError> {
        Ok(match self {
            Self::FiscalKey => FieldValue::Key(FiscalKey::parse(raw)?),
            Self::Timestamp => FieldValue::Timestamp(Timestamp::parse(raw)?),
            Self::NumberList => FieldValue::NumberList(NumberList::parse(raw)?),
            Self::Decimal => FieldValue::Decimal(CoercibleDecimal::parse(raw)?),
            Self::Text => FieldValue::Text(raw.trim().to_string()),
        })
    }
}

/// One named column of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> Field {
    Field { name, ty }
}

/// Columns of the fact table, in insertion order.
pub const FACT_SCHEMA: &[Field] = &[
    field("FiscalKey", FieldType::FiscalKey),
    field("IssuedAt", FieldType::Timestamp),
    field("PaymentMethods", FieldType::NumberList),
    field("PaymentAmounts", FieldType::NumberList),
    field("TotalProducts", FieldType::Decimal),
    field("TotalDiscount", FieldType::Decimal),
    field("TotalTaxes", FieldType::Decimal),
];

/// Columns of the line (`ITENS_`) table, in insertion order.
pub const LINE_SCHEMA: &[Field] = &[
    field("FiscalKey", FieldType::FiscalKey),
    field("ProductCode", FieldType::Text),
    field("Barcode", FieldType::Text),
    field("NcmCode", FieldType::Text),
    field("CestCode", FieldType::Text),
    field("CfopCode", FieldType::Text),
    field("QtyCommercial", FieldType::Decimal),
    field("QtyTaxable", FieldType::Decimal),
    field("UnitCommercial", FieldType::Text),
    field("UnitTaxable", FieldType::Text),
    field("Description", FieldType::Text),
    field("UnitPrice", FieldType::Decimal),
    field("PisBase", FieldType::Decimal),
    field("PisValue", FieldType::Decimal),
    field("CofinsBase", FieldType::Decimal),
    field("CofinsValue", FieldType::Decimal),
    field("IcmsRetainedBase", FieldType::Decimal),
    field("IcmsRetainedValue", FieldType::Decimal),
    field("IcmsSubstituteValue", FieldType::Decimal),
    field("IcmsEffectiveBase", FieldType::Decimal),
    field("IcmsEffectiveValue", FieldType::Decimal),
];

/// A coerced column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Key(FiscalKey),
    Timestamp(DateTime<FixedOffset>),
    NumberList(NumberList),
    Decimal(Decimal),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Timestamp(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::NumberList(list) => write!(f, "{list}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An immutable, fully validated tuple of named values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    schema: &'static [Field],
    values: Vec<FieldValue>,
}

impl Row {
    /// Validate `raw` against `schema`.
    ///
    /// All fields are checked; on failure every missing or invalid field is
    /// reported, in schema order.
    pub fn new(schema: &'static [Field], raw: &RawFields) -> Result<Self, Vec<RowError>> {
        let mut values = Vec::with_capacity(schema.len());
        let mut errors = Vec::new();

        for f in schema {
            let Some(value) = raw.get(f.name) else {
                errors.push(RowError::MissingField(f.name.to_string()));
                continue;
            };

            match f.ty.coerce(value) {
                Ok(v) => values.push(v),
                Err(e) => errors.push(RowError::Validation {
                    field: f.name.to_string(),
                    value: e.value,
                    reason: e.reason,
                }),
            }
        }

        if errors.is_empty() {
            Ok(Self { schema, values })
        } else {
            Err(errors)
        }
    }

    /// Values in schema order, for positional insertion.
    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.schema.iter().map(|f| f.name)
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.schema
            .iter()
            .position(|f| f.name == name)
            .map(|idx| &self.values[idx])
    }

    pub fn key(&self, name: &str) -> Option<&FiscalKey> {
        match self.get(name)? {
            FieldValue::Key(k) => Some(k),
            _ => None,
        }
    }

    pub fn number_list(&self, name: &str) -> Option<&NumberList> {
        match self.get(name)? {
            FieldValue::NumberList(l) => Some(l),
            _ => None,
        }
    }

    pub fn decimal(&self, name: &str) -> Option<Decimal> {
        match self.get(name)? {
            FieldValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn timestamp(&self, name: &str) -> Option<DateTime<FixedOffset>> {
        match self.get(name)? {
            FieldValue::Timestamp(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (f, v) in self.schema.iter().zip(&self.values) {
            map.serialize_entry(f.name, v)?;
        }
        map.end()
    }
}

fn fiscal_key_of(row: &Row) -> Result<FiscalKey, Vec<RowError>> {
    row.key("FiscalKey")
        .cloned()
        .ok_or_else(|| vec![RowError::MissingField("FiscalKey".to_string())])
}

/// The per-document summary row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactRecord {
    row: Row,
    fiscal_key: FiscalKey,
}

impl FactRecord {
    /// Validate a fact row, including the payment list length invariant.
    pub fn new(raw: &RawFields) -> Result<Self, Vec<RowError>> {
        let row = Row::new(FACT_SCHEMA, raw)?;

        if let (Some(methods), Some(amounts)) = (
            row.number_list("PaymentMethods"),
            row.number_list("PaymentAmounts"),
        ) {
            if methods.len() != amounts.len() {
                return Err(vec![RowError::Validation {
                    field: "PaymentAmounts".to_string(),
                    value: amounts.to_string(),
                    reason: format!(
                        "{} payment methods but {} payment amounts",
                        methods.len(),
                        amounts.len()
                    ),
                }]);
            }
        }

        let fiscal_key = fiscal_key_of(&row)?;
        Ok(Self { row, fiscal_key })
    }

    pub fn fiscal_key(&self) -> &FiscalKey {
        &self.fiscal_key
    }

    pub fn issued_at(&self) -> Option<DateTime<FixedOffset>> {
        self.row.timestamp("IssuedAt")
    }

    pub fn payment_methods(&self) -> Option<&NumberList> {
        self.row.number_list("PaymentMethods")
    }

    pub fn payment_amounts(&self) -> Option<&NumberList> {
        self.row.number_list("PaymentAmounts")
    }

    pub fn row(&self) -> &Row {
        &self.row
    }
}

impl Serialize for FactRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.row.serialize(serializer)
    }
}

/// One product line of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    row: Row,
    fiscal_key: FiscalKey,
}

impl LineRecord {
    pub fn new(raw: &RawFields) -> Result<Self, Vec<RowError>> {
        let row = Row::new(LINE_SCHEMA, raw)?;
        let fiscal_key = fiscal_key_of(&row)?;
        Ok(Self { row, fiscal_key })
    }

    pub fn fiscal_key(&self) -> &FiscalKey {
        &self.fiscal_key
    }

    pub fn product_code(&self) -> &str {
        self.row.text("ProductCode").unwrap_or_default()
    }

    pub fn row(&self) -> &Row {
        &self.row
    }
}

impl Serialize for LineRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.row.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    const KEY: &str = "12312312312312312312312312312312312312312312";

    fn fact_fields() -> RawFields {
        RawFields::from([
            ("FiscalKey", KEY.to_string()),
            ("IssuedAt", "2020-01-01T12:12:21-03:00".to_string()),
            ("PaymentMethods", "1;4".to_string()),
            ("PaymentAmounts", "100.0;10.2".to_string()),
            ("TotalProducts", "110.2".to_string()),
            ("TotalDiscount", "0".to_string()),
            ("TotalTaxes", "22.2".to_string()),
        ])
    }

    #[test]
    fn test_fact_record_valid() {
        let fact = FactRecord::new(&fact_fields()).unwrap();
        assert_eq!(fact.fiscal_key().as_str(), KEY);
        assert_eq!(fact.payment_methods().unwrap().as_str(), "1;4");
        assert_eq!(
            fact.row().decimal("TotalProducts"),
            Some(Decimal::from_str("110.2").unwrap())
        );
        assert_eq!(fact.row().values().len(), FACT_SCHEMA.len());
    }

    #[test]
    fn test_values_follow_schema_order() {
        let fact = FactRecord::new(&fact_fields()).unwrap();
        let names: Vec<_> = fact.row().field_names().collect();
        let expected: Vec<_> = FACT_SCHEMA.iter().map(|f| f.name).collect();
        assert_eq!(names, expected);
        assert_eq!(fact.row().values()[0].to_string(), KEY);
    }

    #[test]
    fn test_missing_field() {
        let mut raw = fact_fields();
        raw.remove("TotalTaxes");
        let errors = FactRecord::new(&raw).unwrap_err();
        assert_eq!(errors, vec![RowError::MissingField("TotalTaxes".to_string())]);
    }

    #[test]
    fn test_reports_every_invalid_field() {
        let mut raw = fact_fields();
        raw.insert("FiscalKey", "123".to_string());
        raw.insert("PaymentAmounts", "abc".to_string());
        let errors = FactRecord::new(&raw).unwrap_err();
        let fields: Vec<_> = errors
            .iter()
            .map(|e| match e {
                RowError::Validation { field, .. } => field.as_str(),
                RowError::MissingField(f) => f.as_str(),
            })
            .collect();
        assert_eq!(fields, vec!["FiscalKey", "PaymentAmounts"]);
    }

    #[test]
    fn test_payment_lists_must_align() {
        let mut raw = fact_fields();
        raw.insert("PaymentMethods", "1".to_string());
        let errors = FactRecord::new(&raw).unwrap_err();
        assert!(matches!(
            &errors[0],
            RowError::Validation { field, .. } if field == "PaymentAmounts"
        ));
    }

    #[test]
    fn test_line_record_keeps_code_text() {
        let mut raw: RawFields = LINE_SCHEMA
            .iter()
            .map(|f| (f.name, "0".to_string()))
            .collect();
        raw.insert("FiscalKey", KEY.to_string());
        raw.insert("ProductCode", "000123".to_string());
        raw.insert("Description", "ARROZ TIPO 1".to_string());

        let line = LineRecord::new(&raw).unwrap();
        assert_eq!(line.product_code(), "000123");
        assert_eq!(line.fiscal_key().as_str(), KEY);
    }

    #[test]
    fn test_serialize_fieldwise() {
        let fact = FactRecord::new(&fact_fields()).unwrap();
        let json = serde_json::to_value(&fact).unwrap();
        assert_eq!(json["PaymentAmounts"], "100.0;10.2");
        assert_eq!(json["TotalDiscount"], "0");
    }
}
