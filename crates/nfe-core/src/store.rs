//! Relational storage for fact and line rows.
//!
//! Each document class gets its own fact table, named after the display
//! name, and a line table `ITENS_<fact table>` whose `FiscalKey` references
//! it. Rows are written positionally in schema order.

use std::path::Path;

use rusqlite::types::ToSqlOutput;
use rusqlite::{Connection, OptionalExtension, ToSql, params_from_iter};
use rust_decimal::prelude::ToPrimitive;
use tracing::debug;

use crate::error::StoreError;
use crate::models::record::{
    FACT_SCHEMA, FactRecord, Field, FieldType, FieldValue, LINE_SCHEMA, LineRecord,
};
use crate::values::FiscalKey;
use crate::values::patterns::{LEADING_DIGITS, PUNCTUATION};

/// Prefix of every line table.
pub const LINE_TABLE_PREFIX: &str = "ITENS_";

/// Derive a fact table name from a document display name.
///
/// Leading digits and punctuation are stripped, spaces become underscores
/// and the result is uppercased.
pub fn table_name(display_name: &str) -> Result<String, StoreError> {
    let name = LEADING_DIGITS.replace(display_name, "");
    let name = PUNCTUATION.replace_all(&name, "");
    let name = name.replace(' ', "_").to_uppercase();

    if name.trim_matches('_').is_empty() {
        return Err(StoreError::InvalidTable(display_name.to_string()));
    }
    Ok(name)
}

/// Line table belonging to a fact table.
pub fn line_table_name(table: &str) -> String {
    format!("{LINE_TABLE_PREFIX}{table}")
}

/// Storage operations the ingestion pipeline relies on.
pub trait FiscalStore {
    /// Error type for this store.
    type Error;

    /// Create the fact table (and its line table when `with_lines`) if missing.
    fn ensure_tables(&mut self, table: &str, with_lines: bool) -> Result<(), Self::Error>;

    fn table_exists(&self, table: &str) -> Result<bool, Self::Error>;

    /// Whether a fact row with this key exists.
    fn fact_exists(&self, table: &str, key: &FiscalKey) -> Result<bool, Self::Error>;

    /// Number of stored line rows with exactly these column values.
    fn count_lines(&self, table: &str, line: &LineRecord) -> Result<usize, Self::Error>;

    /// Insert a document's new rows atomically, fact row first.
    fn insert_document(
        &mut self,
        table: &str,
        fact: Option<&FactRecord>,
        lines: &[&LineRecord],
    ) -> Result<(), Self::Error>;

    /// Fact keys of a table in insertion order.
    fn select_keys(&self, table: &str) -> Result<Vec<FiscalKey>, Self::Error>;
}

/// SQLite implementation of [`FiscalStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Use `:memory:` for an in-memory database.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }
}

impl FiscalStore for SqliteStore {
    type Error = StoreError;

    fn ensure_tables(&mut self, table: &str, with_lines: bool) -> Result<(), StoreError> {
        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                Id INTEGER PRIMARY KEY AUTOINCREMENT,
                FiscalKey TEXT NOT NULL UNIQUE{}
            );",
            quote(table),
            column_defs(&FACT_SCHEMA[1..])
        );

        if with_lines {
            sql.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    Id INTEGER PRIMARY KEY AUTOINCREMENT,
                    FiscalKey TEXT NOT NULL REFERENCES {}(FiscalKey){}
                );",
                quote(&line_table_name(table)),
                quote(table),
                column_defs(&LINE_SCHEMA[1..])
            ));
        }

        self.conn.execute_batch(&sql)?;
        debug!("Ensured tables for {}", table);
        Ok(())
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    fn fact_exists(&self, table: &str, key: &FiscalKey) -> Result<bool, StoreError> {
        let exists = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE FiscalKey = ?1", quote(table)),
                [key.as_str()],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    fn count_lines(&self, table: &str, line: &LineRecord) -> Result<usize, StoreError> {
        let row = line.row();
        let conditions = row
            .field_names()
            .enumerate()
            .map(|(i, name)| format!("{} = ?{}", quote(name), i + 1))
            .collect::<Vec<_>>()
            .join(" AND ");

        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {}",
                quote(&line_table_name(table)),
                conditions
            ),
            params_from_iter(row.values()),
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn insert_document(
        &mut self,
        table: &str,
        fact: Option<&FactRecord>,
        lines: &[&LineRecord],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        if let Some(fact) = fact {
            insert_row(&tx, table, FACT_SCHEMA, fact.row().values())?;
        }

        let line_table = line_table_name(table);
        for line in lines {
            insert_row(&tx, &line_table, LINE_SCHEMA, line.row().values())?;
        }

        tx.commit()?;
        debug!(
            "Inserted {} fact and {} line rows into {}",
            usize::from(fact.is_some()),
            lines.len(),
            table
        );
        Ok(())
    }

    fn select_keys(&self, table: &str) -> Result<Vec<FiscalKey>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT FiscalKey FROM {} ORDER BY Id", quote(table)))?;

        let keys = stmt
            .query_map([], |row| {
                let raw: String = row.get(0)?;
                FiscalKey::try_from(raw).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Key(key) => ToSqlOutput::from(key.as_str()),
            Self::Timestamp(dt) => ToSqlOutput::from(dt.to_rfc3339()),
            Self::NumberList(list) => ToSqlOutput::from(list.as_str()),
            Self::Decimal(d) => {
                let value = d.to_f64().ok_or_else(|| {
                    rusqlite::Error::ToSqlConversionFailure(
                        format!("{d} does not fit a REAL column").into(),
                    )
                })?;
                ToSqlOutput::from(value)
            }
            Self::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

fn insert_row(
    conn: &Connection,
    table: &str,
    schema: &[Field],
    values: &[FieldValue],
) -> Result<(), StoreError> {
    let columns = schema
        .iter()
        .map(|f| quote(f.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=schema.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            columns,
            placeholders
        ),
        params_from_iter(values),
    )?;
    Ok(())
}

fn column_defs(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| {
            let ty = match f.ty {
                FieldType::Decimal => "REAL",
                _ => "TEXT",
            };
            format!(",\n                {} {}", quote(f.name), ty)
        })
        .collect()
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::RawFields;
    use pretty_assertions::assert_eq;

    const KEY: &str = "26240811122233344455550010045645641789789784";

    fn fact(key: &str) -> FactRecord {
        FactRecord::new(&RawFields::from([
            ("FiscalKey", key.to_string()),
            ("IssuedAt", "2024-08-31T16:17:16-03:00".to_string()),
            ("PaymentMethods", "14".to_string()),
            ("PaymentAmounts", "996.85".to_string()),
            ("TotalProducts", "996.85".to_string()),
            ("TotalDiscount", "0".to_string()),
            ("TotalTaxes", "348.77".to_string()),
        ]))
        .unwrap()
    }

    fn line(key: &str, code: &str) -> LineRecord {
        let mut raw = RawFields::new();
        for field in LINE_SCHEMA {
            let value = match field.ty {
                FieldType::Decimal => "1.5",
                _ => "X",
            };
            raw.insert(field.name, value.to_string());
        }
        raw.insert("FiscalKey", key.to_string());
        raw.insert("ProductCode", code.to_string());
        LineRecord::new(&raw).unwrap()
    }

    fn rows(store: &SqliteStore, table: &str) -> i64 {
        store
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |r| {
                r.get(0)
            })
            .unwrap()
    }

    #[test]
    fn test_table_name() {
        let cases = [
            ("123 empresa diferente 11122233", "_EMPRESA_DIFERENTE_11122233"),
            ("MERC. COMERCIANTES", "MERC_COMERCIANTES"),
            ("Sociedade Anônima S/A", "SOCIEDADE_ANÔNIMA_SA"),
            ("algo com asterisco* ltda.", "ALGO_COM_ASTERISCO_LTDA"),
            ("ACADEMIA DOS NÚMEROS IND.-COM.", "ACADEMIA_DOS_NÚMEROS_INDCOM"),
            ("PURCHASE IMPERADOR AUGUSTO MERCEARIA", "PURCHASE_IMPERADOR_AUGUSTO_MERCEARIA"),
        ];
        for (display, expected) in cases {
            assert_eq!(table_name(display).unwrap(), expected);
        }
        assert!(matches!(table_name("123 ..."), Err(StoreError::InvalidTable(_))));
    }

    #[test]
    fn test_ensure_tables_is_idempotent() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.ensure_tables("T", true).unwrap();
        store.ensure_tables("T", true).unwrap();
        assert!(store.table_exists("T").unwrap());
        assert!(store.table_exists("ITENS_T").unwrap());
        assert!(!store.table_exists("ITENS_ITENS_T").unwrap());
    }

    #[test]
    fn test_fact_only_tables() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.ensure_tables("T", false).unwrap();
        assert!(!store.table_exists("ITENS_T").unwrap());
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.ensure_tables("T", true).unwrap();

        let fact = fact(KEY);
        let first = line(KEY, "001");
        let second = line(KEY, "002");
        assert!(!store.fact_exists("T", fact.fiscal_key()).unwrap());

        store.insert_document("T", Some(&fact), &[&first]).unwrap();

        assert!(store.fact_exists("T", fact.fiscal_key()).unwrap());
        assert_eq!(store.count_lines("T", &first).unwrap(), 1);
        assert_eq!(store.count_lines("T", &second).unwrap(), 0);
        assert_eq!(store.select_keys("T").unwrap(), vec![fact.fiscal_key().clone()]);
        assert_eq!(rows(&store, "ITENS_T"), 1);
    }

    #[test]
    fn test_count_lines_sees_repeated_rows() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.ensure_tables("T", true).unwrap();

        let repeated = line(KEY, "001");
        store
            .insert_document("T", Some(&fact(KEY)), &[&repeated, &repeated])
            .unwrap();

        assert_eq!(store.count_lines("T", &repeated).unwrap(), 2);
        assert_eq!(rows(&store, "ITENS_T"), 2);
    }

    #[test]
    fn test_duplicate_fact_key_rejected() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.ensure_tables("T", false).unwrap();
        store.insert_document("T", Some(&fact(KEY)), &[]).unwrap();
        assert!(store.insert_document("T", Some(&fact(KEY)), &[]).is_err());
        assert_eq!(rows(&store, "T"), 1);
    }

    #[test]
    fn test_orphan_lines_roll_back() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.ensure_tables("T", true).unwrap();

        let other = "11111111111111111111111111111111111111111111";
        let result = store.insert_document("T", Some(&fact(KEY)), &[&line(other, "001")]);

        assert!(result.is_err());
        assert_eq!(rows(&store, "T"), 0);
        assert_eq!(rows(&store, "ITENS_T"), 0);
    }

    #[test]
    fn test_keys_in_insertion_order() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.ensure_tables("T", false).unwrap();
        let keys = [KEY, "11111111111111111111111111111111111111111111"];
        for key in keys {
            store.insert_document("T", Some(&fact(key)), &[]).unwrap();
        }
        let stored: Vec<String> = store
            .select_keys("T")
            .unwrap()
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        assert_eq!(stored, keys);
    }
}
