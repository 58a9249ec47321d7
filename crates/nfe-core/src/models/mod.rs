//! Data models for NFe ingestion.

pub mod config;
pub mod input;
pub mod record;

pub use config::NfeConfig;
pub use input::{Mode, ParserInput, Perspective};
pub use record::{FactRecord, FieldValue, LineRecord, RawFields, Row};
