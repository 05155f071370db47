//! Storage sink: where canonical rows end up.

pub mod parquet;

pub use parquet::ParquetTableSink;

use polars::prelude::{DataFrame, DataType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tabular::is_numeric;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    #[error("storage I/O: {0}")]
    Io(String),

    #[error("parquet: {0}")]
    Parquet(String),

    #[error("cannot append to {table}: {reason}")]
    SchemaMismatch { table: String, reason: String },
}

/// Insert behaviour. Rows are always appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOptions {
    /// Empty the table before inserting.
    pub delete_prev_records: bool,
}

impl Default for InsertOptions {
    fn default() -> Self {
        Self {
            delete_prev_records: true,
        }
    }
}

/// Column type hint passed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Timestamp,
    Text,
}

impl ColumnType {
    pub fn infer(name: &str, dtype: &DataType) -> Self {
        if name.to_lowercase().contains("timestamp") {
            ColumnType::Timestamp
        } else if is_numeric(dtype) {
            ColumnType::Numeric
        } else {
            ColumnType::Text
        }
    }

    /// Explicit SQL type override; `None` leaves it to the driver.
    pub fn sql_type(self) -> Option<&'static str> {
        match self {
            ColumnType::Text => Some("varchar(100)"),
            ColumnType::Numeric | ColumnType::Timestamp => None,
        }
    }
}

pub fn column_types(df: &DataFrame) -> Vec<(String, ColumnType)> {
    df.get_columns()
        .iter()
        .map(|c| (c.name().to_string(), ColumnType::infer(c.name(), c.dtype())))
        .collect()
}

/// A relational-table-like destination for canonical rows.
pub trait TableSink {
    /// Insert every row of `frame` into `table`; returns rows written.
    fn insert(
        &self,
        table: &str,
        frame: &DataFrame,
        options: InsertOptions,
    ) -> Result<usize, StorageError>;
}
