use thiserror::Error;
use uuid::Uuid;

use crate::schema::ColumnType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{type_name} is immutable: cannot set field '{field}'")]
    Immutable { type_name: &'static str, field: String },

    #[error("{type_name} has no field '{field}'")]
    UnknownField { type_name: &'static str, field: String },

    #[error("{type_name} declares reserved field '{field}'")]
    ReservedField { type_name: &'static str, field: String },

    #[error("{type_name} does not serialize to a JSON object")]
    NotAnObject { type_name: &'static str },

    #[error("Malformed event json: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid table_id '{value}': {source}")]
    InvalidTableId {
        value: String,
        #[source]
        source: uuid::Error,
    },

    #[error("Invalid created_at '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("{type_name} was never registered (call add_table first)")]
    NotRegistered { type_name: &'static str },

    #[error("{op} needs at least one item")]
    EmptyBatch { op: &'static str },

    #[error("Table '{table}' already belongs to {owner}, cannot map {type_name} to it")]
    TableTaken {
        table: String,
        owner: &'static str,
        type_name: &'static str,
    },

    #[error("Column '{column}' on table '{table}' is reserved")]
    ReservedColumn { table: String, column: String },

    #[error("Column '{column}' declared twice on table '{table}'")]
    DuplicateColumn { table: String, column: String },

    #[error("Column '{column}' on table '{table}' has no matching entity field")]
    MissingColumnValue { table: String, column: String },

    #[error("Column '{column}' on table '{table}' expects {expected}, got {found}")]
    ColumnType {
        table: String,
        column: String,
        expected: ColumnType,
        found: &'static str,
    },

    #[error("Column '{column}' on table '{table}' cannot be NULL")]
    NullColumn { table: String, column: String },

    #[error("Row '{row_id}' rehydrated as entity {table_id}")]
    IdMismatch { row_id: String, table_id: Uuid },

    #[error("Unsupported backend '{0}': only sqlite is handled")]
    UnsupportedBackend(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers deciding whether to fix input or
/// surface a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Contract,
    Immutability,
    Serialization,
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Immutable { .. } => ErrorKind::Immutability,
            Error::Serialization(_)
            | Error::InvalidTableId { .. }
            | Error::InvalidTimestamp { .. } => ErrorKind::Serialization,
            Error::Storage(_) | Error::Io(_) => ErrorKind::Storage,
            Error::UnknownField { .. }
            | Error::ReservedField { .. }
            | Error::NotAnObject { .. }
            | Error::NotRegistered { .. }
            | Error::EmptyBatch { .. }
            | Error::TableTaken { .. }
            | Error::ReservedColumn { .. }
            | Error::DuplicateColumn { .. }
            | Error::MissingColumnValue { .. }
            | Error::ColumnType { .. }
            | Error::NullColumn { .. }
            | Error::IdMismatch { .. }
            | Error::UnsupportedBackend(_) => ErrorKind::Contract,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = Error::Immutable {
            type_name: "Number",
            field: "num".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::Immutability);
        assert_eq!(err.to_string(), "Number is immutable: cannot set field 'num'");

        let err = Error::EmptyBatch { op: "insert" };
        assert_eq!(err.kind(), ErrorKind::Contract);

        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(Error::from(parse).kind(), ErrorKind::Serialization);
    }
}
