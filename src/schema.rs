use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use chrono::DateTime;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use crate::entity::Model;
use crate::error::{Error, Result};

pub const ID_COLUMN: &str = "id";
pub const SAVED_AT_COLUMN: &str = "saved_at";
pub const EVENT_COLUMN: &str = "event";

const FIXED_COLUMNS: [&str; 3] = [ID_COLUMN, SAVED_AT_COLUMN, EVENT_COLUMN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    /// RFC 3339 string.
    Timestamp,
    /// Any JSON value, stored as its text encoding.
    Json,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "DATETIME",
            ColumnType::Json => "JSON",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    sql_type: Option<&'static str>,
    primary_key: bool,
    default: Option<&'static str>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            sql_type: None,
            primary_key: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn id() -> Self {
        Self {
            sql_type: Some("VARCHAR(36)"),
            primary_key: true,
            ..Self::new(ID_COLUMN, ColumnType::Text).not_null()
        }
    }

    fn saved_at() -> Self {
        Self {
            default: Some("(CURRENT_TIMESTAMP)"),
            ..Self::new(SAVED_AT_COLUMN, ColumnType::Timestamp).not_null()
        }
    }

    fn event() -> Self {
        Self::new(EVENT_COLUMN, ColumnType::Json).not_null()
    }

    /// Column clause for `CREATE TABLE`.
    pub fn definition(&self) -> String {
        let mut def = format!(
            "{} {}",
            quote_ident(&self.name),
            self.sql_type.unwrap_or_else(|| self.column_type.sql())
        );
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = self.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        if self.primary_key {
            def.push_str(" PRIMARY KEY");
        }
        def
    }

    /// Checks a projected field value against this column and converts it
    /// for binding.
    pub fn to_sql(&self, table: &str, value: &Value) -> Result<SqlValue> {
        if value.is_null() {
            if !self.nullable {
                return Err(Error::NullColumn {
                    table: table.to_string(),
                    column: self.name.clone(),
                });
            }
            return Ok(SqlValue::Null);
        }

        let converted = match (self.column_type, value) {
            (ColumnType::Json, v) => Some(SqlValue::Text(v.to_string())),
            (ColumnType::Integer, Value::Number(n)) => n.as_i64().map(SqlValue::Integer),
            (ColumnType::Real, Value::Number(n)) => n.as_f64().map(SqlValue::Real),
            (ColumnType::Text, Value::String(s)) => Some(SqlValue::Text(s.clone())),
            (ColumnType::Boolean, Value::Bool(b)) => Some(SqlValue::Integer(i64::from(*b))),
            (ColumnType::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|_| SqlValue::Text(s.clone())),
            _ => None,
        };

        converted.ok_or_else(|| Error::ColumnType {
            table: table.to_string(),
            column: self.name.clone(),
            expected: self.column_type,
            found: json_type_name(value),
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Physical table for one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMapping {
    name: String,
    type_name: &'static str,
    columns: Vec<Column>,
}

impl TableMapping {
    pub fn new(name: impl Into<String>, type_name: &'static str, extra: Vec<Column>) -> Result<Self> {
        let name = name.into();
        let mut columns = vec![Column::id(), Column::saved_at(), Column::event()];
        for col in extra {
            if FIXED_COLUMNS.contains(&col.name.as_str()) {
                return Err(Error::ReservedColumn {
                    table: name,
                    column: col.name,
                });
            }
            if columns.iter().any(|c| c.name == col.name) {
                return Err(Error::DuplicateColumn {
                    table: name,
                    column: col.name,
                });
            }
            columns.push(col);
        }
        Ok(Self {
            name,
            type_name,
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn extra_columns(&self) -> &[Column] {
        &self.columns[FIXED_COLUMNS.len()..]
    }

    /// Columns the client supplies on insert; `saved_at` is the store's.
    pub fn writable_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.name != SAVED_AT_COLUMN)
    }

    pub fn create_sql(&self) -> String {
        let defs: Vec<String> = self.columns.iter().map(Column::definition).collect();
        format!("CREATE TABLE {} ({})", quote_ident(&self.name), defs.join(", "))
    }

    pub fn insert_sql(&self) -> String {
        let names: Vec<String> = self.writable_columns().map(|c| quote_ident(&c.name)).collect();
        let slots: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.name),
            names.join(", "),
            slots.join(", ")
        )
    }

    pub fn select_sql(&self, id_count: usize) -> String {
        let slots: Vec<String> = (1..=id_count).map(|i| format!("?{}", i)).collect();
        format!(
            "SELECT {}, {} FROM {} WHERE {} IN ({})",
            quote_ident(ID_COLUMN),
            quote_ident(EVENT_COLUMN),
            quote_ident(&self.name),
            quote_ident(ID_COLUMN),
            slots.join(", ")
        )
    }
}

/// Type → table registrations. Registering a type again replaces its
/// mapping; a table name belongs to one type. Names compare without case,
/// as SQLite identifiers do.
#[derive(Debug, Default)]
pub struct Registry {
    tables: HashMap<TypeId, TableMapping>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table<T: Model>(&mut self, columns: Vec<Column>) -> Result<&TableMapping> {
        let mapping = TableMapping::new(T::db_table_name(), T::type_name(), columns)?;
        let key = TypeId::of::<T>();
        let taken = self
            .tables
            .iter()
            .find(|(id, t)| **id != key && t.name.eq_ignore_ascii_case(&mapping.name));
        if let Some((_, owner)) = taken {
            return Err(Error::TableTaken {
                table: mapping.name,
                owner: owner.type_name,
                type_name: T::type_name(),
            });
        }
        self.tables.insert(key, mapping);
        self.get::<T>()
    }

    pub fn get<T: Model>(&self) -> Result<&TableMapping> {
        self.tables
            .get(&TypeId::of::<T>())
            .ok_or(Error::NotRegistered {
                type_name: T::type_name(),
            })
    }

    pub fn contains<T: Model>(&self) -> bool {
        self.tables.contains_key(&TypeId::of::<T>())
    }

    /// All mappings, ordered by table name.
    pub fn tables(&self) -> Vec<&TableMapping> {
        let mut tables: Vec<&TableMapping> = self.tables.values().collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Number {
        num: i64,
    }

    impl Model for Number {}

    #[derive(Serialize, Deserialize)]
    struct Renamed {}

    impl Model for Renamed {
        fn db_table_name() -> String {
            "yomama".to_string()
        }
    }

    #[test]
    fn test_fixed_columns_come_first() {
        let mut reg = Registry::new();
        let table = reg
            .add_table::<Number>(vec![Column::new("num", ColumnType::Integer)])
            .unwrap();
        let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "saved_at", "event", "num"]);
        assert_eq!(table.name(), "number");
        assert_eq!(table.extra_columns().len(), 1);
        assert_eq!(
            table.create_sql(),
            "CREATE TABLE \"number\" (\"id\" VARCHAR(36) NOT NULL PRIMARY KEY, \
             \"saved_at\" DATETIME NOT NULL DEFAULT (CURRENT_TIMESTAMP), \
             \"event\" JSON NOT NULL, \"num\" INTEGER)"
        );
        assert_eq!(
            table.insert_sql(),
            "INSERT INTO \"number\" (\"id\", \"event\", \"num\") VALUES (?1, ?2, ?3)"
        );
    }

    #[test]
    fn test_reserved_and_duplicate_columns() {
        let mut reg = Registry::new();
        let err = reg
            .add_table::<Number>(vec![Column::new("event", ColumnType::Text)])
            .unwrap_err();
        assert!(matches!(err, Error::ReservedColumn { .. }));

        let err = reg
            .add_table::<Number>(vec![
                Column::new("num", ColumnType::Integer),
                Column::new("num", ColumnType::Real),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateColumn { .. }));
        assert!(!reg.contains::<Number>());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut reg = Registry::new();
        reg.add_table::<Number>(vec![]).unwrap();
        reg.add_table::<Number>(vec![Column::new("num", ColumnType::Integer)])
            .unwrap();
        assert_eq!(reg.len(), 1);
        assert!(reg.get::<Number>().unwrap().column("num").is_some());
    }

    #[test]
    fn test_table_name_belongs_to_one_type() {
        #[derive(Serialize, Deserialize)]
        struct Shouting {}

        impl Model for Shouting {
            fn db_table_name() -> String {
                "YoMama".to_string()
            }
        }

        let mut reg = Registry::new();
        reg.add_table::<Renamed>(vec![]).unwrap();
        let err = reg.add_table::<Shouting>(vec![]).unwrap_err();
        assert!(matches!(
            err,
            Error::TableTaken { owner: "Renamed", type_name: "Shouting", .. }
        ));
        assert_eq!(err.kind(), crate::error::ErrorKind::Contract);
        assert!(!reg.contains::<Shouting>());
        assert_eq!(reg.len(), 1);

        // The owner may still re-register.
        reg.add_table::<Renamed>(vec![Column::new("num", ColumnType::Integer)])
            .unwrap();
    }

    #[test]
    fn test_unregistered_lookup() {
        let reg = Registry::new();
        let err = reg.get::<Number>().unwrap_err();
        assert!(matches!(err, Error::NotRegistered { type_name: "Number" }));
    }

    #[test]
    fn test_tables_sorted_by_name() {
        let mut reg = Registry::new();
        reg.add_table::<Renamed>(vec![]).unwrap();
        reg.add_table::<Number>(vec![]).unwrap();
        let names: Vec<&str> = reg.tables().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["number", "yomama"]);
    }

    #[test]
    fn test_column_conversion() {
        let int = Column::new("num", ColumnType::Integer);
        assert_eq!(int.to_sql("t", &json!(42)).unwrap(), SqlValue::Integer(42));
        assert!(matches!(
            int.to_sql("t", &json!("42")).unwrap_err(),
            Error::ColumnType { found: "string", .. }
        ));
        assert_eq!(int.to_sql("t", &Value::Null).unwrap(), SqlValue::Null);

        let real = Column::new("px", ColumnType::Real).not_null();
        assert_eq!(real.to_sql("t", &json!(3)).unwrap(), SqlValue::Real(3.0));
        assert!(matches!(
            real.to_sql("t", &Value::Null).unwrap_err(),
            Error::NullColumn { .. }
        ));

        let flag = Column::new("ok", ColumnType::Boolean);
        assert_eq!(flag.to_sql("t", &json!(true)).unwrap(), SqlValue::Integer(1));

        let ts = Column::new("created_at", ColumnType::Timestamp);
        assert!(ts.to_sql("t", &json!("2021-01-01T00:00:00Z")).is_ok());
        assert!(ts.to_sql("t", &json!("yesterday")).is_err());

        let blob = Column::new("tags", ColumnType::Json);
        assert_eq!(
            blob.to_sql("t", &json!(["a", "b"])).unwrap(),
            SqlValue::Text(r#"["a","b"]"#.to_string())
        );
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
