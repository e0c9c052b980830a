//! Persists entities as rows: the canonical event JSON plus a few
//! queryable columns.
//!
//! Every public operation runs inside one SQLite transaction. Preconditions
//! (registration, non-empty input, row construction) are checked before the
//! transaction opens, so a rejected call leaves the store untouched.

use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::entity::{to_event_json, Entity, Model};
use crate::error::{Error, Result};
use crate::logging::{Level, LogSink};
use crate::schema::{Column, Registry, TableMapping, EVENT_COLUMN, ID_COLUMN};

/// Column name → bound value, in insert order.
pub type Row = Vec<(String, SqlValue)>;

/// Keeps `IN (...)` lists well under SQLite's bind-parameter limit.
const MAX_BIND_PARAMS: usize = 500;

const TABLE_EXISTS_SQL: &str =
    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE";

const QUALIFIER: &str = "Mapper";

pub struct Mapper {
    conn: Connection,
    registry: Registry,
    log: Arc<dyn LogSink>,
    echo: bool,
}

impl Mapper {
    pub fn new(conn: Connection, log: Arc<dyn LogSink>) -> Self {
        Self {
            conn,
            registry: Registry::new(),
            log,
            echo: false,
        }
    }

    pub fn open(cfg: &Config) -> Result<Self> {
        let conn = cfg.open_connection()?;
        let log = cfg.build_sink()?;
        Ok(Self::new(conn, log).with_echo(cfg.echo))
    }

    /// Record each SQL statement at debug level before running it.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The sink entities built against this mapper should log to.
    pub fn log(&self) -> &dyn LogSink {
        &*self.log
    }

    pub fn add_table<T: Model>(&mut self, columns: Vec<Column>) -> Result<&TableMapping> {
        self.registry.add_table::<T>(columns)
    }

    /// Creates every registered table that does not exist yet and returns
    /// the names of the ones it created.
    pub fn bootstrap(&mut self) -> Result<Vec<String>> {
        let tables: Vec<(String, String)> = self
            .registry
            .tables()
            .iter()
            .map(|t| (t.name().to_string(), t.create_sql()))
            .collect();

        let tx = self.conn.transaction()?;
        let mut created = Vec::new();
        for (name, create) in &tables {
            echo_sql(&*self.log, self.echo, TABLE_EXISTS_SQL);
            let exists = tx
                .query_row(TABLE_EXISTS_SQL, [name], |_| Ok(()))
                .optional()?
                .is_some();
            if exists {
                continue;
            }
            echo_sql(&*self.log, self.echo, create);
            tx.execute(create, [])?;
            created.push(name.clone());
        }
        tx.commit()?;

        if !created.is_empty() && self.log.enabled(Level::Info) {
            self.log
                .record(Level::Info, QUALIFIER, &json!(created).to_string(), "bootstrapped");
        }
        Ok(created)
    }

    /// Builds the row an entity is stored as.
    pub fn transform<T: Model>(&self, entity: &Entity<T>) -> Result<Row> {
        build_row(self.registry.get::<T>()?, entity)
    }

    /// Writes all entities in one transaction, in the order given.
    pub fn insert<T: Model>(&mut self, entities: &[Entity<T>]) -> Result<usize> {
        let table = self.registry.get::<T>()?;
        if entities.is_empty() {
            return Err(Error::EmptyBatch { op: "insert" });
        }
        let rows = entities
            .iter()
            .map(|e| build_row(table, e))
            .collect::<Result<Vec<Row>>>()?;
        let sql = table.insert_sql();

        let tx = self.conn.transaction()?;
        {
            echo_sql(&*self.log, self.echo, &sql);
            let mut stmt = tx.prepare(&sql)?;
            for row in &rows {
                stmt.execute(params_from_iter(row.iter().map(|(_, v)| v)))?;
            }
        }
        tx.commit()?;

        if self.log.enabled(Level::Debug) {
            let payload = json!({"table": table.name(), "rows": rows.len()}).to_string();
            self.log.record(Level::Debug, QUALIFIER, &payload, "inserted");
        }
        Ok(rows.len())
    }

    /// Loads the entities stored under `ids`, keyed by identifier. Ids with
    /// no row are left out.
    pub fn retrieve<T: Model>(&mut self, ids: &[Uuid]) -> Result<HashMap<Uuid, Entity<T>>> {
        let table = self.registry.get::<T>()?;
        if ids.is_empty() {
            return Err(Error::EmptyBatch { op: "retrieve" });
        }
        let keys: Vec<String> = ids.iter().map(Uuid::to_string).collect();

        let tx = self.conn.transaction()?;
        let mut stored: Vec<(String, String)> = Vec::new();
        for chunk in keys.chunks(MAX_BIND_PARAMS) {
            let sql = table.select_sql(chunk.len());
            echo_sql(&*self.log, self.echo, &sql);
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                stored.push(row?);
            }
        }
        tx.commit()?;

        let mut found = HashMap::with_capacity(stored.len());
        for (row_id, event) in stored {
            let entity = Entity::<T>::from_event_json(&event, &*self.log)?;
            if Uuid::parse_str(&row_id).ok() != Some(entity.table_id()) {
                return Err(Error::IdMismatch {
                    row_id,
                    table_id: entity.table_id(),
                });
            }
            found.insert(entity.table_id(), entity);
        }
        Ok(found)
    }
}

fn build_row<T: Model>(table: &TableMapping, entity: &Entity<T>) -> Result<Row> {
    let dict = entity.as_dict()?;
    let event = to_event_json(&dict)?;
    let mut row = Row::new();
    for col in table.writable_columns() {
        let value = match col.name.as_str() {
            ID_COLUMN => SqlValue::Text(entity.table_id().to_string()),
            EVENT_COLUMN => SqlValue::Text(event.clone()),
            name => {
                let field = dict.get(name).ok_or_else(|| Error::MissingColumnValue {
                    table: table.name().to_string(),
                    column: name.to_string(),
                })?;
                col.to_sql(table.name(), field)?
            }
        };
        row.push((col.name.clone(), value));
    }
    Ok(row)
}

fn echo_sql(log: &dyn LogSink, enabled: bool, sql: &str) {
    if enabled && log.enabled(Level::Debug) {
        log.record(Level::Debug, QUALIFIER, sql, "sql");
    }
}
