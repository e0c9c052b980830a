//! Identified, serializable domain objects.
//!
//! A domain type implements [`Model`] (its per-type policy) and derives
//! serde's `Serialize`/`Deserialize` for its fields. Wrapping it in an
//! [`Entity`] gives it an identity, an optional creation timestamp, the
//! canonical event-JSON form and write enforcement.
//!
//! Fields marked `#[serde(skip)]` are internal bookkeeping: they never
//! show up in the dictionary projection or the event JSON. Mutable types
//! holding such fields implement [`Model::keep_skipped`] so writes through
//! [`Entity::set`] leave them in place.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::ops::Deref;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::logging::{Level, LogSink};

pub const TABLE_ID: &str = "table_id";
pub const CREATED_AT: &str = "created_at";

/// Dictionary projection of an entity; ordered by key.
pub type Dict = BTreeMap<String, Value>;

/// Per-type policy every persisted domain type declares.
///
/// The type must serialize to a JSON object (a struct with named fields,
/// or a map).
pub trait Model: Serialize + DeserializeOwned + 'static {
    /// Qualifier used in log records; the bare type name by default.
    fn type_name() -> &'static str {
        short_type_name::<Self>()
    }

    fn is_immutable() -> bool {
        true
    }

    fn has_timestamp() -> bool {
        false
    }

    fn db_table_name() -> String {
        Self::type_name().to_lowercase()
    }

    /// Moves `#[serde(skip)]` state from `previous` into `self` after
    /// [`Entity::set`] rebuilt the value from JSON. Types without skipped
    /// fields keep the no-op.
    fn keep_skipped(&mut self, _previous: Self) {}
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A domain value with identity.
///
/// Reads go through `Deref<Target = T>`. Writes go through [`Entity::set`]
/// or [`Entity::update`], which refuse to touch immutable types.
#[derive(Debug, Clone)]
pub struct Entity<T: Model> {
    table_id: Uuid,
    created_at: Option<DateTime<Utc>>,
    data: T,
}

impl<T: Model> Entity<T> {
    pub fn new(data: T, log: &dyn LogSink) -> Self {
        let entity = Self {
            created_at: T::has_timestamp().then(Utc::now),
            table_id: Uuid::new_v4(),
            data,
        };
        entity.announce(log);
        entity
    }

    /// Rebuilds an entity from its event JSON.
    ///
    /// Keys missing from the payload keep the values a fresh construction
    /// would have given them, so a payload without `table_id` gets a new
    /// identifier.
    pub fn from_event_json(j: &str, log: &dyn LogSink) -> Result<Self> {
        let mut fields: Map<String, Value> = serde_json::from_str(j)?;

        let mut created_at = T::has_timestamp().then(Utc::now);
        let mut table_id = Uuid::new_v4();

        if let Some(raw) = fields.remove(TABLE_ID) {
            table_id = parse_table_id(raw)?;
        }
        if T::has_timestamp() {
            if let Some(raw) = fields.remove(CREATED_AT) {
                created_at = Some(parse_created_at(raw)?);
            }
        }

        let data: T = serde_json::from_value(Value::Object(fields))?;
        let entity = Self {
            table_id,
            created_at,
            data,
        };
        entity.announce(log);
        Ok(entity)
    }

    pub fn table_id(&self) -> Uuid {
        self.table_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn as_dict(&self) -> Result<Dict> {
        let mut dict: Dict = domain_fields(&self.data)?.into_iter().collect();
        dict.insert(TABLE_ID.to_string(), Value::String(self.table_id.to_string()));
        if let Some(ts) = &self.created_at {
            dict.insert(CREATED_AT.to_string(), Value::String(format_timestamp(ts)));
        }
        Ok(dict)
    }

    pub fn as_event_json(&self) -> Result<String> {
        to_event_json(&self.as_dict()?)
    }

    /// Sets one domain field from a JSON value.
    ///
    /// The value is rebuilt from its serialized fields, then handed the
    /// previous value through [`Model::keep_skipped`].
    pub fn set(&mut self, field: &str, value: Value) -> Result<()> {
        let bookkeeping = field == TABLE_ID || (T::has_timestamp() && field == CREATED_AT);
        if T::is_immutable() || bookkeeping {
            return Err(Error::Immutable {
                type_name: T::type_name(),
                field: field.to_string(),
            });
        }

        let mut fields = domain_fields(&self.data)?;
        let known = fields.contains_key(field);
        fields.insert(field.to_string(), value);
        let data: T = serde_json::from_value(Value::Object(fields))?;

        // serde drops keys it does not know. A field absent both before and
        // after the write was never the type's.
        if !known && !domain_fields(&data)?.contains_key(field) {
            return Err(Error::UnknownField {
                type_name: T::type_name(),
                field: field.to_string(),
            });
        }
        let previous = std::mem::replace(&mut self.data, data);
        self.data.keep_skipped(previous);
        Ok(())
    }

    pub fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        if T::is_immutable() {
            return Err(Error::Immutable {
                type_name: T::type_name(),
                field: "*".to_string(),
            });
        }
        f(&mut self.data);
        Ok(())
    }

    fn announce(&self, log: &dyn LogSink) {
        if !log.enabled(Level::Info) {
            return;
        }
        let payload = self
            .as_event_json()
            .unwrap_or_else(|err| format!("<unserializable: {}>", err));
        log.record(Level::Info, T::type_name(), &payload, "initialized");
    }
}

impl<T: Model> Deref for Entity<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T: Model> PartialEq for Entity<T> {
    fn eq(&self, other: &Self) -> bool {
        self.table_id == other.table_id
    }
}

impl<T: Model> Eq for Entity<T> {}

impl<T: Model> Hash for Entity<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table_id.hash(state);
    }
}

impl<T: Model> fmt::Display for Entity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_event_json() {
            Ok(j) => f.write_str(&j),
            Err(_) => write!(f, "{}[{}]", T::type_name(), self.table_id),
        }
    }
}

fn domain_fields<T: Model>(data: &T) -> Result<Map<String, Value>> {
    let fields = match serde_json::to_value(data)? {
        Value::Object(fields) => fields,
        _ => {
            return Err(Error::NotAnObject {
                type_name: T::type_name(),
            })
        }
    };
    let reserved = if fields.contains_key(TABLE_ID) {
        Some(TABLE_ID)
    } else if T::has_timestamp() && fields.contains_key(CREATED_AT) {
        Some(CREATED_AT)
    } else {
        None
    };
    match reserved {
        Some(field) => Err(Error::ReservedField {
            type_name: T::type_name(),
            field: field.to_string(),
        }),
        None => Ok(fields),
    }
}

fn value_text(raw: Value) -> String {
    match raw {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn parse_table_id(raw: Value) -> Result<Uuid> {
    let value = value_text(raw);
    Uuid::parse_str(&value).map_err(|source| Error::InvalidTableId { value, source })
}

fn parse_created_at(raw: Value) -> Result<DateTime<Utc>> {
    let value = value_text(raw);
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|source| Error::InvalidTimestamp { value, source })
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// =============================================================================
// Canonical encoding
// =============================================================================

/// `", "` between items and `": "` after keys.
struct EventFormatter;

impl serde_json::ser::Formatter for EventFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Encodes a value in the canonical event layout. Object keys come out
/// sorted at every depth.
pub fn to_event_json<S: Serialize + ?Sized>(value: &S) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, EventFormatter);
    value.serialize(&mut ser)?;
    String::from_utf8(buf)
        .map_err(|e| serde_json::Error::io(io::Error::new(io::ErrorKind::InvalidData, e)).into())
}
