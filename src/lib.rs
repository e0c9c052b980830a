//! Event-sourced entities persisted to SQLite.
//!
//! Domain types implement [`Model`] and are wrapped in [`Entity`], which
//! gives them an identifier, an optional timestamp and a canonical event
//! JSON form. A [`Mapper`] stores each entity type in its own table (the
//! event blob plus declared columns) and loads entities back by id.
//!
//! ```no_run
//! use llama::{Column, ColumnType, Config, Entity, Mapper, Model};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Number {
//!     num: i64,
//! }
//!
//! impl Model for Number {}
//!
//! # fn main() -> llama::Result<()> {
//! let mut mapper = Mapper::open(&Config::from_env())?;
//! mapper.add_table::<Number>(vec![Column::new("num", ColumnType::Integer)])?;
//! mapper.bootstrap()?;
//!
//! let n = Entity::new(Number { num: 42 }, mapper.log());
//! let id = n.table_id();
//! mapper.insert(&[n])?;
//!
//! let found = mapper.retrieve::<Number>(&[id])?;
//! assert_eq!(found[&id].num, 42);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod logging;
pub mod mapper;
pub mod schema;

pub use config::{Backend, Config};
pub use entity::{Dict, Entity, Model};
pub use error::{Error, ErrorKind, Result};
pub use event::Event;
pub use logging::{JsonlSink, Level, LogRecord, LogSink, MemorySink, NullSink};
pub use mapper::{Mapper, Row};
pub use schema::{Column, ColumnType, Registry, TableMapping};
