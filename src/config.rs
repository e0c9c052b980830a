use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::logging::{JsonlSink, Level, LogSink};

/// Where the mapper keeps its tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Memory,
    File(PathBuf),
}

impl Backend {
    /// Accepts `sqlite://` and `:memory:` for an in-memory store,
    /// `sqlite:///relative/path`, `sqlite:////absolute/path` or a bare path
    /// for a file.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() || uri == ":memory:" {
            return Ok(Backend::Memory);
        }
        match uri.split_once("://") {
            Some(("sqlite", rest)) => {
                let path = rest.strip_prefix('/').unwrap_or(rest);
                if path.is_empty() || path == ":memory:" {
                    Ok(Backend::Memory)
                } else {
                    Ok(Backend::File(PathBuf::from(path)))
                }
            }
            Some((scheme, _)) => Err(Error::UnsupportedBackend(scheme.to_string())),
            None => Ok(Backend::File(PathBuf::from(uri))),
        }
    }

    pub fn connect(&self) -> Result<Connection> {
        let conn = match self {
            Backend::Memory => Connection::open_in_memory()?,
            Backend::File(path) => Connection::open(path)?,
        };
        Ok(conn)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_uri: String,
    /// Record every statement the mapper issues at debug level.
    pub echo: bool,
    pub log_level: Level,
    /// JSONL destination; stdout when unset.
    pub log_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_uri: std::env::var("DB_URI").unwrap_or_else(|_| "sqlite://".to_string()),
            echo: std::env::var("DB_ECHO")
                .ok()
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            log_level: Level::from_env(),
            log_path: std::env::var("LOG_PATH").ok().filter(|p| !p.trim().is_empty()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            db_uri: "sqlite://".to_string(),
            echo: false,
            log_level: Level::Info,
            log_path: None,
        }
    }

    pub fn backend(&self) -> Result<Backend> {
        Backend::parse(&self.db_uri)
    }

    pub fn open_connection(&self) -> Result<Connection> {
        self.backend()?.connect()
    }

    pub fn build_sink(&self) -> Result<Arc<dyn LogSink>> {
        let sink = match &self.log_path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                JsonlSink::new(self.log_level, Box::new(file))
            }
            None => JsonlSink::stdout(self.log_level),
        };
        Ok(Arc::new(sink))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_memory_forms() {
        assert_eq!(Backend::parse("sqlite://").unwrap(), Backend::Memory);
        assert_eq!(Backend::parse(":memory:").unwrap(), Backend::Memory);
        assert_eq!(Backend::parse("sqlite:///:memory:").unwrap(), Backend::Memory);
        assert_eq!(Backend::parse("").unwrap(), Backend::Memory);
    }

    #[test]
    fn test_backend_file_forms() {
        assert_eq!(
            Backend::parse("sqlite:///data/llama.db").unwrap(),
            Backend::File(PathBuf::from("data/llama.db"))
        );
        assert_eq!(
            Backend::parse("sqlite:////var/lib/llama.db").unwrap(),
            Backend::File(PathBuf::from("/var/lib/llama.db"))
        );
        assert_eq!(
            Backend::parse("llama.db").unwrap(),
            Backend::File(PathBuf::from("llama.db"))
        );
    }

    #[test]
    fn test_backend_rejects_other_schemes() {
        let err = Backend::parse("postgresql://user@host/db").unwrap_err();
        assert!(matches!(err, Error::UnsupportedBackend(ref s) if s == "postgresql"));
    }

    #[test]
    fn test_in_memory_connection_opens() {
        let conn = Config::in_memory().open_connection().unwrap();
        let hello: String = conn
            .query_row("SELECT 'hello world'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(hello, "hello world");
    }
}
