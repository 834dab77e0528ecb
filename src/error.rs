//! Crate-wide error type.
//!
//! Every subsystem (KV adapter, import pipeline, entry resolver, ACL
//! evaluator) funnels its failures through [`DbError`] so that job
//! controllers and CLI glue only ever have to match on one enum.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("KV store error: {0}")]
    Kv(String),

    #[error("KV store map is full")]
    MapFull,

    #[error("KV store panic (corruption detected): {0}")]
    IntegrityPanic(String),

    #[error("LDIF parse error at {file}:{line}: {message}")]
    LdifParse {
        file: String,
        line: u64,
        message: String,
    },

    #[error("ACL parse error: {0}")]
    AclParse(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("syntax error: {0}")]
    SyntaxError(String),

    #[error("duplicate DN: {0}")]
    DuplicateDn(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("transient error (retry exhausted): {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("job aborted")]
    Aborted,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<heed::Error> for DbError {
    fn from(e: heed::Error) -> Self {
        use heed::Error as HeedError;
        match &e {
            HeedError::Mdb(heed::MdbError::MapFull) => DbError::MapFull,
            HeedError::Mdb(heed::MdbError::Panic) => DbError::IntegrityPanic(e.to_string()),
            HeedError::Mdb(heed::MdbError::NotFound) => DbError::NotFound(e.to_string()),
            _ => DbError::Kv(e.to_string()),
        }
    }
}
