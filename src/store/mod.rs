//! Persistence layer: libSQL storage for customers, messages and canned replies.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
