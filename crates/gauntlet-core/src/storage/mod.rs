//! Storage facade: object (JSON) and database (SQL) backends resolved by
//! name, so callers never bind to a concrete driver.

pub mod db;
pub mod json;
pub mod object;
pub mod sqlite;

pub use db::{open_database, DbBackend, SqlRow, SqlValue};
pub use object::{object_backend, ItemFlow, ObjectBackend, ObjectIo};
