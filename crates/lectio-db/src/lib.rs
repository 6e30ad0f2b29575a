//! Lectio persistence layer
//!
//! Repository traits with PostgreSQL (`sqlx`) implementations and an in-memory store
//! that implements every trait for tests and single-process runs.

pub mod db;

pub use db::*;
