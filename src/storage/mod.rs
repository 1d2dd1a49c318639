//! Persistent bar storage
//!
//! SQLite-backed store for instrument and bar records. The pool is created
//! once at startup and shared by all components.

mod repository;

pub use repository::{BarStore, StoreError, StoreResult};
