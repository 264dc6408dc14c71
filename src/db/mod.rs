//! Database module for pulsewatch.
//!
//! Provides durable SQLite storage of probe results.

mod models;
mod store;

pub use models::*;
pub use store::*;
