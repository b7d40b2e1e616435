//! Database module for upwatch.
//!
//! Provides SQLite storage for targets, probe history and settings.

mod models;
mod store;

pub use models::*;
pub use store::*;
