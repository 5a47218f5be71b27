//! History module.
//!
//! Append-only status history, partitioned into one JSON file per day.

mod models;
mod store;
mod summary;

pub use models::*;
pub use store::*;
pub use summary::*;
