//! Database module.
//!
//! Holds the persisted monitor state model and the key-value store it lives in.

mod models;
mod store;

pub use models::*;
pub use store::*;
