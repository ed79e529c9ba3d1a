//! bf-core
//!
//! The central domain types, vote reconciliation and port definitions for the forum.

pub mod error;
pub mod models;
pub mod traits;
pub mod vote;

// Re-exporting for easier access in other crates
pub use error::*;
pub use models::*;
pub use traits::*;
pub use vote::*;
