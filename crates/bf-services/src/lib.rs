//! bf-services
//!
//! Forum data access layer, application state and the capability checks
//! both of them lean on.

pub mod forum;
pub mod images;
pub mod policy;
pub mod session;

pub use forum::{ForumService, ServiceOptions};
pub use session::{ForumSession, ForumSnapshot};
