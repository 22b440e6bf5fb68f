//! Repository functions, one module per table family. Each takes a pool and
//! returns `sqlx::Error`; mapping to `HuddleError` happens at the store boundary.

pub mod groups;
pub mod messages;
pub mod reactions;
pub mod users;
