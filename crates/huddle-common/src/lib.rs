//! # huddle-common
//!
//! Shared types, configuration, error handling, and the persistence contract used
//! across all Huddle crates. No realtime logic lives here.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod validation;

pub use error::{HuddleError, HuddleResult};
