//! `enrolsync-core`: shared identifiers and the domain error model.
//!
//! This crate holds **pure domain** primitives (no storage or scheduling concerns).

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{CourseId, UserId};
