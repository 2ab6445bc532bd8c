//! `bulkimport-core` — shared building blocks for the import pipeline.
//!
//! This crate contains identifiers and error primitives only (no IO, no
//! infrastructure concerns).

pub mod entity;
pub mod error;
pub mod id;

pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{JobId, TenantId};
