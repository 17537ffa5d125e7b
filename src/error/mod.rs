//! Error handling built on `thiserror` and `anyhow`.
//!
//! Domain errors cover construction-time faults; nothing on the
//! streaming hot path returns errors. Operational helpers add context
//! when propagating errors through calling code.

pub mod domain;
pub mod operational;

pub use {domain::AudioError, operational::ResultExt};
