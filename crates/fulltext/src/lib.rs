//! Public facade crate for `fulltext`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `fulltext-core`.

pub use fulltext_core::*;
