//! Shared building blocks: error types and validated bus names

pub mod errors;
pub mod identifiers;
