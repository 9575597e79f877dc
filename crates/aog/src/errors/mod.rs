//! Centralized error handling for the AOG gateway
//!
//! All fallible paths in the crate converge on [`AogError`]. The variants are
//! uniform error kinds rather than positional codes; the web layer maps each
//! kind to an HTTP status and a stable `business_code` for the structured
//! failure body.

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AogError
pub type AogResult<T> = Result<T, AogError>;
