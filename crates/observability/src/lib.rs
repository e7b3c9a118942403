//! Process-wide logging setup shared by every binary.

/// Tracing configuration (filters, formats).
pub mod tracing;

pub use self::tracing::{LogFormat, init, init_with};
