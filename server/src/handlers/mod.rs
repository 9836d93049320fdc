//! Request handlers for record operations.

mod records;

pub use records::*;
