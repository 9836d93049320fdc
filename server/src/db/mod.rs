//! SQLite persistence for record tables.

mod pool;
mod records;

pub use pool::*;
pub use records::*;
