//! Authentication.

mod middleware;

pub use middleware::AuthUser;
