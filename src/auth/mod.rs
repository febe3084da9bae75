//! # Authorization Module
//!
//! The principal attached to a request by an upstream authentication layer and
//! the guards the operator endpoints use.

pub mod middleware;
pub mod principal;

pub use middleware::{bearer_token_principal, require_admin, TokenAuthState};
pub use principal::{Principal, UserRole};
