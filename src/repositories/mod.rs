//! Repository layer for the user store
//!
//! Business logic depends on the traits in [`traits`]; [`user`] provides the
//! SQLite implementation used by the binary and the integration tests.

pub mod traits;
pub mod user;

pub use traits::*;
pub use user::{UserRepository, UserSession};
