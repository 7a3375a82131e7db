//! Pairing token authentication.

pub mod tokens;

pub use tokens::TokenManager;
