//! Username/password registry kept in a flat text file.
//!
//! Passwords are stored and compared in clear text. This is a collaborator
//! for local use, not a security boundary.

pub mod error;
mod store;

pub use error::{Error, Result};
pub use store::{AuthResponse, CredentialStore};
