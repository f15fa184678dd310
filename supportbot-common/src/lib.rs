// File: supportbot-common/src/lib.rs
//
// Types and collaborator seams shared by the support bot crates.

pub mod error;
pub mod models;
pub mod traits;

pub use error::{Error, ValidationError};
