//! Common types and errors shared across `secrets-core` crates.

pub mod error;
pub mod model;

pub use error::CoreError;
pub use model::{DataKey, EncryptionOption, ProviderId};
