//! Data Encryption Key (DEK) envelope framing, caching, and persistence.
//!
//! - [`codec`] frames and parses the `'#' <base64(id)> '#' <ciphertext>` header.
//! - [`cache`] is the TTL-bounded in-memory map of DEK id to raw key bytes.
//! - [`store`] persists [`common::DataKey`] records and enforces the
//!   at-most-one-active-per-name invariant.
//!
//! [`crate::core::SecretsCore`] is the only caller that composes all three.

pub mod cache;
pub mod codec;
pub mod store;

pub use cache::DataKeyCache;
pub use store::{DekStore, InMemoryDekStore, Session, StoreError};
