//! hoard-secrets: payload formats for decrypted secret values.
//!
//! The storage core treats values as opaque bytes. This crate gives them
//! shape: either [`Secret::Plain`] bytes or a [`Secret::Structured`] record
//! of `Key: value` headers followed by a free-form body.

pub mod secret;

pub use secret::{InvalidHeader, Secret};
