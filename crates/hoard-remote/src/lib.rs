//! hoard-remote: the object store behind remote sync.
//!
//! An OpenDAL [`opendal::Operator`] (S3-compatible or in-memory) wrapped in
//! [`RemoteStore`], which adds a key prefix, per-call timeouts and
//! cancellation.

pub mod operator;
pub mod remote;

pub use operator::{build_from_env, build_operator, memory_operator};
pub use remote::{map_opendal_error, RemoteStore, INDEX_KEY, LOCK_KEY};
