//! hoard-sync: reconcile a local store with a remote object store, and the
//! encrypted [`Vault`] facade that ties store, cipher and remote together.

pub mod lock;
pub mod retry;
pub mod sync;
pub mod vault;

pub use retry::RetryPolicy;
pub use sync::{sync, SyncContext, SyncOptions, SyncReport};
pub use vault::Vault;
