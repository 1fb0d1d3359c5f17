//! hoard-store: local on-disk storage for the password store.
//!
//! - [`blob`]: content-addressed ciphertext files
//! - [`index`]: the revisioned protobuf index with merge and compaction
//! - [`store`]: the Store API (get/set/delete/list/revisions/prune)
//! - [`fsck`]: repair pass over the blob tree

pub mod blob;
pub mod fsck;
pub mod index;
pub mod store;

pub use blob::BlobStore;
pub use fsck::FsckReport;
pub use index::{CompactStats, Entry, Index, Revision};
pub use store::{Store, StoreSettings};
