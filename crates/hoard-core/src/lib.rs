pub mod cancel;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod logging;
pub mod wire;

pub use cancel::ensure_active;
pub use error::{AuthScope, HoardError, HoardResult};

/// Generated protobuf types (from src/proto/*.proto)
pub mod proto {
    /// Ciphertext envelopes and keyrings.
    pub mod xc {
        include!(concat!(env!("OUT_DIR"), "/xc.rs"));
    }

    /// Store index.
    pub mod index {
        include!(concat!(env!("OUT_DIR"), "/index.rs"));
    }
}
