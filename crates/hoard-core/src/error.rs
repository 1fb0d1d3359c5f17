use std::fmt;

use thiserror::Error;

pub type HoardResult<T> = Result<T, HoardError>;

/// Which authenticated decryption failed.
///
/// A wrong passphrase (`PrivateKey`) must be told apart from a tampered or
/// foreign message (`SessionKey`, `Body`) so callers know when to re-prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScope {
    PrivateKey,
    SessionKey,
    Body,
}

impl fmt::Display for AuthScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthScope::PrivateKey => "private key",
            AuthScope::SessionKey => "session key",
            AuthScope::Body => "message body",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum HoardError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("operation canceled")]
    Canceled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("no private identity available")]
    NoIdentity,

    #[error("unknown recipient: {0}")]
    UnknownRecipient(String),

    #[error("unknown sender: {0}")]
    UnknownSender(String),

    #[error("message is not encrypted for any local identity")]
    NotForMe,

    #[error("authentication failed: {0}")]
    Auth(AuthScope),

    #[error("passphrase prompt aborted")]
    PromptAborted,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("sync incomplete: {failed} blob transfer(s) failed")]
    SyncPartial { failed: usize },

    #[error("remote is locked")]
    RemoteLocked,

    #[error("remote storage error: {0}")]
    Remote(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HoardError {
    /// Errors a retry loop may try again. Integrity failures never qualify.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HoardError::Remote(_) | HoardError::Timeout(_) | HoardError::RemoteLocked
        )
    }

    /// Conditions that are part of normal operation and only logged at debug.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            HoardError::NotFound(_) | HoardError::NotForMe | HoardError::RemoteLocked
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HoardError::NotFound(_))
    }
}

impl From<prost::DecodeError> for HoardError {
    fn from(e: prost::DecodeError) -> Self {
        HoardError::Malformed(e.to_string())
    }
}
