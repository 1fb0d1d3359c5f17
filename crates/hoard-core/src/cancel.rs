use tokio_util::sync::CancellationToken;

use crate::error::{HoardError, HoardResult};

/// Checkpoint for cancellable operations: `Err(Canceled)` once the token fires.
pub fn ensure_active(cancel: &CancellationToken) -> HoardResult<()> {
    if cancel.is_cancelled() {
        return Err(HoardError::Canceled);
    }
    Ok(())
}
