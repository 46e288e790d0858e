//! Blocking slide calls on a worker thread with an external deadline.
//!
//! Backend reads cannot be interrupted. A call that overruns its deadline
//! is abandoned: the caller gets an error right away while the worker
//! finishes in the background and then releases the slide lock.

use std::time::Duration;

use tracing::warn;

use crate::error::SlideError;
use crate::format::BackendKind;

/// Run `f` on tokio's blocking pool, failing with `BackendIo` if it has not
/// finished within `timeout`.
///
/// # Errors
/// Whatever `f` returns; `BackendIo` on timeout or when the worker panics.
pub async fn run_with_timeout<T, F>(
    kind: BackendKind,
    timeout: Option<Duration>,
    f: F,
) -> Result<T, SlideError>
where
    F: FnOnce() -> Result<T, SlideError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(%kind, ?limit, "slide operation timed out; leaving worker to finish");
                return Err(SlideError::backend_io(
                    kind,
                    format!("operation timed out after {limit:?}"),
                ));
            }
        },
        None => handle.await,
    };

    joined.map_err(|e| SlideError::backend_io(kind, format!("worker failed: {e}")))?
}
