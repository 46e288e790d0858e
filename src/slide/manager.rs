//! Exclusive ownership of one backend handle.
//!
//! ```text
//!   caller A ──┐
//!   caller B ──┼──> Mutex<State> ──> Box<dyn SlideBackend> (one native handle)
//!   caller C ──┘      │
//!                     ├─ backend: None       -> HandleClosed
//!                     └─ poisoned: Some(..)  -> BackendIo (fatal)
//! ```
//!
//! Every backend call runs inside [`ResourceManager::with_backend`], which
//! holds the lock for exactly the duration of the call. The guard is
//! released on every exit path, including errors and panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{info, warn};

use crate::backend::SlideBackend;
use crate::error::SlideError;
use crate::format::BackendKind;

struct State {
    backend: Option<Box<dyn SlideBackend>>,
    /// Set after an unrecoverable backend failure
    poisoned: Option<String>,
}

/// Serializes access to a backend handle and tracks its lifetime.
pub struct ResourceManager {
    kind: BackendKind,
    state: Mutex<State>,
    closed: AtomicBool,
}

impl ResourceManager {
    pub fn new(backend: Box<dyn SlideBackend>) -> Self {
        ResourceManager {
            kind: backend.kind(),
            state: Mutex::new(State {
                backend: Some(backend),
                poisoned: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, SlideError> {
        self.state
            .lock()
            .map_err(|_| SlideError::fatal_io(self.kind, "slide lock poisoned by a panicked reader"))
    }

    /// Run `f` with exclusive access to the backend.
    ///
    /// # Errors
    /// `HandleClosed` after [`close`](Self::close); a fatal `BackendIo` once
    /// an earlier call failed unrecoverably; otherwise whatever `f` returns.
    pub fn with_backend<T>(
        &self,
        f: impl FnOnce(&mut dyn SlideBackend) -> Result<T, SlideError>,
    ) -> Result<T, SlideError> {
        let mut state = self.lock()?;
        if state.backend.is_none() {
            return Err(SlideError::HandleClosed { kind: self.kind });
        }
        if let Some(reason) = &state.poisoned {
            return Err(SlideError::fatal_io(
                self.kind,
                format!("handle unusable after earlier failure: {reason}"),
            ));
        }

        let result = match state.backend.as_deref_mut() {
            Some(backend) => f(backend),
            None => return Err(SlideError::HandleClosed { kind: self.kind }),
        };

        if let Err(err) = &result {
            if err.is_unrecoverable() {
                warn!(kind = %self.kind, error = %err, "backend failed unrecoverably; refusing further calls");
                state.poisoned = Some(err.to_string());
            }
        }
        result
    }

    /// `HandleClosed` once closed. Does not take the lock.
    pub fn ensure_open(&self) -> Result<(), SlideError> {
        if self.is_closed() {
            Err(SlideError::HandleClosed { kind: self.kind })
        } else {
            Ok(())
        }
    }

    /// Release the backend. Returns `false` when it was already closed.
    ///
    /// Waits for an in-flight call to finish first.
    pub fn close(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.closed.store(true, Ordering::Release);
        match state.backend.take() {
            Some(mut backend) => {
                backend.close();
                info!(kind = %self.kind, "slide closed");
                true
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_poisoned(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.poisoned.is_some())
            .unwrap_or(true)
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("kind", &self.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}
