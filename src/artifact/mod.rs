//! Deferred materialization of encoded image bytes.
//!
//! A [`DeferredArtifact`] owns a decoded image handle until something reads
//! its bytes. The first [`read`](DeferredArtifact::read) encodes the handle,
//! drops it and caches the bytes; every later read returns the cache.
//!
//! ```text
//!            read()                       on_scope_teardown()
//! Pending ─────────────▶ Realized   Pending ─────────────────▶ Detached
//!    │ mutate()            │ read() → cached    │ read() → cached
//!    └──── handle          └──── bytes          └──── bytes
//! ```
//!
//! Clones are shared views of one artifact. The handle or bytes are released
//! when the last view is dropped. The enclosing [`RequestScope`] only holds a
//! weak registration so it can force detachment at teardown; it never owns
//! the artifact.

mod scope;

pub use scope::RequestScope;

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;

use crate::codec::{EngineError, HandleProperties, ImageHandle};

use scope::ScopeInner;

/// Errors raised by artifact operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArtifactError {
    /// The handle was already serialized; transforms must run before any read.
    #[error("artifact already realized, handle can no longer be mutated")]
    StaleMutation,

    /// The engine failed to serialize the handle.
    #[error("failed to serialize image: {0}")]
    Encode(#[source] EngineError),
}

/// Observable lifecycle state of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStateKind {
    Pending,
    Realized,
    Detached,
}

enum ArtifactState {
    Pending(Box<dyn ImageHandle>),
    Realized(Bytes),
    Detached(Bytes),
}

impl ArtifactState {
    fn kind(&self) -> ArtifactStateKind {
        match self {
            ArtifactState::Pending(_) => ArtifactStateKind::Pending,
            ArtifactState::Realized(_) => ArtifactStateKind::Realized,
            ArtifactState::Detached(_) => ArtifactStateKind::Detached,
        }
    }
}

pub(crate) struct ArtifactCell {
    state: Mutex<ArtifactState>,
    scope: Weak<ScopeInner>,
}

impl ArtifactCell {
    /// Serialize a still-pending handle into independently owned bytes.
    pub(crate) fn detach(&self) {
        let mut state = self.state.lock();
        let encoded = match &*state {
            ArtifactState::Pending(handle) => handle.encode(),
            ArtifactState::Realized(_) | ArtifactState::Detached(_) => return,
        };

        match encoded {
            Ok(bytes) => {
                tracing::debug!(len = bytes.len(), "Scope torn down, artifact detached");
                *state = ArtifactState::Detached(Bytes::from(bytes));
            }
            Err(err) => {
                // Keep the handle: a later read retries and reports the failure.
                tracing::warn!(%err, "Failed to detach artifact at scope teardown");
            }
        }
    }
}

impl Drop for ArtifactCell {
    fn drop(&mut self) {
        match self.state.get_mut() {
            ArtifactState::Pending(_) => tracing::trace!("Releasing unrealized image handle"),
            ArtifactState::Realized(bytes) | ArtifactState::Detached(bytes) => {
                tracing::trace!(len = bytes.len(), "Releasing artifact bytes")
            }
        }
    }
}

/// Lazily encoded image shared by every stage of one pipeline.
#[derive(Clone)]
pub struct DeferredArtifact {
    cell: Arc<ArtifactCell>,
}

impl DeferredArtifact {
    /// Take ownership of `handle`, unattached to any scope.
    pub fn wrap(handle: Box<dyn ImageHandle>) -> Self {
        Self {
            cell: Arc::new(ArtifactCell {
                state: Mutex::new(ArtifactState::Pending(handle)),
                scope: Weak::new(),
            }),
        }
    }

    /// Take ownership of `handle` and register for `scope`'s teardown.
    pub fn wrap_in(handle: Box<dyn ImageHandle>, scope: &RequestScope) -> Self {
        let artifact = Self {
            cell: Arc::new(ArtifactCell {
                state: Mutex::new(ArtifactState::Pending(handle)),
                scope: scope.downgrade(),
            }),
        };
        scope.register(&artifact.cell);
        artifact
    }

    /// Return the encoded bytes, encoding on first call.
    ///
    /// A failed encode leaves the artifact pending.
    pub fn read(&self) -> Result<Bytes, ArtifactError> {
        let mut state = self.cell.state.lock();
        let encoded = match &*state {
            ArtifactState::Realized(bytes) | ArtifactState::Detached(bytes) => {
                return Ok(bytes.clone());
            }
            ArtifactState::Pending(handle) => handle.encode(),
        };

        let bytes = Bytes::from(encoded.map_err(ArtifactError::Encode)?);
        tracing::debug!(len = bytes.len(), "Artifact realized on first read");
        *state = ArtifactState::Realized(bytes.clone());
        Ok(bytes)
    }

    /// Apply `f` to the pending handle in place.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut dyn ImageHandle) -> R) -> Result<R, ArtifactError> {
        let mut state = self.cell.state.lock();
        match &mut *state {
            ArtifactState::Pending(handle) => Ok(f(handle.as_mut())),
            ArtifactState::Realized(_) | ArtifactState::Detached(_) => {
                Err(ArtifactError::StaleMutation)
            }
        }
    }

    /// Properties of the pending handle, `None` once realized.
    pub fn properties(&self) -> Option<HandleProperties> {
        match &*self.cell.state.lock() {
            ArtifactState::Pending(handle) => Some(handle.properties()),
            ArtifactState::Realized(_) | ArtifactState::Detached(_) => None,
        }
    }

    /// Called by the owning scope at teardown. No-op unless pending.
    pub fn on_scope_teardown(&self) {
        self.cell.detach();
    }

    /// Release this view. The last view releases the handle or bytes.
    pub fn destroy(self) {
        tracing::trace!(
            state = ?self.state(),
            remaining = Arc::strong_count(&self.cell) - 1,
            "Artifact view released"
        );
    }

    pub fn state(&self) -> ArtifactStateKind {
        self.cell.state.lock().kind()
    }

    /// Whether the enclosing scope is still alive.
    pub fn scope_alive(&self) -> bool {
        self.cell
            .scope
            .upgrade()
            .is_some_and(|scope| !scope.is_torn_down())
    }

    /// Number of live views of this artifact.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    pub fn ptr_eq(&self, other: &DeferredArtifact) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for DeferredArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredArtifact")
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .finish()
    }
}
