//! Teardown notification for artifacts created within one unit of work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::ArtifactCell;

pub(crate) struct ScopeInner {
    id: String,
    torn_down: AtomicBool,
    artifacts: Mutex<Vec<Weak<ArtifactCell>>>,
}

impl ScopeInner {
    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let artifacts = std::mem::take(&mut *self.artifacts.lock());
        let mut detached = 0usize;
        for cell in artifacts.iter().filter_map(Weak::upgrade) {
            cell.detach();
            detached += 1;
        }
        tracing::debug!(scope = %self.id, live_artifacts = detached, "Scope torn down");
    }
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Lifetime of one unit of work (typically one request).
///
/// Cloning yields another handle to the same scope. Teardown happens on an
/// explicit [`teardown`](RequestScope::teardown) or when the last handle is
/// dropped, whichever comes first, and runs at most once.
#[derive(Clone)]
pub struct RequestScope {
    inner: Arc<ScopeInner>,
}

impl RequestScope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: id.into(),
                torn_down: AtomicBool::new(false),
                artifacts: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Detach every live artifact registered with this scope.
    pub fn teardown(&self) {
        self.inner.teardown();
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.is_torn_down()
    }

    /// Number of registered artifacts that are still alive.
    pub fn live_artifacts(&self) -> usize {
        self.inner
            .artifacts
            .lock()
            .iter()
            .filter(|cell| cell.strong_count() > 0)
            .count()
    }

    pub(super) fn downgrade(&self) -> Weak<ScopeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn register(&self, cell: &Arc<ArtifactCell>) {
        if self.is_torn_down() {
            tracing::warn!(scope = %self.inner.id, "Artifact created after scope teardown");
            return;
        }
        let mut artifacts = self.inner.artifacts.lock();
        artifacts.retain(|existing| existing.strong_count() > 0);
        artifacts.push(Arc::downgrade(cell));
    }
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestScope")
            .field("id", &self.inner.id)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactStateKind, DeferredArtifact};
    use crate::codec::{DecodeOptions, ImageCodec, RasterCodec};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn artifact_in(scope: &RequestScope) -> DeferredArtifact {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(3, 2, Rgb([1, 2, 3])))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        let handle = RasterCodec.decode(&png, &DecodeOptions::new()).unwrap();
        DeferredArtifact::wrap_in(handle, scope)
    }

    #[test]
    fn teardown_detaches_pending_artifacts() {
        let scope = RequestScope::new("req-1");
        let artifact = artifact_in(&scope);
        assert!(artifact.scope_alive());
        assert_eq!(scope.live_artifacts(), 1);

        scope.teardown();

        assert_eq!(artifact.state(), ArtifactStateKind::Detached);
        assert!(!artifact.scope_alive());
        assert!(artifact.read().unwrap().starts_with(b"\x89PNG"));
    }

    #[test]
    fn dropping_last_handle_tears_down() {
        let scope = RequestScope::new("req-2");
        let artifact = artifact_in(&scope);
        let other = scope.clone();
        drop(scope);
        assert_eq!(artifact.state(), ArtifactStateKind::Pending);
        drop(other);
        assert_eq!(artifact.state(), ArtifactStateKind::Detached);
    }

    #[test]
    fn teardown_runs_once_and_skips_released_artifacts() {
        let scope = RequestScope::new("req-3");
        let released = artifact_in(&scope);
        let kept = artifact_in(&scope);
        released.destroy();
        assert_eq!(scope.live_artifacts(), 1);

        scope.teardown();
        scope.teardown();
        assert!(scope.is_torn_down());
        assert_eq!(kept.state(), ArtifactStateKind::Detached);
    }

    #[test]
    fn artifact_created_after_teardown_stays_pending() {
        let scope = RequestScope::new("req-4");
        scope.teardown();
        let late = artifact_in(&scope);
        assert!(!late.scope_alive());
        assert_eq!(late.state(), ArtifactStateKind::Pending);
    }
}
