use std::sync::Arc;

use action_locator::{ArtifactSnapshotSource, LocatorError, PageSnapshotSource};
use action_primitives::ArtifactSink;
use async_trait::async_trait;
use parking_lot::RwLock;
use perceiver_structural::RawPage;
use soulbrowser_core_types::{Action, Observation};
use tokio_util::sync::CancellationToken;

/// Page source for recovery that falls back to the newest DOM snapshot the
/// conversation has recorded. The owning conversation keeps it current.
#[derive(Clone)]
pub struct LatestPageSource {
    sink: Arc<dyn ArtifactSink>,
    latest: Arc<RwLock<Option<String>>>,
}

impl LatestPageSource {
    pub fn new(sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            sink,
            latest: Arc::default(),
        }
    }

    pub fn record(&self, location: Option<&str>) {
        *self.latest.write() = location.map(str::to_string);
    }

    pub fn current(&self) -> Option<String> {
        self.latest.read().clone()
    }
}

#[async_trait]
impl PageSnapshotSource for LatestPageSource {
    async fn capture(
        &self,
        action: &Action,
        failed: &Observation,
        cancel: &CancellationToken,
    ) -> Result<RawPage, LocatorError> {
        let mut source = ArtifactSnapshotSource::new(Arc::clone(&self.sink));
        if let Some(location) = self.current() {
            source = source.with_fallback(location);
        }
        source.capture(action, failed, cancel).await
    }
}
