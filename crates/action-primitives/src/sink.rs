//! Artifact persistence port.

use async_trait::async_trait;
use dashmap::DashMap;
use soulbrowser_core_types::{ActionId, ArtifactKind};

use crate::errors::ActionError;

pub const SCREENSHOT_DIR: &str = "artifacts/screenshots";
pub const DOM_DIR: &str = "artifacts/dom";
pub const DIFF_DIR: &str = "artifacts/diffs";

/// Where tool artifacts end up; locations are workspace-relative paths.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn store(&self, location: &str, bytes: &[u8]) -> Result<(), ActionError>;

    async fn load(&self, location: &str) -> Result<Vec<u8>, ActionError>;
}

/// Workspace-relative location for an artifact of `action`.
pub fn artifact_location(kind: ArtifactKind, action: &ActionId, name: &str) -> String {
    let dir = match kind {
        ArtifactKind::Screenshot => SCREENSHOT_DIR,
        ArtifactKind::DomSnapshot => DOM_DIR,
        ArtifactKind::Other => DIFF_DIR,
    };
    let file: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    format!("{dir}/{}-{file}", action.as_str())
}

/// Process-local sink.
#[derive(Default)]
pub struct MemorySink {
    entries: DashMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    async fn store(&self, location: &str, bytes: &[u8]) -> Result<(), ActionError> {
        self.entries.insert(location.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn load(&self, location: &str) -> Result<Vec<u8>, ActionError> {
        self.entries
            .get(location)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ActionError::Artifact(format!("no artifact at {location}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_follow_layout() {
        let id = ActionId::from("a1");
        assert_eq!(
            artifact_location(ArtifactKind::Screenshot, &id, "shot.png"),
            "artifacts/screenshots/a1-shot.png"
        );
        assert_eq!(
            artifact_location(ArtifactKind::DomSnapshot, &id, "../dom.html"),
            "artifacts/dom/a1-.._dom.html"
        );
    }

    #[test]
    fn memory_sink_round_trips() {
        let sink = MemorySink::new();
        tokio_test::assert_ok!(tokio_test::block_on(
            sink.store("artifacts/dom/x.html", b"<p>x</p>")
        ));
        let loaded = tokio_test::block_on(sink.load("artifacts/dom/x.html")).unwrap();
        assert_eq!(loaded, b"<p>x</p>");
        tokio_test::assert_err!(tokio_test::block_on(sink.load("missing")));
        assert_eq!(sink.len(), 1);
    }
}
