use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condense::{condense_snapshot, condense_tree, CondenseOptions, CondensedDOM};
use crate::dom::DomTree;
use crate::errors::PerceiverError;

/// Raw page capture as handed over by a tool: markup or a JSON node tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "body", rename_all = "snake_case")]
pub enum RawPage {
    Html(String),
    Snapshot(Value),
}

impl RawPage {
    /// Sniffs the payload: JSON objects and arrays are snapshots, anything
    /// else is markup.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PerceiverError> {
        let text = String::from_utf8_lossy(bytes);
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let value = serde_json::from_str(trimmed)
                .map_err(|err| PerceiverError::Snapshot(err.to_string()))?;
            return Ok(Self::Snapshot(value));
        }
        Ok(Self::Html(text.into_owned()))
    }

    pub fn parse(&self) -> Result<DomTree, PerceiverError> {
        match self {
            Self::Html(raw) => Ok(DomTree::parse_html(raw)),
            Self::Snapshot(value) => DomTree::from_snapshot(value),
        }
    }

    pub fn condense(&self, options: &CondenseOptions) -> Result<CondensedDOM, PerceiverError> {
        match self {
            Self::Html(raw) => Ok(condense_tree(&DomTree::parse_html(raw), raw, options)),
            Self::Snapshot(value) => condense_snapshot(value, options),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_payload_format() {
        let html = RawPage::from_bytes(b"<button>Go</button>").unwrap();
        assert!(matches!(html, RawPage::Html(_)));

        let snapshot = RawPage::from_bytes(br#"  {"nodeName":"BUTTON","textContent":"Go"}"#).unwrap();
        let tree = snapshot.parse().unwrap();
        assert_eq!(tree.elements().count(), 1);

        assert!(RawPage::from_bytes(b"{ not json").is_err());
    }

    #[test]
    fn both_formats_condense_alike() {
        let options = CondenseOptions::default();
        let html = RawPage::Html("<button data-testid=\"go\">Go</button>".into())
            .condense(&options)
            .unwrap();
        let snapshot = RawPage::from_bytes(
            br#"{"nodeName":"BUTTON","attributes":{"data-testid":"go"},"textContent":"Go"}"#,
        )
        .unwrap()
        .condense(&options)
        .unwrap();
        assert_eq!(html.text_content, snapshot.text_content);
    }
}
