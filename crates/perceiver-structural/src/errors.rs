use thiserror::Error;

use soulbrowser_core_types::SoulError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PerceiverError {
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("malformed snapshot: {0}")]
    Snapshot(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PerceiverError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub(crate) fn selector(selector: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<PerceiverError> for SoulError {
    fn from(value: PerceiverError) -> Self {
        SoulError::new(value.to_string())
    }
}
