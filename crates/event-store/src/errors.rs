use thiserror::Error;

use soulbrowser_core_types::SoulError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EsErrorKind {
    #[error("concurrent modification: expected version {expected}, log is at {actual}")]
    ConcurrentModification { expected: u64, actual: u64 },
    #[error("event not found: {0}")]
    NotFound(String),
    #[error("journal write failed: {0}")]
    JournalWrite(String),
    #[error("journal read failed: {0}")]
    JournalRead(String),
    #[error("journal corrupt: {0}")]
    Corrupt(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(transparent)]
pub struct EsError(pub EsErrorKind);

impl EsError {
    pub fn new(kind: EsErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &EsErrorKind {
        &self.0
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.0, EsErrorKind::ConcurrentModification { .. })
    }
}

impl From<EsError> for SoulError {
    fn from(value: EsError) -> Self {
        SoulError::new(value.to_string())
    }
}

impl From<EsErrorKind> for EsError {
    fn from(kind: EsErrorKind) -> Self {
        EsError(kind)
    }
}
