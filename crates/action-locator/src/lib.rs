//! Selector self-healing.
//!
//! When an action fails because its element can no longer be found, the
//! healer captures the page, ranks replacement selectors, validates them one
//! at a time and re-executes the original action with the first one that
//! works:
//! - Candidate families: test id, aria-label, visible text, structural CSS, path
//! - Explicit recovery state machine, one instance per failing action
//! - Bounded attempts; exhaustion hands back the original failure

pub mod candidates;
pub mod errors;
pub mod healer;
pub mod machine;
pub mod types;

pub use candidates::generate_candidates;
pub use errors::LocatorError;
pub use healer::{
    ArtifactSnapshotSource, PageSnapshotSource, ProbeReport, SelectorProbe, SelfHealer,
    SnapshotProbe, ToolSnapshotSource,
};
pub use machine::{HealState, RecoveryMachine};
pub use types::{Candidate, CandidateKind, HealOutcome, HealingConfig, SelfHealingAttempt};
