//! Keyword-triggered skills as a dispatch table.
//!
//! A skill is a pattern plus a behavior. Tools named by an
//! [`SkillBehavior::ExposeTools`] entry are gated: the reasoning service only
//! sees them while the owning skill is active.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillBehavior {
    /// Extra instructions for the reasoning service.
    Guidance(String),
    /// Tools made available while the skill is active.
    ExposeTools(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillActivation {
    pub name: String,
    pub behavior: SkillBehavior,
}

/// Selects skills for a piece of context text. Implementations must be
/// deterministic and free of side effects.
pub trait SkillMatcher: Send + Sync {
    fn activate(&self, context: &str) -> Vec<SkillActivation>;

    /// Tools hidden unless a skill exposes them.
    fn gated_tools(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// Serializable form of one table row, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillEntry {
    pub name: String,
    pub pattern: String,
    pub behavior: SkillBehavior,
}

#[derive(Debug, Clone)]
struct Skill {
    name: String,
    pattern: Regex,
    behavior: SkillBehavior,
}

/// Ordered table of case-insensitive `pattern -> behavior` rows.
#[derive(Debug, Clone, Default)]
pub struct SkillTable {
    skills: Vec<Skill>,
}

impl SkillTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skill(
        mut self,
        name: impl Into<String>,
        pattern: &str,
        behavior: SkillBehavior,
    ) -> Result<Self, AgentError> {
        let name = name.into();
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|err| AgentError::skill(&name, err.to_string()))?;
        if self.skills.iter().any(|skill| skill.name == name) {
            return Err(AgentError::skill(name, "defined twice"));
        }
        self.skills.push(Skill {
            name,
            pattern: compiled,
            behavior,
        });
        Ok(self)
    }

    pub fn from_entries<I>(entries: I) -> Result<Self, AgentError>
    where
        I: IntoIterator<Item = SkillEntry>,
    {
        entries.into_iter().try_fold(Self::new(), |table, entry| {
            table.with_skill(entry.name, &entry.pattern, entry.behavior)
        })
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

impl SkillMatcher for SkillTable {
    fn activate(&self, context: &str) -> Vec<SkillActivation> {
        self.skills
            .iter()
            .filter(|skill| skill.pattern.is_match(context))
            .map(|skill| SkillActivation {
                name: skill.name.clone(),
                behavior: skill.behavior.clone(),
            })
            .collect()
    }

    fn gated_tools(&self) -> BTreeSet<String> {
        self.skills
            .iter()
            .filter_map(|skill| match &skill.behavior {
                SkillBehavior::ExposeTools(tools) => Some(tools.iter().cloned()),
                SkillBehavior::Guidance(_) => None,
            })
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SkillTable {
        SkillTable::new()
            .with_skill(
                "forms",
                r"\b(fill|submit|form)\b",
                SkillBehavior::Guidance("Check every required field before submitting.".into()),
            )
            .unwrap()
            .with_skill(
                "uploads",
                r"\bupload",
                SkillBehavior::ExposeTools(vec!["upload_file".into()]),
            )
            .unwrap()
    }

    #[test]
    fn matches_in_table_order() {
        let active = table().activate("Fill the form and UPLOAD the receipt");
        let names: Vec<&str> = active.iter().map(|skill| skill.name.as_str()).collect();
        assert_eq!(names, vec!["forms", "uploads"]);
        assert!(table().activate("open the dashboard").is_empty());
    }

    #[test]
    fn activation_is_deterministic() {
        let table = table();
        let text = "submit the upload form";
        assert_eq!(table.activate(text), table.activate(text));
    }

    #[test]
    fn gated_tools_come_from_expose_rows() {
        let gated: Vec<String> = table().gated_tools().into_iter().collect();
        assert_eq!(gated, vec!["upload_file".to_string()]);
    }

    #[test]
    fn rejects_bad_rows() {
        let bad = SkillTable::new().with_skill("broken", "(", SkillBehavior::Guidance(String::new()));
        assert!(matches!(bad, Err(AgentError::Skill { ref name, .. }) if name == "broken"));

        let twice = SkillTable::from_entries([
            SkillEntry {
                name: "a".into(),
                pattern: "x".into(),
                behavior: SkillBehavior::Guidance("one".into()),
            },
            SkillEntry {
                name: "a".into(),
                pattern: "y".into(),
                behavior: SkillBehavior::Guidance("two".into()),
            },
        ]);
        assert!(twice.is_err());
    }
}
