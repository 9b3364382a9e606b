//! YAML configuration for a testkit run.
//!
//! Every field has a default, so an empty document is a valid config. Each
//! section converts into the config type of the crate that consumes it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use action_locator::HealingConfig;
use action_primitives::ExecutionPolicy;
use agent_core::{AgentError, SkillEntry, SkillTable, StepConfig};
use anyhow::{bail, Context, Result};
use perceiver_structural::CondenseOptions;
use serde::{Deserialize, Serialize};
use soulbrowser_event_store::EventStoreConfig;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestkitConfig {
    pub event_store: EventStoreConfig,
    pub condenser: CondenseOptions,
    pub execution: ExecutionConfig,
    pub healing: HealingConfig,
    pub agent: AgentConfig,
    pub workspace: WorkspaceConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub action_timeout_ms: u64,
    pub timeout_retries: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: 30_000,
            timeout_retries: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    #[serde(flatten)]
    pub step: StepConfig,
    pub skills: Vec<SkillEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./workspace"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub debug: bool,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
            json: false,
        }
    }
}

impl TestkitConfig {
    /// Reads and validates a YAML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_yaml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!(path = %path.display(), "loaded testkit configuration");
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content).context("Failed to parse config file")?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.execution.action_timeout_ms == 0 {
            bail!("execution.action_timeout_ms must be positive");
        }
        if self.healing.max_attempts == 0 {
            bail!("healing.max_attempts must be at least 1");
        }
        if self.healing.max_candidates < self.healing.max_attempts as usize {
            bail!("healing.max_candidates must be at least healing.max_attempts");
        }
        if !(0.0..=1.0).contains(&self.condenser.large_input_ratio) {
            bail!("condenser.large_input_ratio must lie in [0, 1]");
        }
        if self.condenser.token_budget == 0 {
            bail!("condenser.token_budget must be positive");
        }
        if self.agent.step.max_query_attempts == 0 {
            bail!("agent.max_query_attempts must be at least 1");
        }
        if self.agent.step.llm_timeout_ms == 0 {
            bail!("agent.llm_timeout_ms must be positive");
        }
        if self.agent.step.stuck_threshold < 2 {
            bail!("agent.stuck_threshold must be at least 2");
        }
        if self.event_store.stream.capacity == 0 {
            bail!("event_store.stream.capacity must be positive");
        }
        self.skill_table()
            .context("agent.skills contains an invalid entry")?;
        Ok(())
    }

    pub fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::default()
            .with_action_timeout(Duration::from_millis(self.execution.action_timeout_ms))
            .with_timeout_retries(self.execution.timeout_retries)
    }

    /// Step settings, with the condenser section applied.
    pub fn step_config(&self) -> StepConfig {
        self.agent.step.clone().condense(self.condenser.clone())
    }

    pub fn skill_table(&self) -> Result<SkillTable, AgentError> {
        SkillTable::from_entries(self.agent.skills.iter().cloned())
    }
}
