//! Wiring: builds conversations from configuration and shared parts.

use std::sync::Arc;

use action_locator::{PageSnapshotSource, SelfHealer, ToolSnapshotSource};
use action_primitives::{ActionExecutor, ArtifactSink, ToolRegistry};
use agent_core::{ReasoningService, SkillTable, StepContext};
use soulbrowser_core_types::ConversationId;
use soulbrowser_event_store::EventLog;
use tracing::info;

use crate::config::TestkitConfig;
use crate::conversation::Conversation;
use crate::errors::TestkitResult;
use crate::pages::LatestPageSource;
use crate::workspace::{FsWorkspace, Workspace};

enum Snapshots {
    /// Read the snapshot the failing observation carried, else the newest
    /// one the conversation recorded.
    Artifacts,
    /// Run a capture tool at recovery time.
    Tool(String),
    Custom(Arc<dyn PageSnapshotSource>),
}

/// Shared, immutable parts from which conversations are opened.
pub struct Testkit {
    config: TestkitConfig,
    registry: Arc<ToolRegistry>,
    reasoning: Arc<dyn ReasoningService>,
    skills: Arc<SkillTable>,
    workspace: Arc<dyn Workspace>,
    sink: Arc<dyn ArtifactSink>,
    snapshots: Snapshots,
}

impl Testkit {
    pub fn new<W>(
        config: TestkitConfig,
        registry: Arc<ToolRegistry>,
        reasoning: Arc<dyn ReasoningService>,
        workspace: Arc<W>,
    ) -> TestkitResult<Self>
    where
        W: Workspace + ArtifactSink + 'static,
    {
        let skills = Arc::new(config.skill_table()?);
        Ok(Self {
            config,
            registry,
            reasoning,
            skills,
            workspace: workspace.clone(),
            sink: workspace,
            snapshots: Snapshots::Artifacts,
        })
    }

    /// Uses a local workspace at `config.workspace.root`.
    pub async fn with_fs_workspace(
        config: TestkitConfig,
        registry: Arc<ToolRegistry>,
        reasoning: Arc<dyn ReasoningService>,
    ) -> TestkitResult<Self> {
        let workspace = Arc::new(FsWorkspace::create(config.workspace.root.clone()).await?);
        Self::new(config, registry, reasoning, workspace)
    }

    /// Recovery captures pages by running `tool`.
    pub fn with_capture_tool(mut self, tool: impl Into<String>) -> Self {
        self.snapshots = Snapshots::Tool(tool.into());
        self
    }

    pub fn with_snapshot_source(mut self, source: Arc<dyn PageSnapshotSource>) -> Self {
        self.snapshots = Snapshots::Custom(source);
        self
    }

    pub fn config(&self) -> &TestkitConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Arc<dyn Workspace> {
        &self.workspace
    }

    /// Opens `id`, restoring it from its journal when journaling is on.
    pub fn open(&self, id: ConversationId) -> TestkitResult<Conversation> {
        let store = &self.config.event_store;
        let log = if store.journal.enabled {
            EventLog::restore(id, store)?
        } else {
            EventLog::new(id, store)?
        };
        let executor = ActionExecutor::new(Arc::clone(&self.registry))
            .with_sink(Arc::clone(&self.sink))
            .with_policy(self.config.execution_policy());
        let tracker = LatestPageSource::new(Arc::clone(&self.sink));
        let snapshots: Arc<dyn PageSnapshotSource> = match &self.snapshots {
            Snapshots::Artifacts => Arc::new(tracker.clone()),
            Snapshots::Tool(tool) => Arc::new(ToolSnapshotSource::new(executor.clone(), tool.clone())),
            Snapshots::Custom(source) => Arc::clone(source),
        };
        let healer = SelfHealer::new(executor.clone(), snapshots)
            .with_config(self.config.healing.clone())
            .with_condense_options(self.config.condenser.clone());
        let ctx = StepContext::new(executor, Arc::clone(&self.reasoning))
            .with_healer(healer)
            .with_skills(self.skills.clone())
            .with_config(self.config.step_config());
        let conversation = Conversation::open(log, ctx)?
            .with_workspace(Arc::clone(&self.workspace))
            .with_page_tracker(tracker);
        info!(conversation = %conversation.id(), "conversation ready");
        Ok(conversation)
    }

    /// Opens a conversation under a fresh id.
    pub fn start(&self) -> TestkitResult<Conversation> {
        self.open(ConversationId::new())
    }
}

