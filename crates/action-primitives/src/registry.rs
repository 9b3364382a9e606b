//! Tool registry: built once, then shared read-only across conversations.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use soulbrowser_core_types::Action;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{ActionError, ToolFailure};
use crate::schema::ToolSpec;
use crate::types::ToolOutput;

/// One runnable invocation of a tool.
#[async_trait]
pub trait Executable: Send + Sync {
    /// The token fires when the caller stops waiting; the future may be
    /// dropped at any await point after that.
    async fn run(&self, action: &Action, cancel: CancellationToken)
        -> Result<ToolOutput, ToolFailure>;
}

/// Declares a tool and produces executables for validated arguments.
pub trait ToolFactory: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    fn create(&self, arguments: &Value) -> Box<dyn Executable>;
}

pub struct ToolRegistryBuilder {
    tools: Vec<Arc<dyn ToolFactory>>,
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn with_tool(mut self, factory: Arc<dyn ToolFactory>) -> Self {
        self.tools.push(factory);
        self
    }

    pub fn with_fn<F, Fut>(self, spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Action, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolFailure>> + Send + 'static,
    {
        self.with_tool(Arc::new(FnTool::new(spec, handler)))
    }

    pub fn build(self) -> Result<Arc<ToolRegistry>, ActionError> {
        let mut tools = BTreeMap::new();
        for factory in self.tools {
            let name = factory.spec().name.clone();
            if tools.insert(name.clone(), factory).is_some() {
                return Err(ActionError::DuplicateTool(name));
            }
        }
        debug!(tools = tools.len(), "tool registry built");
        Ok(Arc::new(ToolRegistry { tools }))
    }
}

pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolFactory>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|factory| factory.spec())
    }

    /// Specs sorted by tool name.
    pub fn specs(&self) -> Vec<&ToolSpec> {
        self.tools.values().map(|factory| factory.spec()).collect()
    }

    /// Looks the tool up and validates `arguments` against its schema.
    pub fn resolve(
        &self,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<Box<dyn Executable>, ActionError> {
        let factory = self
            .tools
            .get(tool_name)
            .ok_or_else(|| ActionError::UnknownTool(tool_name.to_string()))?;
        factory
            .spec()
            .schema
            .validate(arguments)
            .map_err(|reason| ActionError::InvalidArguments {
                tool: tool_name.to_string(),
                reason,
            })?;
        Ok(factory.create(arguments))
    }
}

/// Tool backed by an async closure.
pub struct FnTool<F> {
    spec: ToolSpec,
    handler: Arc<F>,
}

impl<F> FnTool<F> {
    pub fn new(spec: ToolSpec, handler: F) -> Self {
        Self {
            spec,
            handler: Arc::new(handler),
        }
    }
}

impl<F, Fut> ToolFactory for FnTool<F>
where
    F: Fn(Action, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput, ToolFailure>> + Send + 'static,
{
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn create(&self, _arguments: &Value) -> Box<dyn Executable> {
        Box::new(FnExecutable {
            handler: Arc::clone(&self.handler),
        })
    }
}

struct FnExecutable<F> {
    handler: Arc<F>,
}

#[async_trait]
impl<F, Fut> Executable for FnExecutable<F>
where
    F: Fn(Action, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ToolOutput, ToolFailure>> + Send + 'static,
{
    async fn run(
        &self,
        action: &Action,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, ToolFailure> {
        (self.handler)(action.clone(), cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArgField, ArgKind, ArgSchema};
    use serde_json::json;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec::new(
            name,
            "test tool",
            ArgSchema::new(vec![ArgField::required("selector", ArgKind::String)]),
        )
    }

    fn registry() -> Arc<ToolRegistry> {
        ToolRegistry::builder()
            .with_fn(spec("click"), |_action, _cancel| async {
                Ok(ToolOutput::new(json!("clicked")))
            })
            .with_fn(spec("hover"), |_action, _cancel| async {
                Ok(ToolOutput::default())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn resolve_validates_arguments() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("click", &json!({ "selector": "#a" })).is_ok());
        assert!(matches!(
            registry.resolve("drag", &json!({})),
            Err(ActionError::UnknownTool(name)) if name == "drag"
        ));
        assert!(matches!(
            registry.resolve("click", &json!({})),
            Err(ActionError::InvalidArguments { .. })
        ));
        let names: Vec<&str> = registry.specs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["click", "hover"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = ToolRegistry::builder()
            .with_fn(spec("click"), |_a, _c| async { Ok(ToolOutput::default()) })
            .with_fn(spec("click"), |_a, _c| async { Ok(ToolOutput::default()) })
            .build();
        assert!(matches!(result, Err(ActionError::DuplicateTool(name)) if name == "click"));
    }

    #[tokio::test]
    async fn resolved_executable_runs() {
        let registry = registry();
        let action = Action::new("click", json!({ "selector": "#a" }));
        let exec = registry.resolve("click", &action.arguments).unwrap();
        let output = exec.run(&action, CancellationToken::new()).await.unwrap();
        assert_eq!(output.content, json!("clicked"));
    }
}
