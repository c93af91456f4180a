//! Named commands and step starts.
//!
//! A [`Registry`] maps names to command implementations. It is assembled by
//! value before a workflow is built and then shared, read-only, by every
//! runner in the workflow.

use crate::error::WorkflowError;
use crate::runner::StepRunner;
use crate::step::{CommandName, Flow};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared implementation of a registered command or step start.
pub type RegisteredCommand<S> =
    Arc<dyn Fn(S, &mut StepRunner<S>, &[Value]) -> Result<Flow<S>, WorkflowError> + Send + Sync>;

/// Named shortcuts available to steps of a workflow.
///
/// # Examples
///
/// ```
/// use ireko::prelude::*;
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), WorkflowError> {
/// let registry = Registry::<i64>::new()
///     .add_step_start("number", |_, _, args| {
///         Ok(Flow::Ready(args.first().and_then(|v| v.as_i64()).unwrap_or_default()))
///     })?
///     .add_command("add", |subject, _, args| {
///         Ok(Flow::Ready(subject + args.first().and_then(|v| v.as_i64()).unwrap_or_default()))
///     })?;
///
/// let workflow = Workflow::builder().registry(registry).build()?;
/// let result = workflow
///     .run(|_, runner| {
///         runner.start_named("number", [json!(40)])?.command("add", [json!(2)])?;
///         Ok(Flow::default())
///     }, 0)
///     .await?;
/// assert_eq!(result, 42);
/// # Ok(())
/// # }
/// ```
pub struct Registry<S> {
    commands: HashMap<CommandName, RegisteredCommand<S>>,
    step_starts: HashMap<CommandName, RegisteredCommand<S>>,
}

impl<S> fmt::Debug for Registry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("step_starts", &self.step_starts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Registry<S> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
            step_starts: HashMap::new(),
        }
    }

    /// Registers a command usable through [`Step::command`](crate::Step::command).
    pub fn add_command<F>(mut self, name: impl Into<CommandName>, command: F) -> Result<Self, WorkflowError>
    where
        F: Fn(S, &mut StepRunner<S>, &[Value]) -> Result<Flow<S>, WorkflowError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.commands.contains_key(&name) {
            return Err(WorkflowError::CommandAlreadyRegistered(name));
        }
        self.commands.insert(name, Arc::new(command));
        Ok(self)
    }

    /// Replaces a registered command.
    ///
    /// The replacement receives the previous implementation as its first
    /// argument so it can delegate to it.
    pub fn replace_command<F>(mut self, name: impl Into<CommandName>, command: F) -> Result<Self, WorkflowError>
    where
        F: Fn(&RegisteredCommand<S>, S, &mut StepRunner<S>, &[Value]) -> Result<Flow<S>, WorkflowError>
            + Send
            + Sync
            + 'static,
        S: 'static,
    {
        let name = name.into();
        let Some(original) = self.commands.remove(&name) else {
            return Err(WorkflowError::CommandNotRegistered(name));
        };
        self.commands.insert(name, wrap(original, command));
        Ok(self)
    }

    /// Registers an entry point usable through
    /// [`StepRunner::start_named`](crate::StepRunner::start_named).
    pub fn add_step_start<F>(mut self, name: impl Into<CommandName>, start: F) -> Result<Self, WorkflowError>
    where
        F: Fn(S, &mut StepRunner<S>, &[Value]) -> Result<Flow<S>, WorkflowError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.step_starts.contains_key(&name) {
            return Err(WorkflowError::StepStartAlreadyRegistered(name));
        }
        self.step_starts.insert(name, Arc::new(start));
        Ok(self)
    }

    /// Replaces a registered entry point, handing it the previous one.
    pub fn replace_step_start<F>(mut self, name: impl Into<CommandName>, start: F) -> Result<Self, WorkflowError>
    where
        F: Fn(&RegisteredCommand<S>, S, &mut StepRunner<S>, &[Value]) -> Result<Flow<S>, WorkflowError>
            + Send
            + Sync
            + 'static,
        S: 'static,
    {
        let name = name.into();
        let Some(original) = self.step_starts.remove(&name) else {
            return Err(WorkflowError::StepStartNotRegistered(name));
        };
        self.step_starts.insert(name, wrap(original, start));
        Ok(self)
    }

    /// Returns `true` if a command is registered under `name`.
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// Returns `true` if a step start is registered under `name`.
    pub fn has_step_start(&self, name: &str) -> bool {
        self.step_starts.contains_key(name)
    }

    pub(crate) fn command(&self, name: &str) -> Option<RegisteredCommand<S>> {
        self.commands.get(name).cloned()
    }

    pub(crate) fn step_start(&self, name: &str) -> Option<RegisteredCommand<S>> {
        self.step_starts.get(name).cloned()
    }
}

fn wrap<S, F>(original: RegisteredCommand<S>, replacement: F) -> RegisteredCommand<S>
where
    S: 'static,
    F: Fn(&RegisteredCommand<S>, S, &mut StepRunner<S>, &[Value]) -> Result<Flow<S>, WorkflowError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(move |subject, runner, args| replacement(&original, subject, runner, args))
}
