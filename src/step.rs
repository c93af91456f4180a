//! Steps, commands and the values they exchange.

use crate::context::Context;
use crate::error::WorkflowError;
use crate::registry::{Registry, RegisteredCommand};
use crate::runner::StepRunner;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Marker for values that can be threaded through a command chain.
///
/// `Default::default()` is the subject a step starts from when none is given.
pub trait Subject: Clone + Default + Send + Sync + 'static {}

impl<T: Clone + Default + Send + Sync + 'static> Subject for T {}

/// Type-safe name of a registered command or step start.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandName(String);

impl CommandName {
    /// Creates a new CommandName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommandName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CommandName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::borrow::Borrow<str> for CommandName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// What a command hands back to its runner.
pub enum Flow<S> {
    /// A subject computed synchronously. If the command declared nested steps,
    /// their result replaces this value.
    Ready(S),
    /// A subject still being computed. Commands returning this must not
    /// declare nested steps.
    Pending(BoxFuture<'static, Result<S, WorkflowError>>),
}

impl<S> Flow<S> {
    /// Wraps a future as a pending subject.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<S, WorkflowError>> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    /// Returns `true` for [`Flow::Pending`].
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl<S: Default> Default for Flow<S> {
    fn default() -> Self {
        Self::Ready(S::default())
    }
}

impl<S> From<S> for Flow<S> {
    fn from(subject: S) -> Self {
        Self::Ready(subject)
    }
}

impl<S: fmt::Debug> fmt::Debug for Flow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(subject) => f.debug_tuple("Ready").field(subject).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// One unit of chain work.
///
/// A command receives the current subject and the runner created for this
/// invocation. Steps declared on that runner run, with their own retries,
/// before the command counts as finished.
///
/// Closures with the matching signature implement this trait.
pub trait Command<S>: Send + Sync {
    /// Invokes the command.
    fn call(&self, subject: S, runner: &mut StepRunner<S>) -> Result<Flow<S>, WorkflowError>;
}

impl<S, F> Command<S> for F
where
    F: Fn(S, &mut StepRunner<S>) -> Result<Flow<S>, WorkflowError> + Send + Sync,
{
    fn call(&self, subject: S, runner: &mut StepRunner<S>) -> Result<Flow<S>, WorkflowError> {
        self(subject, runner)
    }
}

/// An asynchronous command that cannot declare nested steps.
///
/// # Examples
///
/// ```
/// use ireko::prelude::*;
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// struct AddOffset;
///
/// #[async_trait]
/// impl AsyncCommand<i64> for AddOffset {
///     async fn execute(&self, subject: i64, ctx: Arc<Context>) -> Result<i64, WorkflowError> {
///         Ok(subject + ctx.get::<i64>("offset").copied().unwrap_or_default())
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), WorkflowError> {
/// let result = run_workflow(
///     |_, runner: &mut StepRunner<i64>| {
///         runner.start_with(40).pipe_async(AddOffset);
///         Ok(Flow::default())
///     },
///     0,
///     Context::new().with("offset", 2i64),
/// )
/// .await?;
/// assert_eq!(result, 42);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait AsyncCommand<S>: Send + Sync {
    /// Computes the next subject.
    async fn execute(&self, subject: S, ctx: Arc<Context>) -> Result<S, WorkflowError>;
}

struct Deferred<C>(Arc<C>);

impl<S, C> Command<S> for Deferred<C>
where
    S: Subject,
    C: AsyncCommand<S> + 'static,
{
    fn call(&self, subject: S, runner: &mut StepRunner<S>) -> Result<Flow<S>, WorkflowError> {
        let command = Arc::clone(&self.0);
        let ctx = runner.shared_context();
        Ok(Flow::pending(async move {
            command.execute(subject, ctx).await
        }))
    }
}

pub(crate) struct NamedInvocation<S> {
    name: CommandName,
    implementation: RegisteredCommand<S>,
    args: Vec<Value>,
}

impl<S> NamedInvocation<S> {
    pub(crate) fn new(
        name: CommandName,
        implementation: RegisteredCommand<S>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            name,
            implementation,
            args,
        }
    }
}

impl<S> Command<S> for NamedInvocation<S> {
    fn call(&self, subject: S, runner: &mut StepRunner<S>) -> Result<Flow<S>, WorkflowError> {
        tracing::debug!("Invoking command '{}'", self.name);
        (self.implementation)(subject, runner, self.args.as_slice())
    }
}

/// An ordered chain of commands retried together as one unit.
///
/// Steps are created through [`StepRunner::start`] and friends, then extended
/// by chaining:
///
/// ```
/// use ireko::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), WorkflowError> {
/// let result = run_workflow(
///     |_, runner: &mut StepRunner<i64>| {
///         runner.start().map(|_| 42).map(|x| x + 2);
///         Ok(Flow::default())
///     },
///     0,
///     Context::new(),
/// )
/// .await?;
/// assert_eq!(result, 44);
/// # Ok(())
/// # }
/// ```
pub struct Step<S> {
    label: Option<CommandName>,
    seed: S,
    commands: Vec<Arc<dyn Command<S>>>,
    registry: Arc<Registry<S>>,
}

impl<S: fmt::Debug> fmt::Debug for Step<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("label", &self.label)
            .field("seed", &self.seed)
            .field("commands", &self.commands.len())
            .finish()
    }
}

impl<S: Subject> Step<S> {
    pub(crate) fn new(seed: S, registry: Arc<Registry<S>>) -> Self {
        Self {
            label: None,
            seed,
            commands: Vec::new(),
            registry,
        }
    }

    pub(crate) fn labelled(mut self, label: CommandName) -> Self {
        self.label = Some(label);
        self
    }

    /// Returns the step start name this step was declared with, if any.
    pub fn label(&self) -> Option<&CommandName> {
        self.label.as_ref()
    }

    /// Returns the subject handed to the first command.
    pub fn seed(&self) -> &S {
        &self.seed
    }

    /// Returns the number of chained commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if no command has been chained yet.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn commands(&self) -> impl Iterator<Item = &dyn Command<S>> {
        self.commands.iter().map(|command| command.as_ref())
    }

    /// Appends a command.
    pub fn pipe_command<C: Command<S> + 'static>(&mut self, command: C) -> &mut Self {
        self.commands.push(Arc::new(command));
        self
    }

    /// Appends a closure with the full command signature.
    ///
    /// The closure may declare nested steps on the runner it receives.
    pub fn pipe<F>(&mut self, command: F) -> &mut Self
    where
        F: Fn(S, &mut StepRunner<S>) -> Result<Flow<S>, WorkflowError> + Send + Sync + 'static,
    {
        self.pipe_command(command)
    }

    /// Appends an infallible synchronous transformation.
    pub fn map<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(S) -> S + Send + Sync + 'static,
    {
        self.pipe(move |subject, _| Ok(Flow::Ready(f(subject))))
    }

    /// Appends a fallible synchronous transformation.
    pub fn try_map<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(S) -> Result<S, WorkflowError> + Send + Sync + 'static,
    {
        self.pipe(move |subject, _| f(subject).map(Flow::Ready))
    }

    /// Appends an asynchronous transformation.
    pub fn then<F, Fut>(&mut self, f: F) -> &mut Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, WorkflowError>> + Send + 'static,
    {
        self.pipe(move |subject, _| Ok(Flow::pending(f(subject))))
    }

    /// Appends an [`AsyncCommand`].
    pub fn pipe_async<C: AsyncCommand<S> + 'static>(&mut self, command: C) -> &mut Self {
        self.pipe_command(Deferred(Arc::new(command)))
    }

    /// Appends a command registered under `name`.
    ///
    /// Fails with [`WorkflowError::UnknownCommand`] if the name is not in the
    /// workflow's registry.
    pub fn command<I>(&mut self, name: &str, args: I) -> Result<&mut Self, WorkflowError>
    where
        I: IntoIterator<Item = Value>,
    {
        let implementation = self
            .registry
            .command(name)
            .ok_or_else(|| WorkflowError::UnknownCommand(CommandName::new(name)))?;
        let invocation = NamedInvocation::new(
            CommandName::new(name),
            implementation,
            args.into_iter().collect(),
        );
        Ok(self.pipe_command(invocation))
    }
}

impl<S> fmt::Display for Step<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "'{}'", label),
            None => write!(f, "<anonymous>"),
        }
    }
}
