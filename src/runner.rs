//! Step collection and the retry loop.

use crate::context::Context;
use crate::error::WorkflowError;
use crate::registry::Registry;
use crate::step::{BoxFuture, Command, CommandName, Flow, NamedInvocation, Step, Subject};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default pause between two attempts of a failing step.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Settings shared by every runner of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Fixed pause between two attempts of a failing step.
    pub retry_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Execution context of one command invocation (or of the workflow itself).
///
/// Steps declared with [`start`](Self::start) while the command runs
/// synchronously are executed in declaration order once it returns. Each step
/// is retried from its first command until it succeeds, fails fatally, or the
/// context's cancellation signal is cancelled.
pub struct StepRunner<S> {
    context: Arc<Context>,
    registry: Arc<Registry<S>>,
    config: RunnerConfig,
    depth: usize,
    steps: Vec<Step<S>>,
}

impl<S> fmt::Debug for StepRunner<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRunner")
            .field("depth", &self.depth)
            .field("steps", &self.steps.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<S: Subject> StepRunner<S> {
    pub(crate) fn new(context: Arc<Context>, registry: Arc<Registry<S>>, config: RunnerConfig) -> Self {
        Self {
            context,
            registry,
            config,
            depth: 0,
            steps: Vec::new(),
        }
    }

    fn nested(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            registry: Arc::clone(&self.registry),
            config: self.config,
            depth: self.depth + 1,
            steps: Vec::new(),
        }
    }

    /// Returns the workflow context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Returns a shared handle on the workflow context, for use in futures.
    pub fn shared_context(&self) -> Arc<Context> {
        Arc::clone(&self.context)
    }

    /// Returns how many commands enclose this runner (0 at the top level).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the number of steps declared so far.
    pub fn declared_steps(&self) -> usize {
        self.steps.len()
    }

    /// Declares a new step whose first command receives `S::default()`.
    pub fn start(&mut self) -> &mut Step<S> {
        self.start_with(S::default())
    }

    /// Declares a new step whose first command receives `seed`.
    pub fn start_with(&mut self, seed: S) -> &mut Step<S> {
        let step = Step::new(seed, Arc::clone(&self.registry));
        self.push(step)
    }

    /// Declares a new step beginning with the step start registered as `name`.
    pub fn start_named<I>(&mut self, name: &str, args: I) -> Result<&mut Step<S>, WorkflowError>
    where
        I: IntoIterator<Item = Value>,
    {
        let name = CommandName::new(name);
        let implementation = self
            .registry
            .step_start(name.as_str())
            .ok_or_else(|| WorkflowError::UnknownStepStart(name.clone()))?;
        let mut step = Step::new(S::default(), Arc::clone(&self.registry)).labelled(name.clone());
        step.pipe_command(NamedInvocation::new(
            name,
            implementation,
            args.into_iter().collect(),
        ));
        Ok(self.push(step))
    }

    fn push(&mut self, step: Step<S>) -> &mut Step<S> {
        let index = self.steps.len();
        self.steps.push(step);
        &mut self.steps[index]
    }

    /// Runs `command` with `subject`, then every step it declared.
    pub(crate) fn run<'a>(
        mut self,
        command: &'a dyn Command<S>,
        subject: S,
    ) -> BoxFuture<'a, Result<S, WorkflowError>> {
        Box::pin(async move {
            match command.call(subject, &mut self)? {
                Flow::Pending(pending) => {
                    if !self.steps.is_empty() {
                        error!(
                            "Command at depth {} declared {} step(s) and returned a pending value",
                            self.depth,
                            self.steps.len()
                        );
                        return Err(WorkflowError::MixedStepsAndAsync);
                    }
                    pending.await
                }
                Flow::Ready(mut result) => {
                    for (index, step) in self.steps.iter().enumerate() {
                        result = self.execute(index, step).await?;
                    }
                    Ok(result)
                }
            }
        })
    }

    async fn execute(&self, index: usize, step: &Step<S>) -> Result<S, WorkflowError> {
        let mut last_error = None;
        let mut attempt: u64 = 0;

        while !self.context.is_cancelled() {
            attempt = attempt.saturating_add(1);
            debug!(
                "Step {} #{} at depth {}: attempt {}",
                step, index, self.depth, attempt
            );

            match self.run_chain(step).await {
                Ok(subject) => {
                    if attempt > 1 {
                        info!(
                            "Step {} #{} at depth {} succeeded after {} attempts",
                            step, index, self.depth, attempt
                        );
                    }
                    return Ok(subject);
                }
                Err(e) if e.is_fatal() => {
                    debug!(
                        "Step {} #{} at depth {} aborted by fatal error: {}",
                        step, index, self.depth, e
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "Step {} #{} at depth {} failed on attempt {}: {}",
                        step, index, self.depth, attempt, e
                    );
                    last_error = Some(e);
                }
            }

            if !self.context.is_cancelled() {
                tokio::time::sleep(self.config.retry_delay).await;
            }
        }

        warn!(
            "Step {} #{} at depth {} stopped by cancellation after {} attempt(s)",
            step, index, self.depth, attempt
        );
        Err(last_error.unwrap_or_else(|| self.cancelled()))
    }

    async fn run_chain(&self, step: &Step<S>) -> Result<S, WorkflowError> {
        let mut subject = step.seed().clone();
        for command in step.commands() {
            subject = self.nested().run(command, subject).await?;
        }
        Ok(subject)
    }

    fn cancelled(&self) -> WorkflowError {
        let reason = self
            .context
            .cancellation()
            .and_then(|signal| signal.reason())
            .unwrap_or_else(|| "cancelled".to_string());
        WorkflowError::Cancelled { reason }
    }
}
