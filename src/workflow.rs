use crate::cancel::CancellationSignal;
use crate::context::Context;
use crate::error::WorkflowError;
use crate::registry::Registry;
use crate::runner::{RunnerConfig, StepRunner};
use crate::step::{Flow, Subject};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// A configured entry point for running step trees.
///
/// A workflow owns the context, registry and runner settings. Each call to
/// [`run`](Self::run) builds a fresh top-level [`StepRunner`] over them.
pub struct Workflow<S> {
    context: Arc<Context>,
    registry: Arc<Registry<S>>,
    config: RunnerConfig,
}

impl<S> fmt::Debug for Workflow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("context", &self.context)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl<S: Subject> Workflow<S> {
    pub fn builder() -> WorkflowBuilder<S> {
        WorkflowBuilder::new()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn config(&self) -> RunnerConfig {
        self.config
    }

    /// Runs `definition` with `subject`, then every step it declared.
    ///
    /// Fails with the fatal error that aborted the run, or with the last
    /// retryable error of a step stopped by cancellation.
    pub async fn run<F>(&self, definition: F, subject: S) -> Result<S, WorkflowError>
    where
        F: Fn(S, &mut StepRunner<S>) -> Result<Flow<S>, WorkflowError> + Send + Sync,
    {
        let started_at = Instant::now();
        let runner = StepRunner::new(
            Arc::clone(&self.context),
            Arc::clone(&self.registry),
            self.config,
        );

        match runner.run(&definition, subject).await {
            Ok(result) => {
                info!("Workflow completed successfully in {:?}", started_at.elapsed());
                Ok(result)
            }
            Err(e) => {
                if e.is_fatal() {
                    error!("Workflow aborted: {}", e);
                } else {
                    error!("Workflow failed: {}", e);
                }
                Err(e)
            }
        }
    }
}

/// Runs a one-off workflow with the default configuration.
///
/// ```
/// use ireko::prelude::*;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), WorkflowError> {
/// let result = run_workflow(
///     |name: String, runner| {
///         runner.start_with(name).map(|name| format!("hello, {}", name));
///         Ok(Flow::default())
///     },
///     "ireko".to_string(),
///     Context::new(),
/// )
/// .await?;
/// assert_eq!(result, "hello, ireko");
/// # Ok(())
/// # }
/// ```
pub async fn run_workflow<S, F>(definition: F, subject: S, context: Context) -> Result<S, WorkflowError>
where
    S: Subject,
    F: Fn(S, &mut StepRunner<S>) -> Result<Flow<S>, WorkflowError> + Send + Sync,
{
    Workflow::builder()
        .context(context)
        .build()?
        .run(definition, subject)
        .await
}

/// Builder for constructing [`Workflow`] instances.
pub struct WorkflowBuilder<S> {
    context: Option<Context>,
    cancellation: Option<CancellationSignal>,
    registry: Option<Registry<S>>,
    retry_delay: Duration,
}

impl<S> Default for WorkflowBuilder<S> {
    fn default() -> Self {
        Self {
            context: None,
            cancellation: None,
            registry: None,
            retry_delay: RunnerConfig::default().retry_delay,
        }
    }
}

impl<S: Subject> WorkflowBuilder<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the context shared by every runner.
    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the cancellation signal polled between step attempts.
    ///
    /// Overrides any signal already stored in the context.
    pub fn cancellation(mut self, signal: CancellationSignal) -> Self {
        self.cancellation = Some(signal);
        self
    }

    /// Sets the registry of named commands and step starts.
    pub fn registry(mut self, registry: Registry<S>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the pause between two attempts of a failing step (default 50ms).
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn build(self) -> Result<Workflow<S>, WorkflowError> {
        if self.retry_delay.is_zero() {
            return Err(WorkflowError::Configuration(
                "Retry delay must be greater than zero".to_string(),
            ));
        }

        let mut context = self.context.unwrap_or_default();
        if let Some(signal) = self.cancellation {
            context = context.with_cancellation(signal);
        }

        Ok(Workflow {
            context: Arc::new(context),
            registry: Arc::new(self.registry.unwrap_or_default()),
            config: RunnerConfig {
                retry_delay: self.retry_delay,
            },
        })
    }
}
