use crate::cancel::Cancelled;
use crate::step::CommandName;
use thiserror::Error;

/// Boxed error type accepted from user commands.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while running a workflow.
///
/// Errors fall into two classes. Retryable errors (the default) make the
/// failing step start over after the retry delay. Fatal errors, reported by
/// [`WorkflowError::is_fatal`], bypass the retry loop of every enclosing step
/// and reach the caller unmodified.
///
/// # Non-Exhaustive
///
/// This enum is marked `#[non_exhaustive]`. When matching on it, always
/// include a wildcard pattern:
///
/// ```
/// use ireko::WorkflowError;
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::Command(details) => format!("command failed: {}", details),
///         WorkflowError::Cancelled { reason } => format!("stopped: {}", reason),
///         WorkflowError::MixedStepsAndAsync => "bad command".to_string(),
///         _ => error.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A command failed. The enclosing step is retried.
    #[error("{0}")]
    Command(BoxError),

    /// A command failed in a way that must not be retried at any level.
    #[error("{0}")]
    Unretryable(BoxError),

    /// A command declared nested steps and also returned a pending value.
    #[error("Can't mix steps and async functions")]
    MixedStepsAndAsync,

    /// A step was cancelled before any of its attempts failed.
    #[error("{reason}")]
    Cancelled {
        /// The reason recorded on the cancellation signal.
        reason: String,
    },

    /// A step referenced a command that is not registered.
    #[error("Unknown command: {0}")]
    UnknownCommand(CommandName),

    /// A runner referenced a step start that is not registered.
    #[error("Unknown step start: {0}")]
    UnknownStepStart(CommandName),

    /// `add_command` was called with a name that already exists.
    #[error("The command '{0}' already exists. Use replace_command instead.")]
    CommandAlreadyRegistered(CommandName),

    /// `replace_command` was called with a name that was never added.
    #[error("The command '{0}' cannot be replaced because it hasn't been added. Use add_command instead.")]
    CommandNotRegistered(CommandName),

    /// `add_step_start` was called with a name that already exists.
    #[error("The step start '{0}' already exists. Use replace_step_start instead.")]
    StepStartAlreadyRegistered(CommandName),

    /// `replace_step_start` was called with a name that was never added.
    #[error("The step start '{0}' cannot be replaced because it hasn't been added. Use add_step_start instead.")]
    StepStartNotRegistered(CommandName),

    /// The workflow configuration is invalid.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),
}

impl WorkflowError {
    /// Wraps a retryable command failure.
    ///
    /// ```
    /// use ireko::WorkflowError;
    ///
    /// let error = WorkflowError::command("connection refused");
    /// assert!(!error.is_fatal());
    /// assert_eq!(error.to_string(), "connection refused");
    /// ```
    pub fn command(error: impl Into<BoxError>) -> Self {
        Self::Command(error.into())
    }

    /// Wraps a failure that must not be retried.
    pub fn unretryable(error: impl Into<BoxError>) -> Self {
        Self::Unretryable(error.into())
    }

    /// Returns `true` if the error bypasses every retry loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unretryable(_)
                | Self::MixedStepsAndAsync
                | Self::UnknownCommand(_)
                | Self::UnknownStepStart(_)
        )
    }
}

impl From<Cancelled> for WorkflowError {
    fn from(cancelled: Cancelled) -> Self {
        Self::Cancelled {
            reason: cancelled.reason().to_string(),
        }
    }
}
