//! # Ireko (入れ子)
//!
//! A nested retry-scheduling engine for Rust.
//!
//! "Ireko" (入れ子) is the Japanese word for things nested inside one
//! another, like a set of boxes. Workflows here are trees of *steps*: each
//! step is a chain of commands, and any command may declare further steps
//! that run, and retry, inside it.
//!
//! ## Features
//!
//! - **Retry until done**: a failing step restarts from its first command after
//!   a fixed delay, as many times as it takes
//! - **Nested steps**: commands declare child steps that complete before the
//!   command is considered finished; retries stay local to the failing level
//! - **Subject threading**: each command receives the previous command's result
//! - **Cooperative cancellation**: [`CancellationSource`] and [`cancel_after`]
//!   stop retrying between attempts
//! - **Fatal errors**: [`WorkflowError::is_fatal`] errors skip every retry loop
//! - **Named commands**: an explicit [`Registry`] of reusable shortcuts
//!
//! ## Quick Start
//!
//! ```rust
//! use ireko::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), WorkflowError> {
//! let result = run_workflow(
//!     |_, runner: &mut StepRunner<i64>| {
//!         runner.start().map(|_| 42).map(|x| x + 2);
//!         Ok(Flow::default())
//!     },
//!     0,
//!     Context::new(),
//! )
//! .await?;
//!
//! assert_eq!(result, 44);
//! # Ok(())
//! # }
//! ```
//!
//! ## Nested Steps
//!
//! A command declares steps on the runner it receives. They run after the
//! command returns, and the last one's result becomes the command's result:
//!
//! ```rust
//! use ireko::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), WorkflowError> {
//! let result = run_workflow(
//!     |_, runner: &mut StepRunner<i64>| {
//!         runner
//!             .start()
//!             .pipe(|_, nested| {
//!                 nested.start().map(|_| 40).map(|x| x + 2);
//!                 Ok(Flow::default())
//!             })
//!             .map(|x| x + 2);
//!         Ok(Flow::default())
//!     },
//!     0,
//!     Context::new(),
//! )
//! .await?;
//!
//! assert_eq!(result, 44);
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! Retries are unbounded; whoever owns the cancellation source decides when to
//! give up. When a step is cancelled after failing, its last error is returned:
//!
//! ```rust
//! use ireko::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let workflow = Workflow::<i64>::builder()
//!     .cancellation(cancel_after(Duration::from_millis(100)).expect("inside a runtime"))
//!     .retry_delay(Duration::from_millis(10))
//!     .build()
//!     .expect("valid workflow");
//!
//! let result = workflow
//!     .run(|_, runner| {
//!         runner.start().try_map(|_| Err(WorkflowError::command("service unavailable")));
//!         Ok(Flow::default())
//!     }, 0)
//!     .await;
//!
//! match result {
//!     Err(error) => assert_eq!(error.to_string(), "service unavailable"),
//!     Ok(_) => unreachable!(),
//! }
//! # }
//! ```

mod cancel;
mod context;
mod error;
mod registry;
mod runner;
mod step;
mod workflow;

pub mod prelude;

pub use cancel::{cancel_after, CancellationSignal, CancellationSource, Cancelled};
pub use context::{Context, ContextKey, CANCELLATION_KEY};
pub use error::{BoxError, WorkflowError};
pub use registry::{RegisteredCommand, Registry};
pub use runner::{RunnerConfig, StepRunner, DEFAULT_RETRY_DELAY};
pub use step::{AsyncCommand, BoxFuture, Command, CommandName, Flow, Step, Subject};
pub use workflow::{run_workflow, Workflow, WorkflowBuilder};
