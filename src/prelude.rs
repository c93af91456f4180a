//! Commonly used types and traits

pub use crate::cancel::{cancel_after, CancellationSignal, CancellationSource};
pub use crate::context::Context;
pub use crate::error::WorkflowError;
pub use crate::registry::Registry;
pub use crate::runner::StepRunner;
pub use crate::step::{AsyncCommand, Command, Flow, Step};
pub use crate::workflow::{run_workflow, Workflow};
