//! Polls a simulated flaky service until it answers, then processes the reply.
//!
//! Run with `RUST_LOG` unset to see the retry warnings on stdout.

use ireko::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq)]
struct Reply {
    endpoint: String,
    body: Option<String>,
}

fn registry() -> Result<Registry<Reply>, WorkflowError> {
    Registry::new()
        .add_step_start("endpoint", |_, _, args: &[Value]| {
            let endpoint = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or("/")
                .to_string();
            Ok(Flow::Ready(Reply {
                endpoint,
                body: None,
            }))
        })?
        .add_command("fetch", |reply: Reply, runner, _| {
            let attempts = runner
                .context()
                .get::<AtomicU32>("attempts")
                .map(|counter| counter.fetch_add(1, Ordering::SeqCst) + 1)
                .unwrap_or(1);
            Ok(Flow::pending(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if attempts < 4 {
                    return Err(WorkflowError::command(format!(
                        "{} unavailable (attempt {})",
                        reply.endpoint, attempts
                    )));
                }
                Ok(Reply {
                    body: Some(format!("payload from {}", reply.endpoint)),
                    ..reply
                })
            }))
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let workflow = Workflow::builder()
        .registry(registry()?)
        .context(Context::new().with("attempts", AtomicU32::new(0)))
        .cancellation(cancel_after(Duration::from_secs(2))?)
        .retry_delay(Duration::from_millis(100))
        .build()?;

    let result = workflow
        .run(
            |_, runner| {
                runner
                    .start_named("endpoint", [json!("/health")])?
                    .command("fetch", [])?
                    .pipe(|reply, nested| {
                        // Post-processing runs as its own retried step.
                        nested.start_with(reply).map(|reply| Reply {
                            body: reply.body.map(|body| body.to_uppercase()),
                            ..reply
                        });
                        Ok(Flow::default())
                    });
                Ok(Flow::default())
            },
            Reply::default(),
        )
        .await;

    match result {
        Ok(reply) => println!("Workflow completed: {:?}", reply),
        Err(error) => eprintln!("Workflow failed: {}", error),
    }

    Ok(())
}
