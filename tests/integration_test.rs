use ireko::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn workflow() -> Workflow<i64> {
    workflow_with(Workflow::builder())
}

fn workflow_with(builder: ireko::WorkflowBuilder<i64>) -> Workflow<i64> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    builder
        .retry_delay(Duration::from_millis(5))
        .build()
        .expect("valid workflow")
}

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

#[tokio::test]
async fn test_empty_definition() {
    let result = workflow().run(|_, _| Ok(Flow::default()), 0).await;
    assert_eq!(assert_ok!(result), 0);
}

#[tokio::test]
async fn test_runs_single_step() {
    let calls = counter();
    let seen = Arc::clone(&calls);

    let result = workflow()
        .run(
            move |_, runner| {
                let seen = Arc::clone(&seen);
                runner.start().map(move |x| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    x
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert_ok!(result);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_runs_multiple_steps_last_result_wins() {
    let calls = counter();
    let seen = Arc::clone(&calls);

    let result = workflow()
        .run(
            move |_, runner| {
                for value in [1, 2] {
                    let seen = Arc::clone(&seen);
                    runner.start().map(move |_| {
                        seen.fetch_add(1, Ordering::SeqCst);
                        value
                    });
                }
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert_eq!(assert_ok!(result), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_runs_nested_steps() {
    let calls = counter();
    let seen = Arc::clone(&calls);

    let result = workflow()
        .run(
            move |_, runner| {
                let seen = Arc::clone(&seen);
                runner.start().pipe(move |_, nested| {
                    let seen = Arc::clone(&seen);
                    nested.start().map(move |x| {
                        seen.fetch_add(1, Ordering::SeqCst);
                        x
                    });
                    Ok(Flow::default())
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert_ok!(result);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_commands_may_return_pending_values() {
    let result = workflow()
        .run(
            |_, runner| {
                runner.start().then(|_| async { Ok(41) });
                Ok(Flow::default())
            },
            0,
        )
        .await;
    assert_eq!(assert_ok!(result), 41);
}

#[tokio::test]
async fn test_definition_may_return_pending_value() {
    let result = workflow()
        .run(|subject, _| Ok(Flow::pending(async move { Ok(subject + 1) })), 6)
        .await;
    assert_eq!(assert_ok!(result), 7);
}

#[tokio::test]
async fn test_mixing_steps_and_pending_is_fatal() {
    let calls = counter();
    let seen = Arc::clone(&calls);

    let result = workflow()
        .run(
            move |_, runner| {
                let seen = Arc::clone(&seen);
                runner.start().pipe(move |_, nested| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    nested.start();
                    Ok(Flow::pending(async { Ok(1) }))
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    let error = assert_err!(result);
    assert!(error.is_fatal());
    assert_eq!(error.to_string(), "Can't mix steps and async functions");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_mixing_inside_retrying_step_is_not_retried() {
    let outer = counter();
    let inner = counter();
    let (outer_seen, inner_seen) = (Arc::clone(&outer), Arc::clone(&inner));

    let result = workflow()
        .run(
            move |_, runner| {
                let outer_seen = Arc::clone(&outer_seen);
                let inner_seen = Arc::clone(&inner_seen);
                runner.start().pipe(move |_, nested| {
                    outer_seen.fetch_add(1, Ordering::SeqCst);
                    let inner_seen = Arc::clone(&inner_seen);
                    nested.start().pipe(move |_, innermost| {
                        inner_seen.fetch_add(1, Ordering::SeqCst);
                        innermost.start().map(|x| x);
                        Ok(Flow::pending(async { Ok(1) }))
                    });
                    Ok(Flow::default())
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert!(matches!(result, Err(WorkflowError::MixedStepsAndAsync)));
    assert_eq!(outer.load(Ordering::SeqCst), 1);
    assert_eq!(inner.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_runs_nested_steps_before_subsequent_steps() {
    let order = Arc::new(Mutex::new(String::new()));
    let log = Arc::clone(&order);

    let result = workflow()
        .run(
            move |_, runner| {
                let nested_log = Arc::clone(&log);
                runner.start().pipe(move |_, nested| {
                    let (a, c) = (Arc::clone(&nested_log), Arc::clone(&nested_log));
                    nested
                        .start()
                        .map(move |x| {
                            a.lock().unwrap().push('a');
                            x
                        })
                        .map(move |x| {
                            c.lock().unwrap().push('c');
                            x
                        });
                    Ok(Flow::default())
                });
                let b = Arc::clone(&log);
                runner.start().map(move |x| {
                    b.lock().unwrap().push('b');
                    x
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert_ok!(result);
    assert_eq!(*order.lock().unwrap(), "acb");
}

#[tokio::test]
async fn test_retries_until_success() {
    let calls = counter();
    let seen = Arc::clone(&calls);
    let workflow = Workflow::<bool>::builder()
        .retry_delay(Duration::from_millis(5))
        .build()
        .expect("valid workflow");

    let result = workflow
        .run(
            move |_, runner| {
                let seen = Arc::clone(&seen);
                runner.start().try_map(move |_| {
                    if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err(WorkflowError::command("Test error"));
                    }
                    Ok(true)
                });
                Ok(Flow::default())
            },
            false,
        )
        .await;

    assert!(assert_ok!(result));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_command_stops_chain_and_restarts_it() {
    let first = counter();
    let failing = counter();
    let last = counter();
    let seen = (Arc::clone(&first), Arc::clone(&failing), Arc::clone(&last));

    let result = workflow()
        .run(
            move |_, runner| {
                let (first, failing, last) =
                    (Arc::clone(&seen.0), Arc::clone(&seen.1), Arc::clone(&seen.2));
                runner
                    .start()
                    .map(move |x| {
                        first.fetch_add(1, Ordering::SeqCst);
                        x + 1
                    })
                    .try_map(move |x| {
                        if failing.fetch_add(1, Ordering::SeqCst) < 2 {
                            return Err(WorkflowError::command("Test error"));
                        }
                        Ok(x)
                    })
                    .map(move |x| {
                        last.fetch_add(1, Ordering::SeqCst);
                        x
                    });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    // Every attempt starts over from the seed, so the subject never accumulates.
    assert_eq!(assert_ok!(result), 1);
    assert_eq!(first.load(Ordering::SeqCst), 3);
    assert_eq!(failing.load(Ordering::SeqCst), 3);
    assert_eq!(last.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_can_cancel_step() {
    let source = Arc::new(CancellationSource::new());
    let calls = counter();
    let (seen, trigger) = (Arc::clone(&calls), Arc::clone(&source));

    let result = workflow_with(Workflow::builder().cancellation(source.signal()))
        .run(
            move |_, runner| {
                let (seen, trigger) = (Arc::clone(&seen), Arc::clone(&trigger));
                runner.start().try_map(move |_| {
                    let attempt = seen.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt > 2 {
                        trigger.cancel();
                    }
                    Err(WorkflowError::command(format!(
                        "Command error message {}",
                        attempt
                    )))
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    let error = assert_err!(result);
    assert_eq!(error.to_string(), "Command error message 3");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_can_cancel_inner_step() {
    let source = Arc::new(CancellationSource::new());
    let calls = counter();
    let failures = counter();
    let seen = (Arc::clone(&calls), Arc::clone(&failures), Arc::clone(&source));

    let result = workflow_with(Workflow::builder().cancellation(source.signal()))
        .run(
            move |_, runner| {
                let seen = (Arc::clone(&seen.0), Arc::clone(&seen.1), Arc::clone(&seen.2));
                runner.start().pipe(move |_, nested| {
                    let (calls, failures, trigger) =
                        (Arc::clone(&seen.0), Arc::clone(&seen.1), Arc::clone(&seen.2));
                    nested
                        .start()
                        .map(move |x| {
                            if calls.fetch_add(1, Ordering::SeqCst) + 1 > 2 {
                                trigger.cancel();
                            }
                            x
                        })
                        .try_map(move |_| {
                            failures.fetch_add(1, Ordering::SeqCst);
                            Err(WorkflowError::command("Command error message"))
                        });
                    Ok(Flow::default())
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    let error = assert_err!(result);
    assert_eq!(error.to_string(), "Command error message");
    assert_eq!(failures.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_cancelled_before_start_skips_commands() {
    let source = CancellationSource::new();
    source.cancel_with("not needed");
    let calls = counter();
    let seen = Arc::clone(&calls);

    let result = workflow_with(Workflow::builder().cancellation(source.signal()))
        .run(
            move |_, runner| {
                let seen = Arc::clone(&seen);
                runner.start().map(move |x| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    x
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    match assert_err!(result) {
        WorkflowError::Cancelled { reason } => assert_eq!(reason, "cancelled: not needed"),
        other => unreachable!("Unexpected error: {}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_timeout_stops_retrying() {
    let calls = counter();
    let seen = Arc::clone(&calls);

    let result = workflow_with(
        Workflow::builder().cancellation(assert_ok!(cancel_after(Duration::from_millis(60)))),
    )
    .run(
        move |_, runner| {
            let seen = Arc::clone(&seen);
            runner.start().try_map(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(WorkflowError::command("still failing"))
            });
            Ok(Flow::default())
        },
        0,
    )
    .await;

    assert_eq!(assert_err!(result).to_string(), "still failing");
    assert!(calls.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_passes_subject_between_commands() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);

    let result = workflow()
        .run(
            move |_, runner| {
                let (a, b) = (Arc::clone(&log), Arc::clone(&log));
                runner
                    .start()
                    .map(move |x| {
                        a.lock().unwrap().push(x);
                        42
                    })
                    .map(move |x| {
                        b.lock().unwrap().push(x);
                        x + 2
                    });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert_eq!(assert_ok!(result), 44);
    assert_eq!(*received.lock().unwrap(), vec![0, 42]);
}

#[tokio::test]
async fn test_start_with_seeds_first_command() {
    let result = workflow()
        .run(
            |subject, runner| {
                runner.start_with(subject * 10).map(|x| x + 1);
                Ok(Flow::default())
            },
            4,
        )
        .await;
    assert_eq!(assert_ok!(result), 41);
}

#[tokio::test]
async fn test_command_after_nested_steps_gets_last_nested_result() {
    let received = Arc::new(Mutex::new(None));
    let log = Arc::clone(&received);

    let result = workflow()
        .run(
            move |_, runner| {
                let log = Arc::clone(&log);
                runner
                    .start()
                    .pipe(|_, nested| {
                        nested.start().map(|_| 40);
                        nested.start().map(|_| 42);
                        Ok(Flow::default())
                    })
                    .map(move |x| {
                        *log.lock().unwrap() = Some(x);
                        x + 2
                    });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert_eq!(assert_ok!(result), 44);
    assert_eq!(*received.lock().unwrap(), Some(42));
}

#[tokio::test]
async fn test_retries_nested_steps_without_retrying_outer_steps() {
    let outer = counter();
    let inner = counter();
    let failures = counter();
    let seen = (Arc::clone(&outer), Arc::clone(&inner), Arc::clone(&failures));

    let result = workflow()
        .run(
            move |_, runner| {
                let outer = Arc::clone(&seen.0);
                let (inner, failures) = (Arc::clone(&seen.1), Arc::clone(&seen.2));
                runner
                    .start()
                    .map(move |x| {
                        outer.fetch_add(1, Ordering::SeqCst);
                        x
                    })
                    .pipe(move |_, nested| {
                        let (inner, failures) = (Arc::clone(&inner), Arc::clone(&failures));
                        nested
                            .start()
                            .map(move |x| {
                                inner.fetch_add(1, Ordering::SeqCst);
                                x
                            })
                            .try_map(move |x| {
                                if failures.fetch_add(1, Ordering::SeqCst) < 2 {
                                    return Err(WorkflowError::command("Test error"));
                                }
                                Ok(x)
                            });
                        Ok(Flow::default())
                    });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert_ok!(result);
    assert_eq!(outer.load(Ordering::SeqCst), 1);
    assert_eq!(inner.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_context_is_shared_with_nested_commands() {
    let context = Context::new().with("visits", AtomicU32::new(0));
    let workflow = workflow_with(Workflow::builder().context(context));

    let result = workflow
        .run(
            |_, runner| {
                runner.start().pipe(|_, nested| {
                    nested.start().pipe(|_, innermost| {
                        if let Some(visits) = innermost.context().get::<AtomicU32>("visits") {
                            visits.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(Flow::Ready(innermost.depth() as i64))
                    });
                    Ok(Flow::default())
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert_eq!(assert_ok!(result), 2);
    assert_eq!(
        workflow
            .context()
            .get::<AtomicU32>("visits")
            .map(|visits| visits.load(Ordering::SeqCst)),
        Some(1)
    );
}

struct Double;

#[async_trait::async_trait]
impl AsyncCommand<i64> for Double {
    async fn execute(&self, subject: i64, _ctx: Arc<Context>) -> Result<i64, WorkflowError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(subject * 2)
    }
}

#[tokio::test]
async fn test_async_command() {
    let result = workflow()
        .run(
            |_, runner| {
                runner.start_with(21).pipe_async(Double);
                Ok(Flow::default())
            },
            0,
        )
        .await;
    assert_eq!(assert_ok!(result), 42);
}

fn registry() -> Registry<i64> {
    Registry::<i64>::new()
        .add_step_start("number", |_, _, args| {
            Ok(Flow::Ready(args.first().and_then(|v| v.as_i64()).unwrap_or_default()))
        })
        .and_then(|registry| {
            registry.add_command("add", |subject, _, args| {
                Ok(Flow::Ready(
                    subject + args.first().and_then(|v| v.as_i64()).unwrap_or_default(),
                ))
            })
        })
        .expect("valid registry")
}

#[tokio::test]
async fn test_registered_commands() {
    let result = workflow_with(Workflow::builder().registry(registry()))
        .run(
            |_, runner| {
                runner
                    .start_named("number", [json!(40)])?
                    .command("add", [json!(1)])?
                    .command("add", [json!(1)])?;
                Ok(Flow::default())
            },
            0,
        )
        .await;
    assert_eq!(assert_ok!(result), 42);
}

#[tokio::test]
async fn test_replaced_command_delegates_to_original() {
    let registry = registry()
        .replace_command("add", |original, subject, runner, args| {
            original(subject * 10, runner, args)
        })
        .expect("add is registered");

    let result = workflow_with(Workflow::builder().registry(registry))
        .run(
            |_, runner| {
                runner.start_named("number", [json!(4)])?.command("add", [json!(2)])?;
                Ok(Flow::default())
            },
            0,
        )
        .await;
    assert_eq!(assert_ok!(result), 42);
}

#[tokio::test]
async fn test_replaced_step_start_delegates_to_original() {
    let registry = registry()
        .replace_step_start("number", |original, subject, runner, args| {
            match original(subject, runner, args)? {
                Flow::Ready(number) => Ok(Flow::Ready(number * 10)),
                pending => Ok(pending),
            }
        })
        .expect("number is registered");

    let result = workflow_with(Workflow::builder().registry(registry))
        .run(
            |_, runner| {
                runner.start_named("number", [json!(4)])?.map(|x| x + 2);
                Ok(Flow::default())
            },
            0,
        )
        .await;
    assert_eq!(assert_ok!(result), 42);
}

#[tokio::test]
async fn test_unknown_command_is_not_retried() {
    let calls = counter();
    let seen = Arc::clone(&calls);

    let result = workflow()
        .run(
            move |_, runner| {
                let seen = Arc::clone(&seen);
                runner.start().pipe(move |_, nested| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    nested.start().command("missing", [])?;
                    Ok(Flow::default())
                });
                Ok(Flow::default())
            },
            0,
        )
        .await;

    assert!(matches!(result, Err(WorkflowError::UnknownCommand(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
