//! Integration tests for cross-isolate invocation: the apply family,
//! timeouts, the sync-promise bridge, and ordering.

use std::sync::Arc;
use std::time::{Duration, Instant};

use islet_remote::{ApplyOptions, Reference, TransferOptions};
use islet_vm::{
    Error, IsolateOptions, IsolateRef, PromiseData, PromiseState, Scheduler, Value,
};

fn spawn_pair(scheduler: &Scheduler) -> (IsolateRef, IsolateRef) {
    let a = scheduler.spawn(IsolateOptions::default()).unwrap();
    let b = scheduler.spawn(IsolateOptions::default()).unwrap();
    (a, b)
}

fn function_reference(
    isolate: &IsolateRef,
    make: impl FnOnce() -> Value + Send + 'static,
) -> Arc<Reference> {
    isolate
        .run(move |scope| Ok(Arc::new(Reference::new(scope, make()))))
        .unwrap()
}

fn wait_settled(promise: &Arc<PromiseData>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !promise.is_settled() {
        assert!(Instant::now() < deadline, "promise did not settle in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn apply_sync_reads_the_owning_isolates_globals() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);

    let r = a
        .run(|scope| {
            scope.global().set("x".into(), Value::number(7.0));
            let f = Value::function("readX", |scope, _this, _args| {
                Ok(scope
                    .global()
                    .get(&"x".into())
                    .unwrap_or(Value::Undefined))
            });
            Ok(Arc::new(Reference::new(scope, f)))
        })
        .unwrap();

    let result = b
        .run(move |scope| r.apply_sync(scope, None, None, &ApplyOptions::default()))
        .unwrap();
    assert_eq!(result.as_number(), Some(7.0));
    scheduler.shutdown();
}

#[test]
fn apply_sync_passes_arguments_and_receiver() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);

    let r = function_reference(&a, || {
        Value::function("describe", |_scope, this, args| {
            let receiver = this.as_str().unwrap_or("?").to_string();
            let total: f64 = args.iter().filter_map(Value::as_number).sum();
            Ok(Value::string(format!("{receiver}:{total}")))
        })
    });

    let result = b
        .run(move |scope| {
            let args = Value::array(vec![Value::number(1.0), Value::number(2.0)]);
            r.apply_sync(
                scope,
                Some(&Value::string("recv")),
                Some(&args),
                &ApplyOptions::default(),
            )
        })
        .unwrap();
    assert_eq!(result.as_str(), Some("recv:3"));
    scheduler.shutdown();
}

#[test]
fn apply_rejects_non_function_references() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, Value::object);

    let err = b
        .run(move |scope| r.apply_sync(scope, None, None, &ApplyOptions::default()))
        .unwrap_err();
    assert_eq!(err.message(), "Reference is not a function");
    scheduler.shutdown();
}

#[test]
fn apply_rejects_non_dense_arguments() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("f", |_, _, _| Ok(Value::Undefined))
    });

    let err = b
        .run(move |scope| {
            r.apply_sync(
                scope,
                None,
                Some(&Value::number(1.0)),
                &ApplyOptions::default(),
            )
        })
        .unwrap_err();
    assert_eq!(err.message(), "Invalid `arguments` array");
    scheduler.shutdown();
}

#[test]
fn apply_copies_object_arguments_on_request() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);

    let r = function_reference(&a, || {
        Value::function("readNested", |_scope, _this, args| {
            args.first()
                .map(|arg| arg.get_member(&"nested".into()))
                .unwrap_or(Ok(Value::Undefined))
        })
    });

    let result = b
        .run(move |scope| {
            let arg = Value::object();
            arg.set_member("nested".into(), Value::number(6.0)).unwrap();
            let args = Value::array(vec![arg]);
            let options = ApplyOptions {
                arguments: TransferOptions::copied(),
                ..ApplyOptions::default()
            };
            r.apply_sync(scope, None, Some(&args), &options)
        })
        .unwrap();
    assert_eq!(result.as_number(), Some(6.0));
    scheduler.shutdown();
}

#[test]
fn thrown_script_errors_cross_with_their_message() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("thrower", |_, _, _| {
            Err(Error::Thrown(Value::error("kapow")))
        })
    });

    let err = b
        .run(move |scope| r.apply_sync(scope, None, None, &ApplyOptions::default()))
        .unwrap_err();
    assert!(matches!(err, Error::Runtime { .. }));
    assert_eq!(err.message(), "kapow");
    scheduler.shutdown();
}

#[test]
fn busy_scripts_are_interrupted_on_timeout() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("spin", |scope, _this, _args| {
            loop {
                scope.check_interrupt()?;
                std::hint::spin_loop();
            }
        })
    });

    let start = Instant::now();
    let err = b
        .run(move |scope| r.apply_sync(scope, None, None, &ApplyOptions::with_timeout(50)))
        .unwrap_err();
    let elapsed = start.elapsed();
    assert_eq!(err.message(), "Script execution timed out.");
    assert!(matches!(err, Error::Generic(_)));
    assert!(
        elapsed < Duration::from_millis(1500),
        "timeout took {elapsed:?}"
    );

    // The target isolate survives and keeps serving.
    let ok = a.run(|_scope| Ok(true)).unwrap();
    assert!(ok);
    scheduler.shutdown();
}

#[test]
fn apply_sync_promise_passes_the_resolved_value() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("sleeper", |scope, _this, _args| {
            let (promise, resolver) = scope.create_promise();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                resolver.resolve(Value::string("ok"));
            });
            Ok(promise)
        })
    });

    let result = b
        .run(move |scope| r.apply_sync_promise(scope, None, None, &ApplyOptions::default()))
        .unwrap();
    assert_eq!(result.as_str(), Some("ok"));
    scheduler.shutdown();
}

#[test]
fn apply_sync_promise_accepts_plain_results() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("plain", |_, _, _| Ok(Value::number(5.0)))
    });

    let result = b
        .run(move |scope| r.apply_sync_promise(scope, None, None, &ApplyOptions::default()))
        .unwrap();
    assert_eq!(result.as_number(), Some(5.0));
    scheduler.shutdown();
}

#[test]
fn rejections_preserve_error_messages() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("failer", |scope, _this, _args| {
            let (promise, resolver) = scope.create_promise();
            std::thread::spawn(move || {
                resolver.reject(Value::error("bad"));
            });
            Ok(promise)
        })
    });

    let err = b
        .run(move |scope| r.apply_sync_promise(scope, None, None, &ApplyOptions::default()))
        .unwrap_err();
    assert!(matches!(err, Error::Runtime { .. }));
    assert_eq!(err.message(), "bad");
    scheduler.shutdown();
}

#[test]
fn non_error_rejections_become_synthetic_errors() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("failer", |scope, _this, _args| {
            let (promise, resolver) = scope.create_promise();
            std::thread::spawn(move || {
                resolver.reject(Value::number(3.0));
            });
            Ok(promise)
        })
    });

    let err = b
        .run(move |scope| r.apply_sync_promise(scope, None, None, &ApplyOptions::default()))
        .unwrap_err();
    assert!(matches!(err, Error::Runtime { .. }));
    assert_eq!(
        err.message(),
        "Script threw a value that is not an instance of Error"
    );
    scheduler.shutdown();
}

#[test]
fn apply_sync_promise_times_out_while_pending() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("never", |scope, _this, _args| {
            let (promise, _resolver) = scope.create_promise();
            Ok(promise)
        })
    });

    let start = Instant::now();
    let err = b
        .run(move |scope| {
            r.apply_sync_promise(scope, None, None, &ApplyOptions::with_timeout(50))
        })
        .unwrap_err();
    assert_eq!(err.message(), "Script execution timed out.");
    assert!(start.elapsed() < Duration::from_millis(1500));
    scheduler.shutdown();
}

#[test]
fn apply_sync_promise_forbids_return_options() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("plain", |_, _, _| Ok(Value::number(1.0)))
    });

    let err = b
        .run(move |scope| {
            let options = ApplyOptions {
                return_options: TransferOptions::copied(),
                ..ApplyOptions::default()
            };
            r.apply_sync_promise(scope, None, None, &options)
        })
        .unwrap_err();
    assert_eq!(
        err.message(),
        "`return` options are not available for `applySyncPromise`"
    );
    scheduler.shutdown();
}

#[test]
fn apply_sync_promise_rejects_the_owning_isolate() {
    let scheduler = Scheduler::new();
    let (a, _b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("plain", |_, _, _| Ok(Value::number(1.0)))
    });

    let err = a
        .run(move |scope| r.apply_sync_promise(scope, None, None, &ApplyOptions::default()))
        .unwrap_err();
    assert_eq!(
        err.message(),
        "Cannot call applySyncPromise from the isolate that owns the reference"
    );
    scheduler.shutdown();
}

#[test]
fn sequential_calls_observe_submission_order() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);

    let r = a
        .run(|scope| {
            scope.global().set("log".into(), Value::string(""));
            let f = Value::function("append", |scope, _this, args| {
                let global = scope.global();
                let prev = global
                    .get(&"log".into())
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let piece = args
                    .first()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                global.set("log".into(), Value::string(format!("{prev}{piece}")));
                global
                    .get(&"log".into())
                    .map(Ok)
                    .unwrap_or(Ok(Value::Undefined))
            });
            Ok(Arc::new(Reference::new(scope, f)))
        })
        .unwrap();

    let log = b
        .run(move |scope| {
            for piece in ["1", "2", "3"] {
                let args = Value::array(vec![Value::string(piece)]);
                r.apply_sync(scope, None, Some(&args), &ApplyOptions::default())?;
            }
            let args = Value::array(vec![Value::string("")]);
            r.apply_sync(scope, None, Some(&args), &ApplyOptions::default())
        })
        .unwrap();
    assert_eq!(log.as_str(), Some("123"));
    scheduler.shutdown();
}

#[test]
fn async_apply_returns_a_promise_in_the_caller() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("six", |_, _, _| Ok(Value::number(6.0)))
    });

    let promise = b
        .run(move |scope| {
            let value = r.apply(scope, None, None, &ApplyOptions::default())?;
            match value {
                Value::Promise(p) => Ok(p),
                other => panic!("expected a promise, got {other:?}"),
            }
        })
        .unwrap();
    wait_settled(&promise);
    match promise.state() {
        PromiseState::Fulfilled(v) => assert_eq!(v.as_number(), Some(6.0)),
        other => panic!("expected fulfillment, got {other:?}"),
    }
    scheduler.shutdown();
}

#[test]
fn async_apply_rejects_with_error_values() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("thrower", |_, _, _| {
            Err(Error::Thrown(Value::error("nope")))
        })
    });

    let promise = b
        .run(move |scope| {
            let value = r.apply(scope, None, None, &ApplyOptions::default())?;
            match value {
                Value::Promise(p) => Ok(p),
                other => panic!("expected a promise, got {other:?}"),
            }
        })
        .unwrap();
    wait_settled(&promise);
    match promise.state() {
        PromiseState::Rejected(Value::Error(e)) => assert_eq!(e.message, "nope"),
        other => panic!("expected rejection with an error value, got {other:?}"),
    }
    scheduler.shutdown();
}

#[test]
fn ignored_applies_run_but_never_report() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);

    let r = a
        .run(|scope| {
            let f = Value::function("mark", |scope, _this, _args| {
                scope.global().set("hit".into(), Value::boolean(true));
                Ok(Value::Undefined)
            });
            Ok(Arc::new(Reference::new(scope, f)))
        })
        .unwrap();

    b.run({
        let r = r.clone();
        move |scope| r.apply_ignored(scope, None, None, &ApplyOptions::default())
    })
    .unwrap();

    // The call is fire and forget; poll the target for its side effect.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let hit = a
            .run(|scope| {
                Ok(scope
                    .global()
                    .get(&"hit".into())
                    .and_then(|v| v.as_boolean())
                    .unwrap_or(false))
            })
            .unwrap();
        if hit {
            break;
        }
        assert!(Instant::now() < deadline, "ignored apply never ran");
        std::thread::sleep(Duration::from_millis(2));
    }

    // Errors in ignored mode are swallowed.
    let failing = function_reference(&a, || {
        Value::function("thrower", |_, _, _| {
            Err(Error::Thrown(Value::error("dropped")))
        })
    });
    b.run(move |scope| failing.apply_ignored(scope, None, None, &ApplyOptions::default()))
        .unwrap();
    scheduler.shutdown();
}

#[test]
fn calls_to_disposed_isolates_fail_with_disposed() {
    let scheduler = Scheduler::new();
    let (a, b) = spawn_pair(&scheduler);
    let r = function_reference(&a, || {
        Value::function("plain", |_, _, _| Ok(Value::number(1.0)))
    });

    a.dispose();
    let err = b
        .run(move |scope| r.apply_sync(scope, None, None, &ApplyOptions::default()))
        .unwrap_err();
    assert!(matches!(err, Error::Disposed));
    assert_eq!(err.message(), "Isolate is disposed");
    scheduler.shutdown();
}
