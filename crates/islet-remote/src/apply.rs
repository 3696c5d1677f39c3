//! Function invocation across isolates.
//!
//! [`ApplyRunner`] is the three-phase task behind the `apply` family:
//! phase 1 (its constructor, in `reference.rs`) marshals the receiver and
//! arguments out under the caller's lock; phase 2 enters the reference's
//! creation context, checks callability, marshals inputs in, and invokes
//! under the timeout guard; phase 3 materializes the result for the caller.
//!
//! When promise bridging is on and the call returns a promise, phase 2
//! parks the task and settlement callbacks finish it later, racing the
//! timeout through the shared `did_finish` flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use islet_vm::{Context, Error, Result, Scope, Value};

use crate::remote::RemoteHandle;
use crate::task::{Phase2Flow, PendingTask, RemoteTask, runtime_from_thrown};
use crate::timeout;
use crate::transfer::{Transferable, TransferOptions, TransferPosition, transfer_out};

/// Options for the `apply` family.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Wall-clock bound on target-side script execution, in milliseconds.
    /// Zero disables the guard.
    pub timeout: u32,
    /// Marshaling options applied to the receiver and each argument.
    pub arguments: TransferOptions,
    /// Marshaling options applied to the result.
    pub return_options: TransferOptions,
}

impl ApplyOptions {
    pub fn with_timeout(timeout: u32) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Parses `{timeout?, arguments?, return?}` from an options object.
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        if value.is_undefined() {
            return Ok(Self::default());
        }
        let Some(obj) = value.as_object() else {
            return Err(Error::type_error("Options must be an object"));
        };
        let timeout = match obj.get(&"timeout".into()) {
            None => 0,
            Some(Value::Number(n)) if n.fract() == 0.0 && n >= 0.0 && n <= u32::MAX as f64 => {
                n as u32
            }
            Some(_) => return Err(Error::type_error("`timeout` must be integer")),
        };
        let arguments = match obj.get(&"arguments".into()) {
            None => TransferOptions::default(),
            Some(v) => {
                if v.as_object().is_none() {
                    return Err(Error::type_error("`arguments` must be object"));
                }
                TransferOptions::from_value(&v)?
            }
        };
        let return_options = match obj.get(&"return".into()) {
            None => TransferOptions::default(),
            Some(v) => {
                if v.as_object().is_none() {
                    return Err(Error::type_error("`return` must be object"));
                }
                TransferOptions::from_value(&v)?
            }
        };
        Ok(Self {
            timeout,
            arguments,
            return_options,
        })
    }
}

/// Extracts a dense argument list: an array, or a property bag whose own
/// keys are exactly `0..N-1`.
pub(crate) fn arguments_list(args: Option<&Value>) -> Result<Vec<Value>> {
    match args {
        None | Some(Value::Undefined) => Ok(Vec::new()),
        Some(Value::Array(arr)) => Ok(arr.to_vec()),
        Some(Value::Object(obj)) => {
            let len = obj.len();
            let mut out = Vec::with_capacity(len);
            for i in 0..len {
                match obj.get(&(i as u32).into()) {
                    Some(v) => out.push(v),
                    None => return Err(Error::type_error("Invalid `arguments` array")),
                }
            }
            Ok(out)
        }
        Some(_) => Err(Error::type_error("Invalid `arguments` array")),
    }
}

/// The three-phase task behind `apply`, `applySync`, `applyIgnored`, and
/// `applySyncPromise`.
pub(crate) struct ApplyRunner {
    function: RemoteHandle<Value>,
    context: RemoteHandle<Context>,
    receiver: Option<Transferable>,
    arguments: Vec<Transferable>,
    timeout_ms: u32,
    return_options: TransferOptions,
    bridge_promise: bool,
    result: Option<Transferable>,
}

impl ApplyRunner {
    pub(crate) fn new(
        function: RemoteHandle<Value>,
        context: RemoteHandle<Context>,
        receiver: Transferable,
        arguments: Vec<Transferable>,
        options: &ApplyOptions,
        bridge_promise: bool,
    ) -> Self {
        Self {
            function,
            context,
            receiver: Some(receiver),
            arguments,
            timeout_ms: options.timeout,
            return_options: options.return_options,
            bridge_promise,
            result: None,
        }
    }
}

impl RemoteTask for ApplyRunner {
    type Output = Value;

    fn phase2(
        &mut self,
        scope: &mut Scope<'_>,
        pending: &Arc<PendingTask<Self>>,
    ) -> Result<Phase2Flow> {
        let function = self.function.deref(scope)?;
        let context = self.context.deref(scope)?;
        let pending = pending.clone();
        scope.with_context(context, |scope| {
            if function.as_function().is_none() {
                return Err(Error::type_error("Reference is not a function"));
            }
            let receiver = match self.receiver.take() {
                Some(t) => t.transfer_in(scope)?,
                None => Value::Undefined,
            };
            let arguments = std::mem::take(&mut self.arguments)
                .into_iter()
                .map(|t| t.transfer_in(scope))
                .collect::<Result<Vec<_>>>()?;

            // The guard bounds the script call itself, not marshaling. The
            // armed expiry stays live through a promise wait, so the bound
            // covers settlement as well.
            let token = Arc::new(AtomicBool::new(false));
            if self.timeout_ms > 0 {
                let expire = pending.clone();
                let expire_token = token.clone();
                timeout::arm(Duration::from_millis(u64::from(self.timeout_ms)), move || {
                    if expire.finish(Err(Error::generic("Script execution timed out."))) {
                        expire_token.store(true, Ordering::Relaxed);
                    }
                });
            }
            let value =
                scope.with_interrupt(token, |scope| scope.call(&function, receiver, &arguments))?;

            if self.bridge_promise {
                if let Value::Promise(promise) = &value {
                    let settle = pending.clone();
                    promise.on_settled(scope, move |scope, settlement| {
                        // The task is only touched when the flag is ours.
                        if settle.is_finished() {
                            return;
                        }
                        let outcome = match settlement {
                            Ok(v) => transfer_out(
                                &v,
                                TransferOptions::default(),
                                TransferPosition::Return,
                                scope,
                            ),
                            Err(thrown) => Err(runtime_from_thrown(thrown)),
                        };
                        match outcome {
                            Ok(result) => {
                                settle.finish_parked(move |task| task.result = Some(result));
                            }
                            Err(error) => {
                                settle.finish(Err(error));
                            }
                        }
                    });
                    return Ok(Phase2Flow::Pending);
                }
            }

            self.result = Some(transfer_out(
                &value,
                self.return_options,
                TransferPosition::Return,
                scope,
            )?);
            Ok(Phase2Flow::Finished)
        })
    }

    fn phase3(mut self, scope: &mut Scope<'_>) -> Result<Value> {
        match self.result.take() {
            Some(result) => result.transfer_in(scope),
            None => Ok(Value::Undefined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_when_absent() {
        let options = ApplyOptions::from_value(None).unwrap();
        assert_eq!(options.timeout, 0);
        assert!(options.arguments.is_default());
        assert!(options.return_options.is_default());
    }

    #[test]
    fn options_parse_timeout() {
        let obj = Value::object();
        obj.set_member("timeout".into(), Value::number(250.0)).unwrap();
        let options = ApplyOptions::from_value(Some(&obj)).unwrap();
        assert_eq!(options.timeout, 250);
    }

    #[test]
    fn options_reject_fractional_timeout() {
        let obj = Value::object();
        obj.set_member("timeout".into(), Value::number(2.5)).unwrap();
        let err = ApplyOptions::from_value(Some(&obj)).unwrap_err();
        assert_eq!(err.message(), "`timeout` must be integer");
    }

    #[test]
    fn options_reject_non_object_sections() {
        let obj = Value::object();
        obj.set_member("arguments".into(), Value::number(1.0)).unwrap();
        let err = ApplyOptions::from_value(Some(&obj)).unwrap_err();
        assert_eq!(err.message(), "`arguments` must be object");

        let obj = Value::object();
        obj.set_member("return".into(), Value::string("x")).unwrap();
        let err = ApplyOptions::from_value(Some(&obj)).unwrap_err();
        assert_eq!(err.message(), "`return` must be object");
    }

    #[test]
    fn arguments_accept_dense_bags() {
        let arr = Value::array(vec![Value::number(1.0), Value::number(2.0)]);
        assert_eq!(arguments_list(Some(&arr)).unwrap().len(), 2);

        let bag = Value::object();
        bag.set_member(0u32.into(), Value::number(1.0)).unwrap();
        bag.set_member(1u32.into(), Value::number(2.0)).unwrap();
        assert_eq!(arguments_list(Some(&bag)).unwrap().len(), 2);
    }

    #[test]
    fn arguments_reject_sparse_bags() {
        let bag = Value::object();
        bag.set_member(0u32.into(), Value::number(1.0)).unwrap();
        bag.set_member(2u32.into(), Value::number(3.0)).unwrap();
        let err = arguments_list(Some(&bag)).unwrap_err();
        assert_eq!(err.message(), "Invalid `arguments` array");

        let err = arguments_list(Some(&Value::number(1.0))).unwrap_err();
        assert_eq!(err.message(), "Invalid `arguments` array");
    }
}
