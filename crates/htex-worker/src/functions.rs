use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use htex_protocol::RemoteErrorKind;
use serde_json::Value;

/// A registered remote function: `(args, kwargs) -> Value`. Synchronous and
/// possibly CPU-bound; the worker always runs it on a `spawn_blocking` slot
/// (see `crate::run_worker`), the same way the teacher's
/// `compute_witness`/`compute_witness_batch` calls are offloaded in
/// `crates/client-engine/src/worker.rs`.
pub type RemoteFn = Box<dyn Fn(&Value, &Value) -> Result<Value, RemoteErrorKind> + Send + Sync>;

/// Compile-time-linked registry mapping a function name to a runnable. Both
/// the submitter side (which only ever sends a name) and the worker side
/// (which resolves it) link the same table — see `SPEC_FULL.md` §3.1 for why
/// this stands in for arbitrary closure pickling.
#[derive(Default)]
pub struct FunctionTable {
    functions: HashMap<String, RemoteFn>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, f: RemoteFn) -> &mut Self {
        self.functions.insert(name.into(), f);
        self
    }

    /// Runs the named function, converting a Rust panic into
    /// `RemoteErrorKind::Panicked` instead of taking down the worker.
    pub fn call(&self, name: &str, args: &Value, kwargs: &Value) -> Result<Value, RemoteErrorKind> {
        let Some(f) = self.functions.get(name) else {
            return Err(RemoteErrorKind::UnknownFunction { name: name.to_string() });
        };
        match catch_unwind(AssertUnwindSafe(|| f(args, kwargs))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(&payload);
                Err(RemoteErrorKind::Panicked { message })
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Functions exercised by the integration scenarios in §8: `double`
/// (S1 happy path), `divide` (S2 user exception), and `oversized` (S4
/// payload-too-large — the codec rejects the result on the way out, this
/// function itself never fails).
pub fn demo_table() -> FunctionTable {
    let mut table = FunctionTable::new();

    table.register(
        "double",
        Box::new(|args, _kwargs| {
            let x = args
                .get(0)
                .and_then(Value::as_i64)
                .ok_or_else(|| RemoteErrorKind::UserError {
                    message: "double expects one integer argument".into(),
                })?;
            Ok(Value::from(x * 2))
        }),
    );

    table.register(
        "divide",
        Box::new(|args, _kwargs| {
            let a = args.get(0).and_then(Value::as_f64).unwrap_or(0.0);
            let b = args.get(1).and_then(Value::as_f64).unwrap_or(0.0);
            if b == 0.0 {
                return Err(RemoteErrorKind::UserError {
                    message: "division by zero".into(),
                });
            }
            Ok(Value::from(a / b))
        }),
    );

    table.register(
        "oversized",
        Box::new(|_args, _kwargs| Ok(Value::String("x".repeat(4 * 1024 * 1024)))),
    );

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_function_is_reported_not_panicked() {
        let table = FunctionTable::new();
        let err = table.call("nope", &json!([]), &json!({})).unwrap_err();
        assert!(matches!(err, RemoteErrorKind::UnknownFunction { .. }));
    }

    #[test]
    fn panics_are_caught() {
        let mut table = FunctionTable::new();
        table.register("boom", Box::new(|_, _| panic!("kaboom")));
        let err = table.call("boom", &json!([]), &json!({})).unwrap_err();
        match err {
            RemoteErrorKind::Panicked { message } => assert_eq!(message, "kaboom"),
            other => panic!("expected Panicked, got {other:?}"),
        }
    }

    #[test]
    fn double_computes_expected_result() {
        let table = demo_table();
        let result = table.call("double", &json!([21]), &json!({})).unwrap();
        assert_eq!(result, json!(42));
    }
}
