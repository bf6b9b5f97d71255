//! Calculator E2E Test
//!
//! Typed method calls through a proxy to an object on another connection:
//! results decode exactly, remote errors keep their name, unknown members
//! map to the standard errors.

use crate::framework::{ScenarioContext, TestScenario};
use crate::validation::{ValidationResult, Validator};
use anyhow::Result;
use bus_rpc::{error_names, ErrorKind, Method, MethodError, Object, Proxy, VTable};
use tracing::info;

pub const CALCULATOR_INTERFACE: &str = "org.example.Calculator";
pub const CALCULATOR_PATH: &str = "/org/example/calculator";
pub const DIVISION_BY_ZERO: &str = "org.example.Calculator.Error.DivisionByZero";

pub struct CalculatorTest {
    pub operations: u32,
}

impl Default for CalculatorTest {
    fn default() -> Self {
        Self { operations: 200 }
    }
}

/// Calculator interface served by several scenarios
pub fn calculator_vtable() -> VTable {
    VTable::new()
        .method(
            Method::new("Multiply", |(a, b): (i64, f64)| Ok((a as f64 * b,)))
                .with_names(&["a", "b"], &["result"])
                .with_doc("Multiply an integer by a double"),
        )
        .method(
            Method::new("Divide", |(a, b): (i64, i64)| {
                if b == 0 {
                    return Err(MethodError::new(DIVISION_BY_ZERO, "division by zero"));
                }
                Ok((a / b,))
            })
            .with_names(&["dividend", "divisor"], &["quotient"]),
        )
        .method(Method::new("Concat", |(parts, sep): (Vec<String>, String)| {
            Ok((parts.join(&sep),))
        }))
}

impl TestScenario for CalculatorTest {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Typed calls, remote errors and standard lookup errors"
    }

    fn execute(&self, ctx: &ScenarioContext) -> Result<Vec<ValidationResult>> {
        let server = ctx.connect()?;
        let client = ctx.connect()?;
        server.request_name("org.example.Calculator")?;
        let object = Object::new(&server, CALCULATOR_PATH)?;
        let _slot = object.add_vtable(CALCULATOR_INTERFACE, calculator_vtable())?;
        server.enter_event_loop_async()?;

        let proxy = Proxy::new(&client, "org.example.Calculator", CALCULATOR_PATH)?;
        let mut v = Validator::new();

        let product: Result<(f64,), _> =
            ctx.timed(|| proxy.call_method(CALCULATOR_INTERFACE, "Multiply", (-1024i64, 3.24f64)));
        match product {
            Ok((p,)) => {
                v.check("multiply", (p - -3317.76).abs() < 1e-9, format!("-1024 * 3.24 = {p}"));
            }
            Err(e) => {
                v.check("multiply", false, e.to_string());
            }
        }

        let mut mismatches = 0u32;
        for i in 0..self.operations {
            let a = i as i64 - (self.operations as i64 / 2);
            let b = 0.5 + i as f64;
            let reply: Result<(f64,), _> =
                ctx.timed(|| proxy.call_method(CALCULATOR_INTERFACE, "Multiply", (a, b)));
            if !matches!(reply, Ok((p,)) if (p - a as f64 * b).abs() < 1e-9) {
                mismatches += 1;
            }
        }
        v.check_eq("repeated_multiply", mismatches, 0);

        let joined: Result<(String,), _> = ctx.timed(|| {
            proxy.call_method(
                CALCULATOR_INTERFACE,
                "Concat",
                (vec!["a".to_string(), "b".to_string(), "c".to_string()], "-".to_string()),
            )
        });
        v.check_eq("concat", joined.ok(), Some(("a-b-c".to_string(),)));

        v.check_err(
            "division_by_zero",
            proxy.call_method::<_, (i64,)>(CALCULATOR_INTERFACE, "Divide", (1i64, 0i64)),
            |e| e.kind() == ErrorKind::Remote && e.remote_name() == Some(DIVISION_BY_ZERO),
        );
        v.check_err(
            "unknown_method",
            proxy.call_method::<_, ()>(CALCULATOR_INTERFACE, "Modulo", (1i64, 2i64)),
            |e| e.remote_name() == Some(error_names::UNKNOWN_METHOD),
        );
        v.check_err(
            "invalid_args",
            proxy.call_method::<_, (f64,)>(CALCULATOR_INTERFACE, "Multiply", ("x".to_string(),)),
            |e| e.remote_name() == Some(error_names::INVALID_ARGS),
        );
        v.check_err(
            "result_type_mismatch",
            proxy.call_method::<_, (i64,)>(CALCULATOR_INTERFACE, "Multiply", (2i64, 2.0f64)),
            |e| e.kind() == ErrorKind::TypeMismatch,
        );
        let missing = Proxy::new(&client, server.unique_name(), "/nowhere")?;
        v.check_err(
            "unknown_object",
            missing.call_method::<_, (f64,)>(CALCULATOR_INTERFACE, "Multiply", (1i64, 1.0f64)),
            |e| e.remote_name() == Some(error_names::UNKNOWN_OBJECT),
        );

        info!(operations = self.operations, "Calculator scenario finished");
        Ok(v.finish())
    }
}
