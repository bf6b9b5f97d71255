//! End-to-End Test Framework for the bus RPC runtime
//!
//! Runs named scenarios against an in-process bus: every scenario gets its
//! own `MemoryBus`, opens as many connections as it needs, and reports the
//! checks it made plus call/signal metrics.

pub mod framework;
pub mod scenarios;
pub mod validation;

pub use framework::{ScenarioContext, TestConfig, TestFramework, TestMetrics, TestResult, TestScenario};
pub use validation::{ValidationResult, ValidationSeverity, Validator};

/// JSON report of one run
pub fn report(results: &[TestResult]) -> serde_json::Value {
    serde_json::json!({
        "test_run": {
            "version": env!("CARGO_PKG_VERSION"),
            "total_tests": results.len(),
            "passed_tests": results.iter().filter(|r| r.success).count(),
            "failed_tests": results.iter().filter(|r| !r.success).count(),
            "total_duration_ms": results.iter().map(|r| r.duration_ms).sum::<u64>(),
        },
        "results": results,
    })
}
