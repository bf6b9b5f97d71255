//! Check collection for E2E scenarios

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub validator: String,
    pub passed: bool,
    pub message: String,
    pub severity: ValidationSeverity,
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Accumulates the checks one scenario makes
#[derive(Debug, Default)]
pub struct Validator {
    results: Vec<ValidationResult>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pass/fail check; failures are errors
    pub fn check(&mut self, validator: &str, passed: bool, message: impl Into<String>) -> bool {
        self.push(validator, passed, message.into(), ValidationSeverity::Error, None);
        passed
    }

    /// Record whether `actual` equals `expected`, with both values in the details
    pub fn check_eq<T: PartialEq + Debug>(&mut self, validator: &str, actual: T, expected: T) -> bool {
        let passed = actual == expected;
        let message = if passed {
            format!("{actual:?}")
        } else {
            format!("expected {expected:?}, got {actual:?}")
        };
        let details = serde_json::json!({
            "expected": format!("{expected:?}"),
            "actual": format!("{actual:?}"),
        });
        self.push(validator, passed, message, ValidationSeverity::Error, Some(details));
        passed
    }

    /// Record that `result` is an error satisfying `predicate`
    pub fn check_err<T: Debug, E: std::fmt::Display>(
        &mut self,
        validator: &str,
        result: Result<T, E>,
        predicate: impl FnOnce(&E) -> bool,
    ) -> bool {
        match result {
            Ok(value) => self.check(validator, false, format!("expected an error, got {value:?}")),
            Err(e) => {
                let passed = predicate(&e);
                self.check(validator, passed, e.to_string())
            }
        }
    }

    /// Informational note; never fails the scenario
    pub fn note(&mut self, validator: &str, message: impl Into<String>) {
        self.push(validator, true, message.into(), ValidationSeverity::Info, None);
    }

    fn push(
        &mut self,
        validator: &str,
        passed: bool,
        message: String,
        severity: ValidationSeverity,
        details: Option<serde_json::Value>,
    ) {
        if !passed {
            tracing::warn!(validator, %message, "Check failed");
        }
        self.results.push(ValidationResult {
            validator: validator.to_string(),
            passed,
            message,
            severity,
            details,
        });
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn finish(self) -> Vec<ValidationResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checks_accumulate() {
        let mut v = Validator::new();
        assert!(v.check_eq("sum", 4, 4));
        assert!(!v.check_eq("product", 5, 6));
        assert!(v.check_err::<(), _>("err", Err("Timeout"), |e| e.contains("Timeout")));
        v.note("info", "just saying");
        assert!(!v.all_passed());
        let results = v.finish();
        assert_eq!(results.len(), 4);
        assert_eq!(results[1].message, "expected 6, got 5");
        assert_eq!(results[3].severity, ValidationSeverity::Info);
    }
}
