//! End-to-end test scenarios

pub mod calculator;
pub mod concurrency;
pub mod object_manager;
pub mod properties;
pub mod signals;
pub mod timeouts;

pub use calculator::CalculatorTest;
pub use concurrency::ConcurrencyTest;
pub use object_manager::ObjectManagerTest;
pub use properties::PropertiesTest;
pub use signals::SignalsTest;
pub use timeouts::TimeoutTest;

use crate::framework::TestScenario;
use std::sync::Arc;

/// Names accepted by [`by_name`], in run order
pub const SCENARIO_NAMES: &[&str] = &[
    "calculator",
    "timeouts",
    "concurrency",
    "properties",
    "object-manager",
    "signals",
];

/// Scenario with default parameters
pub fn by_name(name: &str) -> Option<Arc<dyn TestScenario>> {
    let scenario: Arc<dyn TestScenario> = match name {
        "calculator" => Arc::new(CalculatorTest::default()),
        "timeouts" => Arc::new(TimeoutTest::default()),
        "concurrency" => Arc::new(ConcurrencyTest::default()),
        "properties" => Arc::new(PropertiesTest::default()),
        "object-manager" | "object_manager" => Arc::new(ObjectManagerTest::default()),
        "signals" => Arc::new(SignalsTest::default()),
        _ => return None,
    };
    Some(scenario)
}

pub fn all() -> Vec<Arc<dyn TestScenario>> {
    SCENARIO_NAMES.iter().filter_map(|name| by_name(name)).collect()
}
