//! Runs every scenario through the framework with reduced sizes

use bus_config::RpcConfig;
use bus_e2e_tests::scenarios::{
    self, CalculatorTest, ConcurrencyTest, ObjectManagerTest, PropertiesTest, SignalsTest, TimeoutTest,
};
use bus_e2e_tests::{report, TestConfig, TestFramework, TestScenario};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn framework() -> TestFramework {
    TestFramework::new(TestConfig {
        timeout_secs: 60,
        ..TestConfig::default()
    })
    .expect("framework")
}

async fn assert_passes(scenario: Arc<dyn TestScenario>) {
    let result = framework().run_scenario(scenario).await;
    let failed: Vec<_> = result.validation_results.iter().filter(|v| !v.passed).collect();
    assert!(
        result.success,
        "{} failed: {:?} {:?}",
        result.scenario_name, result.error_message, failed
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn calculator_scenario() {
    assert_passes(Arc::new(CalculatorTest { operations: 20 })).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_scenario() {
    assert_passes(Arc::new(TimeoutTest::default())).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrency_scenario() {
    assert_passes(Arc::new(ConcurrencyTest {
        threads: 4,
        calls_per_thread: 10,
        async_calls: 40,
        cancellers: 3,
    }))
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn properties_scenario() {
    assert_passes(Arc::new(PropertiesTest { writes: 5 })).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn object_manager_scenario() {
    assert_passes(Arc::new(ObjectManagerTest { children: 3 })).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn signals_scenario() {
    assert_passes(Arc::new(SignalsTest { signals: 20 })).await;
}

#[test]
fn scenario_names_resolve() {
    for name in scenarios::SCENARIO_NAMES {
        let scenario = scenarios::by_name(name).expect("registered");
        assert_eq!(scenario.name(), *name);
        assert!(!scenario.description().is_empty());
        assert!(scenario.timeout() > Duration::ZERO);
    }
    assert!(scenarios::by_name("throughput").is_none());
    assert_eq!(scenarios::all().len(), scenarios::SCENARIO_NAMES.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn report_counts_results_and_config_file_applies() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "method_call_timeout_ms = 5000\nasync_reply_grace_ms = 500").expect("write");
    let rpc = RpcConfig::load(Some(file.path())).expect("load");
    assert_eq!(rpc.method_call_timeout_ms, 5000);

    let framework = TestFramework::new(TestConfig {
        timeout_secs: 30,
        verbose: false,
        rpc,
    })
    .expect("framework");
    let result = framework.run_scenario(Arc::new(CalculatorTest { operations: 5 })).await;
    assert!(result.success);
    assert!(result.metrics.calls_made >= 5);

    let json = report(&[result]);
    assert_eq!(json["test_run"]["total_tests"], 1);
    assert_eq!(json["test_run"]["passed_tests"], 1);
    assert_eq!(json["results"][0]["scenario_name"], "calculator");
}
