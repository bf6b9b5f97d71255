//! Core E2E testing framework

use crate::validation::{ValidationResult, ValidationSeverity};
use anyhow::{Context, Result};
use bus_config::RpcConfig;
use bus_rpc::Connection;
use bus_transport::MemoryBus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

/// Main test framework coordinator
pub struct TestFramework {
    config: TestConfig,
    test_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    /// Upper bound for one scenario, in seconds
    pub timeout_secs: u64,

    /// Enable detailed logging
    pub verbose: bool,

    /// Runtime settings every scenario connection uses
    pub rpc: RpcConfig,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            verbose: false,
            rpc: RpcConfig::default(),
        }
    }
}

/// One named end-to-end scenario
///
/// `execute` runs on a blocking thread and may block freely; it returns the
/// checks it made, and fails only when the scenario could not run at all.
pub trait TestScenario: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn execute(&self, ctx: &ScenarioContext) -> Result<Vec<ValidationResult>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub metrics: TestMetrics,
    pub validation_results: Vec<ValidationResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestMetrics {
    pub calls_made: u64,
    pub signals_received: u64,
    pub avg_call_latency_us: u64,
    pub max_call_latency_us: u64,
}

/// Counters shared by everything a scenario runs
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    calls: AtomicU64,
    signals: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

impl MetricsRecorder {
    pub fn record_call(&self, latency: Duration) {
        let micros = latency.as_micros() as u64;
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
        self.max_latency_us.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn record_signal(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TestMetrics {
        let calls = self.calls.load(Ordering::Relaxed);
        TestMetrics {
            calls_made: calls,
            signals_received: self.signals.load(Ordering::Relaxed),
            avg_call_latency_us: self
                .total_latency_us
                .load(Ordering::Relaxed)
                .checked_div(calls)
                .unwrap_or(0),
            max_call_latency_us: self.max_latency_us.load(Ordering::Relaxed),
        }
    }
}

/// Bus and settings handed to a running scenario
pub struct ScenarioContext {
    bus: Arc<MemoryBus>,
    rpc: RpcConfig,
    metrics: Arc<MetricsRecorder>,
}

impl ScenarioContext {
    pub fn new(name: &str, rpc: RpcConfig) -> Self {
        Self {
            bus: MemoryBus::named(name),
            rpc,
            metrics: Arc::new(MetricsRecorder::default()),
        }
    }

    /// New connection on this scenario's bus
    pub fn connect(&self) -> Result<Connection> {
        self.connect_with(self.rpc.clone())
    }

    pub fn connect_with(&self, rpc: RpcConfig) -> Result<Connection> {
        let transport = self
            .bus
            .connect()
            .with_context(|| format!("Failed to connect to bus {}", self.bus.name()))?;
        Ok(Connection::with_transport(Arc::new(transport), rpc))
    }

    pub fn rpc_config(&self) -> &RpcConfig {
        &self.rpc
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Run `call`, recording its latency
    pub fn timed<T>(&self, call: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = call();
        self.metrics.record_call(started.elapsed());
        out
    }
}

impl TestFramework {
    pub fn new(config: TestConfig) -> Result<Self> {
        config.rpc.validate().context("Invalid runtime configuration")?;
        Ok(Self {
            config,
            test_id: Uuid::new_v4(),
        })
    }

    /// Run a complete test scenario on its own bus
    pub async fn run_scenario(&self, scenario: Arc<dyn TestScenario>) -> TestResult {
        info!(scenario = scenario.name(), test_id = %self.test_id, "Starting test scenario");
        info!("Description: {}", scenario.description());

        let start_time = Instant::now();
        let name = scenario.name().to_string();
        let bus_name = format!("e2e-{}-{}", name, self.test_id.simple());
        let ctx = Arc::new(ScenarioContext::new(&bus_name, self.config.rpc.clone()));
        let limit = scenario.timeout().min(Duration::from_secs(self.config.timeout_secs));

        let task_ctx = Arc::clone(&ctx);
        let task = tokio::task::spawn_blocking(move || scenario.execute(&task_ctx));
        let outcome = tokio::time::timeout(limit, task).await;

        let (validation_results, error_message) = match outcome {
            Ok(Ok(Ok(results))) => (results, None),
            Ok(Ok(Err(e))) => {
                error!(scenario = %name, error = %e, "Test execution failed");
                (vec![], Some(format!("Execution failed: {e:#}")))
            }
            Ok(Err(e)) => {
                error!(scenario = %name, error = %e, "Scenario thread panicked");
                (vec![], Some(format!("Scenario panicked: {e}")))
            }
            Err(_) => {
                error!(scenario = %name, "Test execution timed out");
                (vec![], Some(format!("Timed out after {limit:?}")))
            }
        };

        let success = error_message.is_none()
            && validation_results
                .iter()
                .all(|v| v.passed || v.severity == ValidationSeverity::Info);
        let result = TestResult {
            scenario_name: name,
            success,
            duration_ms: start_time.elapsed().as_millis() as u64,
            error_message,
            metrics: ctx.metrics.snapshot(),
            validation_results,
        };
        info!(
            scenario = %result.scenario_name,
            success = result.success,
            duration_ms = result.duration_ms,
            "Test scenario completed"
        );
        result
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn test_id(&self) -> Uuid {
        self.test_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_average_and_max() {
        let recorder = MetricsRecorder::default();
        recorder.record_call(Duration::from_micros(100));
        recorder.record_call(Duration::from_micros(300));
        recorder.record_signal();
        let metrics = recorder.snapshot();
        assert_eq!(metrics.calls_made, 2);
        assert_eq!(metrics.avg_call_latency_us, 200);
        assert_eq!(metrics.max_call_latency_us, 300);
        assert_eq!(metrics.signals_received, 1);
    }

    #[test]
    fn test_invalid_runtime_config_rejected() {
        let mut config = TestConfig::default();
        config.rpc.worker_threads = 0;
        assert!(TestFramework::new(config).is_err());
    }
}
