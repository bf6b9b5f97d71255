//! End-to-End Test Runner for the bus RPC runtime

use anyhow::{bail, Context, Result};
use bus_config::{init_logging, RpcConfig};
use bus_e2e_tests::{report, scenarios, TestConfig, TestFramework, TestResult};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario to run: calculator, timeouts, concurrency, properties,
    /// object-manager, signals, or all
    #[arg(short, long, default_value = "all")]
    scenario: String,

    /// Upper bound per scenario, in seconds
    #[arg(short, long, default_value_t = 120)]
    timeout: u64,

    /// Runtime config file (TOML); `BUSRPC_*` variables still apply
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write the JSON report to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug logging for the runtime
    #[arg(short, long)]
    verbose: bool,

    /// List scenario names and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list {
        for name in scenarios::SCENARIO_NAMES {
            println!("{name}");
        }
        return Ok(());
    }

    let mut rpc = RpcConfig::load(args.config.as_deref()).context("Failed to load runtime config")?;
    if args.verbose {
        rpc.logging.level = "debug".to_string();
    }
    init_logging(&rpc.logging)?;

    info!("Starting bus RPC E2E suite");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let selected = match args.scenario.as_str() {
        "all" => scenarios::all(),
        name => match scenarios::by_name(name) {
            Some(scenario) => vec![scenario],
            None => {
                error!("Unknown test scenario: {}", name);
                bail!(
                    "unknown scenario '{name}', expected one of: {}",
                    scenarios::SCENARIO_NAMES.join(", ")
                );
            }
        },
    };

    let framework = TestFramework::new(TestConfig {
        timeout_secs: args.timeout,
        verbose: args.verbose,
        rpc,
    })?;

    let mut results = Vec::with_capacity(selected.len());
    for scenario in selected {
        results.push(framework.run_scenario(scenario).await);
    }

    print_results_summary(&results);

    let json = serde_json::to_string_pretty(&report(&results))?;
    println!("{json}");
    if let Some(path) = &args.output {
        tokio::fs::write(path, &json)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Results saved to: {}", path.display());
    }

    if !results.iter().all(|r| r.success) {
        error!("Some tests failed");
        std::process::exit(1);
    }
    info!("All tests passed successfully!");
    Ok(())
}

fn print_results_summary(results: &[TestResult]) {
    let passed = results.iter().filter(|r| r.success).count();
    eprintln!("\n═══════════════════════════════════════");
    eprintln!("        TEST RESULTS SUMMARY");
    eprintln!("═══════════════════════════════════════");
    eprintln!("Total Tests: {}", results.len());
    eprintln!("Passed:      {} ✓", passed);
    eprintln!("Failed:      {} ✗", results.len() - passed);
    eprintln!();

    for result in results {
        let status = if result.success { "✓ PASS" } else { "✗ FAIL" };
        eprintln!("{} {} ({} ms)", status, result.scenario_name, result.duration_ms);
        if let Some(error) = &result.error_message {
            eprintln!("      Error: {}", error);
        }
        eprintln!(
            "      Calls: {} | Avg: {} µs | Max: {} µs | Signals: {}",
            result.metrics.calls_made,
            result.metrics.avg_call_latency_us,
            result.metrics.max_call_latency_us,
            result.metrics.signals_received
        );
        for failed in result.validation_results.iter().filter(|v| !v.passed) {
            eprintln!("        - {}: {}", failed.validator, failed.message);
        }
    }
    eprintln!("═══════════════════════════════════════");
}
