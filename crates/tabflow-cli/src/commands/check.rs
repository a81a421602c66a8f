use anyhow::{Context, Result};
use serde_json::Value;

use tabflow_engine::config::types::StateConfig;
use tabflow_engine::resolve::create_state_backend;
use tabflow_engine::{CheckResult, ConfigProvider, Orchestrator};

/// Execute the `check` command: validate configuration, module references,
/// input files and the state backend without running anything.
pub async fn execute(provider: ConfigProvider, payload: Option<Value>) -> Result<()> {
    let result = tokio::task::spawn_blocking(move || -> Result<CheckResult> {
        // The configured backend is probed by the check itself.
        let scratch = create_state_backend(&StateConfig::default())?;
        let orchestrator = Orchestrator::with_state(provider, scratch);
        Ok(orchestrator.check(payload.as_ref()))
    })
    .await
    .context("Check task panicked")??;

    print_section("Configuration:", &result.config_errors);
    print_section("Modules:", &result.module_problems);
    let missing: Vec<String> = result
        .missing_inputs
        .iter()
        .map(|p| format!("missing {}", p.display()))
        .collect();
    print_section("Input files:", &missing);
    if result.state_ok {
        println!("{:18} OK", "State backend:");
    } else {
        println!("{:18} FAILED", "State backend:");
    }

    if result.is_ok() {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn print_section(label: &str, problems: &[String]) {
    if problems.is_empty() {
        println!("{label:18} OK");
        return;
    }
    println!("{label:18} FAILED");
    for problem in problems {
        for line in problem.lines() {
            println!("  {line}");
        }
    }
}
