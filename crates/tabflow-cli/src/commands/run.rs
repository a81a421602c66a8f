use anyhow::{Context, Result};
use serde_json::Value;

use tabflow_engine::{ConfigProvider, Orchestrator, RunOutcome};

/// Execute the `run` command: run the pipeline once and print its response.
pub async fn execute(provider: ConfigProvider, payload: Option<Value>) -> Result<()> {
    let pipeline = provider
        .get_attr("pipeline")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    tracing::debug!(
        pipeline = pipeline.as_str(),
        payload = payload.is_some(),
        "Starting pipeline run"
    );

    let outcome = tokio::task::spawn_blocking(move || -> Result<RunOutcome> {
        let orchestrator = Orchestrator::new(provider)?;
        Ok(orchestrator.execute(payload.as_ref())?)
    })
    .await
    .context("Pipeline task panicked")??;

    let stats = &outcome.stats;
    eprintln!("Pipeline '{pipeline}' completed successfully.");
    eprintln!("  Run id:          {}", outcome.run_id);
    eprintln!("  Inputs loaded:   {}", stats.inputs_loaded);
    eprintln!(
        "  Modules:         {} succeeded, {} failed",
        stats.modules_succeeded, stats.modules_failed
    );
    for status in &outcome.module_status {
        let label = if status.succeeded { "OK" } else { "FAILED" };
        eprintln!("    {:16} {label}", status.module);
    }
    eprintln!("  Outputs written: {}", stats.outputs_written);
    eprintln!("  Duration:        {:.2}s", outcome.duration_secs);

    println!("{}", serde_json::to_string_pretty(&outcome.response)?);
    Ok(())
}
