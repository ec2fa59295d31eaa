//! `strain report`: aggregate saved scenario results

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use strain_config::HarnessConfig;
use strain_harness::{DivergenceAnalyzer, MultiInstanceRun, ReportGenerator, ScenarioResult};
use tracing::info;

use crate::cli::OutputFormat;
use crate::commands::print_report;

pub fn report_command(config: &HarnessConfig, inputs: &[PathBuf], format: OutputFormat) -> Result<()> {
    let mut results = Vec::new();
    for path in inputs {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read results from {:?}", path))?;
        let parsed = parse_results(&content)
            .with_context(|| format!("Failed to parse results in {:?}", path))?;
        info!("Loaded {} result(s) from {:?}", parsed.len(), path);
        results.extend(parsed);
    }

    let divergences = DivergenceAnalyzer::from_config(config).analyze(&results);
    let report = ReportGenerator::from_config(config).generate(results, Some(divergences));
    print_report(&report, format)
}

/// Accepts a single result, a list of results, or anything carrying a
/// `results` list (multi-instance runs and earlier reports)
pub fn parse_results(content: &str) -> Result<Vec<ScenarioResult>> {
    let value: Value = serde_json::from_str(content)?;
    let is_run = value
        .as_object()
        .is_some_and(|map| map.contains_key("results") && !map.contains_key("load_result"));

    let results = if value.is_array() {
        serde_json::from_value(value)?
    } else if is_run {
        serde_json::from_value::<MultiInstanceRun>(value)?.results
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(results)
}
