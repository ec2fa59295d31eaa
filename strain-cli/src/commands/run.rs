//! `strain run`: execute a scenario and check its outcome

use anyhow::{bail, Context, Result};
use std::fs;
use std::time::Duration;
use strain_config::HarnessConfig;
use strain_harness::{
    check_breaker_state, check_invariants, check_max_error_rate, check_rps_tolerance,
    DivergenceAnalyzer, FailDiagnostic, InjectionConfig, LoadProfile, MultiInstanceRun,
    ProfileKind, ReportGenerator, ScenarioRunner, SimulatedDependency,
};
use strain_resilience::{CircuitState, FaultInjector};
use tracing::{error, info};

use crate::cli::{OutputFormat, RunArgs};
use crate::commands::print_report;

pub async fn run_command(config: &HarnessConfig, args: &RunArgs) -> Result<()> {
    let profile = build_profile(args)?;
    let dependency = args
        .dependency
        .clone()
        .unwrap_or_else(|| config.injection.default_dependency.clone());
    let injection = build_injection(config, args, &dependency)?;
    let expected_state = args.expect_state.as_deref().map(parse_state).transpose()?;

    let target = SimulatedDependency::with_latency(Duration::from_millis(args.latency_ms));
    let runner = ScenarioRunner::from_config(config, FaultInjector::new(), target.into_call());

    info!(
        scenario = %args.name,
        profile = %profile.kind,
        rps = profile.scaled_rps(),
        instances = args.instances,
        "Starting run"
    );

    let (results, mut diagnostics, raw) = if args.instances > 1 {
        let Some(injection) = injection.as_ref() else {
            bail!("--instances greater than 1 requires --failure-mode");
        };
        let run = runner
            .run_multi_instance_scenario(&args.name, &profile, injection, args.instances)
            .await
            .with_context(|| format!("Scenario '{}' could not run", args.name))?;
        let diagnostics = instance_failures(&args.name, injection, &run);
        let raw = serde_json::to_string_pretty(&run).context("Failed to serialize results")?;
        (run.results, diagnostics, raw)
    } else {
        let result = runner
            .run_scenario(&args.name, &profile, injection.as_ref(), &dependency, args.write)
            .await
            .with_context(|| format!("Scenario '{}' could not run", args.name))?;
        let raw = serde_json::to_string_pretty(&result).context("Failed to serialize results")?;
        (vec![result], Vec::new(), raw)
    };

    for result in &results {
        diagnostics.extend(check_invariants(result));
        if let Some(state) = expected_state {
            diagnostics.extend(check_breaker_state(result, state).err());
        }
        if let Some(max_error_rate) = args.max_error_rate {
            diagnostics.extend(check_max_error_rate(result, max_error_rate).err());
        }
        if args.check_rps {
            diagnostics.extend(check_rps_tolerance(result, config.load.rps_tolerance).err());
        }
    }

    if let Some(path) = &args.output {
        fs::write(path, &raw).with_context(|| format!("Failed to write results to {:?}", path))?;
        info!("Results written to {:?}", path);
    }

    if args.report {
        let divergences = DivergenceAnalyzer::from_config(config).analyze(&results);
        let report = ReportGenerator::from_config(config).generate(results, Some(divergences));
        print_report(&report, args.format)?;
    } else if args.format == OutputFormat::Markdown {
        bail!("--format markdown requires --report");
    } else {
        println!("{}", raw);
    }

    report_diagnostics(&diagnostics)
}

fn build_profile(args: &RunArgs) -> Result<LoadProfile> {
    let kind: ProfileKind = args.profile.parse()?;
    let mut profile = LoadProfile::preset(kind);
    if let Some(rps) = args.rps {
        profile.target_rps = rps;
    }
    if let Some(duration) = args.duration {
        profile.duration_seconds = duration;
    }
    if let Some(cycles) = args.burst_cycles {
        profile = profile.with_burst_cycles(cycles)?;
    }
    Ok(profile.with_scale(args.scale)?)
}

fn build_injection(
    config: &HarnessConfig,
    args: &RunArgs,
    dependency: &str,
) -> Result<Option<InjectionConfig>> {
    let Some(mode) = &args.failure_mode else {
        return Ok(None);
    };
    let injection = InjectionConfig::new(
        InjectionConfig::parse_mode(mode)?,
        args.rate,
        dependency,
        args.seed.unwrap_or(config.injection.default_seed),
    )?;
    Ok(Some(injection))
}

fn parse_state(state: &str) -> Result<CircuitState> {
    match state.to_lowercase().as_str() {
        "closed" => Ok(CircuitState::Closed),
        "open" => Ok(CircuitState::Open),
        "half-open" | "half_open" | "halfopen" => Ok(CircuitState::HalfOpen),
        other => bail!("Unknown breaker state: {}. Valid states: closed, open, half-open", other),
    }
}

fn instance_failures(
    name: &str,
    injection: &InjectionConfig,
    run: &MultiInstanceRun,
) -> Vec<FailDiagnostic> {
    run.failures
        .iter()
        .map(|failure| FailDiagnostic {
            scenario_id: format!("{}#{}", name, failure.instance),
            dependency: injection.target_dependency.clone(),
            outcome: "instance_failed".to_string(),
            observed: failure.error.clone(),
            expected: "instance completes".to_string(),
            seed: Some(injection.seed.wrapping_add(failure.instance as u64)),
        })
        .collect()
}

fn report_diagnostics(diagnostics: &[FailDiagnostic]) -> Result<()> {
    if diagnostics.is_empty() {
        return Ok(());
    }
    for diagnostic in diagnostics {
        error!(outcome = %diagnostic.outcome, "{}", diagnostic);
        eprintln!("{}", diagnostic);
    }
    bail!("{} check(s) failed", diagnostics.len())
}
