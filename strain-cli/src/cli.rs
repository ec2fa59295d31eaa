//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a stress scenario against a simulated dependency
    Run(RunArgs),

    /// Build a stress report from saved scenario results
    Report {
        /// Files holding a scenario result, a list of them, or a multi-instance run
        #[arg(required = true, value_name = "PATH")]
        inputs: Vec<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Scenario name
    pub name: String,

    /// Load profile: baseline, peak, stress, burst
    #[arg(long, value_name = "KIND", default_value = "baseline")]
    pub profile: String,

    /// Scale factor applied to rate and duration, within [0.01, 1]
    #[arg(long, value_name = "FACTOR", default_value_t = 1.0)]
    pub scale: f64,

    /// Override the profile's target requests per second
    #[arg(long, value_name = "RPS")]
    pub rps: Option<u64>,

    /// Override the profile's duration in seconds
    #[arg(long, value_name = "SECONDS")]
    pub duration: Option<f64>,

    /// Number of burst cycles (burst profile only)
    #[arg(long, value_name = "COUNT")]
    pub burst_cycles: Option<u32>,

    /// Failure to inject: timeout, error_response, connection_error, double_latency
    #[arg(long, value_name = "MODE")]
    pub failure_mode: Option<String>,

    /// Fraction of calls receiving the failure
    #[arg(long, value_name = "RATE", default_value_t = 0.1)]
    pub rate: f64,

    /// Injection seed (defaults to the configured seed)
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Dependency name (defaults to the configured dependency)
    #[arg(long, value_name = "NAME")]
    pub dependency: Option<String>,

    /// Latency of the simulated dependency in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub latency_ms: u64,

    /// Treat calls as writes (no retries unless configured)
    #[arg(long)]
    pub write: bool,

    /// Run this many independent instances concurrently
    #[arg(long, value_name = "COUNT", default_value_t = 1)]
    pub instances: usize,

    /// Emit a stress report instead of raw results
    #[arg(long)]
    pub report: bool,

    /// Report format (with --report)
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Also write the raw results as JSON to this file
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Fail unless the dependency's breaker ends in this state (closed, open, half-open)
    #[arg(long, value_name = "STATE")]
    pub expect_state: Option<String>,

    /// Fail when the error rate exceeds this value
    #[arg(long, value_name = "RATE")]
    pub max_error_rate: Option<f64>,

    /// Fail when the achieved rate is outside the configured tolerance
    #[arg(long)]
    pub check_rps: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration in use
    Show {
        /// Path to configuration file (optional, uses default loading logic)
        #[arg(long, value_name = "PATH")]
        config_file: Option<PathBuf>,

        /// Output format: yaml, json
        #[arg(long, value_name = "FORMAT", default_value = "yaml")]
        format: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "strain",
            "--log-level",
            "debug",
            "run",
            "timeout_40",
            "--profile",
            "stress",
            "--scale",
            "0.2",
            "--failure-mode",
            "timeout",
            "--rate",
            "0.4",
            "--instances",
            "2",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.name, "timeout_40");
        assert_eq!(args.profile, "stress");
        assert_eq!(args.scale, 0.2);
        assert_eq!(args.failure_mode.as_deref(), Some("timeout"));
        assert_eq!(args.rate, 0.4);
        assert_eq!(args.instances, 2);
        assert!(!args.write);
    }

    #[test]
    fn test_parse_report() {
        let cli = Cli::try_parse_from(["strain", "report", "a.json", "b.json", "--format", "markdown"])
            .unwrap();
        let Commands::Report { inputs, format } = cli.command else {
            panic!("expected report command");
        };
        assert_eq!(inputs.len(), 2);
        assert_eq!(format, OutputFormat::Markdown);
    }
}
