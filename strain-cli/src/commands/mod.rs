//! Subcommand handlers

pub mod config;
pub mod report;
pub mod run;

use anyhow::Result;
use strain_harness::StressReport;

use crate::cli::OutputFormat;

/// Print a report to stdout in the requested format
pub fn print_report(report: &StressReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Markdown => print!("{}", report.to_markdown()),
    }
    Ok(())
}
