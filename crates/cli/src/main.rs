mod artifacts;
mod cli;
mod config;
mod logging;
mod report;
mod run;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};
use crate::config::CritConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose || logging::env_flag());
    let mut config = CritConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Compare { input, overrides } => {
            config.apply_overrides(&overrides);
            let summary = run::compare(&config, &input)?;
            println!(
                "compared {} of {} pair(s) over {} chunk(s): {} finding(s), {} failed pair(s)",
                summary.executed,
                summary.planned,
                summary.chunks,
                summary.findings,
                summary.failures
            );
            println!(
                "tokens: {} in / {} out, estimated cost ${:.4}",
                summary.usage.input_tokens, summary.usage.output_tokens, summary.usage.cost
            );
            println!("results: {}", summary.results_path.display());
            if let Some(path) = &summary.findings_path {
                println!("findings: {}", path.display());
            }
            if let Some(path) = &summary.report_path {
                println!("report: {}", path.display());
            }
        }
        Command::Chunks { input, out } => {
            let summary = run::chunks(&config, &input, out.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Report { findings, out } => {
            let path = run::report(&config, &findings, out)?;
            println!("report: {}", path.display());
        }
    }
    Ok(())
}
