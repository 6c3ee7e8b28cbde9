use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "crit",
    version,
    about = "Find contradictions across scraped documentation"
)]
pub struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chunk, pair and compare a scraped corpus, then write results, findings and a report.
    Compare {
        /// Scraper output: a JSON object of document id to {text, title} or null.
        input: PathBuf,
        #[command(flatten)]
        overrides: CompareOverrides,
    },
    /// Chunk a corpus and report how many comparisons a run would make, without calling out.
    Chunks {
        input: PathBuf,
        /// Write the chunk table as JSON.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Render an HTML report from a persisted findings file.
    Report {
        findings: PathBuf,
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct CompareOverrides {
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,
    /// Nearest neighbors per chunk for the vector strategy.
    #[arg(long)]
    pub neighbors: Option<usize>,
    #[arg(long)]
    pub workers: Option<usize>,
    /// Compare a random subset of this many pairs.
    #[arg(long)]
    pub sample: Option<usize>,
    #[arg(long = "sample-seed")]
    pub sample_seed: Option<u64>,
    /// Record failed pairs and continue instead of aborting the run.
    #[arg(long = "keep-going", action = ArgAction::SetTrue)]
    pub keep_going: bool,
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long = "output-dir")]
    pub output_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Exhaustive,
    Vector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_flags_parse() {
        let cli = Cli::try_parse_from([
            "crit",
            "--verbose",
            "compare",
            "content.json",
            "--strategy",
            "vector",
            "--neighbors",
            "3",
            "--keep-going",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Compare { input, overrides } => {
                assert_eq!(input, PathBuf::from("content.json"));
                assert_eq!(overrides.strategy, Some(StrategyArg::Vector));
                assert_eq!(overrides.neighbors, Some(3));
                assert!(overrides.keep_going);
                assert_eq!(overrides.workers, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
