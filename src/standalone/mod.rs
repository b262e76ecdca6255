use std::fmt;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::JobConfig;
use crate::record::BiasColumn;
use crate::workload::DEFAULT_WORKLOAD;

pub mod engine;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job described by flags
    Submit {
        /// Glob spec for the input shards
        #[arg(short, long)]
        input: String,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// File holding the comma-separated parameter vector
        #[arg(short, long)]
        params: PathBuf,

        /// Maximum number of shards scored at once
        #[arg(short = 'n', long, default_value_t = 4)]
        workers: usize,

        /// Number of reduce buckets
        #[arg(short, long, default_value_t = 1)]
        reducers: u32,

        /// Name of the workload
        #[arg(short, long, default_value = DEFAULT_WORKLOAD)]
        workload: String,

        /// Column layout of the records against theta
        #[arg(short, long, value_enum, default_value_t = BiasColumn::Implicit)]
        bias: BiasColumn,

        /// Fail the job if any record is malformed
        #[arg(long)]
        strict: bool,
    },
    /// Run a job described by a TOML file
    Run {
        /// Path to the job file
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Commands {
    /// Builds the job configuration this command describes.
    pub fn into_config(self) -> crate::error::CostResult<JobConfig> {
        match self {
            Commands::Submit {
                input,
                output,
                params,
                workers,
                reducers,
                workload,
                bias,
                strict,
            } => Ok(JobConfig {
                input,
                output,
                params,
                workers,
                reducers,
                workload,
                bias,
                strict,
            }),
            Commands::Run { config } => JobConfig::from_toml_file(&config),
        }
    }
}

/// Stages of a job. A job only moves forward, and any stage may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Broadcast,
    Score,
    Reduce,
    Done,
    Failed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Broadcast => "Broadcast",
            JobPhase::Score => "Score",
            JobPhase::Reduce => "Reduce",
            JobPhase::Done => "Done",
            JobPhase::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_flags_become_a_config() {
        let args = Args::parse_from([
            "lrc-standalone",
            "submit",
            "-i",
            "data/*.csv",
            "-o",
            "out",
            "-p",
            "theta.csv",
            "--bias",
            "explicit",
            "--strict",
        ]);
        let config = args.command.into_config().unwrap();
        assert_eq!(config.input, "data/*.csv");
        assert_eq!(config.workers, 4);
        assert_eq!(config.bias, BiasColumn::Explicit);
        assert!(config.strict);
        assert_eq!(config.workload, "lr-cost");
    }
}
