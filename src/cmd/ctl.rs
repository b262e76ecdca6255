use clap::{Parser, Subcommand};

use crate::record::BiasColumn;
use crate::workload::DEFAULT_WORKLOAD;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
    /// Coordinator address, `127.0.0.1:50051` if not given
    #[clap(short = 'J', long)]
    pub host: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a job to the cluster
    Submit {
        /// Glob spec for the input shards, as seen by the coordinator and workers
        #[arg(short, long)]
        input: String,

        /// Output directory
        #[arg(short, long)]
        output: String,

        /// File holding the comma-separated parameter vector
        #[arg(short, long)]
        params: String,

        /// Name of the workload
        #[arg(short, long, default_value = DEFAULT_WORKLOAD)]
        workload: String,

        /// Column layout of the records against theta
        #[arg(short, long, value_enum, default_value_t = BiasColumn::Implicit)]
        bias: BiasColumn,

        /// Number of reduce buckets
        #[arg(short, long, default_value_t = 1)]
        reducers: u32,

        /// Fail the job if any record is malformed
        #[arg(long)]
        strict: bool,
    },
    /// Lists all jobs that have been submitted to the system and their statuses
    ///
    /// Statuses include: Score, Reduce, Done or Failed.
    Jobs {
        /// Which jobs to show.
        /// Valid arguments: complete, all, default (non-completed)
        #[arg(short, long, default_value = None)]
        show: Option<String>,
    },
    /// Displays the health status of the system, showing how many workers
    /// are registered and what the coordinator is working on.
    Status {},
}
