use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Port for the coordinator to listen on
    #[clap(short = 'P', long, default_value_t = 50051)]
    pub port: u16,
    /// Seconds without contact before a worker is reported dead
    #[clap(short, long, default_value_t = 15)]
    pub timeout: u64,
    /// Seconds a shard may stay assigned before its job is failed
    #[clap(long, default_value_t = 300)]
    pub task_timeout: u64,
    /// Increase logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
