use anyhow::Result;
use clap::Parser;

use lrcost::logging::init_tracing;
use lrcost::standalone::engine::run_job;
use lrcost::standalone::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = args.command.into_config()?;
    let summary = run_job(&config).await?;

    /*  The cost line is what lands in `mr-out-*`; the summary adds the
     *  record count and what was left out.
     */
    print!("{}", summary.cost.to_line());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
