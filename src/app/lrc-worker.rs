use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::Parser;
use tokio::time::sleep;
use tonic::transport::Channel;
use tonic::{Code, Request};
use tracing::{debug, error, info, warn};

use lrcost::cmd::worker::Args;
use lrcost::logging::init_tracing;
use lrcost::params::Broadcast;
use lrcost::record::BiasColumn;
use lrcost::rpc::coordinator_client::CoordinatorClient;
use lrcost::rpc::{Malformed, Pair, ParameterRequest, Task, WorkerRegistration, WorkerReport, WorkerRequest};
use lrcost::standalone::engine::{score_shard, ShardOutput};
use lrcost::*;

type Client = CoordinatorClient<Channel>;

/// Fetches the job's broadcast unless the cached one already matches.
async fn broadcast_for(client: &mut Client, cache: &mut Option<(String, Broadcast)>, task: &Task) -> Result<Broadcast> {
    if let Some((job_id, broadcast)) = cache.as_ref() {
        if *job_id == task.job_id && broadcast.fingerprint() == task.fingerprint {
            return Ok(broadcast.clone());
        }
    }

    let blob = client
        .get_parameters(Request::new(ParameterRequest {
            job_id: task.job_id.clone(),
        }))
        .await
        .context("fetching parameters")?
        .into_inner();
    let broadcast = Broadcast::verify(Bytes::from(blob.payload), task.fingerprint, &task.job_id)?;
    info!(job = %task.job_id, width = broadcast.params().len(), "Received parameter broadcast");
    *cache = Some((task.job_id.clone(), broadcast.clone()));
    Ok(broadcast)
}

async fn score(client: &mut Client, cache: &mut Option<(String, Broadcast)>, task: &Task) -> Result<ShardOutput> {
    let broadcast = broadcast_for(client, cache, task).await?;
    let workload = workload::named(&task.workload)?;
    let bias = BiasColumn::parse(&task.bias).ok_or_else(|| anyhow!("unknown bias column `{}`", task.bias))?;
    let ctx = MapContext::new(broadcast.params(), bias);

    let contents = tokio::fs::read(&task.shard)
        .await
        .with_context(|| format!("reading shard {}", task.shard))?;
    let shard = task.shard.clone();
    tokio::task::spawn_blocking(move || score_shard(&shard, Bytes::from(contents), &workload, &ctx))
        .await
        .context("scoring task panicked")?
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let poll = Duration::from_millis(args.poll_ms);

    // Connect to coordinator
    let mut client = CoordinatorClient::connect(format!("http://{}", args.join))
        .await
        .with_context(|| format!("connecting to coordinator at {}", args.join))?;

    // Register with coordinator
    let worker_id = client
        .register_worker(Request::new(WorkerRegistration {}))
        .await?
        .into_inner()
        .worker_id;
    info!(worker = %worker_id, coordinator = %args.join, "Worker registered");

    let mut cache: Option<(String, Broadcast)> = None;
    loop {
        match client
            .get_task(Request::new(WorkerRequest {
                worker_id: worker_id.clone(),
            }))
            .await
        {
            Ok(response) => {
                let task = response.into_inner();
                debug!(job = %task.job_id, shard = %task.shard, "Received task");

                let mut report = WorkerReport {
                    worker_id: worker_id.clone(),
                    job_id: task.job_id.clone(),
                    shard: task.shard.clone(),
                    ..Default::default()
                };
                match score(&mut client, &mut cache, &task).await {
                    Ok(output) => {
                        report.partials = output.pairs.into_iter().map(Pair::from).collect();
                        report.malformed = output.malformed.into_iter().map(Malformed::from).collect();
                    }
                    Err(err) => {
                        error!(shard = %task.shard, "Could not score shard: {err:#}");
                        report.error = format!("{err:#}");
                    }
                }

                if let Err(status) = client.report_task(Request::new(report)).await {
                    warn!(shard = %task.shard, "Error reporting task: {}", status.message());
                }
                // Ask for the next shard straight away
                continue;
            }
            Err(status) if status.code() == Code::NotFound => debug!("Waiting for tasks..."),
            Err(status) => warn!("Error receiving task: {}", status.message()),
        }

        sleep(poll).await;
    }
}
