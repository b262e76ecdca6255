use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use dashmap::DashMap;
use itertools::Itertools;
use serde::Serialize;
use std::{fs, sync::Arc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::aggregate::{AggregateCost, CostKey, GlobalReducer};
use crate::config::JobConfig;
use crate::params::Broadcast;
use crate::standalone::JobPhase;
use crate::*;

// types related to this engine
type BucketIndex = u32;
pub type Buckets = DashMap<BucketIndex, Vec<KeyValue>>;

/// What one shard produced: its (possibly combined) pairs and the records
/// that were left out.
#[derive(Debug, Default)]
pub struct ShardOutput {
    pub shard: String,
    pub pairs: Vec<KeyValue>,
    pub malformed: Vec<MalformedRecord>,
}

/// Everything the map phase hands to the reduce phase.
pub struct MapResult {
    pub buckets: Buckets,
    pub malformed: Vec<MalformedRecord>,
    pub shards: usize,
}

/// The outcome of a finished job, also written to `summary.json`.
#[derive(Clone, Debug, Serialize)]
pub struct JobSummary {
    pub cost: AggregateCost,
    pub mean_squared_error: Option<f64>,
    pub finite: bool,
    pub shards: usize,
    pub malformed: usize,
    #[serde(skip)]
    pub malformed_records: Vec<MalformedRecord>,
}

/// Sorts pairs by key and applies `reduce_fn` to every key group.
pub fn group_reduce(reduce_fn: ReduceFn, mut pairs: Vec<KeyValue>) -> Result<Vec<KeyValue>> {
    pairs.sort_unstable_by_key(KeyValue::key);
    let mut out = Vec::new();
    for (key, value_group) in &pairs.into_iter().chunk_by(KeyValue::key) {
        let iter = value_group.map(KeyValue::into_value);
        let value = reduce_fn(key.clone(), Box::new(iter))?;
        out.push(KeyValue::new(key, value));
    }
    Ok(out)
}

/// Scores one shard: map every record, isolate the malformed ones, and run
/// the workload's combiner over what is left.
pub fn score_shard(shard: &str, contents: Bytes, workload: &Workload, ctx: &MapContext) -> Result<ShardOutput> {
    let input_kv = KeyValue::new(Bytes::from(shard.to_string()), contents);
    let map_func = workload.map_fn;

    let mut pairs = Vec::new();
    let mut malformed = Vec::new();
    for item in map_func(input_kv, ctx).with_context(|| format!("mapping shard {shard}"))? {
        match item {
            Ok(kv) => pairs.push(kv),
            Err(err) => match err.downcast_ref::<CostError>().and_then(MalformedRecord::from_error) {
                Some(report) => {
                    warn!(%report, "Skipping malformed record");
                    malformed.push(report);
                }
                None => return Err(err.context(format!("scoring shard {shard}"))),
            },
        }
    }

    let emitted = pairs.len();
    if let Some(combine_fn) = workload.combine_fn {
        pairs = group_reduce(combine_fn, pairs)?;
    }
    debug!(shard, emitted, sent = pairs.len(), malformed = malformed.len(), "Scored shard");

    Ok(ShardOutput {
        shard: shard.to_string(),
        pairs,
        malformed,
    })
}

/// Puts each pair into bucket `ihash(key) % num_reduce_worker`.
pub fn bucket_pairs(buckets: &Buckets, pairs: Vec<KeyValue>, num_reduce_worker: u32) {
    for kv in pairs {
        let bucket_no = ihash(&kv.key) % num_reduce_worker;
        buckets.entry(bucket_no).or_default().push(kv);
    }
}

/// Scores every input shard, at most `config.workers` at a time.
pub async fn perform_map(config: &JobConfig, workload: Workload, ctx: MapContext) -> Result<MapResult> {
    let shards = config.resolve_shards()?;
    let buckets = Arc::new(Buckets::new());
    let permits = Arc::new(Semaphore::new(config.workers));
    let num_reduce_worker = config.reducers;

    let mut tasks = JoinSet::new();
    for pathspec in shards.iter().cloned() {
        let permit = permits.clone().acquire_owned().await?;
        let buckets = buckets.clone();
        let ctx = ctx.clone();
        tasks.spawn_blocking(move || -> Result<Vec<MalformedRecord>> {
            let _permit = permit;
            let shard = pathspec.display().to_string();
            let contents = fs::read(&pathspec).with_context(|| format!("reading shard {shard}"))?;
            let output = score_shard(&shard, Bytes::from(contents), &workload, &ctx)?;
            bucket_pairs(&buckets, output.pairs, num_reduce_worker);
            Ok(output.malformed)
        });
    }

    let mut malformed = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        malformed.extend(joined.context("shard task panicked")??);
    }
    malformed.sort_by(|a, b| (&a.shard, a.line).cmp(&(&b.shard, b.line)));

    let buckets = Arc::try_unwrap(buckets).map_err(|_| anyhow!("buckets still shared after map phase"))?;
    Ok(MapResult {
        buckets,
        malformed,
        shards: shards.len(),
    })
}

/// Reduces every bucket into `mr-out-<bucket>` and returns the job's cost.
pub fn perform_reduce(config: &JobConfig, workload: &Workload, buckets: Buckets) -> Result<AggregateCost> {
    let output_dir = &config.output;
    fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;

    let mut buckets = buckets.into_iter().collect::<Vec<_>>();
    buckets.sort_unstable_by_key(|(reduce_id, _)| *reduce_id);
    // a job without records still reports a cost
    if buckets.is_empty() {
        let reduce_id = ihash(&CostKey::Total.to_bytes()) % config.reducers;
        buckets.push((reduce_id, Vec::new()));
    }

    let mut total = GlobalReducer::new();
    for (reduce_id, bkt) in buckets {
        let mut reducer = GlobalReducer::new();
        for kv in group_reduce(workload.reduce_fn, bkt)? {
            reducer.absorb_encoded(&kv.key, kv.value)?;
        }
        let mut content = String::new();
        for cost in reducer.results() {
            content.push_str(&cost.to_line());
        }
        if content.is_empty() {
            content = GlobalReducer::new().finish().to_line();
        }
        let out_pathspec = output_dir.join(format!("mr-out-{reduce_id}"));
        fs::write(&out_pathspec, content).with_context(|| format!("writing {}", out_pathspec.display()))?;
        total.merge(reducer);
    }
    Ok(total.finish())
}

/// Fails the job in strict mode when any record was left out.
pub fn check_strict(config: &JobConfig, malformed: &[MalformedRecord]) -> Result<()> {
    if config.strict && !malformed.is_empty() {
        write_malformed(config, malformed)?;
        return Err(CostError::Rejected {
            malformed: malformed.len() as u64,
        }
        .into());
    }
    Ok(())
}

fn write_malformed(config: &JobConfig, malformed: &[MalformedRecord]) -> Result<()> {
    fs::create_dir_all(&config.output)?;
    let mut content = String::new();
    for report in malformed {
        content.push_str(&serde_json::to_string(report)?);
        content.push('\n');
    }
    let path = config.output.join("malformed.jsonl");
    fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Writes the malformed report and `summary.json` next to the cost.
pub fn publish(config: &JobConfig, cost: AggregateCost, shards: usize, malformed: Vec<MalformedRecord>) -> Result<JobSummary> {
    if !malformed.is_empty() {
        write_malformed(config, &malformed)?;
        warn!(count = malformed.len(), "Malformed records were left out of the cost");
    }
    if !cost.is_finite() {
        warn!(total = cost.total, "Cost is not finite");
    }
    let summary = JobSummary {
        cost,
        mean_squared_error: cost.mean_squared_error(),
        finite: cost.is_finite(),
        shards,
        malformed: malformed.len(),
        malformed_records: malformed,
    };
    let path = config.output.join("summary.json");
    fs::write(&path, serde_json::to_string_pretty(&summary)?).with_context(|| format!("writing {}", path.display()))?;
    Ok(summary)
}

/// Runs a whole job in this process: broadcast, score, reduce.
pub async fn run_job(config: &JobConfig) -> Result<JobSummary> {
    match drive(config).await {
        Ok(summary) => {
            info!(phase = %JobPhase::Done, total = summary.cost.total, records = summary.cost.records, "Job finished");
            Ok(summary)
        }
        Err(err) => {
            error!(phase = %JobPhase::Failed, "Job failed: {err:#}");
            Err(err)
        }
    }
}

async fn drive(config: &JobConfig) -> Result<JobSummary> {
    info!(phase = %JobPhase::Broadcast, params = %config.params.display(), "Starting job");
    config.validate()?;
    let workload = workload::named(&config.workload)?;
    let broadcast = Broadcast::load(&config.params)?;
    let ctx = MapContext::new(broadcast.params(), config.bias);

    info!(phase = %JobPhase::Score, input = %config.input, workers = config.workers, "Scoring shards");
    let mapped = perform_map(config, workload, ctx).await?;
    check_strict(config, &mapped.malformed)?;

    info!(phase = %JobPhase::Reduce, shards = mapped.shards, "Reducing partial costs");
    let cost = perform_reduce(config, &workload, mapped.buckets)?;
    publish(config, cost, mapped.shards, mapped.malformed)
}
