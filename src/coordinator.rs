//! Job bookkeeping for the cluster coordinator.
//!
//! A job's shards move `Pending -> Assigned -> Done`, and a shard is never
//! handed out twice. A job leaves the queue once every shard is done or as
//! soon as it fails. The caller runs [`Job::finalize`] outside any lock and
//! hands the job back through [`JobBook::complete`].
//!
//! Workers do not heartbeat while scoring. A shard assigned for longer than
//! the task timeout fails its job.

use std::collections::{HashMap, VecDeque};

use tonic::Status;
use tracing::{debug, error, info, warn};

use crate::config::JobConfig;
use crate::error::CostResult;
use crate::params::Broadcast;
use crate::rpc::{cost_text, JobInfo, ParameterBlob, Task, WorkerReport};
use crate::standalone::engine::{self, Buckets, JobSummary};
use crate::standalone::JobPhase;
use crate::{workload, KeyValue, MalformedRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum ShardState {
    Pending,
    Assigned { worker: String, since: u128 },
    Done,
}

/// A submitted job. The broadcast is loaded once at submission; every worker
/// fetches the same payload before scoring one of its shards.
#[derive(Debug)]
pub struct Job {
    id: String,
    status: JobPhase,
    config: JobConfig,
    broadcast: Broadcast,
    shards: Vec<String>,
    shard_status: HashMap<String, ShardState>,
    partials: Vec<KeyValue>,
    malformed: Vec<MalformedRecord>,
    summary: Option<JobSummary>,
    failure: Option<String>,
}

impl Job {
    /// Resolves everything a job needs before any worker sees it.
    pub fn prepare(id: impl Into<String>, config: JobConfig) -> CostResult<Self> {
        config.validate()?;
        let shards: Vec<String> = config
            .resolve_shards()?
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let broadcast = Broadcast::load(&config.params)?;
        Ok(Self {
            id: id.into(),
            status: JobPhase::Score,
            config,
            broadcast,
            shard_status: shards.iter().map(|s| (s.clone(), ShardState::Pending)).collect(),
            shards,
            partials: Vec::new(),
            malformed: Vec::new(),
            summary: None,
            failure: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> JobPhase {
        self.status
    }

    pub fn shards(&self) -> &[String] {
        &self.shards
    }

    pub fn shard_state(&self, shard: &str) -> Option<&ShardState> {
        self.shard_status.get(shard)
    }

    pub fn summary(&self) -> Option<&JobSummary> {
        self.summary.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn shards_done(&self) -> usize {
        self.shard_status.values().filter(|s| **s == ShardState::Done).count()
    }

    fn is_settled(&self) -> bool {
        self.status == JobPhase::Failed || self.shards_done() == self.shards.len()
    }

    fn fail(&mut self, reason: String) {
        error!(job = %self.id, "Job failed: {reason}");
        self.status = JobPhase::Failed;
        self.failure = Some(reason);
    }

    /// Hands the next pending shard to `worker`.
    pub fn assign(&mut self, worker: &str, at: u128) -> Option<Task> {
        if self.status != JobPhase::Score {
            return None;
        }
        let shard = self
            .shards
            .iter()
            .find(|shard| self.shard_status.get(*shard) == Some(&ShardState::Pending))?
            .clone();
        self.shard_status.insert(
            shard.clone(),
            ShardState::Assigned {
                worker: worker.to_string(),
                since: at,
            },
        );
        debug!(job = %self.id, %worker, %shard, "Assigned shard");
        Some(Task {
            job_id: self.id.clone(),
            shard,
            workload: self.config.workload.clone(),
            bias: self.config.bias.as_str().to_string(),
            fingerprint: self.broadcast.fingerprint(),
        })
    }

    /// Takes a worker's report for one assigned shard.
    ///
    /// A report naming an error fails the whole job.
    pub fn accept(&mut self, report: WorkerReport, at: u128) -> Result<(), Status> {
        match self.shard_status.get(&report.shard) {
            Some(ShardState::Assigned { worker, since }) => {
                if *worker != report.worker_id {
                    warn!(shard = %report.shard, assigned = %worker, reported = %report.worker_id, "Report from another worker");
                }
                debug!(shard = %report.shard, elapsed_ms = at.saturating_sub(*since) / 1_000_000, "Shard reported");
            }
            Some(_) => {
                return Err(Status::already_exists(format!(
                    "Shard {} is not awaiting a report",
                    report.shard
                )))
            }
            None => return Err(Status::invalid_argument(format!("Unknown shard {}", report.shard))),
        }

        if report.error.is_empty() {
            self.partials.extend(report.partials.into_iter().map(KeyValue::from));
            self.malformed.extend(report.malformed.into_iter().map(MalformedRecord::from));
            self.shard_status.insert(report.shard, ShardState::Done);
        } else {
            self.fail(format!("shard {}: {}", report.shard, report.error));
        }
        Ok(())
    }

    /// Fails the job when a shard has been assigned for longer than `timeout`.
    pub fn expire(&mut self, at: u128, timeout: u128) -> bool {
        if self.status != JobPhase::Score {
            return false;
        }
        let stale = self.shards.iter().find_map(|shard| match self.shard_status.get(shard) {
            Some(ShardState::Assigned { worker, since }) if at.saturating_sub(*since) > timeout => {
                Some(format!("shard {shard}: worker {worker} timed out"))
            }
            _ => None,
        });
        match stale {
            Some(reason) => {
                self.fail(reason);
                true
            }
            None => false,
        }
    }

    /// Runs the global reduction once every shard has reported.
    ///
    /// A job that already failed is returned unchanged.
    pub fn finalize(mut self) -> Self {
        if self.status == JobPhase::Failed {
            return self;
        }
        self.status = JobPhase::Reduce;
        info!(job = %self.id, phase = %self.status, partials = self.partials.len(), "Reducing partial costs");
        match self.reduce() {
            Ok(summary) => {
                info!(job = %self.id, total = summary.cost.total, records = summary.cost.records, "Job finished");
                self.summary = Some(summary);
                self.status = JobPhase::Done;
            }
            Err(err) => self.fail(format!("{err:#}")),
        }
        self
    }

    fn reduce(&mut self) -> anyhow::Result<JobSummary> {
        let workload = workload::named(&self.config.workload)?;
        let mut malformed = self.malformed.clone();
        malformed.sort_by(|a, b| (&a.shard, a.line).cmp(&(&b.shard, b.line)));
        engine::check_strict(&self.config, &malformed)?;

        let buckets = Buckets::new();
        engine::bucket_pairs(&buckets, std::mem::take(&mut self.partials), self.config.reducers);
        let cost = engine::perform_reduce(&self.config, &workload, buckets)?;
        engine::publish(&self.config, cost, self.shards.len(), malformed)
    }

    pub fn info(&self) -> JobInfo {
        JobInfo {
            job_id: self.id.clone(),
            status: self.status.to_string(),
            input: self.config.input.clone(),
            output: self.config.output.display().to_string(),
            workload: self.config.workload.clone(),
            shards_done: self.shards_done() as u64,
            shards_total: self.shards.len() as u64,
            malformed: self.malformed.len() as u64,
            cost: self.summary.as_ref().map(|s| cost_text(&s.cost)).unwrap_or_default(),
            error: self.failure.clone().unwrap_or_default(),
        }
    }
}

/// Running and finished jobs, oldest first.
#[derive(Debug, Default)]
pub struct JobBook {
    job_queue: VecDeque<Job>,
    completed_jobs: VecDeque<Job>,
}

impl JobBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&mut self, job: Job) {
        info!(job = %job.id, shards = job.shards.len(), input = %job.config.input, "Job submitted");
        self.job_queue.push_back(job);
    }

    /// Next pending shard of the oldest job still scoring.
    pub fn next_task(&mut self, worker: &str, at: u128) -> Option<Task> {
        self.job_queue.iter_mut().find_map(|job| job.assign(worker, at))
    }

    /// The broadcast payload of a queued job.
    pub fn parameters(&self, job_id: &str) -> Option<ParameterBlob> {
        self.job_queue.iter().find(|job| job.id == job_id).map(|job| ParameterBlob {
            job_id: job.id.clone(),
            payload: job.broadcast.payload().to_vec(),
            fingerprint: job.broadcast.fingerprint(),
        })
    }

    /// Records a report. Returns the job once it has left the queue and
    /// is ready for [`Job::finalize`].
    pub fn report(&mut self, report: WorkerReport, at: u128) -> Result<Option<Job>, Status> {
        let index = self
            .job_queue
            .iter()
            .position(|job| job.id == report.job_id)
            .ok_or_else(|| Status::not_found(format!("No job {} in queue", report.job_id)))?;
        self.job_queue[index].accept(report, at)?;
        if self.job_queue[index].is_settled() {
            Ok(self.job_queue.remove(index))
        } else {
            Ok(None)
        }
    }

    pub fn complete(&mut self, job: Job) {
        self.completed_jobs.push_back(job);
    }

    /// Fails every job holding a stale assignment and moves it to the
    /// completed list. Returns how many jobs were failed.
    pub fn expire(&mut self, at: u128, timeout: u128) -> usize {
        let mut expired = 0;
        let mut index = 0;
        while index < self.job_queue.len() {
            if self.job_queue[index].expire(at, timeout) {
                if let Some(job) = self.job_queue.remove(index) {
                    self.completed_jobs.push_back(job);
                }
                expired += 1;
            } else {
                index += 1;
            }
        }
        expired
    }

    /// `complete`, `all`, or (default) the jobs still running.
    pub fn list(&self, show: &str) -> Vec<JobInfo> {
        let completed = self.completed_jobs.iter().map(Job::info);
        let running = self.job_queue.iter().map(Job::info);
        match show {
            "complete" => completed.collect(),
            "all" => completed.chain(running).collect(),
            _ => running.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::BiasColumn;
    use crate::rpc::{Malformed, Pair};
    use crate::standalone::engine::score_shard;
    use crate::MapContext;
    use bytes::Bytes;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use tonic::Code;

    const SECOND: u128 = 1_000_000_000;

    fn job_dir(theta: &str, shards: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("theta.csv"), theta).unwrap();
        for (i, body) in shards.iter().enumerate() {
            fs::write(dir.path().join(format!("part-{i}.csv")), body).unwrap();
        }
        dir
    }

    fn config(dir: &Path) -> JobConfig {
        JobConfig::new(
            dir.join("part-*.csv").display().to_string(),
            dir.join("out"),
            dir.join("theta.csv"),
        )
    }

    /// Does what a worker does with a task: fetch and verify the broadcast,
    /// score the shard, build the report.
    fn work(book: &JobBook, task: &Task, worker: &str) -> WorkerReport {
        let blob = book.parameters(&task.job_id).unwrap();
        let broadcast = Broadcast::verify(Bytes::from(blob.payload), task.fingerprint, &task.job_id).unwrap();
        let workload = workload::named(&task.workload).unwrap();
        let ctx = MapContext::new(broadcast.params(), BiasColumn::parse(&task.bias).unwrap());
        let contents = fs::read(&task.shard).unwrap();
        let output = score_shard(&task.shard, Bytes::from(contents), &workload, &ctx).unwrap();
        WorkerReport {
            worker_id: worker.to_string(),
            job_id: task.job_id.clone(),
            shard: task.shard.clone(),
            partials: output.pairs.into_iter().map(Pair::from).collect(),
            malformed: output.malformed.into_iter().map(Malformed::from).collect(),
            error: String::new(),
        }
    }

    #[test]
    fn shards_move_from_pending_to_done_and_the_last_report_reduces() {
        let dir = job_dir("1,2\n", &["7,3\n", "0,3\n"]);
        let mut book = JobBook::new();
        book.submit(Job::prepare("job-1", config(dir.path())).unwrap());

        let first = book.next_task("w1", 0).unwrap();
        let second = book.next_task("w2", 0).unwrap();
        assert_ne!(first.shard, second.shard);
        assert!(book.next_task("w3", 0).is_none());

        let report = work(&book, &first, "w1");
        assert!(book.report(report, SECOND).unwrap().is_none());
        let running = book.list("default");
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].shards_done, 1);
        assert_eq!(running[0].status, "Score");

        let report = work(&book, &second, "w2");
        let job = book.report(report, SECOND).unwrap().expect("job settled");
        assert!(book.list("default").is_empty());
        assert!(job.shards().iter().all(|s| job.shard_state(s) == Some(&ShardState::Done)));

        let job = job.finalize();
        assert_eq!(job.status(), JobPhase::Done);
        let summary = job.summary().unwrap();
        assert_eq!(summary.cost.total, 49.0);
        assert_eq!(summary.cost.records, 2);
        assert_eq!(fs::read_to_string(dir.path().join("out/mr-out-0")).unwrap(), "cost\t49\n");

        book.complete(job);
        let done = book.list("complete");
        assert_eq!(done[0].status, "Done");
        assert_eq!(done[0].cost, "49 (2 records)");
    }

    #[test]
    fn duplicate_and_unassigned_reports_are_refused() {
        let dir = job_dir("0,1\n", &["5,5\n", "1,1\n"]);
        let mut book = JobBook::new();
        book.submit(Job::prepare("job-2", config(dir.path())).unwrap());

        let task = book.next_task("w1", 0).unwrap();
        let report = work(&book, &task, "w1");
        book.report(report.clone(), 0).unwrap();
        assert_eq!(book.report(report.clone(), 0).unwrap_err().code(), Code::AlreadyExists);

        // the second shard is still pending
        let pending = WorkerReport {
            shard: dir.path().join("part-1.csv").display().to_string(),
            ..report.clone()
        };
        assert_eq!(book.report(pending, 0).unwrap_err().code(), Code::AlreadyExists);

        let unknown = WorkerReport {
            shard: "elsewhere.csv".into(),
            ..report.clone()
        };
        assert_eq!(book.report(unknown, 0).unwrap_err().code(), Code::InvalidArgument);

        let other_job = WorkerReport {
            job_id: "nope".into(),
            ..report
        };
        assert_eq!(book.report(other_job, 0).unwrap_err().code(), Code::NotFound);
    }

    #[test]
    fn worker_error_fails_the_job() {
        let dir = job_dir("0,1\n", &["5,5\n", "1,1\n"]);
        let mut book = JobBook::new();
        book.submit(Job::prepare("job-3", config(dir.path())).unwrap());

        let task = book.next_task("w1", 0).unwrap();
        let report = WorkerReport {
            worker_id: "w1".into(),
            job_id: task.job_id.clone(),
            shard: task.shard.clone(),
            error: "reading shard: permission denied".into(),
            ..Default::default()
        };
        let job = book.report(report, 0).unwrap().expect("failed job leaves the queue");
        let job = job.finalize();
        assert_eq!(job.status(), JobPhase::Failed);
        assert!(job.failure().unwrap().contains("permission denied"));
        assert!(!dir.path().join("out").exists());
        assert!(book.next_task("w2", 0).is_none());
    }

    #[test]
    fn strict_job_with_malformed_records_is_rejected() {
        let dir = job_dir("1,2\n", &["0,3\na,b,c\n"]);
        let mut config = config(dir.path());
        config.strict = true;
        let mut book = JobBook::new();
        book.submit(Job::prepare("job-4", config).unwrap());

        let task = book.next_task("w1", 0).unwrap();
        let report = work(&book, &task, "w1");
        assert_eq!(report.malformed.len(), 1);
        let job = book.report(report, 0).unwrap().unwrap().finalize();

        assert_eq!(job.status(), JobPhase::Failed);
        assert!(job.failure().unwrap().contains("Job rejected"));
        assert!(!dir.path().join("out/mr-out-0").exists());
        assert!(dir.path().join("out/malformed.jsonl").exists());
    }

    #[test]
    fn stale_assignment_fails_the_job() {
        let dir = job_dir("0,1\n", &["5,5\n", "1,1\n"]);
        let mut book = JobBook::new();
        book.submit(Job::prepare("job-5", config(dir.path())).unwrap());

        let task = book.next_task("w1", 10 * SECOND).unwrap();
        assert_eq!(book.expire(20 * SECOND, 30 * SECOND), 0);
        assert_eq!(book.expire(41 * SECOND, 30 * SECOND), 1);

        assert!(book.list("default").is_empty());
        let failed = book.list("complete");
        assert_eq!(failed[0].status, "Failed");
        assert!(failed[0].error.contains("timed out"));
        assert!(failed[0].error.contains("w1"));

        // a late report finds nothing to update
        let report = WorkerReport {
            worker_id: "w1".into(),
            job_id: task.job_id.clone(),
            shard: task.shard.clone(),
            ..Default::default()
        };
        assert_eq!(book.report(report, 42 * SECOND).unwrap_err().code(), Code::NotFound);
        assert!(book.next_task("w2", 42 * SECOND).is_none());
    }

    #[test]
    fn every_worker_scores_against_the_same_broadcast() {
        let dir = job_dir("0.5,-1.5,2\n", &["1,2,3\n", "4,5,6\n"]);
        let mut book = JobBook::new();
        book.submit(Job::prepare("job-6", config(dir.path())).unwrap());

        let a = book.next_task("w1", 0).unwrap();
        let b = book.next_task("w2", 0).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);

        let blob = book.parameters(&a.job_id).unwrap();
        let seen_by_a = Broadcast::verify(Bytes::from(blob.payload.clone()), a.fingerprint, "w1").unwrap();
        let seen_by_b = Broadcast::verify(Bytes::from(blob.payload.clone()), b.fingerprint, "w2").unwrap();
        assert_eq!(seen_by_a.params(), seen_by_b.params());
        assert_eq!(seen_by_a.params().as_slice(), &[0.5, -1.5, 2.0]);

        // a payload edited in transit is refused
        let mut tampered = blob.payload;
        tampered[0] = b'9';
        assert!(Broadcast::verify(Bytes::from(tampered), a.fingerprint, "w1").is_err());
    }

    #[test]
    fn bad_configuration_is_refused_at_submission() {
        let dir = job_dir("0,1\n", &["5,5\n"]);
        let mut missing = config(dir.path());
        missing.params = dir.path().join("absent.csv");
        assert!(Job::prepare("job-7", missing).is_err());

        let mut no_input = config(dir.path());
        no_input.input = dir.path().join("none-*.csv").display().to_string();
        assert!(Job::prepare("job-8", no_input).is_err());
    }
}
