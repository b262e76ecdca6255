use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tonic::{transport::Server, Request, Response, Status};
use tracing::{info, warn};
use uuid::Uuid;

use lrcost::cmd::coordinator::Args;
use lrcost::config::JobConfig;
use lrcost::coordinator::{Job, JobBook};
use lrcost::logging::init_tracing;
use lrcost::record::BiasColumn;
use lrcost::rpc::coordinator_server::{Coordinator, CoordinatorServer};
use lrcost::rpc::{
    Empty, JobList, JobListRequest, JobRequest, JobResponse, ParameterBlob, ParameterRequest, SystemStatus, Task,
    Worker, WorkerRegistration, WorkerReport, WorkerRequest, WorkerResponse,
};
use lrcost::utils::now;

/*
    Only one coordinator !!
*/

// The default state for a worker node is `Idle`, meaning no work is assigned but the worker is alive.
//
// A worker node is `Busy` while it scores a shard, and `Dead` if it has not
// been heard from within the timeout.
#[derive(Debug, Clone)]
enum WorkerState {
    Idle,
    Busy,
    Dead,
}

#[derive(Debug, Clone)]
struct WorkerNode {
    state: WorkerState,
    addr: String,
    /// Time this Worker last checked in
    elapsed: u128,
}

// Struct for the coordinator, which holds the jobs and the worker list.
pub struct CoordinatorService {
    jobs: Arc<Mutex<JobBook>>,
    workers: Arc<Mutex<HashMap<String, WorkerNode>>>,
    timeout: u128,
    task_timeout: u128,
}

impl CoordinatorService {
    fn new(timeout: u64, task_timeout: u64) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(JobBook::new())),
            workers: Arc::new(Mutex::new(HashMap::new())),
            timeout: Duration::from_secs(timeout).as_nanos(),
            task_timeout: Duration::from_secs(task_timeout).as_nanos(),
        }
    }

    fn touch_worker(&self, worker_id: &str, state: WorkerState) {
        let mut workers = lock(&self.workers);
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.state = state;
            worker.elapsed = now();
        }
    }

    /// The job book with stale assignments already failed.
    fn jobs(&self) -> MutexGuard<'_, JobBook> {
        let mut jobs = lock(&self.jobs);
        jobs.expire(now(), self.task_timeout);
        jobs
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[tonic::async_trait]
impl Coordinator for CoordinatorService {
    // Register a worker with the coordinator.
    // Workers call this once at startup and use the returned id in every later request.
    async fn register_worker(&self, request: Request<WorkerRegistration>) -> Result<Response<WorkerResponse>, Status> {
        let addr = request
            .remote_addr()
            .map(|a: SocketAddr| a.to_string())
            .unwrap_or_else(|| "unknown".into());
        let worker_id = Uuid::new_v4().to_string();
        info!(worker = %worker_id, %addr, "New worker joined");
        lock(&self.workers).insert(
            worker_id.clone(),
            WorkerNode {
                state: WorkerState::Idle,
                addr,
                elapsed: now(),
            },
        );

        Ok(Response::new(WorkerResponse {
            success: true,
            message: "Worker registered".into(),
            worker_id,
        }))
    }

    // Hand out the next pending shard of the oldest job still scoring.
    async fn get_task(&self, request: Request<WorkerRequest>) -> Result<Response<Task>, Status> {
        let worker_id = request.into_inner().worker_id;
        let task = self.jobs().next_task(&worker_id, now());

        match task {
            Some(task) => {
                self.touch_worker(&worker_id, WorkerState::Busy);
                Ok(Response::new(task))
            }
            None => {
                self.touch_worker(&worker_id, WorkerState::Idle);
                Err(Status::not_found("No task available"))
            }
        }
    }

    // Serve the broadcast payload of a job.
    async fn get_parameters(&self, request: Request<ParameterRequest>) -> Result<Response<ParameterBlob>, Status> {
        let job_id = request.into_inner().job_id;
        lock(&self.jobs)
            .parameters(&job_id)
            .map(Response::new)
            .ok_or_else(|| Status::not_found(format!("No job {job_id} in queue")))
    }

    /// gRPC call for workers to hand in the partial costs of a shard.
    async fn report_task(&self, request: Request<WorkerReport>) -> Result<Response<WorkerResponse>, Status> {
        let report = request.into_inner();
        let worker_id = report.worker_id.clone();
        self.touch_worker(&worker_id, WorkerState::Idle);

        let finished = lock(&self.jobs).report(report, now())?;
        if let Some(job) = finished {
            let job = tokio::task::spawn_blocking(move || job.finalize())
                .await
                .map_err(|e| Status::internal(format!("reduce task failed: {e}")))?;
            lock(&self.jobs).complete(job);
        }

        Ok(Response::new(WorkerResponse {
            success: true,
            message: String::new(),
            worker_id,
        }))
    }

    // Validate a job, load its broadcast and queue it.
    async fn submit_job(&self, request: Request<JobRequest>) -> Result<Response<JobResponse>, Status> {
        let req = request.into_inner();
        let Some(bias) = BiasColumn::parse(&req.bias) else {
            return Ok(Response::new(JobResponse {
                success: false,
                message: format!("Invalid bias column `{}`", req.bias),
                job_id: String::new(),
            }));
        };
        let mut config = JobConfig::new(req.input, req.output, req.params);
        config.bias = bias;
        config.strict = req.strict;
        if req.reducers > 0 {
            config.reducers = req.reducers;
        }
        if !req.workload.is_empty() {
            config.workload = req.workload;
        }

        let job_id = Uuid::new_v4().to_string();
        match Job::prepare(job_id.clone(), config) {
            Ok(job) => {
                lock(&self.jobs).submit(job);
                Ok(Response::new(JobResponse {
                    success: true,
                    message: "Job submitted".into(),
                    job_id,
                }))
            }
            Err(err) => {
                warn!("Rejected job: {err}");
                Ok(Response::new(JobResponse {
                    success: false,
                    message: err.to_string(),
                    job_id: String::new(),
                }))
            }
        }
    }

    // List jobs: `complete`, `all`, or (default) the ones still running.
    async fn list_jobs(&self, request: Request<JobListRequest>) -> Result<Response<JobList>, Status> {
        let show = request.into_inner().show;
        let jobs = self.jobs().list(&show);
        Ok(Response::new(JobList { jobs }))
    }

    // Get the system status
    async fn system_status(&self, _request: Request<Empty>) -> Result<Response<SystemStatus>, Status> {
        let jobs = self.jobs().list("default");
        let workers = lock(&self.workers);
        let worker_list: Vec<Worker> = workers
            .iter()
            .map(|(worker_id, worker)| {
                let state = if now().saturating_sub(worker.elapsed) > self.timeout {
                    WorkerState::Dead
                } else {
                    worker.state.clone()
                };
                Worker {
                    worker_id: worker_id.clone(),
                    address: worker.addr.clone(),
                    state: format!("{:?}", state),
                }
            })
            .collect();

        Ok(Response::new(SystemStatus {
            worker_count: workers.len() as u32,
            workers: worker_list,
            jobs,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse().context("bad listen address")?;
    let coordinator = CoordinatorService::new(args.timeout, args.task_timeout);

    info!("Coordinator listening on {}", addr);
    Server::builder()
        .add_service(CoordinatorServer::new(coordinator))
        .serve(addr)
        .await?;

    Ok(())
}
