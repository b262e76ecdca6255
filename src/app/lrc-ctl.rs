use clap::Parser;
use tonic::Request;

use lrcost::cmd::ctl::{Args, Commands};
use lrcost::rpc::coordinator_client::CoordinatorClient;
use lrcost::rpc::{Empty, JobInfo, JobListRequest, JobRequest, SystemStatus};

fn display_job(label: &str, job: &JobInfo) {
    println!(
        "[{}]\tSTATUS: [{}]\tIN: [{}]\tOUT: [{}]\tWORKLOAD: [{}]\tSHARDS: [{}/{}]",
        label, job.status, job.input, job.output, job.workload, job.shards_done, job.shards_total
    );
    if !job.cost.is_empty() {
        println!("\tCOST: {}\tMALFORMED: {}", job.cost, job.malformed);
    }
    if !job.error.is_empty() {
        println!("\tERROR: {}", job.error);
    }
}

fn display_jobs(jobs: Vec<JobInfo>, show: &str) {
    if jobs.is_empty() {
        println!("No jobs in {} job list", show);
        return;
    }
    for (ctr, job) in jobs.iter().enumerate() {
        display_job(&ctr.to_string(), job);
    }
}

fn display_system_status(sys_stat: SystemStatus) {
    let n_workers = sys_stat.worker_count;
    let active_count = sys_stat
        .workers
        .iter()
        .filter(|w| w.state == "Idle" || w.state == "Busy")
        .count();
    let dead_count = sys_stat.workers.len() - active_count;

    println!("---------- WORKER STATUS ----------");
    for worker in &sys_stat.workers {
        println!("[{}]\tState: {}", worker.address, worker.state);
    }
    println!("-----------------------------------");
    if n_workers > 0 {
        println!("System health:\t{:.0}%", (active_count as f32 / n_workers as f32) * 100.0);
    }
    println!("Active Workers:\t{active_count} / {n_workers}");
    println!("Dead Workers:\t{dead_count} / {n_workers}");
    println!("-----------------------------------");

    match sys_stat.jobs.first() {
        Some(job) => {
            println!("System is currently working on:");
            display_job("CURRENT JOB", job);
        }
        None => println!("System is currently idle -- no jobs queued"),
    }
    println!("-----------------------------------");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let host = args.host.unwrap_or_else(|| "127.0.0.1:50051".to_string());

    let mut client = CoordinatorClient::connect(format!("http://{}", host)).await?;

    match args.command {
        Commands::Submit {
            input,
            output,
            params,
            workload,
            bias,
            reducers,
            strict,
        } => {
            let request = Request::new(JobRequest {
                input,
                output,
                params,
                workload,
                bias: bias.as_str().to_string(),
                strict,
                reducers,
            });
            let response = client.submit_job(request).await?.into_inner();
            if response.success {
                println!("Submitted job: {}", response.job_id);
            } else {
                eprintln!("Job rejected: {}", response.message);
                std::process::exit(1);
            }
        }
        Commands::Jobs { show } => {
            let show_req = match show.as_deref() {
                Some("all") | Some("a") => "all",
                Some("complete") | Some("c") => "complete",
                _ => "default",
            };
            let response = client
                .list_jobs(Request::new(JobListRequest {
                    show: show_req.to_string(),
                }))
                .await?;
            display_jobs(response.into_inner().jobs, show_req);
        }
        Commands::Status {} => {
            let response = client.system_status(Request::new(Empty {})).await?;
            display_system_status(response.into_inner());
        }
    }

    Ok(())
}
