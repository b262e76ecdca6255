use std::env;
use std::error::Error;

use tonic_build::manual::{Builder, Method, Service};

// Messages are plain prost structs in `src/rpc.rs`; only the service glue is generated.
fn rpc(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::rpc::{input}"))
        .output_type(format!("crate::rpc::{output}"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() -> Result<(), Box<dyn Error>> {
    let out_dir = env::var("OUT_DIR")?;
    let coordinator = Service::builder()
        .name("Coordinator")
        .package("lrcost")
        .method(rpc("register_worker", "RegisterWorker", "WorkerRegistration", "WorkerResponse"))
        .method(rpc("get_task", "GetTask", "WorkerRequest", "Task"))
        .method(rpc("get_parameters", "GetParameters", "ParameterRequest", "ParameterBlob"))
        .method(rpc("report_task", "ReportTask", "WorkerReport", "WorkerResponse"))
        .method(rpc("submit_job", "SubmitJob", "JobRequest", "JobResponse"))
        .method(rpc("list_jobs", "ListJobs", "JobListRequest", "JobList"))
        .method(rpc("system_status", "SystemStatus", "Empty", "SystemStatus"))
        .build();

    Builder::new()
        .build_client(true)
        .build_server(true)
        .out_dir(&out_dir)
        .compile(&[coordinator]);
    Ok(())
}
