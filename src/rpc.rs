//! Coordinator/worker protocol.
//!
//! Messages are declared here as prost structs; `build.rs` generates the
//! `coordinator_client` and `coordinator_server` modules for the
//! `lrcost.Coordinator` service around them.

use bytes::Bytes;

use crate::aggregate::AggregateCost;
use crate::error::MalformedRecord;
use crate::KeyValue;

include!(concat!(env!("OUT_DIR"), "/lrcost.Coordinator.rs"));

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerRegistration {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(string, tag = "3")]
    pub worker_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerRequest {
    #[prost(string, tag = "1")]
    pub worker_id: String,
}

/// One shard to score.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Task {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(string, tag = "2")]
    pub shard: String,
    #[prost(string, tag = "3")]
    pub workload: String,
    #[prost(string, tag = "4")]
    pub bias: String,
    /// Fingerprint of the job's broadcast payload
    #[prost(uint64, tag = "5")]
    pub fingerprint: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParameterRequest {
    #[prost(string, tag = "1")]
    pub job_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ParameterBlob {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    #[prost(uint64, tag = "3")]
    pub fingerprint: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Pair {
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Malformed {
    #[prost(string, tag = "1")]
    pub shard: String,
    #[prost(uint64, tag = "2")]
    pub line: u64,
    #[prost(string, tag = "3")]
    pub reason: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerReport {
    #[prost(string, tag = "1")]
    pub worker_id: String,
    #[prost(string, tag = "2")]
    pub job_id: String,
    #[prost(string, tag = "3")]
    pub shard: String,
    #[prost(message, repeated, tag = "4")]
    pub partials: Vec<Pair>,
    #[prost(message, repeated, tag = "5")]
    pub malformed: Vec<Malformed>,
    /// Non-empty when the shard could not be scored at all
    #[prost(string, tag = "6")]
    pub error: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobRequest {
    #[prost(string, tag = "1")]
    pub input: String,
    #[prost(string, tag = "2")]
    pub output: String,
    #[prost(string, tag = "3")]
    pub params: String,
    #[prost(string, tag = "4")]
    pub workload: String,
    #[prost(string, tag = "5")]
    pub bias: String,
    #[prost(bool, tag = "6")]
    pub strict: bool,
    #[prost(uint32, tag = "7")]
    pub reducers: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(string, tag = "3")]
    pub job_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobListRequest {
    #[prost(string, tag = "1")]
    pub show: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobInfo {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(string, tag = "2")]
    pub status: String,
    #[prost(string, tag = "3")]
    pub input: String,
    #[prost(string, tag = "4")]
    pub output: String,
    #[prost(string, tag = "5")]
    pub workload: String,
    #[prost(uint64, tag = "6")]
    pub shards_done: u64,
    #[prost(uint64, tag = "7")]
    pub shards_total: u64,
    #[prost(uint64, tag = "8")]
    pub malformed: u64,
    /// Final cost as decimal text, empty until the job is done
    #[prost(string, tag = "9")]
    pub cost: String,
    /// Failure reason, empty unless the job failed
    #[prost(string, tag = "10")]
    pub error: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct JobList {
    #[prost(message, repeated, tag = "1")]
    pub jobs: Vec<JobInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Worker {
    #[prost(string, tag = "1")]
    pub worker_id: String,
    #[prost(string, tag = "2")]
    pub address: String,
    #[prost(string, tag = "3")]
    pub state: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemStatus {
    #[prost(uint32, tag = "1")]
    pub worker_count: u32,
    #[prost(message, repeated, tag = "2")]
    pub workers: Vec<Worker>,
    #[prost(message, repeated, tag = "3")]
    pub jobs: Vec<JobInfo>,
}

impl From<KeyValue> for Pair {
    fn from(kv: KeyValue) -> Self {
        Self {
            key: kv.key.to_vec(),
            value: kv.value.to_vec(),
        }
    }
}

impl From<Pair> for KeyValue {
    fn from(pair: Pair) -> Self {
        KeyValue::new(Bytes::from(pair.key), Bytes::from(pair.value))
    }
}

impl From<MalformedRecord> for Malformed {
    fn from(m: MalformedRecord) -> Self {
        Self {
            shard: m.shard,
            line: m.line,
            reason: m.reason,
        }
    }
}

impl From<Malformed> for MalformedRecord {
    fn from(m: Malformed) -> Self {
        Self {
            shard: m.shard,
            line: m.line,
            reason: m.reason,
        }
    }
}

/// Text form of a finished job's cost for listings.
pub fn cost_text(cost: &AggregateCost) -> String {
    format!("{} ({} records)", cost.total, cost.records)
}
