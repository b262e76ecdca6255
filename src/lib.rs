//! A MapReduce (lite) engine that computes the squared-error cost of a
//! linear-regression hypothesis over a sharded dataset.
//!
//! Every worker scores its shard against the same broadcast parameter
//! vector and emits partial sums under one constant key; an optional
//! combiner pre-sums inside the shard and a global reducer folds the
//! partial sums into the final cost. Jobs run either in-process
//! ([`standalone`]) or on a coordinator/worker cluster over gRPC ([`rpc`]).

use bytes::Bytes;
use std::hash::Hasher;
use std::sync::Arc;

pub mod aggregate;
pub mod cmd;
pub mod config;
pub mod coordinator;
pub mod cost;
pub mod error;
pub mod logging;
pub mod params;
pub mod record;
pub mod rpc;
pub mod standalone;
pub mod utils;
pub mod workload;

pub use error::{CostError, MalformedRecord};

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// The output of an application map function.
///
/// There are 2 layers of [`anyhow::Result`]s here. The outer layer
/// accounts for errors that arise while creating the iterator (the shard
/// itself is unusable). The inner layer accounts for errors on a single
/// record; the engine isolates those when they are record-local
/// [`CostError`]s and aborts on anything else.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// A map function takes a shard as a key-value pair (shard name, contents)
/// and the broadcast context of the job.
///
/// It returns an iterator that yields new key-value pairs.
pub type MapFn = fn(kv: KeyValue, ctx: &MapContext) -> MapOutput;

/// A reduce function takes in a key and an iterator over values for that
/// key. It returns an [`anyhow::Result`] containing a single output value.
///
/// The same signature is used for combiners, so a combiner's output must be
/// a valid input to the reducer.
pub type ReduceFn = fn(key: Bytes, values: Box<dyn Iterator<Item = Bytes> + '_>) -> anyhow::Result<Bytes>;

/// A map reduce application.
#[derive(Copy, Clone)]
pub struct Workload {
    pub map_fn: MapFn,
    /// Optional local pre-aggregation applied per shard before shuffling.
    pub combine_fn: Option<ReduceFn>,
    pub reduce_fn: ReduceFn,
}

/// Read-only state every map task of a job sees.
#[derive(Clone, Debug)]
pub struct MapContext {
    /// The broadcast parameter vector, shared by all tasks of the job.
    pub params: Arc<params::ParameterVector>,
    /// How a record's columns line up against theta.
    pub bias: record::BiasColumn,
}

impl MapContext {
    pub fn new(params: Arc<params::ParameterVector>, bias: record::BiasColumn) -> Self {
        Self { params, bias }
    }
}

/////////////////////////////////////////////////////////////////////////////
// Key-value pairs
/////////////////////////////////////////////////////////////////////////////

/// A single key-value pair.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyValue {
    /// The key.
    pub key: Bytes,
    /// The value.
    pub value: Bytes,
}

impl KeyValue {
    /// Construct a new key-value pair from the given key and value.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// Get the key of this key-value pair.
    ///
    /// This method is cheap, since [`Bytes`] are cheaply cloneable.
    #[inline]
    pub fn key(&self) -> Bytes {
        self.key.clone()
    }

    /// Get the value of this key-value pair.
    #[inline]
    pub fn value(&self) -> Bytes {
        self.value.clone()
    }

    /// Consumes the key-value pair and returns the value.
    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }
}

/// Hashes an intermediate key. Compute a reduce bucket for a given key
/// by calculating `ihash(key) % n_reduce`.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    (hasher.finish() & 0x7fff_ffff) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ihash_is_stable_and_positive() {
        let a = ihash(b"cost");
        assert_eq!(a, ihash(b"cost"));
        assert!(a <= 0x7fff_ffff);
        assert_ne!(a, ihash(b"other"));
    }
}
