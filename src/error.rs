//! Error types for cost computation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for cost computation
pub type CostResult<T> = Result<T, CostError>;

/// Where a line came from: shard name and 1-based line number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordLocation {
    pub shard: String,
    pub line: usize,
}

impl RecordLocation {
    pub fn new(shard: impl Into<String>, line: usize) -> Self {
        Self { shard: shard.into(), line }
    }
}

impl fmt::Display for RecordLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.shard, self.line)
    }
}

/// Cost computation error types
#[derive(Error, Debug)]
pub enum CostError {
    /// Job configuration is missing or unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The parameter file could not be read
    #[error("Configuration error: cannot read parameter file {}: {source}", .path.display())]
    ParameterSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A field is not a decimal number
    #[error("Parse error at {location}: malformed token `{token}`")]
    Parse { location: RecordLocation, token: String },

    /// Record width disagrees with the parameter vector
    #[error("Length mismatch at {location}: expected {expected} fields, found {found}")]
    LengthMismatch {
        location: RecordLocation,
        expected: usize,
        found: usize,
    },

    /// A worker received parameters that differ from the announced broadcast
    #[error("Broadcast mismatch: expected fingerprint {expected:016x}, received {found:016x}")]
    BroadcastMismatch { expected: u64, found: u64 },

    /// Strict mode refused to publish a result
    #[error("Job rejected: {malformed} malformed record(s)")]
    Rejected { malformed: u64 },

    /// An intermediate key that no reducer understands
    #[error("Unknown intermediate key `{0}`")]
    UnknownKey(String),

    /// An intermediate value with the wrong encoding
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl CostError {
    /// Create a configuration error
    pub fn configuration<E: fmt::Display>(err: E) -> Self {
        Self::Configuration(err.to_string())
    }

    /// True for errors that concern one input record only.
    ///
    /// These are isolated and reported; every other error fails the job.
    pub fn is_record_local(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::LengthMismatch { .. })
    }

    /// The record this error belongs to, if any.
    pub fn location(&self) -> Option<&RecordLocation> {
        match self {
            Self::Parse { location, .. } | Self::LengthMismatch { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// A record that was rejected and left out of the cost.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub shard: String,
    pub line: u64,
    pub reason: String,
}

impl MalformedRecord {
    /// Build a report entry from a record-local error.
    ///
    /// Returns `None` for errors that are not tied to a record.
    pub fn from_error(err: &CostError) -> Option<Self> {
        let location = err.location()?;
        Some(Self {
            shard: location.shard.clone(),
            line: location.line as u64,
            reason: err.to_string(),
        })
    }
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.shard, self.line, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_local_errors_are_classified() {
        let parse = CostError::Parse {
            location: RecordLocation::new("part-0", 3),
            token: "a".into(),
        };
        let mismatch = CostError::LengthMismatch {
            location: RecordLocation::new("part-0", 4),
            expected: 2,
            found: 3,
        };
        assert!(parse.is_record_local());
        assert!(mismatch.is_record_local());
        assert!(!CostError::configuration("missing").is_record_local());
        assert!(!CostError::Rejected { malformed: 1 }.is_record_local());
    }

    #[test]
    fn malformed_record_names_shard_and_line() {
        let err = CostError::Parse {
            location: RecordLocation::new("data/part-1.csv", 7),
            token: "b".into(),
        };
        let report = MalformedRecord::from_error(&err).unwrap();
        assert_eq!(report.shard, "data/part-1.csv");
        assert_eq!(report.line, 7);
        assert!(report.reason.contains("`b`"));
        assert!(MalformedRecord::from_error(&CostError::configuration("x")).is_none());
    }
}
