//! The parameter vector (theta) and its broadcast to workers.
//!
//! The parameter file is read and parsed exactly once per job. Workers
//! receive the raw payload together with its fingerprint and refuse a
//! payload that does not hash to the announced value, so every shard of a
//! job is scored against the same bytes.

use std::fs;
use std::hash::Hasher;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{CostError, CostResult, RecordLocation};
use crate::record::parse_fields;

/// Linear model coefficients. Index 0 is the bias.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterVector {
    theta: Arc<[f64]>,
}

impl ParameterVector {
    /// Wraps a non-empty coefficient list.
    pub fn new(theta: Vec<f64>) -> CostResult<Self> {
        if theta.is_empty() {
            return Err(CostError::configuration("parameter vector is empty"));
        }
        Ok(Self { theta: theta.into() })
    }

    /// Parses one comma-separated line of coefficients.
    pub fn parse_line(line: &str, location: RecordLocation) -> CostResult<Self> {
        if line.trim().is_empty() {
            return Err(CostError::configuration(format!(
                "parameter line {location} is blank"
            )));
        }
        Self::new(parse_fields(line, &location)?)
    }

    /// The bias term, `theta[0]`.
    #[inline]
    pub fn bias(&self) -> f64 {
        self.theta[0]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.theta
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.theta.len()
    }

    /// Always false: an empty vector is refused by [`ParameterVector::new`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.theta.is_empty()
    }
}

/// 64-bit FNV-1a digest of a broadcast payload.
pub fn fingerprint(payload: &[u8]) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    hasher.write(payload);
    hasher.finish()
}

/// A parsed parameter vector together with the exact bytes it came from.
#[derive(Clone, Debug)]
pub struct Broadcast {
    params: Arc<ParameterVector>,
    payload: Bytes,
    fingerprint: u64,
}

impl Broadcast {
    /// Reads the parameter file at `path`.
    ///
    /// A missing or unreadable file is a configuration error; the job must
    /// not start with an empty vector.
    pub fn load(path: &Path) -> CostResult<Self> {
        let payload = fs::read(path).map_err(|source| CostError::ParameterSource {
            path: path.to_path_buf(),
            source,
        })?;
        let broadcast = Self::from_payload(Bytes::from(payload), &path.display().to_string())?;
        info!(
            path = %path.display(),
            width = broadcast.params.len(),
            fingerprint = %format!("{:016x}", broadcast.fingerprint),
            "Loaded parameter vector"
        );
        Ok(broadcast)
    }

    /// Parses a payload received from `source` (a path or a job id).
    ///
    /// The payload must hold exactly one non-blank line.
    pub fn from_payload(payload: Bytes, source: &str) -> CostResult<Self> {
        let text = std::str::from_utf8(&payload)
            .map_err(|e| CostError::configuration(format!("parameter file {source} is not UTF-8: {e}")))?;
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let (index, line) = lines
            .next()
            .ok_or_else(|| CostError::configuration(format!("parameter file {source} is empty")))?;
        if index != 0 {
            return Err(CostError::configuration(format!(
                "parameter file {source} must start with the parameter line"
            )));
        }
        if let Some((extra, _)) = lines.next() {
            return Err(CostError::configuration(format!(
                "parameter file {source} has a second line at {}; expected exactly one",
                extra + 1
            )));
        }
        let params = ParameterVector::parse_line(line, RecordLocation::new(source, 1))?;
        Ok(Self {
            params: Arc::new(params),
            fingerprint: fingerprint(&payload),
            payload,
        })
    }

    /// Parses a payload shipped to a worker and checks it against the
    /// fingerprint the coordinator announced.
    pub fn verify(payload: Bytes, expected: u64, source: &str) -> CostResult<Self> {
        let found = fingerprint(&payload);
        if found != expected {
            return Err(CostError::BroadcastMismatch { expected, found });
        }
        let broadcast = Self::from_payload(payload, source)?;
        debug!(source, fingerprint = %format!("{found:016x}"), "Verified broadcast");
        Ok(broadcast)
    }

    /// Shared handle to the parsed parameters.
    #[inline]
    pub fn params(&self) -> Arc<ParameterVector> {
        self.params.clone()
    }

    #[inline]
    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    #[inline]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_bias_first() {
        let p = ParameterVector::parse_line(" 1.5, -2,3e1 ", RecordLocation::new("theta", 1)).unwrap();
        assert_eq!(p.as_slice(), &[1.5, -2.0, 30.0]);
        assert_eq!(p.bias(), 1.5);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn rejects_malformed_token() {
        let err = ParameterVector::parse_line("1,x", RecordLocation::new("theta", 1)).unwrap_err();
        match err {
            CostError::Parse { token, location } => {
                assert_eq!(token, "x");
                assert_eq!(location.line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Broadcast::load(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, CostError::ParameterSource { .. }));
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn empty_and_multi_line_files_are_refused() {
        assert!(matches!(
            Broadcast::from_payload(Bytes::from_static(b"\n\n"), "t").unwrap_err(),
            CostError::Configuration(_)
        ));
        assert!(matches!(
            Broadcast::from_payload(Bytes::from_static(b"1,2\n3,4\n"), "t").unwrap_err(),
            CostError::Configuration(_)
        ));
        assert!(matches!(
            Broadcast::from_payload(Bytes::from_static(b"\n1,2\n"), "t").unwrap_err(),
            CostError::Configuration(_)
        ));
    }

    #[test]
    fn load_keeps_payload_and_fingerprint() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "0,1\n").unwrap();
        let b = Broadcast::load(file.path()).unwrap();
        assert_eq!(b.params().as_slice(), &[0.0, 1.0]);
        assert_eq!(b.payload(), Bytes::from_static(b"0,1\n"));
        assert_eq!(b.fingerprint(), fingerprint(b"0,1\n"));
    }

    #[test]
    fn verify_rejects_stale_payload() {
        let announced = fingerprint(b"1,2\n");
        let err = Broadcast::verify(Bytes::from_static(b"1,3\n"), announced, "job").unwrap_err();
        assert!(matches!(err, CostError::BroadcastMismatch { .. }));

        let ok = Broadcast::verify(Bytes::from_static(b"1,2\n"), announced, "job").unwrap();
        assert_eq!(ok.params().as_slice(), &[1.0, 2.0]);
    }
}
