//! Per-record squared-error evaluation.

use std::sync::Arc;

use crate::error::{CostError, CostResult, RecordLocation};
use crate::params::ParameterVector;
use crate::record::{BiasColumn, FeatureRecord};

/// Scores records against one parameter vector.
///
/// Built once per shard task and reused for every record of the shard.
#[derive(Clone, Debug)]
pub struct CostEvaluator {
    params: Arc<ParameterVector>,
    bias: BiasColumn,
}

impl CostEvaluator {
    pub fn new(params: Arc<ParameterVector>, bias: BiasColumn) -> Self {
        Self { params, bias }
    }

    /// `theta[0] * 1.0 + sum(theta[i] * x[i])` for `i` in `1..len(theta)`.
    pub fn predict(&self, record: &FeatureRecord, location: &RecordLocation) -> CostResult<f64> {
        let theta = self.params.as_slice();
        let x = record.aligned(self.bias);
        if x.len() != theta.len() {
            return Err(CostError::LengthMismatch {
                location: location.clone(),
                expected: self.bias.record_width(theta.len()),
                found: record.values().len(),
            });
        }
        let weighted: f64 = theta[1..].iter().zip(&x[1..]).map(|(t, v)| t * v).sum();
        Ok(self.params.bias() * 1.0 + weighted)
    }

    /// `(predicted - y)^2`. NaN and infinities pass through unchanged.
    pub fn evaluate(&self, record: &FeatureRecord, location: &RecordLocation) -> CostResult<f64> {
        let error = self.predict(record, location)? - record.y();
        Ok(error * error)
    }
}
