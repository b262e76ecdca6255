//! Job configuration.
//!
//! A job is described by four inputs that must resolve before the
//! parameter broadcast starts: the input shards, the output directory, the
//! parameter file and the number of workers. The remaining knobs have
//! defaults. A config can come from CLI flags or from a TOML file:
//!
//! ```toml
//! input = "data/part-*.csv"
//! output = "out"
//! params = "theta.csv"
//! workers = 8
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;
use serde::{Deserialize, Serialize};

use crate::error::{CostError, CostResult};
use crate::record::BiasColumn;
use crate::workload;

fn default_workers() -> usize {
    4
}

fn default_reducers() -> u32 {
    1
}

fn default_workload() -> String {
    workload::DEFAULT_WORKLOAD.to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Glob spec for the input shards
    pub input: String,
    /// Output directory
    pub output: PathBuf,
    /// Parameter (theta) file
    pub params: PathBuf,
    /// Maximum number of shards scored at once
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Number of reduce buckets
    #[serde(default = "default_reducers")]
    pub reducers: u32,
    #[serde(default = "default_workload")]
    pub workload: String,
    #[serde(default)]
    pub bias: BiasColumn,
    /// Fail the job instead of reporting malformed records
    #[serde(default)]
    pub strict: bool,
}

impl JobConfig {
    /// A config with default knobs.
    pub fn new(input: impl Into<String>, output: impl Into<PathBuf>, params: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            params: params.into(),
            workers: default_workers(),
            reducers: default_reducers(),
            workload: default_workload(),
            bias: BiasColumn::default(),
            strict: false,
        }
    }

    pub fn from_toml_str(text: &str) -> CostResult<Self> {
        toml::from_str(text).map_err(CostError::configuration)
    }

    pub fn from_toml_file(path: &Path) -> CostResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| CostError::configuration(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks everything that can be checked without reading data.
    pub fn validate(&self) -> CostResult<()> {
        if self.workers == 0 {
            return Err(CostError::configuration("workers must be at least 1"));
        }
        if self.reducers == 0 {
            return Err(CostError::configuration("reducers must be at least 1"));
        }
        if workload::try_named(&self.workload).is_none() {
            return Err(CostError::configuration(format!("unknown workload `{}`", self.workload)));
        }
        if !self.params.is_file() {
            return Err(CostError::configuration(format!(
                "parameter file {} does not exist",
                self.params.display()
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(CostError::configuration("output directory is empty"));
        }
        self.resolve_shards().map(|_| ())
    }

    /// Input shards in lexical order. At least one file must match.
    pub fn resolve_shards(&self) -> CostResult<Vec<PathBuf>> {
        let paths = glob(&self.input)
            .map_err(|e| CostError::configuration(format!("bad input glob `{}`: {e}", self.input)))?;
        let mut shards = Vec::new();
        for entry in paths {
            let path = entry.map_err(CostError::configuration)?;
            if path.is_file() {
                shards.push(path);
            }
        }
        if shards.is_empty() {
            return Err(CostError::configuration(format!("no input files match `{}`", self.input)));
        }
        shards.sort();
        Ok(shards)
    }
}
