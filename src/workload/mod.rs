//! Converts workload names to actual application code.
//!
//! # Example
//!
//! ```
//! # use anyhow::Result;
//! use lrcost::workload;
//! # fn main() -> Result<()> {
//! let lr = workload::named("lr-cost")?;
//! assert!(lr.combine_fn.is_some());
//! # Ok(())
//! # }
//! ```

use crate::Workload;
use anyhow::{bail, Result};

pub mod lr_cost;

/// Name of the workload used when none is given.
pub const DEFAULT_WORKLOAD: &str = "lr-cost";

/// Gets the [`Workload`] named `name`.
///
/// Returns [`None`] if no application with the given name was found.
pub fn try_named(name: &str) -> Option<Workload> {
    match name {
        "lr-cost" => Some(Workload {
            map_fn: lr_cost::map,
            combine_fn: Some(lr_cost::reduce),
            reduce_fn: lr_cost::reduce,
        }),
        "lr-cost-nocombine" => Some(Workload {
            map_fn: lr_cost::map,
            combine_fn: None,
            reduce_fn: lr_cost::reduce,
        }),
        _ => None,
    }
}

/// Gets the [`Workload`] named `name`.
///
/// Returns an [`anyhow::Error`] if no application with the given name was found.
pub fn named(name: &str) -> Result<Workload> {
    match try_named(name) {
        Some(app) => Ok(app),
        None => bail!("No workload named `{}` found.", name),
    }
}
