//! Partial sums, the local combiner and the global reducer.
//!
//! Every cost term is emitted under the one sentinel key [`CostKey::Total`].
//! A [`PartialCost`] carries a running sum and the number of records folded
//! into it; merging is a plain sum on both, so combining any grouping of
//! partials in any order gives the same result up to floating-point
//! rounding.

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{CostError, CostResult};

/// Routing key for partial sums.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CostKey {
    /// All records of a job aggregate into one global cost.
    Total,
}

impl CostKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Total => "cost",
        }
    }

    /// Wire form of the key.
    pub fn to_bytes(self) -> Bytes {
        Bytes::from_static(self.as_str().as_bytes())
    }

    pub fn from_bytes(key: &[u8]) -> CostResult<Self> {
        match key {
            b"cost" => Ok(Self::Total),
            other => Err(CostError::UnknownKey(String::from_utf8_lossy(other).into_owned())),
        }
    }
}

impl fmt::Display for CostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running sum of cost terms.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PartialCost {
    pub sum: f64,
    pub records: u64,
}

impl PartialCost {
    /// Encoded size: `f64` sum followed by `u64` count, both big-endian.
    pub const ENCODED_LEN: usize = 16;

    /// A partial holding a single record's cost term.
    pub fn from_term(term: f64) -> Self {
        Self { sum: term, records: 1 }
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            sum: self.sum + other.sum,
            records: self.records + other.records,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::ENCODED_LEN);
        buf.put_f64(self.sum);
        buf.put_u64(self.records);
        buf.freeze()
    }

    pub fn decode(mut value: Bytes) -> CostResult<Self> {
        if value.len() != Self::ENCODED_LEN {
            return Err(CostError::Encoding(format!(
                "partial cost must be {} bytes, got {}",
                Self::ENCODED_LEN,
                value.len()
            )));
        }
        let sum = value.get_f64();
        let records = value.get_u64();
        Ok(Self { sum, records })
    }
}

/// Local pre-aggregation inside one shard.
pub struct LocalAggregator;

impl LocalAggregator {
    /// Sums partials sharing one key into a single partial.
    pub fn combine(partials: impl IntoIterator<Item = PartialCost>) -> PartialCost {
        partials.into_iter().fold(PartialCost::default(), PartialCost::merge)
    }

    /// Byte-level combine over encoded partials.
    pub fn combine_encoded(values: impl IntoIterator<Item = Bytes>) -> CostResult<PartialCost> {
        values
            .into_iter()
            .map(PartialCost::decode)
            .try_fold(PartialCost::default(), |acc, p| Ok(acc.merge(p?)))
    }
}

/// Final per-key fold of every partial of a job.
#[derive(Debug, Default)]
pub struct GlobalReducer {
    table: BTreeMap<CostKey, PartialCost>,
}

impl GlobalReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a raw or pre-combined partial under `key`.
    pub fn absorb(&mut self, key: CostKey, partial: PartialCost) {
        let slot = self.table.entry(key).or_default();
        *slot = slot.merge(partial);
    }

    pub fn absorb_encoded(&mut self, key: &[u8], value: Bytes) -> CostResult<()> {
        let key = CostKey::from_bytes(key)?;
        self.absorb(key, PartialCost::decode(value)?);
        Ok(())
    }

    /// Folds another reducer's table into this one.
    pub fn merge(&mut self, other: GlobalReducer) {
        for (key, partial) in other.table {
            self.absorb(key, partial);
        }
    }

    /// Results per key. A key never seen is absent.
    pub fn results(&self) -> impl Iterator<Item = AggregateCost> + '_ {
        self.table.iter().map(|(&key, p)| AggregateCost {
            key,
            total: p.sum,
            records: p.records,
        })
    }

    /// The job's cost. A job with no records costs 0.
    pub fn finish(self) -> AggregateCost {
        let p = self.table.get(&CostKey::Total).copied().unwrap_or_default();
        AggregateCost {
            key: CostKey::Total,
            total: p.sum,
            records: p.records,
        }
    }
}

/// The total squared error of a job.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregateCost {
    pub key: CostKey,
    /// Sum of squared errors, not averaged.
    pub total: f64,
    pub records: u64,
}

impl AggregateCost {
    /// `total / records`, or `None` when nothing was scored.
    pub fn mean_squared_error(&self) -> Option<f64> {
        (self.records > 0).then(|| self.total / self.records as f64)
    }

    /// False when a NaN or infinity reached the total.
    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
    }

    /// The `key\tvalue` output line, newline included.
    pub fn to_line(&self) -> String {
        format!("{}\t{}\n", self.key, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partials(values: &[f64]) -> Vec<PartialCost> {
        values.iter().copied().map(PartialCost::from_term).collect()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-5 * a.abs().max(b.abs()).max(1.0)
    }

    #[test]
    fn key_round_trips_through_bytes() {
        assert_eq!(CostKey::from_bytes(&CostKey::Total.to_bytes()).unwrap(), CostKey::Total);
        assert!(matches!(CostKey::from_bytes(b"1"), Err(CostError::UnknownKey(_))));
    }

    #[test]
    fn decode_rejects_wrong_width() {
        assert!(PartialCost::decode(Bytes::from_static(&[0; 8])).is_err());
        let p = PartialCost { sum: 2.5, records: 3 };
        assert_eq!(PartialCost::decode(p.encode()).unwrap(), p);
    }

    #[test]
    fn grouping_does_not_change_the_sum() {
        let terms = [0.1, 49.0, 3.25, 1e6, 7.5e-3, 12.0, 0.0, 81.0];
        let direct = LocalAggregator::combine(partials(&terms));

        for split in 1..terms.len() {
            let (a, b) = terms.split_at(split);
            let grouped = LocalAggregator::combine([
                LocalAggregator::combine(partials(a)),
                LocalAggregator::combine(partials(b)),
            ]);
            assert!(close(grouped.sum, direct.sum));
            assert_eq!(grouped.records, direct.records);
        }

        let mut reversed = terms.to_vec();
        reversed.reverse();
        assert!(close(LocalAggregator::combine(partials(&reversed)).sum, direct.sum));
    }

    #[test]
    fn combining_twice_is_transparent() {
        let terms = [1.0, 2.0, 3.0, 4.0];
        let once = LocalAggregator::combine(partials(&terms));
        let twice = LocalAggregator::combine([LocalAggregator::combine([once])]);
        assert_eq!(once, twice);
    }

    #[test]
    fn reducer_sums_under_the_sentinel() {
        let mut reducer = GlobalReducer::new();
        reducer.absorb(CostKey::Total, PartialCost::from_term(0.0));
        reducer
            .absorb_encoded(b"cost", PartialCost { sum: 49.0, records: 1 }.encode())
            .unwrap();
        assert_eq!(reducer.results().count(), 1);
        let cost = reducer.finish();
        assert_eq!(cost.total, 49.0);
        assert_eq!(cost.records, 2);
        assert_eq!(cost.mean_squared_error(), Some(24.5));
        assert_eq!(cost.to_line(), "cost\t49\n");
    }

    #[test]
    fn empty_job_costs_zero() {
        let cost = GlobalReducer::new().finish();
        assert_eq!(cost.total, 0.0);
        assert_eq!(cost.mean_squared_error(), None);
    }

    #[test]
    fn nan_is_kept_visible() {
        let mut cost = GlobalReducer::default();
        cost.absorb(CostKey::Total, PartialCost::from_term(f64::NAN));
        cost.absorb(CostKey::Total, PartialCost::from_term(1.0));
        let cost = cost.finish();
        assert!(!cost.is_finite());
        assert_eq!(cost.to_line(), "cost\tNaN\n");
    }
}
