//! A MapReduce-compatible implementation of the linear-regression cost.
//!
//! The map side scores every record of a shard and emits one partial per
//! record under the sentinel key. The same reduce function serves as both
//! combiner and reducer since its output is again a partial.

use std::sync::Arc;

use crate::aggregate::{CostKey, LocalAggregator, PartialCost};
use crate::cost::CostEvaluator;
use crate::error::RecordLocation;
use crate::record::{decode_line, parse_record, record_lines};
use crate::*;
use anyhow::Result;
use bytes::Bytes;

pub fn map(kv: KeyValue, ctx: &MapContext) -> MapOutput {
    let shard: Arc<str> = utils::string_from_bytes(kv.key)?.into();
    let content = kv.value;
    let lines = record_lines(&content)
        .map(|(line_no, line)| (line_no, content.slice_ref(line)))
        .collect::<Vec<_>>();

    let evaluator = CostEvaluator::new(ctx.params.clone(), ctx.bias);
    let key = CostKey::Total.to_bytes();

    let iter = lines.into_iter().map(move |(line_no, line)| -> Result<KeyValue> {
        let location = RecordLocation::new(&*shard, line_no);
        let record = parse_record(decode_line(&line, &location)?, &location)?;
        let term = evaluator.evaluate(&record, &location)?;
        Ok(KeyValue::new(key.clone(), PartialCost::from_term(term).encode()))
    });
    Ok(Box::new(iter))
}

pub fn reduce(key: Bytes, values: Box<dyn Iterator<Item = Bytes> + '_>) -> Result<Bytes> {
    CostKey::from_bytes(&key)?;
    let partial = LocalAggregator::combine_encoded(values)?;
    Ok(partial.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CostError;
    use crate::params::ParameterVector;
    use crate::record::BiasColumn;

    fn ctx(theta: &[f64]) -> MapContext {
        MapContext::new(Arc::new(ParameterVector::new(theta.to_vec()).unwrap()), BiasColumn::Implicit)
    }

    fn shard(name: &'static str, body: &'static str) -> KeyValue {
        KeyValue::new(Bytes::from_static(name.as_bytes()), Bytes::from_static(body.as_bytes()))
    }

    #[test]
    fn map_emits_one_partial_per_record() {
        let out: Vec<_> = map(shard("s0", "5,5\n0,3\n"), &ctx(&[1.0, 2.0]))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(out.len(), 2);
        let terms: Vec<f64> = out
            .iter()
            .map(|kv| PartialCost::decode(kv.value()).unwrap().sum)
            .collect();
        // 1 + 2*5 - 5 = 6 and 1 + 2*3 - 0 = 7
        assert_eq!(terms, vec![36.0, 49.0]);
        assert!(out.iter().all(|kv| kv.key() == CostKey::Total.to_bytes()));
    }

    #[test]
    fn bad_record_fails_alone() {
        let items: Vec<_> = map(shard("s1", "5,5\na,b\n1,1\n"), &ctx(&[0.0, 1.0])).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[2].is_ok());
        let err = items[1].as_ref().unwrap_err();
        let cost_err = err.downcast_ref::<CostError>().unwrap();
        assert!(cost_err.is_record_local());
        assert_eq!(cost_err.location().unwrap(), &RecordLocation::new("s1", 2));
    }

    #[test]
    fn undecodable_line_fails_alone() {
        let body = KeyValue::new(Bytes::from_static(b"s2"), Bytes::from_static(b"5,5\n\xff,1\n2,2\n"));
        let items: Vec<_> = map(body, &ctx(&[0.0, 1.0])).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[2].is_ok());
        let err = items[1].as_ref().unwrap_err();
        let cost_err = err.downcast_ref::<CostError>().unwrap();
        assert!(matches!(cost_err, CostError::Parse { token, .. } if token == crate::record::INVALID_UTF8));
        assert_eq!(cost_err.location().unwrap(), &RecordLocation::new("s2", 2));
    }

    #[test]
    fn reduce_output_feeds_back_into_reduce() {
        let a = PartialCost::from_term(1.5).encode();
        let b = PartialCost::from_term(2.5).encode();
        let once = reduce(CostKey::Total.to_bytes(), Box::new(vec![a, b].into_iter())).unwrap();
        let twice = reduce(CostKey::Total.to_bytes(), Box::new(std::iter::once(once.clone()))).unwrap();
        assert_eq!(once, twice);
        assert_eq!(PartialCost::decode(twice).unwrap(), PartialCost { sum: 4.0, records: 2 });
    }

    #[test]
    fn reduce_refuses_foreign_keys() {
        assert!(reduce(Bytes::from_static(b"1"), Box::new(std::iter::empty::<Bytes>())).is_err());
    }
}
