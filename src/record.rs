//! Parsing of comma-separated input records.

use serde::{Deserialize, Serialize};

use crate::error::{CostError, CostResult, RecordLocation};

/// How the columns of a record line up against theta.
///
/// `theta[0]` is always the bias and is multiplied by 1.0. The variants only
/// decide which record slot sits in front of the features and is skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BiasColumn {
    /// `y,x1,...,x(n-1)`: the target occupies the bias slot.
    #[default]
    Implicit,
    /// `y,x0,x1,...,x(n-1)`: the data carries its own leading constant column.
    Explicit,
}

impl BiasColumn {
    /// Number of fields a record must have for a theta of width `n`.
    pub fn record_width(self, n: usize) -> usize {
        match self {
            Self::Implicit => n,
            Self::Explicit => n + 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Implicit => "implicit",
            Self::Explicit => "explicit",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "implicit" | "" => Some(Self::Implicit),
            "explicit" => Some(Self::Explicit),
            _ => None,
        }
    }
}

/// One parsed input line. Element 0 is the target y.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRecord {
    values: Vec<f64>,
}

impl FeatureRecord {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// The ground-truth target. NaN for a record without fields.
    #[inline]
    pub fn y(&self) -> f64 {
        self.values.first().copied().unwrap_or(f64::NAN)
    }

    /// All fields, y included.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The slice indexed like theta. Slot 0 is the bias position and is
    /// never read by the evaluator.
    pub fn aligned(&self, bias: BiasColumn) -> &[f64] {
        match bias {
            BiasColumn::Implicit => &self.values,
            BiasColumn::Explicit => self.values.get(1..).unwrap_or(&[]),
        }
    }
}

/// Splits a line on commas and parses every field as `f64`.
///
/// Whitespace around a field is ignored; an empty field is malformed.
pub fn parse_fields(line: &str, location: &RecordLocation) -> CostResult<Vec<f64>> {
    line.split(',')
        .map(|token| {
            let token = token.trim();
            token.parse::<f64>().map_err(|_| CostError::Parse {
                location: location.clone(),
                token: token.to_string(),
            })
        })
        .collect()
}

/// Parses one non-blank input line into a record.
pub fn parse_record(line: &str, location: &RecordLocation) -> CostResult<FeatureRecord> {
    Ok(FeatureRecord::new(parse_fields(line, location)?))
}

/// Token reported for a line that is not valid UTF-8.
pub const INVALID_UTF8: &str = "<invalid utf-8>";

/// Numbered, non-blank raw lines of a shard. Line numbers start at 1.
///
/// Lines are split on `\n` before any decoding, so a bad byte only
/// affects the line it sits on.
pub fn record_lines(content: &[u8]) -> impl Iterator<Item = (usize, &[u8])> {
    content
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
}

/// Decodes one raw line. Invalid UTF-8 is a parse error at `location`.
pub fn decode_line<'a>(raw: &'a [u8], location: &RecordLocation) -> CostResult<&'a str> {
    std::str::from_utf8(raw).map_err(|_| CostError::Parse {
        location: location.clone(),
        token: INVALID_UTF8.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: usize) -> RecordLocation {
        RecordLocation::new("shard-0", line)
    }

    #[test]
    fn target_comes_first() {
        let r = parse_record("5, 5", &loc(1)).unwrap();
        assert_eq!(r.y(), 5.0);
        assert_eq!(r.values(), &[5.0, 5.0]);
    }

    #[test]
    fn malformed_line_names_token_and_line() {
        let err = parse_record("a,b,c", &loc(12)).unwrap_err();
        match err {
            CostError::Parse { location, token } => {
                assert_eq!(location, loc(12));
                assert_eq!(token, "a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_field_is_malformed() {
        let err = parse_record("1,,2", &loc(2)).unwrap_err();
        assert!(matches!(err, CostError::Parse { ref token, .. } if token.is_empty()));
    }

    #[test]
    fn aligned_slice_depends_on_bias_column() {
        let r = parse_record("9,1,2,3", &loc(1)).unwrap();
        assert_eq!(r.aligned(BiasColumn::Implicit), &[9.0, 1.0, 2.0, 3.0]);
        assert_eq!(r.aligned(BiasColumn::Explicit), &[1.0, 2.0, 3.0]);
        assert_eq!(BiasColumn::Implicit.record_width(3), 3);
        assert_eq!(BiasColumn::Explicit.record_width(3), 4);
    }

    #[test]
    fn blank_lines_are_skipped_but_counted() {
        let lines: Vec<_> = record_lines(b"1,2\r\n\n  \n3,4\n").collect();
        assert_eq!(lines, vec![(1, &b"1,2"[..]), (4, &b"3,4"[..])]);
    }

    #[test]
    fn bad_bytes_only_spoil_their_own_line() {
        let content = b"5,5\n\xff,1\n2,2\n";
        let lines: Vec<_> = record_lines(content).collect();
        assert_eq!(lines.len(), 3);

        assert_eq!(decode_line(lines[0].1, &loc(1)).unwrap(), "5,5");
        match decode_line(lines[1].1, &loc(2)).unwrap_err() {
            CostError::Parse { location, token } => {
                assert_eq!(location, loc(2));
                assert_eq!(token, INVALID_UTF8);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(decode_line(lines[2].1, &loc(3)).unwrap(), "2,2");
    }

    #[test]
    fn empty_record_does_not_panic() {
        let r = FeatureRecord::new(Vec::new());
        assert!(r.aligned(BiasColumn::Explicit).is_empty());
        assert!(r.aligned(BiasColumn::Implicit).is_empty());
        assert!(r.y().is_nan());
    }
}
