#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use wb_types::Scalar;

/// A row-identity label. `Missing` is first-class so a missing-key group can
/// be addressed without a sentinel string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RowLabel {
    Missing,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
}

impl RowLabel {
    /// Collapses missing scalars (nulls and NaN payloads) into `Missing`.
    #[must_use]
    pub fn from_scalar(value: &Scalar) -> Self {
        if value.is_missing() {
            return Self::Missing;
        }
        match value {
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) => Self::Float64(*v),
            Scalar::Utf8(v) => Self::Utf8(v.clone()),
            Scalar::Null(_) => Self::Missing,
        }
    }

    #[must_use]
    pub fn to_scalar(&self) -> Scalar {
        match self {
            Self::Missing => Scalar::Null(wb_types::NullKind::Null),
            Self::Bool(v) => Scalar::Bool(*v),
            Self::Int64(v) => Scalar::Int64(*v),
            Self::Float64(v) => Scalar::Float64(*v),
            Self::Utf8(v) => Scalar::Utf8(v.clone()),
        }
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Bool(_) => 0,
            Self::Int64(_) | Self::Float64(_) => 1,
            Self::Utf8(_) => 2,
            Self::Missing => 3,
        }
    }

    fn float_key(v: f64) -> u64 {
        // Normalize so NaN payloads and signed zero hash consistently.
        if v.is_nan() {
            f64::NAN.to_bits()
        } else if v == 0.0 {
            0.0_f64.to_bits()
        } else {
            v.to_bits()
        }
    }
}

impl PartialEq for RowLabel {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Missing, Self::Missing) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => Self::float_key(*a) == Self::float_key(*b),
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for RowLabel {}

impl Hash for RowLabel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Missing => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => Self::float_key(*v).hash(state),
            Self::Utf8(v) => v.hash(state),
        }
    }
}

impl Ord for RowLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Float64(a), Self::Float64(b)) => {
                // Stay consistent with Eq: normalized-equal floats compare
                // equal even when their bit patterns differ.
                if Self::float_key(*a) == Self::float_key(*b) {
                    Ordering::Equal
                } else {
                    a.total_cmp(b)
                }
            }
            (Self::Int64(a), Self::Float64(b)) => (*a as f64).total_cmp(b),
            (Self::Float64(a), Self::Int64(b)) => a.total_cmp(&(*b as f64)),
            (Self::Utf8(a), Self::Utf8(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for RowLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for RowLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for RowLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for RowLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl fmt::Display for RowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "NaN"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
        }
    }
}

/// A column name with one or more levels. Flat frames use a single level;
/// hierarchical frames label every column with the same depth.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnLabel {
    levels: Vec<String>,
}

impl ColumnLabel {
    #[must_use]
    pub fn flat(name: impl Into<String>) -> Self {
        Self {
            levels: vec![name.into()],
        }
    }

    #[must_use]
    pub fn nested(levels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            levels: levels.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn leaf(&self) -> &str {
        self.levels.last().map_or("", String::as_str)
    }

    /// Appends one level, e.g. turning `(B,)` into `(B, min)` for a
    /// multi-function aggregate output.
    #[must_use]
    pub fn child(&self, level: impl Into<String>) -> Self {
        let mut levels = self.levels.clone();
        levels.push(level.into());
        Self { levels }
    }

    /// Pads with trailing empty levels up to `depth`. Labels already at or
    /// beyond that depth are returned unchanged.
    #[must_use]
    pub fn pad_to(&self, depth: usize) -> Self {
        if self.levels.len() >= depth {
            return self.clone();
        }
        let mut levels = self.levels.clone();
        levels.resize(depth, String::new());
        Self { levels }
    }
}

impl From<&str> for ColumnLabel {
    fn from(value: &str) -> Self {
        Self::flat(value)
    }
}

impl From<(&str, &str)> for ColumnLabel {
    fn from(value: (&str, &str)) -> Self {
        Self::nested([value.0, value.1])
    }
}

impl fmt::Display for ColumnLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.levels.len() == 1 {
            return write!(f, "{}", self.levels[0]);
        }
        write!(f, "({})", self.levels.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<RowLabel>,
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<RowLabel>) -> Self {
        Self { labels }
    }

    /// The default ordinal identity `0..len`.
    #[must_use]
    pub fn from_range(len: usize) -> Self {
        Self::new((0..len as i64).map(RowLabel::Int64).collect())
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::new(values.into_iter().map(RowLabel::from).collect())
    }

    #[must_use]
    pub fn from_utf8(values: Vec<String>) -> Self {
        Self::new(values.into_iter().map(RowLabel::from).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[RowLabel] {
        &self.labels
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.labels.len());
        self.labels.iter().any(|label| !seen.insert(label))
    }

    /// Keeps the first `rows` labels; the positional survivors of an
    /// ordinal alignment.
    #[must_use]
    pub fn take_prefix(&self, rows: usize) -> Self {
        Self::new(self.labels.iter().take(rows).cloned().collect())
    }

    #[must_use]
    pub fn take(&self, positions: &[usize]) -> Self {
        Self::new(
            positions
                .iter()
                .map(|&pos| self.labels.get(pos).cloned().unwrap_or(RowLabel::Missing))
                .collect(),
        )
    }
}

/// Inner alignment by ordinal position: row `i` of the left pairs with row
/// `i` of the right, and whichever side is longer drops its tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinalAlignment {
    pub rows: usize,
    pub left_len: usize,
    pub right_len: usize,
}

impl OrdinalAlignment {
    /// True when no row was dropped on either side; the alignment is the
    /// identity permutation.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.rows == self.left_len && self.rows == self.right_len
    }

    #[must_use]
    pub fn dropped_left(&self) -> usize {
        self.left_len - self.rows
    }

    #[must_use]
    pub fn dropped_right(&self) -> usize {
        self.right_len - self.rows
    }
}

#[must_use]
pub fn align_ordinal(left: &Index, right: &Index) -> OrdinalAlignment {
    let left_len = left.len();
    let right_len = right.len();
    OrdinalAlignment {
        rows: left_len.min(right_len),
        left_len,
        right_len,
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnLabel, Index, OrdinalAlignment, RowLabel, align_ordinal};

    #[test]
    fn equal_lengths_align_as_identity() {
        let left = Index::from_range(4);
        let right = Index::from_range(4);
        let plan = align_ordinal(&left, &right);
        assert!(plan.is_identity());
        assert_eq!(plan.rows, 4);
    }

    #[test]
    fn longer_side_drops_its_tail() {
        let left = Index::from_range(9);
        let right = Index::from_range(7);
        assert_eq!(
            align_ordinal(&left, &right),
            OrdinalAlignment {
                rows: 7,
                left_len: 9,
                right_len: 7
            }
        );
        assert_eq!(align_ordinal(&left, &right).dropped_left(), 2);
        assert_eq!(align_ordinal(&right, &left).dropped_right(), 2);
    }

    #[test]
    fn duplicate_detection_matches_index_surface() {
        let index = Index::new(vec!["a".into(), "a".into(), "b".into()]);
        assert!(index.has_duplicates());
        assert!(!Index::from_range(3).has_duplicates());
    }

    #[test]
    fn nan_labels_collapse_into_one_key() {
        let a = RowLabel::Float64(f64::NAN);
        let b = RowLabel::Float64(f64::from_bits(f64::NAN.to_bits() | 1));
        assert_eq!(a, b);
        assert_eq!(RowLabel::Float64(0.0), RowLabel::Float64(-0.0));
    }

    #[test]
    fn missing_label_sorts_last() {
        let mut labels = vec![
            RowLabel::Missing,
            RowLabel::Int64(2),
            RowLabel::Int64(1),
            RowLabel::Utf8("a".to_owned()),
        ];
        labels.sort();
        assert_eq!(labels[0], RowLabel::Int64(1));
        assert_eq!(labels[3], RowLabel::Missing);
    }

    #[test]
    fn column_label_child_and_padding() {
        let label = ColumnLabel::nested(["x", "b"]);
        assert_eq!(label.child("min").levels(), &["x", "b", "min"]);
        assert_eq!(label.pad_to(3).levels(), &["x", "b", ""]);
        assert_eq!(ColumnLabel::flat("a").to_string(), "a");
        assert_eq!(label.to_string(), "(x, b)");
    }
}
