#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wb_columnar::{ArithmeticOp, Column, ColumnError};
use wb_index::{ColumnLabel, Index, RowLabel, align_ordinal};
use wb_runtime::{ComputePolicy, ConfigurationError, OpsLedger};
use wb_types::Scalar;

/// Identity of the execution engine a frame is bound to. Frames from
/// different engines can never be aligned against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineId(pub u32);

impl EngineId {
    pub const LOCAL: Self = Self(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(u64);

/// Lineage marker standing in for the external engine's anchor tracking:
/// which engine a frame lives on and which constructed frame it descends
/// from. Extracted series and elementwise arithmetic preserve it; newly
/// constructed frames get a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    engine: EngineId,
    frame: FrameId,
}

impl Provenance {
    #[must_use]
    pub fn local() -> Self {
        Self::on_engine(EngineId::LOCAL)
    }

    #[must_use]
    pub fn on_engine(engine: EngineId) -> Self {
        static NEXT_FRAME: AtomicU64 = AtomicU64::new(0);
        Self {
            engine,
            frame: FrameId(NEXT_FRAME.fetch_add(1, Ordering::Relaxed)),
        }
    }

    #[must_use]
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    #[must_use]
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    #[must_use]
    pub fn same_engine(&self, other: &Self) -> bool {
        self.engine == other.engine
    }

    #[must_use]
    pub fn same_frame(&self, other: &Self) -> bool {
        self.engine == other.engine && self.frame == other.frame
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlignmentError {
    #[error("grouping key is bound to engine {key:?} but the target frame is bound to {frame:?}")]
    ForeignKeySource { frame: EngineId, key: EngineId },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match length ({column_len}) of column {label}")]
    LengthMismatch {
        label: ColumnLabel,
        index_len: usize,
        column_len: usize,
    },
    #[error("frame columns mix label depths ({left} vs {right})")]
    MixedColumnDepth { left: usize, right: usize },
    #[error("unknown column label: {0}")]
    UnknownColumn(ColumnLabel),
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: ColumnLabel,
    index: Index,
    column: Column,
    provenance: Provenance,
}

impl Series {
    pub fn new(name: impl Into<ColumnLabel>, index: Index, column: Column) -> Result<Self, FrameError> {
        let name = name.into();
        if index.len() != column.len() {
            return Err(FrameError::LengthMismatch {
                label: name,
                index_len: index.len(),
                column_len: column.len(),
            });
        }

        Ok(Self {
            name,
            index,
            column,
            provenance: Provenance::local(),
        })
    }

    pub fn from_values(
        name: impl Into<ColumnLabel>,
        index_labels: Vec<RowLabel>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        let index = Index::new(index_labels);
        let column = Column::from_values(values)?;
        Self::new(name, index, column)
    }

    /// Rebinds this series to another engine, assigning a fresh frame id.
    /// Integration surface for engine adapters and tests.
    #[must_use]
    pub fn bound_to(mut self, engine: EngineId) -> Self {
        self.provenance = Provenance::on_engine(engine);
        self
    }

    #[must_use]
    pub fn name(&self) -> &ColumnLabel {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Elementwise arithmetic against a scalar operand. Evaluates before
    /// any alignment; the result stays anchored to this series' frame.
    pub fn scalar_op(&self, operand: &Scalar, op: ArithmeticOp) -> Result<Self, FrameError> {
        let column = self.column.scalar_numeric(operand, op)?;
        Ok(Self {
            name: self.name.clone(),
            index: self.index.clone(),
            column,
            provenance: self.provenance,
        })
    }

    pub fn add_scalar(&self, operand: &Scalar) -> Result<Self, FrameError> {
        self.scalar_op(operand, ArithmeticOp::Add)
    }

    /// Elementwise addition of two series under inner ordinal alignment:
    /// both operands truncate to the shorter length, pairing row `i` with
    /// row `i`. Operands from different frames must pass the policy gate.
    pub fn add_with_policy(
        &self,
        other: &Self,
        policy: &ComputePolicy,
        ledger: &mut OpsLedger,
    ) -> Result<Self, FrameError> {
        if !self.provenance.same_engine(&other.provenance) {
            return Err(AlignmentError::ForeignKeySource {
                frame: self.provenance.engine(),
                key: other.provenance.engine(),
            }
            .into());
        }
        if !self.provenance.same_frame(&other.provenance) {
            policy.check_cross_frame("series_add", ledger)?;
        }

        let plan = align_ordinal(&self.index, &other.index);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            rows = plan.rows,
            dropped_left = plan.dropped_left(),
            dropped_right = plan.dropped_right(),
            "resolved ordinal alignment for series_add"
        );

        let left = self.column.take_prefix(plan.rows);
        let right = other.column.take_prefix(plan.rows);
        let column = left.binary_numeric(&right, ArithmeticOp::Add)?;

        let name = if self.name == other.name {
            self.name.clone()
        } else {
            ColumnLabel::flat(format!("{}+{}", self.name, other.name))
        };

        Ok(Self {
            name,
            index: self.index.take_prefix(plan.rows),
            column,
            provenance: self.provenance,
        })
    }

    /// Verification-only deterministic ordering by row label.
    #[must_use]
    pub fn sort_by_label(&self) -> Self {
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by(|&a, &b| self.index.labels()[a].cmp(&self.index.labels()[b]));
        Self {
            name: self.name.clone(),
            index: self.index.take(&order),
            column: self.column.take(&order),
            provenance: self.provenance,
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.index == other.index
            && self.column.semantic_eq(&other.column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    index: Index,
    columns: Vec<(ColumnLabel, Column)>,
    provenance: Provenance,
}

impl DataFrame {
    /// Construct a frame with a fresh provenance. All columns must match
    /// the index length and share one label depth. Duplicate labels are
    /// permitted; lookups resolve to the first match.
    pub fn new(index: Index, columns: Vec<(ColumnLabel, Column)>) -> Result<Self, FrameError> {
        Self::from_parts(index, columns, Provenance::local())
    }

    fn from_parts(
        index: Index,
        columns: Vec<(ColumnLabel, Column)>,
        provenance: Provenance,
    ) -> Result<Self, FrameError> {
        let mut depth = None;
        for (label, column) in &columns {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    label: label.clone(),
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
            match depth {
                None => depth = Some(label.depth()),
                Some(d) if d != label.depth() => {
                    return Err(FrameError::MixedColumnDepth {
                        left: d,
                        right: label.depth(),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            index,
            columns,
            provenance,
        })
    }

    /// Convenience constructor over raw scalar columns with the default
    /// ordinal identity.
    pub fn from_scalar_columns(
        columns: Vec<(ColumnLabel, Vec<Scalar>)>,
    ) -> Result<Self, FrameError> {
        let rows = columns.first().map_or(0, |(_, values)| values.len());
        let built = columns
            .into_iter()
            .map(|(label, values)| Ok((label, Column::from_values(values)?)))
            .collect::<Result<Vec<_>, ColumnError>>()?;
        Self::new(Index::from_range(rows), built)
    }

    /// Rebinds this frame to another engine, assigning a fresh frame id.
    #[must_use]
    pub fn bound_to(mut self, engine: EngineId) -> Self {
        self.provenance = Provenance::on_engine(engine);
        self
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn columns(&self) -> &[(ColumnLabel, Column)] {
        &self.columns
    }

    #[must_use]
    pub fn column_labels(&self) -> Vec<ColumnLabel> {
        self.columns.iter().map(|(label, _)| label.clone()).collect()
    }

    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// First column carrying `label`, if any.
    #[must_use]
    pub fn column(&self, label: &ColumnLabel) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(candidate, _)| candidate == label)
            .map(|(_, column)| column)
    }

    /// Extracts one column as a series. The series inherits this frame's
    /// provenance: it still counts as sourced from this frame.
    pub fn series(&self, label: &ColumnLabel) -> Result<Series, FrameError> {
        let column = self
            .column(label)
            .ok_or_else(|| FrameError::UnknownColumn(label.clone()))?;
        Ok(Series {
            name: label.clone(),
            index: self.index.clone(),
            column: column.clone(),
            provenance: self.provenance,
        })
    }

    /// Column projection in caller order, keeping index and provenance.
    pub fn select(&self, labels: &[ColumnLabel]) -> Result<Self, FrameError> {
        let columns = labels
            .iter()
            .map(|label| {
                let column = self
                    .column(label)
                    .ok_or_else(|| FrameError::UnknownColumn(label.clone()))?;
                Ok((label.clone(), column.clone()))
            })
            .collect::<Result<Vec<_>, FrameError>>()?;
        Self::from_parts(self.index.clone(), columns, self.provenance)
    }

    /// Verification-only deterministic ordering by row label.
    #[must_use]
    pub fn sort_rows_by_label(&self) -> Self {
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by(|&a, &b| self.index.labels()[a].cmp(&self.index.labels()[b]));
        self.gather_rows(&order)
    }

    /// Verification-only deterministic ordering by the values of the given
    /// columns, compared left to right; missing values sort last.
    pub fn sort_rows_by_columns(&self, by: &[ColumnLabel]) -> Result<Self, FrameError> {
        let keys = by
            .iter()
            .map(|label| {
                self.column(label)
                    .ok_or_else(|| FrameError::UnknownColumn(label.clone()))
            })
            .collect::<Result<Vec<_>, FrameError>>()?;

        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by(|&a, &b| {
            for key in &keys {
                let ord = key.values()[a].total_cmp(&key.values()[b]);
                if !ord.is_eq() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        Ok(self.gather_rows(&order))
    }

    /// Replaces the row identity with a fresh default ordinal sequence.
    #[must_use]
    pub fn with_ordinal_identity(&self) -> Self {
        Self {
            index: Index::from_range(self.index.len()),
            columns: self.columns.clone(),
            provenance: self.provenance,
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|((left_label, left), (right_label, right))| {
                    left_label == right_label && left.semantic_eq(right)
                })
    }

    fn gather_rows(&self, order: &[usize]) -> Self {
        Self {
            index: self.index.take(order),
            columns: self
                .columns
                .iter()
                .map(|(label, column)| (label.clone(), column.take(order)))
                .collect(),
            provenance: self.provenance,
        }
    }
}

#[cfg(test)]
mod tests {
    use wb_columnar::Column;
    use wb_index::{ColumnLabel, Index};
    use wb_runtime::{ComputePolicy, OpsLedger};
    use wb_types::{NullKind, Scalar};

    use super::{AlignmentError, DataFrame, EngineId, FrameError, Series};

    fn series(name: &str, values: Vec<i64>) -> Series {
        let index = Index::from_range(values.len());
        let column = Column::from_values(values.into_iter().map(Scalar::Int64).collect())
            .expect("column");
        Series::new(ColumnLabel::flat(name), index, column).expect("series")
    }

    #[test]
    fn series_add_truncates_to_shorter_operand() {
        let left = series("left", vec![10, 20, 30]);
        let right = series("right", vec![1, 2]);

        let mut ledger = OpsLedger::new();
        let out = left
            .add_with_policy(&right, &ComputePolicy::cross_frame(), &mut ledger)
            .expect("add should pass");

        assert_eq!(out.values(), &[Scalar::Int64(11), Scalar::Int64(22)]);
        assert_eq!(out.index().len(), 2);
        assert_eq!(out.name().to_string(), "left+right");
        assert_eq!(ledger.records().len(), 1);
    }

    #[test]
    fn strict_policy_rejects_cross_frame_add() {
        let left = series("a", vec![1]);
        let right = series("b", vec![2]);

        let mut ledger = OpsLedger::new();
        let err = left
            .add_with_policy(&right, &ComputePolicy::strict(), &mut ledger)
            .expect_err("must reject");
        assert!(matches!(err, FrameError::Configuration(_)));
    }

    #[test]
    fn foreign_engine_operand_is_an_alignment_error() {
        let left = series("a", vec![1]);
        let right = series("b", vec![2]).bound_to(EngineId(7));

        let mut ledger = OpsLedger::new();
        let err = left
            .add_with_policy(&right, &ComputePolicy::cross_frame(), &mut ledger)
            .expect_err("must reject");
        assert!(matches!(
            err,
            FrameError::Alignment(AlignmentError::ForeignKeySource { .. })
        ));
    }

    #[test]
    fn scalar_add_preserves_provenance() {
        let base = series("b", vec![1, 2]);
        let shifted = base.add_scalar(&Scalar::Int64(1)).expect("add");
        assert!(shifted.provenance().same_frame(base.provenance()));
        assert_eq!(shifted.values(), &[Scalar::Int64(2), Scalar::Int64(3)]);
    }

    #[test]
    fn extracted_series_counts_as_sourced_from_its_frame() {
        let frame = DataFrame::from_scalar_columns(vec![(
            ColumnLabel::flat("a"),
            vec![Scalar::Int64(1), Scalar::Int64(2)],
        )])
        .expect("frame");

        let extracted = frame.series(&ColumnLabel::flat("a")).expect("series");
        assert!(extracted.provenance().same_frame(frame.provenance()));
    }

    #[test]
    fn frames_reject_mixed_label_depths() {
        let err = DataFrame::from_scalar_columns(vec![
            (ColumnLabel::flat("a"), vec![Scalar::Int64(1)]),
            (ColumnLabel::nested(["x", "b"]), vec![Scalar::Int64(2)]),
        ])
        .expect_err("must reject");
        assert!(matches!(err, FrameError::MixedColumnDepth { .. }));
    }

    #[test]
    fn select_projects_in_caller_order() {
        let frame = DataFrame::from_scalar_columns(vec![
            (ColumnLabel::flat("a"), vec![Scalar::Int64(1)]),
            (ColumnLabel::flat("b"), vec![Scalar::Int64(2)]),
        ])
        .expect("frame");

        let projected = frame
            .select(&[ColumnLabel::flat("b"), ColumnLabel::flat("a")])
            .expect("select");
        assert_eq!(
            projected.column_labels(),
            vec![ColumnLabel::flat("b"), ColumnLabel::flat("a")]
        );
        assert!(projected.provenance().same_frame(frame.provenance()));

        let err = frame.select(&[ColumnLabel::flat("zzz")]).expect_err("bad");
        assert!(matches!(err, FrameError::UnknownColumn(_)));
    }

    #[test]
    fn sort_rows_by_columns_orders_missing_last() {
        let frame = DataFrame::from_scalar_columns(vec![(
            ColumnLabel::flat("c"),
            vec![
                Scalar::Int64(3),
                Scalar::Null(NullKind::Null),
                Scalar::Int64(1),
            ],
        )])
        .expect("frame");

        let sorted = frame
            .sort_rows_by_columns(&[ColumnLabel::flat("c")])
            .expect("sort");
        let column = sorted.column(&ColumnLabel::flat("c")).expect("c");
        assert_eq!(column.values()[0], Scalar::Int64(1));
        assert_eq!(column.values()[1], Scalar::Int64(3));
        assert!(column.values()[2].is_missing());

        let reset = sorted.with_ordinal_identity();
        assert_eq!(reset.index(), &Index::from_range(3));
    }
}
