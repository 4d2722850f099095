#![forbid(unsafe_code)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wb_columnar::{Column, ColumnError};
use wb_frame::{AlignmentError, DataFrame, FrameError, Provenance, Series};
use wb_index::{ColumnLabel, Index, OrdinalAlignment, RowLabel, align_ordinal};
use wb_runtime::{ComputePolicy, ConfigurationError, OpsLedger};
use wb_types::{DType, Scalar};

/// Aggregate functions the executor supports. Parsed from the names the
/// reference library accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Sum,
    Mean,
    Min,
    Max,
    Count,
}

impl AggFunc {
    pub fn parse(name: &str) -> Result<Self, AggSpecError> {
        match name {
            "sum" => Ok(Self::Sum),
            "mean" => Ok(Self::Mean),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => Err(AggSpecError::UnknownFunction(other.to_owned())),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }

    /// Whether the function only applies to numeric columns. Whole-frame
    /// aggregation silently drops non-numeric columns for these; explicit
    /// per-column specs fail instead.
    #[must_use]
    pub fn is_numeric_only(self) -> bool {
        matches!(self, Self::Sum | Self::Mean)
    }
}

/// Aggregation spec, the closed form of the reference library's duck-typed
/// `agg` argument: one function for everything, one per column, or an
/// ordered function list per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AggSpec {
    Single(AggFunc),
    PerColumn(Vec<(ColumnLabel, AggFunc)>),
    PerColumnMulti(Vec<(ColumnLabel, Vec<AggFunc>)>),
}

impl AggSpec {
    fn validate(&self) -> Result<(), AggSpecError> {
        match self {
            Self::Single(_) => Ok(()),
            Self::PerColumn(pairs) => {
                if pairs.is_empty() {
                    return Err(AggSpecError::EmptySpec);
                }
                Ok(())
            }
            Self::PerColumnMulti(pairs) => {
                if pairs.is_empty() || pairs.iter().any(|(_, funcs)| funcs.is_empty()) {
                    return Err(AggSpecError::EmptySpec);
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggSpecError {
    #[error("unknown aggregate function name: {0}")]
    UnknownFunction(String),
    #[error("aggregation spec references unknown column {0}")]
    UnknownColumn(ColumnLabel),
    #[error("aggregate '{func}' cannot run on non-numeric column {label}")]
    IncompatibleAggregate {
        func: &'static str,
        label: ColumnLabel,
    },
    #[error("aggregation spec names no columns or functions")]
    EmptySpec,
}

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error(transparent)]
    Alignment(#[from] AlignmentError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Spec(#[from] AggSpecError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupByOptions {
    /// When true the group keys become the result row identity; when false
    /// the key becomes an ordinary leading column and the identity is a
    /// fresh ordinal sequence.
    pub as_index: bool,
    /// When true the missing-key group is dropped. Missing keys form their
    /// own group by default.
    pub dropna: bool,
}

impl Default for GroupByOptions {
    fn default() -> Self {
        Self {
            as_index: true,
            dropna: false,
        }
    }
}

/// Alignment Resolver: engine precondition, cross-frame admission gate,
/// then inner alignment by ordinal position.
fn resolve_alignment(
    target: &Provenance,
    key: &Provenance,
    target_index: &Index,
    key_index: &Index,
    policy: &ComputePolicy,
    ledger: &mut OpsLedger,
) -> Result<OrdinalAlignment, GroupByError> {
    if !target.same_engine(key) {
        return Err(AlignmentError::ForeignKeySource {
            frame: target.engine(),
            key: key.engine(),
        }
        .into());
    }
    if !target.same_frame(key) {
        policy.check_cross_frame("groupby", ledger)?;
    }

    let plan = align_ordinal(target_index, key_index);
    #[cfg(feature = "tracing")]
    tracing::debug!(
        rows = plan.rows,
        dropped_target = plan.dropped_left(),
        dropped_key = plan.dropped_right(),
        "resolved ordinal alignment for groupby"
    );
    Ok(plan)
}

/// A frame grouped by a key series, possibly sourced from another frame.
/// Construction is the submission step; `agg` and friends materialize.
#[derive(Debug)]
pub struct FrameGroupBy<'f> {
    frame: &'f DataFrame,
    key_name: ColumnLabel,
    keys: Vec<Scalar>,
    rows: usize,
    options: GroupByOptions,
    projection: Option<Vec<ColumnLabel>>,
}

impl<'f> FrameGroupBy<'f> {
    pub fn resolve(
        frame: &'f DataFrame,
        key: &Series,
        options: GroupByOptions,
        policy: &ComputePolicy,
        ledger: &mut OpsLedger,
    ) -> Result<Self, GroupByError> {
        let plan = resolve_alignment(
            frame.provenance(),
            key.provenance(),
            frame.index(),
            key.index(),
            policy,
            ledger,
        )?;

        Ok(Self {
            frame,
            key_name: key.name().clone(),
            keys: key.values()[..plan.rows].to_vec(),
            rows: plan.rows,
            options,
            projection: None,
        })
    }

    /// Column-projected grouping: narrows aggregation targets to `labels`,
    /// in the given order.
    pub fn select(mut self, labels: &[ColumnLabel]) -> Result<Self, GroupByError> {
        for label in labels {
            if self.frame.column(label).is_none() {
                return Err(AggSpecError::UnknownColumn(label.clone()).into());
            }
        }
        self.projection = Some(labels.to_vec());
        Ok(self)
    }

    /// Series-level grouping of a single column of the frame.
    pub fn column(&self, label: &ColumnLabel) -> Result<SeriesGroupBy, GroupByError> {
        let column = self
            .frame
            .column(label)
            .ok_or_else(|| FrameError::UnknownColumn(label.clone()))?;

        Ok(SeriesGroupBy {
            name: label.clone(),
            dtype: column.dtype(),
            values: column.values()[..self.rows].to_vec(),
            keys: self.keys.clone(),
            key_name: self.key_name.clone(),
            options: self.options,
        })
    }

    /// Materializes the grouped aggregation.
    pub fn agg(&self, spec: &AggSpec) -> Result<DataFrame, GroupByError> {
        spec.validate()?;
        let (group_labels, slots) = group_slots(&self.keys, self.options.dropna);
        let groups = group_labels.len();

        let targets = self.resolve_targets(spec)?;
        let mut columns = Vec::with_capacity(targets.len());
        for (out_label, column, func) in targets {
            let values =
                aggregate_values(&column.values()[..self.rows], column.dtype(), &slots, groups, func);
            let dtype = output_dtype(func, column.dtype());
            columns.push((out_label, Column::new(dtype, values)?));
        }

        shape_frame(group_labels, columns, &self.key_name, self.options.as_index)
    }

    pub fn sum(&self) -> Result<DataFrame, GroupByError> {
        self.agg(&AggSpec::Single(AggFunc::Sum))
    }

    pub fn mean(&self) -> Result<DataFrame, GroupByError> {
        self.agg(&AggSpec::Single(AggFunc::Mean))
    }

    pub fn min(&self) -> Result<DataFrame, GroupByError> {
        self.agg(&AggSpec::Single(AggFunc::Min))
    }

    pub fn max(&self) -> Result<DataFrame, GroupByError> {
        self.agg(&AggSpec::Single(AggFunc::Max))
    }

    pub fn count(&self) -> Result<DataFrame, GroupByError> {
        self.agg(&AggSpec::Single(AggFunc::Count))
    }

    fn resolve_targets(
        &self,
        spec: &AggSpec,
    ) -> Result<Vec<(ColumnLabel, &'f Column, AggFunc)>, GroupByError> {
        let scope: Vec<(ColumnLabel, &'f Column)> = match &self.projection {
            Some(labels) => labels
                .iter()
                .map(|label| {
                    let column = self
                        .frame
                        .column(label)
                        .ok_or_else(|| FrameError::UnknownColumn(label.clone()))?;
                    Ok((label.clone(), column))
                })
                .collect::<Result<_, FrameError>>()?,
            None => self
                .frame
                .columns()
                .iter()
                .map(|(label, column)| (label.clone(), column))
                .collect(),
        };

        match spec {
            AggSpec::Single(func) => Ok(scope
                .into_iter()
                .filter(|(_, column)| {
                    !(func.is_numeric_only() && matches!(column.dtype(), DType::Utf8))
                })
                .map(|(label, column)| (label, column, *func))
                .collect()),
            AggSpec::PerColumn(pairs) => pairs
                .iter()
                .map(|(label, func)| {
                    let column = find_in_scope(&scope, label)?;
                    check_compat(*func, label, column.dtype())?;
                    Ok((label.clone(), column, *func))
                })
                .collect::<Result<_, AggSpecError>>()
                .map_err(GroupByError::from),
            AggSpec::PerColumnMulti(pairs) => {
                let mut targets = Vec::new();
                for (label, funcs) in pairs {
                    let column = find_in_scope(&scope, label)?;
                    for func in funcs {
                        check_compat(*func, label, column.dtype())?;
                        targets.push((label.child(func.name()), column, *func));
                    }
                }
                Ok(targets)
            }
        }
    }
}

/// A single series grouped by a key series, possibly cross-frame.
#[derive(Debug)]
pub struct SeriesGroupBy {
    name: ColumnLabel,
    dtype: DType,
    values: Vec<Scalar>,
    keys: Vec<Scalar>,
    key_name: ColumnLabel,
    options: GroupByOptions,
}

impl SeriesGroupBy {
    pub fn resolve(
        series: &Series,
        key: &Series,
        options: GroupByOptions,
        policy: &ComputePolicy,
        ledger: &mut OpsLedger,
    ) -> Result<Self, GroupByError> {
        let plan = resolve_alignment(
            series.provenance(),
            key.provenance(),
            series.index(),
            key.index(),
            policy,
            ledger,
        )?;

        Ok(Self {
            name: series.name().clone(),
            dtype: series.column().dtype(),
            values: series.values()[..plan.rows].to_vec(),
            keys: key.values()[..plan.rows].to_vec(),
            key_name: key.name().clone(),
            options,
        })
    }

    /// Materializes as a series whose row identity is the group keys.
    pub fn agg(&self, func: AggFunc) -> Result<Series, GroupByError> {
        check_compat(func, &self.name, self.dtype)?;
        let (group_labels, slots) = group_slots(&self.keys, self.options.dropna);
        let groups = group_labels.len();
        let values = aggregate_values(&self.values, self.dtype, &slots, groups, func);
        let column = Column::new(output_dtype(func, self.dtype), values)?;
        Ok(Series::new(
            self.name.clone(),
            Index::new(group_labels),
            column,
        )?)
    }

    /// Materializes in the `as_index = false` shape: the key as a leading
    /// column, the aggregate beside it, and a fresh ordinal identity.
    pub fn agg_flat(&self, func: AggFunc) -> Result<DataFrame, GroupByError> {
        check_compat(func, &self.name, self.dtype)?;
        let (group_labels, slots) = group_slots(&self.keys, self.options.dropna);
        let groups = group_labels.len();
        let values = aggregate_values(&self.values, self.dtype, &slots, groups, func);
        let column = Column::new(output_dtype(func, self.dtype), values)?;
        shape_frame(
            group_labels,
            vec![(self.name.clone(), column)],
            &self.key_name,
            false,
        )
    }

    pub fn sum(&self) -> Result<Series, GroupByError> {
        self.agg(AggFunc::Sum)
    }

    pub fn mean(&self) -> Result<Series, GroupByError> {
        self.agg(AggFunc::Mean)
    }

    pub fn min(&self) -> Result<Series, GroupByError> {
        self.agg(AggFunc::Min)
    }

    pub fn max(&self) -> Result<Series, GroupByError> {
        self.agg(AggFunc::Max)
    }

    pub fn count(&self) -> Result<Series, GroupByError> {
        self.agg(AggFunc::Count)
    }
}

fn find_in_scope<'f>(
    scope: &[(ColumnLabel, &'f Column)],
    label: &ColumnLabel,
) -> Result<&'f Column, AggSpecError> {
    scope
        .iter()
        .find(|(candidate, _)| candidate == label)
        .map(|(_, column)| *column)
        .ok_or_else(|| AggSpecError::UnknownColumn(label.clone()))
}

fn check_compat(func: AggFunc, label: &ColumnLabel, dtype: DType) -> Result<(), AggSpecError> {
    if func.is_numeric_only() && matches!(dtype, DType::Utf8) {
        return Err(AggSpecError::IncompatibleAggregate {
            func: func.name(),
            label: label.clone(),
        });
    }
    Ok(())
}

/// Result Shaper: pads labels to one depth and applies the `as_index`
/// policy to the key.
fn shape_frame(
    group_labels: Vec<RowLabel>,
    columns: Vec<(ColumnLabel, Column)>,
    key_name: &ColumnLabel,
    as_index: bool,
) -> Result<DataFrame, GroupByError> {
    if as_index {
        let depth = columns.iter().map(|(label, _)| label.depth()).max().unwrap_or(1);
        let columns = columns
            .into_iter()
            .map(|(label, column)| (label.pad_to(depth), column))
            .collect();
        return Ok(DataFrame::new(Index::new(group_labels), columns)?);
    }

    let depth = columns
        .iter()
        .map(|(label, _)| label.depth())
        .max()
        .unwrap_or(1)
        .max(key_name.depth());
    let groups = group_labels.len();
    let key_column = Column::from_values(group_labels.iter().map(RowLabel::to_scalar).collect())?;

    let mut out = Vec::with_capacity(columns.len() + 1);
    out.push((key_name.pad_to(depth), key_column));
    for (label, column) in columns {
        out.push((label.pad_to(depth), column));
    }

    Ok(DataFrame::new(Index::from_range(groups), out)?)
}

/// Grouping Executor slot assignment: distinct keys in first-seen order and
/// one slot per surviving row. Missing keys share one group unless dropped.
fn group_slots(keys: &[Scalar], dropna: bool) -> (Vec<RowLabel>, Vec<Option<usize>>) {
    if let Some(out) = try_group_slots_dense_int64(keys, dropna) {
        return out;
    }

    let mut labels = Vec::new();
    let mut lookup = HashMap::<KeyRef<'_>, usize>::new();
    let mut slots = Vec::with_capacity(keys.len());

    for key in keys {
        if dropna && key.is_missing() {
            slots.push(None);
            continue;
        }

        let key_ref = KeyRef::from_scalar(key);
        let slot = match lookup.get(&key_ref) {
            Some(&slot) => slot,
            None => {
                let slot = labels.len();
                lookup.insert(key_ref, slot);
                labels.push(RowLabel::from_scalar(key));
                slot
            }
        };
        slots.push(Some(slot));
    }

    (labels, slots)
}

/// Borrowed group-key identity; float keys hash by normalized bits so NaN
/// payloads and signed zero collapse.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum KeyRef<'a> {
    Missing,
    Bool(bool),
    Int64(i64),
    FloatBits(u64),
    Utf8(&'a str),
}

impl<'a> KeyRef<'a> {
    fn from_scalar(key: &'a Scalar) -> Self {
        if key.is_missing() {
            return Self::Missing;
        }
        match key {
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) => Self::FloatBits(if *v == 0.0 {
                0.0_f64.to_bits()
            } else {
                v.to_bits()
            }),
            Scalar::Utf8(v) => Self::Utf8(v.as_str()),
            Scalar::Null(_) => Self::Missing,
        }
    }
}

const DENSE_INT_KEY_SPAN_LIMIT: i128 = 65_536;

/// Dense-bucket fast path for `Int64` key runs within a bounded span.
/// Bails to the generic map path for any other key shape, including kept
/// missing keys.
fn try_group_slots_dense_int64(
    keys: &[Scalar],
    dropna: bool,
) -> Option<(Vec<RowLabel>, Vec<Option<usize>>)> {
    let mut min_key = i64::MAX;
    let mut max_key = i64::MIN;
    let mut saw_int_key = false;

    for key in keys {
        match key {
            Scalar::Int64(v) => {
                saw_int_key = true;
                min_key = min_key.min(*v);
                max_key = max_key.max(*v);
            }
            Scalar::Null(_) if dropna => continue,
            _ => return None,
        }
    }

    if !saw_int_key {
        // All keys dropped (or no keys at all).
        return Some((Vec::new(), vec![None; keys.len()]));
    }

    let span = i128::from(max_key) - i128::from(min_key) + 1;
    if span <= 0 || span > DENSE_INT_KEY_SPAN_LIMIT {
        return None;
    }

    let bucket_len = usize::try_from(span).ok()?;
    let mut bucket_slot: Vec<Option<usize>> = vec![None; bucket_len];
    let mut labels = Vec::new();
    let mut slots = Vec::with_capacity(keys.len());

    for key in keys {
        let value = match key {
            Scalar::Int64(v) => *v,
            // Only reachable when dropna: non-dropped missing keys bailed
            // out in the scan above.
            _ => {
                slots.push(None);
                continue;
            }
        };

        let bucket = usize::try_from(i128::from(value) - i128::from(min_key)).ok()?;
        let slot = match bucket_slot[bucket] {
            Some(slot) => slot,
            None => {
                let slot = labels.len();
                bucket_slot[bucket] = Some(slot);
                labels.push(RowLabel::Int64(value));
                slot
            }
        };
        slots.push(Some(slot));
    }

    Some((labels, slots))
}

fn output_dtype(func: AggFunc, input: DType) -> DType {
    match func {
        AggFunc::Count => DType::Int64,
        AggFunc::Mean => DType::Float64,
        AggFunc::Sum => match input {
            DType::Bool | DType::Int64 => DType::Int64,
            _ => DType::Float64,
        },
        AggFunc::Min | AggFunc::Max => input,
    }
}

/// Folds one value column into per-group aggregates. Missing values are
/// skipped; what an empty group yields depends on the function (zero for
/// sum and count, missing for the rest), matching the reference library.
fn aggregate_values(
    values: &[Scalar],
    dtype: DType,
    slots: &[Option<usize>],
    groups: usize,
    func: AggFunc,
) -> Vec<Scalar> {
    match func {
        AggFunc::Count => {
            let mut counts = vec![0_i64; groups];
            for (value, slot) in values.iter().zip(slots) {
                let Some(slot) = slot else { continue };
                if !value.is_missing() {
                    counts[*slot] += 1;
                }
            }
            counts.into_iter().map(Scalar::Int64).collect()
        }
        AggFunc::Sum => match dtype {
            DType::Bool | DType::Int64 => {
                let mut sums = vec![0_i64; groups];
                for (value, slot) in values.iter().zip(slots) {
                    let Some(slot) = slot else { continue };
                    match value {
                        Scalar::Int64(v) => sums[*slot] += v,
                        Scalar::Bool(v) => sums[*slot] += i64::from(*v),
                        _ => {}
                    }
                }
                sums.into_iter().map(Scalar::Int64).collect()
            }
            _ => {
                let mut sums = vec![0.0_f64; groups];
                for (value, slot) in values.iter().zip(slots) {
                    let Some(slot) = slot else { continue };
                    if value.is_missing() {
                        continue;
                    }
                    if let Ok(v) = value.to_f64() {
                        sums[*slot] += v;
                    }
                }
                sums.into_iter().map(Scalar::Float64).collect()
            }
        },
        AggFunc::Mean => {
            let mut sums = vec![0.0_f64; groups];
            let mut counts = vec![0_u64; groups];
            for (value, slot) in values.iter().zip(slots) {
                let Some(slot) = slot else { continue };
                if value.is_missing() {
                    continue;
                }
                if let Ok(v) = value.to_f64() {
                    sums[*slot] += v;
                    counts[*slot] += 1;
                }
            }
            sums.into_iter()
                .zip(counts)
                .map(|(sum, count)| {
                    if count == 0 {
                        Scalar::missing_for_dtype(DType::Float64)
                    } else {
                        Scalar::Float64(sum / count as f64)
                    }
                })
                .collect()
        }
        AggFunc::Min | AggFunc::Max => {
            let mut best: Vec<Option<Scalar>> = vec![None; groups];
            for (value, slot) in values.iter().zip(slots) {
                let Some(slot) = slot else { continue };
                if value.is_missing() {
                    continue;
                }
                let replace = match &best[*slot] {
                    None => true,
                    Some(current) => {
                        let ord = value.total_cmp(current);
                        if matches!(func, AggFunc::Min) {
                            ord.is_lt()
                        } else {
                            ord.is_gt()
                        }
                    }
                };
                if replace {
                    best[*slot] = Some(value.clone());
                }
            }
            best.into_iter()
                .map(|slot| slot.unwrap_or_else(|| Scalar::missing_for_dtype(dtype)))
                .collect()
        }
    }
}
