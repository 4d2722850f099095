#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wb_types::{DType, Scalar, TypeError, cast_scalar_owned, common_dtype, infer_dtype};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl Column {
    /// Construct a column, coercing values to the target dtype. Takes the
    /// values vec by ownership so dtype-matching inputs avoid clones.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let needs_coercion = values.iter().any(|v| {
            let d = v.dtype();
            d != dtype && d != DType::Null
        });

        let coerced = if needs_coercion {
            values
                .into_iter()
                .map(|value| cast_scalar_owned(value, dtype))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            // Values already match dtype; only remap Null variants to the
            // dtype-specific missing marker.
            values
                .into_iter()
                .map(|value| match value {
                    Scalar::Null(_) => Scalar::missing_for_dtype(dtype),
                    other => other,
                })
                .collect()
        };

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// Keeps the first `rows` values; the positional survivors of an
    /// ordinal alignment. `rows` beyond the column length is a no-op.
    #[must_use]
    pub fn take_prefix(&self, rows: usize) -> Self {
        let values: Vec<Scalar> = self.values.iter().take(rows).cloned().collect();
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype: self.dtype,
            values,
            validity,
        }
    }

    /// Gathers values at `positions`; out-of-bounds positions yield the
    /// dtype's missing marker.
    #[must_use]
    pub fn take(&self, positions: &[usize]) -> Self {
        let values: Vec<Scalar> = positions
            .iter()
            .map(|&pos| {
                self.values
                    .get(pos)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype))
            })
            .collect();
        let validity = ValidityMask::from_values(&values);
        Self {
            dtype: self.dtype,
            values,
            validity,
        }
    }

    /// Elementwise arithmetic against another column of equal length.
    /// Alignment is the caller's responsibility.
    pub fn binary_numeric(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }

        let out_dtype = binary_out_dtype(self.dtype, right.dtype, op)?;
        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(left, right)| apply_numeric(left, right, op, out_dtype))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(out_dtype, values)
    }

    /// Elementwise arithmetic against a scalar operand, broadcast across
    /// the column.
    pub fn scalar_numeric(&self, operand: &Scalar, op: ArithmeticOp) -> Result<Self, ColumnError> {
        let out_dtype = binary_out_dtype(self.dtype, operand.dtype(), op)?;
        let values = self
            .values
            .iter()
            .map(|left| apply_numeric(left, operand, op, out_dtype))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(out_dtype, values)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }
}

fn binary_out_dtype(left: DType, right: DType, op: ArithmeticOp) -> Result<DType, ColumnError> {
    let mut out = common_dtype(left, right)?;
    if matches!(out, DType::Bool) {
        out = DType::Int64;
    }
    if matches!(op, ArithmeticOp::Div) {
        out = DType::Float64;
    }
    Ok(out)
}

fn apply_numeric(
    left: &Scalar,
    right: &Scalar,
    op: ArithmeticOp,
    out_dtype: DType,
) -> Result<Scalar, ColumnError> {
    if left.is_missing() || right.is_missing() {
        return Ok(Scalar::missing_for_dtype(out_dtype));
    }

    let lhs = left.to_f64().map_err(ColumnError::from)?;
    let rhs = right.to_f64().map_err(ColumnError::from)?;
    let result = match op {
        ArithmeticOp::Add => lhs + rhs,
        ArithmeticOp::Sub => lhs - rhs,
        ArithmeticOp::Mul => lhs * rhs,
        ArithmeticOp::Div => lhs / rhs,
    };

    if matches!(out_dtype, DType::Int64)
        && result.is_finite()
        && result == result.trunc()
        && result >= i64::MIN as f64
        && result <= i64::MAX as f64
    {
        Ok(Scalar::Int64(result as i64))
    } else {
        Ok(Scalar::Float64(result))
    }
}

#[cfg(test)]
mod tests {
    use wb_types::{DType, NullKind, Scalar};

    use super::{ArithmeticOp, Column};

    #[test]
    fn take_prefix_truncates_values_and_validity() {
        let column = Column::from_values(vec![
            Scalar::Int64(10),
            Scalar::Null(NullKind::Null),
            Scalar::Int64(30),
        ])
        .expect("column should build");

        let out = column.take_prefix(2);
        assert_eq!(out.values(), &[Scalar::Int64(10), Scalar::Null(NullKind::Null)]);
        assert_eq!(out.validity().bits(), &[true, false]);
        assert_eq!(out.validity().count_valid(), 1);
    }

    #[test]
    fn take_gathers_and_fills_out_of_bounds_with_missing() {
        let column =
            Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2)]).expect("column");
        let out = column.take(&[1, 0, 5]);
        assert_eq!(
            out.values(),
            &[
                Scalar::Int64(2),
                Scalar::Int64(1),
                Scalar::Null(NullKind::Null)
            ]
        );
    }

    #[test]
    fn numeric_addition_propagates_missing() {
        let left = Column::from_values(vec![
            Scalar::Int64(1),
            Scalar::Null(NullKind::Null),
            Scalar::Float64(f64::NAN),
        ])
        .expect("left");
        let right = Column::from_values(vec![Scalar::Int64(2), Scalar::Int64(5), Scalar::Int64(3)])
            .expect("right");

        let out = left
            .binary_numeric(&right, ArithmeticOp::Add)
            .expect("add should pass");

        assert_eq!(out.dtype(), DType::Float64);
        assert_eq!(out.values()[0], Scalar::Float64(3.0));
        assert_eq!(out.values()[1], Scalar::Null(NullKind::NaN));
        assert_eq!(out.values()[2], Scalar::Null(NullKind::NaN));
    }

    #[test]
    fn scalar_addition_broadcasts_and_keeps_int_dtype() {
        let column = Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2)])
            .expect("column");
        let out = column
            .scalar_numeric(&Scalar::Int64(1), ArithmeticOp::Add)
            .expect("add");
        assert_eq!(out.dtype(), DType::Int64);
        assert_eq!(out.values(), &[Scalar::Int64(2), Scalar::Int64(3)]);
    }

    #[test]
    fn division_always_produces_floats() {
        let column = Column::from_values(vec![Scalar::Int64(4)]).expect("column");
        let out = column
            .scalar_numeric(&Scalar::Int64(2), ArithmeticOp::Div)
            .expect("div");
        assert_eq!(out.dtype(), DType::Float64);
        assert_eq!(out.values(), &[Scalar::Float64(2.0)]);
    }
}
