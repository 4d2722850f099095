//! Cross-frame grouping for pandas-style dataframes.
//!
//! Two independently constructed frames are aligned by ordinal row identity,
//! then one is grouped by a key series extracted from the other and
//! aggregated. Cross-frame operations sit behind an explicit
//! [`ComputePolicy`] gate mirroring the engine's `compute.ops_on_diff_frames`
//! option, and every admission decision is recorded in an [`OpsLedger`].
//!
//! ```
//! use wallaby::{AggFunc, AggSpec, ColumnLabel, ComputePolicy, DataFrame,
//!               FrameGroupBy, GroupByOptions, OpsLedger, Scalar};
//!
//! # fn main() -> Result<(), wallaby::GroupByError> {
//! let frame = DataFrame::from_scalar_columns(vec![(
//!     ColumnLabel::flat("B"),
//!     vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3), Scalar::Int64(4)],
//! )])?;
//! let keys = DataFrame::from_scalar_columns(vec![(
//!     ColumnLabel::flat("A"),
//!     vec![Scalar::Int64(1), Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(2)],
//! )])?;
//! let key = keys.series(&ColumnLabel::flat("A"))?;
//!
//! let mut ledger = OpsLedger::new();
//! let out = FrameGroupBy::resolve(
//!     &frame,
//!     &key,
//!     GroupByOptions::default(),
//!     &ComputePolicy::cross_frame(),
//!     &mut ledger,
//! )?
//! .agg(&AggSpec::Single(AggFunc::Sum))?
//! .sort_rows_by_label();
//!
//! assert_eq!(
//!     out.column(&ColumnLabel::flat("B")).unwrap().values(),
//!     &[Scalar::Int64(3), Scalar::Int64(7)],
//! );
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub use wb_columnar::{ArithmeticOp, Column, ColumnError, ValidityMask};
pub use wb_frame::{
    AlignmentError, DataFrame, EngineId, FrameError, FrameId, Provenance, Series,
};
pub use wb_groupby::{
    AggFunc, AggSpec, AggSpecError, FrameGroupBy, GroupByError, GroupByOptions, SeriesGroupBy,
};
pub use wb_index::{ColumnLabel, Index, OrdinalAlignment, RowLabel, align_ordinal};
pub use wb_runtime::{ComputePolicy, ConfigurationError, GateAction, GateRecord, OpsLedger};
pub use wb_types::{DType, NullKind, Scalar, TypeError};
