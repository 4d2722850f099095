#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wb_columnar::Column;
use wb_frame::{DataFrame, FrameError, Series};
use wb_groupby::{AggFunc, AggSpec, FrameGroupBy, GroupByOptions, SeriesGroupBy};
use wb_index::{ColumnLabel, Index, RowLabel, align_ordinal};
use wb_runtime::{ComputePolicy, OpsLedger};
use wb_types::Scalar;

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
}

/// Cheap sanity pass: the fixture directory exists and holds packets.
#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = fs::read_dir(&config.fixture_root)
        .ok()
        .into_iter()
        .flat_map(|it| it.filter_map(Result::ok))
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
        .count();

    HarnessReport {
        suite: "smoke",
        fixture_count,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureOperation {
    FrameGroupAgg,
    SeriesGroupSum,
    AlignOrdinal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureColumn {
    pub label: ColumnLabel,
    pub values: Vec<Scalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureFrame {
    #[serde(default)]
    pub index: Option<Vec<RowLabel>>,
    pub columns: Vec<FixtureColumn>,
}

impl FixtureFrame {
    fn build(&self) -> Result<DataFrame, String> {
        let rows = self
            .columns
            .first()
            .map_or(0, |column| column.values.len());
        let index = match &self.index {
            Some(labels) => Index::new(labels.clone()),
            None => Index::from_range(rows),
        };
        let columns = self
            .columns
            .iter()
            .map(|column| {
                let built = Column::from_values(column.values.clone())
                    .map_err(|err| err.to_string())?;
                Ok((column.label.clone(), built))
            })
            .collect::<Result<Vec<_>, String>>()?;
        DataFrame::new(index, columns).map_err(|err: FrameError| err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSeries {
    pub name: ColumnLabel,
    #[serde(default)]
    pub index: Option<Vec<RowLabel>>,
    pub values: Vec<Scalar>,
}

impl FixtureSeries {
    fn build(&self) -> Result<Series, String> {
        let index = match &self.index {
            Some(labels) => labels.clone(),
            None => Index::from_range(self.values.len()).labels().to_vec(),
        };
        Series::from_values(self.name.clone(), index, self.values.clone())
            .map_err(|err| err.to_string())
    }
}

/// One captured case: inputs for the grouper plus the output the reference
/// single-machine library produced for the same logical data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupCase {
    pub case_id: String,
    pub operation: FixtureOperation,
    #[serde(default)]
    pub frame: Option<FixtureFrame>,
    #[serde(default)]
    pub key: Option<FixtureFrame>,
    #[serde(default)]
    pub column: Option<ColumnLabel>,
    #[serde(default)]
    pub spec: Option<AggSpec>,
    #[serde(default)]
    pub options: GroupByOptions,
    #[serde(default)]
    pub sort_by: Option<Vec<ColumnLabel>>,
    #[serde(default)]
    pub expected_frame: Option<FixtureFrame>,
    #[serde(default)]
    pub expected_series: Option<FixtureSeries>,
    #[serde(default)]
    pub left_len: Option<usize>,
    #[serde(default)]
    pub right_len: Option<usize>,
    #[serde(default)]
    pub expected_rows: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub operation: FixtureOperation,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub gate_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParityReport {
    pub suite: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl ParityReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("fixture {path} failed to parse: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

pub fn run_fixture_suite(config: &HarnessConfig) -> Result<ParityReport, HarnessError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(&config.fixture_root)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = fs::read_to_string(&path)?;
        let case: GroupCase = serde_json::from_str(&raw).map_err(|source| HarnessError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        results.push(run_case(&case));
    }

    let passed = results
        .iter()
        .filter(|result| result.status == CaseStatus::Pass)
        .count();
    let failed = results.len() - passed;

    Ok(ParityReport {
        suite: "fixture_parity".to_owned(),
        fixture_count: results.len(),
        passed,
        failed,
        results,
    })
}

#[must_use]
pub fn run_case(case: &GroupCase) -> CaseResult {
    let mut ledger = OpsLedger::new();
    let outcome = execute_case(case, &mut ledger);
    let (status, mismatch) = match outcome {
        Ok(()) => (CaseStatus::Pass, None),
        Err(detail) => (CaseStatus::Fail, Some(detail)),
    };

    CaseResult {
        case_id: case.case_id.clone(),
        operation: case.operation,
        status,
        mismatch,
        gate_records: ledger.records().len(),
    }
}

fn execute_case(case: &GroupCase, ledger: &mut OpsLedger) -> Result<(), String> {
    match case.operation {
        FixtureOperation::AlignOrdinal => {
            let left = Index::from_range(case.left_len.ok_or("missing left_len")?);
            let right = Index::from_range(case.right_len.ok_or("missing right_len")?);
            let plan = align_ordinal(&left, &right);
            let expected = case.expected_rows.ok_or("missing expected_rows")?;
            if plan.rows != expected {
                return Err(format!("expected {expected} surviving rows, got {}", plan.rows));
            }
            Ok(())
        }
        FixtureOperation::FrameGroupAgg => {
            let frame = required(&case.frame, "frame")?.build()?;
            let key = build_key(required(&case.key, "key")?)?;
            let spec = case
                .spec
                .clone()
                .unwrap_or(AggSpec::Single(AggFunc::Sum));

            let grouped = FrameGroupBy::resolve(
                &frame,
                &key,
                case.options,
                &ComputePolicy::cross_frame(),
                ledger,
            )
            .map_err(|err| err.to_string())?;
            let out = grouped.agg(&spec).map_err(|err| err.to_string())?;

            let sorted = if case.options.as_index {
                out.sort_rows_by_label()
            } else {
                let by = case
                    .sort_by
                    .clone()
                    .unwrap_or_else(|| out.column_labels());
                out.sort_rows_by_columns(&by)
                    .map_err(|err| err.to_string())?
                    .with_ordinal_identity()
            };

            let expected = required(&case.expected_frame, "expected_frame")?.build()?;
            if !sorted.semantic_eq(&expected) {
                return Err(format!(
                    "frame mismatch: got {sorted:?}, expected {expected:?}"
                ));
            }
            Ok(())
        }
        FixtureOperation::SeriesGroupSum => {
            let frame = required(&case.frame, "frame")?.build()?;
            let key = build_key(required(&case.key, "key")?)?;
            let label = case.column.clone().ok_or("missing column")?;
            let series = frame.series(&label).map_err(|err| err.to_string())?;

            let out = SeriesGroupBy::resolve(
                &series,
                &key,
                case.options,
                &ComputePolicy::cross_frame(),
                ledger,
            )
            .map_err(|err| err.to_string())?
            .sum()
            .map_err(|err| err.to_string())?
            .sort_by_label();

            let expected = required(&case.expected_series, "expected_series")?.build()?;
            if !out.semantic_eq(&expected) {
                return Err(format!(
                    "series mismatch: got {out:?}, expected {expected:?}"
                ));
            }
            Ok(())
        }
    }
}

fn required<'a, T>(value: &'a Option<T>, field: &str) -> Result<&'a T, String> {
    value.as_ref().ok_or_else(|| format!("missing {field}"))
}

/// The key frame must carry exactly one column; its series is the key.
fn build_key(fixture: &FixtureFrame) -> Result<Series, String> {
    if fixture.columns.len() != 1 {
        return Err(format!(
            "key frame must have exactly one column, found {}",
            fixture.columns.len()
        ));
    }
    let frame = fixture.build()?;
    let label = fixture.columns[0].label.clone();
    frame.series(&label).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use wb_types::Scalar;

    use super::{CaseStatus, FixtureColumn, FixtureFrame, FixtureOperation, GroupCase, run_case};

    #[test]
    fn align_ordinal_case_runs_inline() {
        let case = GroupCase {
            case_id: "inline_align".to_owned(),
            operation: FixtureOperation::AlignOrdinal,
            frame: None,
            key: None,
            column: None,
            spec: None,
            options: Default::default(),
            sort_by: None,
            expected_frame: None,
            expected_series: None,
            left_len: Some(9),
            right_len: Some(7),
            expected_rows: Some(7),
        };

        let result = run_case(&case);
        assert_eq!(result.status, CaseStatus::Pass);
        assert_eq!(result.gate_records, 0);
    }

    #[test]
    fn group_case_deserializes_from_packet_json() {
        let raw = r#"{
            "case_id": "sample",
            "operation": "frame_group_agg",
            "frame": {"columns": [{"label": ["B"], "values": [{"kind": "int64", "value": 1}]}]},
            "key": {"columns": [{"label": ["A"], "values": [{"kind": "int64", "value": 1}]}]},
            "spec": {"kind": "single", "value": "sum"},
            "expected_frame": {
                "index": [{"kind": "int64", "value": 1}],
                "columns": [{"label": ["B"], "values": [{"kind": "int64", "value": 1}]}]
            }
        }"#;

        let case: GroupCase = serde_json::from_str(raw).expect("parse");
        assert_eq!(case.operation, FixtureOperation::FrameGroupAgg);
        assert!(case.options.as_index);
        let result = run_case(&case);
        assert_eq!(result.status, CaseStatus::Pass, "{:?}", result.mismatch);
        assert_eq!(result.gate_records, 1);
    }

    #[test]
    fn mismatching_expectation_fails_with_detail() {
        let frame = FixtureFrame {
            index: None,
            columns: vec![FixtureColumn {
                label: "B".into(),
                values: vec![Scalar::Int64(1)],
            }],
        };
        let case = GroupCase {
            case_id: "bad".to_owned(),
            operation: FixtureOperation::FrameGroupAgg,
            frame: Some(frame.clone()),
            key: Some(FixtureFrame {
                index: None,
                columns: vec![FixtureColumn {
                    label: "A".into(),
                    values: vec![Scalar::Int64(1)],
                }],
            }),
            column: None,
            spec: None,
            options: Default::default(),
            sort_by: None,
            expected_frame: Some(FixtureFrame {
                index: Some(vec![1_i64.into()]),
                columns: vec![FixtureColumn {
                    label: "B".into(),
                    values: vec![Scalar::Int64(999)],
                }],
            }),
            expected_series: None,
            left_len: None,
            right_len: None,
            expected_rows: None,
        };

        let result = run_case(&case);
        assert_eq!(result.status, CaseStatus::Fail);
        assert!(result.mismatch.is_some());
    }
}
