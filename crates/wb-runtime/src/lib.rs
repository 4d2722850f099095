#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Explicit stand-in for the engine's `compute.ops_on_diff_frames` option.
/// Passed into every cross-frame entry point rather than read from ambient
/// global state, so the core stays testable in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputePolicy {
    pub ops_on_diff_frames: bool,
}

impl ComputePolicy {
    /// Cross-frame operations rejected; the engine's default.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            ops_on_diff_frames: false,
        }
    }

    /// Cross-frame operations admitted.
    #[must_use]
    pub fn cross_frame() -> Self {
        Self {
            ops_on_diff_frames: true,
        }
    }

    /// Precondition gate for an operation whose key and target come from
    /// different frames. Every decision lands in the ledger.
    pub fn check_cross_frame(
        &self,
        op: &'static str,
        ledger: &mut OpsLedger,
    ) -> Result<(), ConfigurationError> {
        if self.ops_on_diff_frames {
            ledger.push(GateRecord {
                op: op.to_owned(),
                action: GateAction::Allowed,
                detail: "compute.ops_on_diff_frames is enabled".to_owned(),
            });
            return Ok(());
        }

        ledger.push(GateRecord {
            op: op.to_owned(),
            action: GateAction::Rejected,
            detail: "compute.ops_on_diff_frames is disabled".to_owned(),
        });
        Err(ConfigurationError::CrossFrameDisabled { op })
    }
}

impl Default for ComputePolicy {
    fn default() -> Self {
        Self::strict()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    Allowed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRecord {
    pub op: String,
    pub action: GateAction,
    pub detail: String,
}

/// Audit trail of admission decisions taken while resolving an operation.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsLedger {
    records: Vec<GateRecord>,
}

impl OpsLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: GateRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[GateRecord] {
        &self.records
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("cross-frame operation '{op}' requires compute.ops_on_diff_frames to be enabled")]
    CrossFrameDisabled { op: &'static str },
}
