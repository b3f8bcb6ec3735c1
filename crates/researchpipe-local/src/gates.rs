//! Non-interactive approval and report-type decisions.
//!
//! Unattended runs wire these in instead of a human: approve everything,
//! play back a pre-configured decision list, or pin the report type.

use researchpipe_core::{ApprovalDecision, ApprovalGate, Error, ReportType, ReportTypePicker, Result};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Approves every plan unconditionally.
#[derive(Debug, Clone, Default)]
pub struct AutoApprove;

#[async_trait::async_trait]
impl ApprovalGate for AutoApprove {
    async fn review(
        &self,
        _query: &str,
        _rationale: &str,
        _queries: &[String],
    ) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::Approve)
    }
}

/// Plays back a fixed decision sequence, then approves everything once the
/// script is exhausted.
#[derive(Debug)]
pub struct ScriptedApproval {
    decisions: Mutex<VecDeque<ApprovalDecision>>,
}

impl ScriptedApproval {
    pub fn new(decisions: impl IntoIterator<Item = ApprovalDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
        }
    }
}

#[async_trait::async_trait]
impl ApprovalGate for ScriptedApproval {
    async fn review(
        &self,
        _query: &str,
        _rationale: &str,
        _queries: &[String],
    ) -> Result<ApprovalDecision> {
        let mut decisions = self
            .decisions
            .lock()
            .map_err(|e| Error::NotConfigured(format!("approval script poisoned: {e}")))?;
        Ok(decisions.pop_front().unwrap_or(ApprovalDecision::Approve))
    }
}

/// Always picks the same report type.
#[derive(Debug, Clone, Copy)]
pub struct FixedReportType(pub ReportType);

#[async_trait::async_trait]
impl ReportTypePicker for FixedReportType {
    async fn pick(&self) -> Result<ReportType> {
        Ok(self.0)
    }
}
