use serde::{Deserialize, Serialize};

use crate::{
    catalog::{RuleId, Timestamp},
    Context,
};

/// Record of a single flag evaluation, passed to [`EvaluationLogger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct EvaluationEvent {
    pub flag_key: String,
    pub enabled: bool,
    pub variation: Option<String>,
    /// Reason code, as in [`EvaluationResult::reason`](crate::EvaluationResult::reason).
    pub reason: String,
    pub matched_rule_id: Option<RuleId>,
    pub context: Context,
    pub timestamp: Timestamp,
}

/// Receives an event for every successful evaluation, e.g. to record exposures in a data
/// warehouse. Degraded (error) evaluations are not reported here; they are logged instead.
pub trait EvaluationLogger {
    /// Record `event`. Must not block for long: it runs on the evaluating thread.
    fn log_evaluation(&self, event: EvaluationEvent);
}

pub(crate) struct NoopEvaluationLogger;
impl EvaluationLogger for NoopEvaluationLogger {
    fn log_evaluation(&self, _event: EvaluationEvent) {}
}

impl<T: Fn(EvaluationEvent)> EvaluationLogger for T {
    fn log_evaluation(&self, event: EvaluationEvent) {
        self(event);
    }
}
