//! Approval policies for finished tool results

use crate::conversation::PendingToolUse;

/// Decides whether a finished tool result continues the conversation on its own
pub trait ApprovalPolicy: Send + Sync {
    /// Approve `pending` without asking once the response that requested it
    /// has finished streaming
    fn auto_approve(&self, pending: &PendingToolUse) -> bool;
}

/// Every result waits for an explicit `approve()`
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualApproval;

impl ApprovalPolicy for ManualApproval {
    fn auto_approve(&self, _pending: &PendingToolUse) -> bool {
        false
    }
}

/// Every result is approved as soon as its response has ended
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ApprovalPolicy for AutoApprove {
    fn auto_approve(&self, _pending: &PendingToolUse) -> bool {
        true
    }
}
