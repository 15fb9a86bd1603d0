//! Approval policy: which tool calls need a human decision first.

use holdfast_core::RiskLevel;

/// Safe and low-risk tools never need approval; medium and high do unless
/// the session runs in auto-approve mode.
pub fn needs_approval(risk: RiskLevel, auto_approve: bool) -> bool {
    match risk {
        RiskLevel::Safe | RiskLevel::Low => false,
        RiskLevel::Medium | RiskLevel::High => !auto_approve,
    }
}
