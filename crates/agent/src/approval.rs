//! Approval broker: parks a risky tool call until a human decides.
//!
//! At most one approval is pending per session, since tool calls run one
//! at a time. A decision for any other call id is ignored.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How a pending approval ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
    TimedOut,
    Cancelled,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Reason shown to the model when the call was not approved.
    pub fn denial_reason(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied => "the user denied this action",
            Self::TimedOut => "no approval decision arrived before the timeout",
            Self::Cancelled => "the session was cancelled",
        }
    }
}

struct Pending {
    call_id: String,
    tx: oneshot::Sender<bool>,
}

#[derive(Default)]
pub struct ApprovalBroker {
    pending: Mutex<Option<Pending>>,
}

impl std::fmt::Debug for ApprovalBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalBroker")
            .field("pending", &self.pending_call_id())
            .finish()
    }
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a pending approval for `call_id`, replacing (and denying)
    /// any earlier one.
    pub fn request(&self, call_id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let previous = self.lock().replace(Pending {
            call_id: call_id.to_string(),
            tx,
        });
        if let Some(previous) = previous {
            warn!(call_id = %previous.call_id, "Superseded pending approval denied");
            let _ = previous.tx.send(false);
        }
        rx
    }

    /// Deliver a decision. Returns false when `call_id` is not the pending
    /// call (mismatched or already resolved).
    pub fn resolve(&self, call_id: &str, approved: bool) -> bool {
        let mut guard = self.lock();
        if guard.as_ref().is_none_or(|p| p.call_id != call_id) {
            debug!(call_id = %call_id, "Approval decision ignored: not pending");
            return false;
        }
        let Some(pending) = guard.take() else {
            return false;
        };
        pending.tx.send(approved).is_ok()
    }

    /// Deny whatever is pending.
    pub fn deny_pending(&self) -> bool {
        match self.lock().take() {
            Some(pending) => {
                let _ = pending.tx.send(false);
                true
            }
            None => false,
        }
    }

    pub fn pending_call_id(&self) -> Option<String> {
        self.lock().as_ref().map(|p| p.call_id.clone())
    }

    /// Wait for the decision on `rx`, bounded by `timeout` and `cancel`.
    pub async fn wait(
        &self,
        rx: oneshot::Receiver<bool>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => ApprovalDecision::Cancelled,
            received = tokio::time::timeout(timeout, rx) => match received {
                Ok(Ok(true)) => ApprovalDecision::Approved,
                Ok(Ok(false)) => ApprovalDecision::Denied,
                Ok(Err(_)) => ApprovalDecision::Denied,
                Err(_) => ApprovalDecision::TimedOut,
            },
        };
        if !decision.is_approved() {
            self.lock().take();
        }
        decision
    }
}
