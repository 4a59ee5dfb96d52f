//! Error taxonomy shared by the venue seam and the cycle orchestrator.
//!
//! Read-side venue calls fail closed with a [`GatewayError`]; write-side calls
//! report explicit result values instead. The orchestrator is the only place
//! that turns a failure into a [`CycleError`] and decides what happens next.

use crate::risk::ProtocolStage;

/// Failure of a read-side venue or price-feed call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("venue returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Whether retrying the same call may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            GatewayError::Network(_) => true,
            GatewayError::Http { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Malformed(_) | GatewayError::CircuitOpen(_) | GatewayError::Rejected(_) => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

/// Why a trading cycle did not complete.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("portfolio snapshot unavailable: {0}")]
    Snapshot(#[source] GatewayError),

    #[error("asset metadata unavailable: {0}")]
    Metadata(#[source] GatewayError),

    #[error("leverage check failed: {0}")]
    LeverageCheck(#[source] GatewayError),

    #[error("leverage compliance protocol aborted before any position changed: {0}")]
    ComplianceAborted(String),

    #[error("leverage compliance protocol failed at {stage}; manual intervention required")]
    ComplianceFailed { stage: ProtocolStage },

    #[error("state persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl CycleError {
    /// Failures that must be surfaced to an operator rather than retried next tick.
    pub fn requires_manual_intervention(&self) -> bool {
        matches!(self, CycleError::ComplianceFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(GatewayError::Network("timeout".into()).is_retriable());
        assert!(GatewayError::Http { status: 503, body: String::new() }.is_retriable());
        assert!(GatewayError::Http { status: 429, body: String::new() }.is_retriable());
        assert!(!GatewayError::Http { status: 400, body: String::new() }.is_retriable());
        assert!(!GatewayError::Malformed("bad json".into()).is_retriable());
        assert!(!GatewayError::CircuitOpen("info".into()).is_retriable());
    }

    #[test]
    fn test_only_protocol_failure_needs_operator() {
        let failed = CycleError::ComplianceFailed { stage: ProtocolStage::CloseAll };
        assert!(failed.requires_manual_intervention());
        assert!(failed.to_string().contains("manual intervention"));

        let aborted = CycleError::ComplianceAborted("snapshot read failed".into());
        assert!(!aborted.requires_manual_intervention());
    }
}
