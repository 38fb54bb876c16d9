//! Per-run context shared by every stage

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Run timestamp and cancellation signal for one pipeline run.
///
/// The timestamp is taken once at construction and stamped on every row and
/// audit record the run writes. Clones share the same cancellation token.
#[derive(Debug, Clone)]
pub struct PipelineRunContext {
    etl_timestamp: DateTime<Utc>,
    cancel: CancellationToken,
}

impl PipelineRunContext {
    pub fn new() -> Self {
        Self::with_timestamp(Utc::now())
    }

    pub fn with_timestamp(etl_timestamp: DateTime<Utc>) -> Self {
        Self {
            etl_timestamp,
            cancel: CancellationToken::new(),
        }
    }

    pub fn etl_timestamp(&self) -> DateTime<Utc> {
        self.etl_timestamp
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for PipelineRunContext {
    fn default() -> Self {
        Self::new()
    }
}
