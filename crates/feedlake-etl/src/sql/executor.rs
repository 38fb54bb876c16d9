//! Template execution with connection retry
//!
//! Renders a template, hands it to the [`Database`] and retries connection
//! failures with a fixed delay. Statement failures are not retried: the same
//! SQL would fail the same way.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::database::{Database, DbError};
use super::params::SqlParams;
use super::template::{SqlTemplates, TemplateRef};
use crate::context::PipelineRunContext;
use crate::error::{EtlError, Result};

/// Attempts per statement, first try included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Pause between attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Executes named templates against the database
#[derive(Clone)]
pub struct SqlExecutor {
    db: Arc<dyn Database>,
    templates: Arc<SqlTemplates>,
    retry: RetryPolicy,
    context: PipelineRunContext,
}

impl SqlExecutor {
    pub fn new(
        db: Arc<dyn Database>,
        templates: SqlTemplates,
        retry: RetryPolicy,
        context: PipelineRunContext,
    ) -> Self {
        Self {
            db,
            templates: Arc::new(templates),
            retry,
            context,
        }
    }

    pub fn templates(&self) -> &SqlTemplates {
        &self.templates
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Render `template` with `params` and run it.
    ///
    /// Returns the scalar the script ends with, if any.
    pub async fn execute(
        &self,
        template: &TemplateRef,
        params: Option<&SqlParams>,
    ) -> Result<Option<i64>> {
        let context = params.map(SqlParams::context);
        let sql = self.templates.render(template, context.as_ref()).await?;
        let max_attempts = self.retry.max_attempts.max(1);

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            if self.context.is_cancelled() {
                return Err(EtlError::Cancelled);
            }

            debug!("Executing {} (attempt {}/{})", template, attempt, max_attempts);
            match self.db.run_script(&sql).await {
                Ok(result) => return Ok(result),
                Err(DbError::Statement(message)) => {
                    error!("Statement {} failed: {}", template, message);
                    return Err(EtlError::Statement {
                        template: template.to_string(),
                        message,
                    });
                },
                Err(DbError::Connection(message)) => {
                    error!(
                        "Connection error on {} (attempt {}/{}): {}",
                        template, attempt, max_attempts, message
                    );
                    last_error = message;

                    if attempt < max_attempts {
                        info!("Retrying {} in {}s", template, self.retry.delay.as_secs());
                        tokio::select! {
                            _ = self.context.cancellation().cancelled() => {
                                return Err(EtlError::Cancelled);
                            }
                            _ = tokio::time::sleep(self.retry.delay) => {}
                        }
                    }
                },
            }
        }

        Err(EtlError::ConnectionExhausted {
            template: template.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }
}
