//! Shared fixtures for pipeline integration tests
//!
//! - [`RecordingDatabase`]: in-memory [`Database`] that keeps every script it
//!   was asked to run and can be told to fail or stall on matching SQL
//! - [`CannedFetcher`]: [`FeedFetcher`] answering from a fixed URL map
//! - [`orchestrator`]: wires both into a [`PipelineOrchestrator`] using the
//!   repository's real SQL templates

#![allow(dead_code)]

use async_trait::async_trait;
use feedlake_etl::fetch::{FeedFetcher, FetchedFeed};
use feedlake_etl::sql::{Database, DbError, RetryPolicy, SqlExecutor, SqlTemplates};
use feedlake_etl::{EtlError, PipelineOrchestrator, PipelineRunContext, StageConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Repository SQL template root
pub fn sql_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../sql")
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,feedlake_etl=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Point in a script's life recorded on the shared timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptEvent {
    Started,
    Committed,
}

#[derive(Default)]
pub struct RecordingDatabase {
    scripts: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, DbError)>>,
    delays: Mutex<Vec<(String, Duration)>>,
    timeline: Mutex<Vec<(ScriptEvent, String)>>,
}

impl RecordingDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every script containing `needle` with `error`
    pub fn fail_when(&self, needle: &str, error: DbError) {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), error));
    }

    /// Hold every script containing `needle` for `delay` before it commits
    pub fn delay_when(&self, needle: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .push((needle.to_string(), delay));
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    /// Scripts containing `needle`, in execution order
    pub fn scripts_containing(&self, needle: &str) -> Vec<String> {
        self.scripts()
            .into_iter()
            .filter(|sql| sql.contains(needle))
            .collect()
    }

    /// Position of the first script containing `needle`
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.scripts().iter().position(|sql| sql.contains(needle))
    }

    /// Timeline index of the first `event` for a script containing `needle`
    pub fn event_at(&self, event: ScriptEvent, needle: &str) -> Option<usize> {
        self.timeline
            .lock()
            .unwrap()
            .iter()
            .position(|(seen, sql)| *seen == event && sql.contains(needle))
    }
}

#[async_trait]
impl Database for RecordingDatabase {
    async fn run_script(&self, sql: &str) -> Result<Option<i64>, DbError> {
        self.scripts.lock().unwrap().push(sql.to_string());
        self.timeline
            .lock()
            .unwrap()
            .push((ScriptEvent::Started, sql.to_string()));

        if let Some((_, error)) = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
        {
            return Err(error.clone());
        }

        let delay = self
            .delays
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.timeline
            .lock()
            .unwrap()
            .push((ScriptEvent::Committed, sql.to_string()));

        // Rendered VALUES lists carry one "(" per row
        let rows = sql
            .split_once("VALUES")
            .map(|(_, rest)| rest.split(';').next().unwrap_or_default().matches('(').count())
            .unwrap_or(1);
        Ok(Some(rows as i64))
    }
}

#[derive(Default)]
pub struct CannedFetcher {
    feeds: HashMap<String, FetchedFeed>,
    requested: Mutex<Vec<String>>,
}

impl CannedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: &str, body: &str) -> Self {
        self.feeds.insert(
            url.to_string(),
            FetchedFeed {
                status: 200,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn with_status(mut self, url: &str, status: u16) -> Self {
        self.feeds.insert(
            url.to_string(),
            FetchedFeed {
                status,
                body: String::new(),
            },
        );
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedFetcher for CannedFetcher {
    async fn fetch(&self, url: &str) -> feedlake_etl::Result<FetchedFeed> {
        self.requested.lock().unwrap().push(url.to_string());
        self.feeds.get(url).cloned().ok_or_else(|| EtlError::Fetch {
            source_url: url.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

/// Retry policy without waiting
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        delay: Duration::from_millis(1),
    }
}

pub fn stage(json: &str) -> StageConfig {
    StageConfig::parse(json).unwrap()
}

pub fn dwh_stage() -> StageConfig {
    stage(r#"{"dwh": ["dim_domain", "dim_category", "fact_domain_category"]}"#)
}

pub fn orchestrator(
    db: Arc<RecordingDatabase>,
    fetcher: Arc<CannedFetcher>,
    datalake: StageConfig,
    dwh: StageConfig,
    context: PipelineRunContext,
) -> feedlake_etl::Result<PipelineOrchestrator> {
    let executor = SqlExecutor::new(db, SqlTemplates::new(sql_dir()), fast_retry(), context.clone());
    PipelineOrchestrator::new(context, executor, fetcher, datalake, dwh)
}
