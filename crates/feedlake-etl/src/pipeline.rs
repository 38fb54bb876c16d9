//! Pipeline orchestrator
//!
//! Runs the three stages in order, each fatal on error:
//!
//! 1. schema bootstrap (`db_schema`)
//! 2. datalake population, one audited load per configured feed
//! 3. dwh population: clear FK-dependent tables, then one audited load per
//!    configured table
//!
//! Datalake tables load with up to `max_concurrent_loads` in flight; the feeds
//! of a single table load one at a time. Dwh tables load one at a time in
//! config order. A stage only starts once the previous one has finished.

use futures::{stream, StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::batch::{Batch, BatchAccumulator, DEFAULT_CHUNK_SIZE};
use crate::config::{EtlConfig, StageConfig};
use crate::context::PipelineRunContext;
use crate::error::{EtlError, Result};
use crate::extract::LineExtractor;
use crate::fetch::{FeedFetcher, HttpFetcher};
use crate::schema::{FeedTable, RawFields};
use crate::sql::{PgDatabase, SqlExecutor, SqlParams, SqlTemplates, TemplateRef};
use crate::statistics::{
    LoadOutcome, LoadRun, StatisticsRecorder, StoreSchema, STAGE_POPULATE_DATALAKE,
    STAGE_POPULATE_DWH,
};

pub const SCHEMA_TEMPLATE: &str = "db_schema";
pub const DATALAKE_TEMPLATE: &str = "populate_datalake";
pub const CLEAR_DWH_TEMPLATE: &str = "clear_before_update_fk";

/// Stage of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    SchemaBootstrap,
    DatalakePopulate,
    DwhPopulate,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::SchemaBootstrap => write!(f, "build_schema"),
            PipelineStage::DatalakePopulate => write!(f, "build_datalake"),
            PipelineStage::DwhPopulate => write!(f, "build_dwh"),
        }
    }
}

/// One configured feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatalakeSource {
    pub table: FeedTable,
    pub url: String,
}

/// One configured dwh table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DwhTable {
    pub schema: String,
    pub table: String,
}

/// What a finished run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub etl_timestamp: chrono::DateTime<chrono::Utc>,
    pub datalake: Vec<LoadRun>,
    pub dwh: Vec<LoadRun>,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Distinct rows sent to the datalake across all feeds
    pub fn total_inserted(&self) -> i64 {
        self.datalake
            .iter()
            .filter_map(|run| run.inserting_row_count)
            .sum()
    }
}

pub struct PipelineOrchestrator {
    context: PipelineRunContext,
    executor: SqlExecutor,
    recorder: StatisticsRecorder,
    fetcher: Arc<dyn FeedFetcher>,
    datalake_sources: Vec<DatalakeSource>,
    dwh_tables: Vec<DwhTable>,
    chunk_size: usize,
    max_concurrent_loads: usize,
}

impl PipelineOrchestrator {
    /// Build an orchestrator from parsed stage configs.
    ///
    /// Fails when the datalake config names a table with no schema.
    pub fn new(
        context: PipelineRunContext,
        executor: SqlExecutor,
        fetcher: Arc<dyn FeedFetcher>,
        datalake: StageConfig,
        dwh: StageConfig,
    ) -> Result<Self> {
        let datalake_sources = datalake
            .into_iter()
            .map(|(table, url)| {
                Ok(DatalakeSource {
                    table: table.parse()?,
                    url,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let dwh_tables = dwh
            .into_iter()
            .map(|(schema, table)| DwhTable { schema, table })
            .collect();

        let recorder = StatisticsRecorder::new(executor.clone(), context.clone());

        Ok(Self {
            context,
            executor,
            recorder,
            fetcher,
            datalake_sources,
            dwh_tables,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_loads: 1,
        })
    }

    /// Wire up Postgres, HTTP and the stage configs named by `config`
    pub fn from_config(config: &EtlConfig, context: PipelineRunContext) -> Result<Self> {
        let datalake = StageConfig::load("datalake", &config.etl_conf, &config.etl_conf_default)?;
        let dwh = StageConfig::load("dwh", &config.dwh_conf, &config.dwh_conf)?;

        let db = Arc::new(PgDatabase::new(
            config.database.connect_options(),
            config.database.connect_timeout(),
        ));
        let executor = SqlExecutor::new(
            db,
            SqlTemplates::new(config.sql_dir.clone()),
            config.retry_policy(),
            context.clone(),
        );
        let fetcher = Arc::new(HttpFetcher::new(config.http_timeout())?);

        Ok(Self::new(context, executor, fetcher, datalake, dwh)?
            .with_chunk_size(config.chunk_size)
            .with_max_concurrent_loads(config.max_concurrent_loads))
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_concurrent_loads(mut self, max_concurrent_loads: usize) -> Self {
        self.max_concurrent_loads = max_concurrent_loads.max(1);
        self
    }

    pub fn datalake_sources(&self) -> &[DatalakeSource] {
        &self.datalake_sources
    }

    pub fn dwh_tables(&self) -> &[DwhTable] {
        &self.dwh_tables
    }

    pub fn context(&self) -> &PipelineRunContext {
        &self.context
    }

    /// Run every stage
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        info!(
            "Starting ETL run {} ({} feeds, {} dwh tables)",
            self.context.etl_timestamp(),
            self.datalake_sources.len(),
            self.dwh_tables.len()
        );

        self.build_schema().await?;
        let datalake = self.build_datalake().await?;
        let dwh = self.build_dwh().await?;

        let summary = RunSummary {
            etl_timestamp: self.context.etl_timestamp(),
            datalake,
            dwh,
            elapsed: started.elapsed(),
        };
        info!("Finished ETL run in {:.1}s", summary.elapsed.as_secs_f64());
        Ok(summary)
    }

    pub async fn build_schema(&self) -> Result<()> {
        info!("Run stage {}", PipelineStage::SchemaBootstrap);
        self.executor
            .execute(&TemplateRef::core(SCHEMA_TEMPLATE), None)
            .await?;
        info!("Finish stage {}", PipelineStage::SchemaBootstrap);
        Ok(())
    }

    pub async fn build_datalake(&self) -> Result<Vec<LoadRun>> {
        info!("Run stage {}", PipelineStage::DatalakePopulate);
        let runs: Vec<Vec<LoadRun>> = stream::iter(self.sources_by_table())
            .map(|sources| self.populate_table(sources))
            .buffer_unordered(self.max_concurrent_loads)
            .try_collect()
            .await?;
        info!("Finish stage {}", PipelineStage::DatalakePopulate);
        Ok(runs.into_iter().flatten().collect())
    }

    /// Configured feeds grouped by target table, in config order
    fn sources_by_table(&self) -> Vec<Vec<&DatalakeSource>> {
        let mut groups: Vec<Vec<&DatalakeSource>> = Vec::new();
        for source in &self.datalake_sources {
            match groups
                .iter_mut()
                .find(|group| group.first().is_some_and(|s| s.table == source.table))
            {
                Some(group) => group.push(source),
                None => groups.push(vec![source]),
            }
        }
        groups
    }

    /// Load the feeds of one table one after another; they delete and insert
    /// on the same rows.
    async fn populate_table(&self, sources: Vec<&DatalakeSource>) -> Result<Vec<LoadRun>> {
        let mut runs = Vec::with_capacity(sources.len());
        for source in sources {
            if let Some(run) = self.populate_datalake(source).await? {
                runs.push(run);
            }
        }
        Ok(runs)
    }

    /// Load one feed and audit it
    pub async fn populate_datalake(&self, source: &DatalakeSource) -> Result<Option<LoadRun>> {
        self.recorder
            .record(STAGE_POPULATE_DATALAKE, StoreSchema::Datalake, || {
                self.load_source(source)
            })
            .await
    }

    async fn load_source(&self, source: &DatalakeSource) -> Result<LoadOutcome> {
        if self.context.is_cancelled() {
            return Err(EtlError::Cancelled);
        }

        let table = source.table;
        let url = source.url.as_str();
        let empty = || LoadOutcome::datalake(table.name(), url, 0, 0);

        let feed = match self.fetcher.fetch(url).await {
            Ok(feed) if feed.is_success() => feed,
            Ok(feed) => {
                error!(table = %table, source = %url, status = feed.status, "Feed fetch failed");
                return Ok(empty());
            },
            Err(e) => {
                error!(table = %table, source = %url, error = %e, "Feed fetch failed");
                return Ok(empty());
            },
        };

        let schema = table.schema();
        let extractor = LineExtractor::new(url, schema.field_count());
        let mut batch = BatchAccumulator::new(self.chunk_size);
        let mut inserting_row_count = 0i64;
        let mut res_row_count = 0i64;
        let mut skipped = 0usize;

        for (line_no, parts) in extractor.extract(&feed.body) {
            let parts = match parts {
                Ok(parts) => parts,
                Err(e) => {
                    warn!(source = %url, line = line_no, error = %e, "Skipping line");
                    skipped += 1;
                    continue;
                },
            };

            match table.validate(&RawFields::from_parts(schema, parts)) {
                Ok(record) => {
                    batch.add(record);
                },
                Err(e) => {
                    error!(source = %url, line = line_no, error = %e, "Skipping invalid line");
                    skipped += 1;
                    continue;
                },
            }

            if batch.should_flush() {
                let rows = batch.drain();
                inserting_row_count += rows.len() as i64;
                res_row_count = self.flush(table, &rows).await?;
            }
        }

        if !batch.is_empty() {
            let rows = batch.drain();
            inserting_row_count += rows.len() as i64;
            res_row_count = self.flush(table, &rows).await?;
        }

        if skipped > 0 {
            warn!("{} lines of {} were skipped", skipped, url);
        }

        Ok(LoadOutcome::datalake(
            table.name(),
            url,
            inserting_row_count,
            res_row_count,
        ))
    }

    async fn flush(&self, table: FeedTable, rows: &Batch) -> Result<i64> {
        let params = SqlParams::new(
            table.name(),
            StoreSchema::Datalake.name(),
            self.context.etl_timestamp(),
        )
        .with_fields(&table.schema().columns())
        .with_values(rows);

        let result = self
            .executor
            .execute(&TemplateRef::core(DATALAKE_TEMPLATE), Some(&params))
            .await?;
        Ok(result.unwrap_or(0))
    }

    /// Empty the tables a reload would otherwise trip foreign keys on
    pub async fn clear_dwh(&self) -> Result<()> {
        info!("Clearing dwh tables before reload");
        self.executor
            .execute(&TemplateRef::dwh(CLEAR_DWH_TEMPLATE), None)
            .await?;
        info!("Dwh cleared");
        Ok(())
    }

    pub async fn build_dwh(&self) -> Result<Vec<LoadRun>> {
        info!("Run stage {}", PipelineStage::DwhPopulate);
        self.clear_dwh().await?;

        // fact tables join the dimensions loaded before them
        let mut runs = Vec::with_capacity(self.dwh_tables.len());
        for table in &self.dwh_tables {
            if let Some(run) = self.populate_dwh(table).await? {
                runs.push(run);
            }
        }
        info!("Finish stage {}", PipelineStage::DwhPopulate);
        Ok(runs)
    }

    /// Derive one dwh table from the datalake and audit it
    pub async fn populate_dwh(&self, table: &DwhTable) -> Result<Option<LoadRun>> {
        self.recorder
            .record(STAGE_POPULATE_DWH, StoreSchema::Dwh, || self.load_dwh_table(table))
            .await
    }

    async fn load_dwh_table(&self, table: &DwhTable) -> Result<LoadOutcome> {
        let params = SqlParams::new(
            table.table.as_str(),
            table.schema.as_str(),
            self.context.etl_timestamp(),
        );
        let res_row_count = self
            .executor
            .execute(&TemplateRef::dwh(table.table.as_str()), Some(&params))
            .await?;
        Ok(LoadOutcome::dwh(table.table.as_str(), res_row_count))
    }
}
