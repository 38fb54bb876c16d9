//! Load auditing
//!
//! [`StatisticsRecorder::record`] wraps one load operation. It times the
//! operation, turns its [`LoadOutcome`] into a [`LoadRun`] and upserts that
//! row into the schema's statistics table (delete-then-insert on the natural
//! key), so re-running with the same run timestamp leaves one row per key.

use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::context::PipelineRunContext;
use crate::error::{EtlError, Result};
use crate::schema::FieldValue;
use crate::sql::{SqlExecutor, SqlParams, TemplateRef};

/// Template that upserts one audit row
pub const STATISTICS_TEMPLATE: &str = "build_statistics";

/// Stage label of datalake loads
pub const STAGE_POPULATE_DATALAKE: &str = "populate_datalake";

/// Stage label of dwh loads
pub const STAGE_POPULATE_DWH: &str = "populate_dwh";

const DATALAKE_STATISTICS_FIELDS: &[&str] = &[
    "etl_timestamp",
    "stage",
    "schema",
    "table_name",
    "source",
    "inserting_row_count",
    "res_row_count",
    "execution_time_min",
    "load_timestamp",
];

const DATALAKE_STATISTICS_KEY: &[&str] =
    &["etl_timestamp", "stage", "schema", "table_name", "source"];

const DWH_STATISTICS_FIELDS: &[&str] = &[
    "etl_timestamp",
    "stage",
    "schema",
    "table_name",
    "res_row_count",
    "execution_time_min",
    "load_timestamp",
];

const DWH_STATISTICS_KEY: &[&str] = &["etl_timestamp", "stage", "schema", "table_name"];

/// Store namespace a load writes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreSchema {
    Datalake,
    Dwh,
}

impl StoreSchema {
    pub fn name(&self) -> &'static str {
        match self {
            StoreSchema::Datalake => "datalake",
            StoreSchema::Dwh => "dwh",
        }
    }

    pub fn statistics_table(&self) -> &'static str {
        match self {
            StoreSchema::Datalake => "build_datalake_statistics",
            StoreSchema::Dwh => "build_dwh_statistics",
        }
    }

    pub fn statistics_fields(&self) -> &'static [&'static str] {
        match self {
            StoreSchema::Datalake => DATALAKE_STATISTICS_FIELDS,
            StoreSchema::Dwh => DWH_STATISTICS_FIELDS,
        }
    }

    pub fn statistics_key_fields(&self) -> &'static [&'static str] {
        match self {
            StoreSchema::Datalake => DATALAKE_STATISTICS_KEY,
            StoreSchema::Dwh => DWH_STATISTICS_KEY,
        }
    }
}

impl fmt::Display for StoreSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a load operation reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub table: String,
    /// Feed URL, datalake loads only
    pub source: Option<String>,
    pub inserting_row_count: Option<i64>,
    pub res_row_count: Option<i64>,
}

impl LoadOutcome {
    pub fn datalake(
        table: impl Into<String>,
        source: impl Into<String>,
        inserting_row_count: i64,
        res_row_count: i64,
    ) -> Self {
        Self {
            table: table.into(),
            source: Some(source.into()),
            inserting_row_count: Some(inserting_row_count),
            res_row_count: Some(res_row_count),
        }
    }

    pub fn dwh(table: impl Into<String>, res_row_count: Option<i64>) -> Self {
        Self {
            table: table.into(),
            source: None,
            inserting_row_count: None,
            res_row_count,
        }
    }
}

/// Result of a wrapped operation. Only results carrying a [`LoadOutcome`]
/// are audited.
pub trait Audited {
    fn into_outcome(self) -> Option<LoadOutcome>;
}

impl Audited for LoadOutcome {
    fn into_outcome(self) -> Option<LoadOutcome> {
        Some(self)
    }
}

impl Audited for Option<LoadOutcome> {
    fn into_outcome(self) -> Option<LoadOutcome> {
        self
    }
}

impl Audited for () {
    fn into_outcome(self) -> Option<LoadOutcome> {
        None
    }
}

/// One audited load invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRun {
    pub etl_timestamp: DateTime<Utc>,
    pub stage: String,
    pub schema: StoreSchema,
    pub table: String,
    pub source: Option<String>,
    pub inserting_row_count: Option<i64>,
    pub res_row_count: Option<i64>,
    pub execution_time: Duration,
    pub load_timestamp: DateTime<Utc>,
}

impl LoadRun {
    /// Elapsed minutes in hundredths, rounded half away from zero
    pub fn execution_time_hundredths(&self) -> i64 {
        (self.execution_time.as_secs_f64() / 60.0 * 100.0).round() as i64
    }

    pub fn execution_time_min(&self) -> FieldValue {
        FieldValue::Decimal {
            mantissa: self.execution_time_hundredths(),
            scale: 2,
        }
    }

    /// Values in the order of the schema's statistics fields
    pub fn row(&self) -> Vec<FieldValue> {
        let mut row = vec![
            FieldValue::from(self.etl_timestamp),
            FieldValue::from(self.stage.as_str()),
            FieldValue::from(self.schema.name()),
            FieldValue::from(self.table.as_str()),
        ];
        if self.schema == StoreSchema::Datalake {
            row.push(FieldValue::from(self.source.clone()));
            row.push(FieldValue::from(self.inserting_row_count));
        }
        row.push(FieldValue::from(self.res_row_count));
        row.push(self.execution_time_min());
        row.push(FieldValue::from(self.load_timestamp));
        row
    }

    /// Delete-then-insert parameters for the statistics table
    pub fn params(&self) -> SqlParams {
        SqlParams::new(
            self.schema.statistics_table(),
            self.schema.name(),
            self.etl_timestamp,
        )
        .with_fields(self.schema.statistics_fields())
        .with_delete_where_fields(self.schema.statistics_key_fields())
        .with_values([&self.row()])
    }
}

/// Wraps load operations and writes their audit rows
#[derive(Clone)]
pub struct StatisticsRecorder {
    executor: SqlExecutor,
    context: PipelineRunContext,
}

impl StatisticsRecorder {
    pub fn new(executor: SqlExecutor, context: PipelineRunContext) -> Self {
        Self { executor, context }
    }

    /// Run `load`, then audit it.
    ///
    /// Failures of `load` come back unchanged and nothing is written. A
    /// failure while writing the audit row is returned as
    /// [`EtlError::Statistics`].
    pub async fn record<T, F, Fut>(
        &self,
        stage: &str,
        schema: StoreSchema,
        load: F,
    ) -> Result<Option<LoadRun>>
    where
        T: Audited,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = load().await?;
        let execution_time = started.elapsed();

        let Some(outcome) = result.into_outcome() else {
            debug!("{} on {} returned no outcome, skipping statistics", stage, schema);
            return Ok(None);
        };

        let run = LoadRun {
            etl_timestamp: self.context.etl_timestamp(),
            stage: stage.to_string(),
            schema,
            table: outcome.table,
            source: outcome.source,
            inserting_row_count: outcome.inserting_row_count,
            res_row_count: outcome.res_row_count,
            execution_time,
            load_timestamp: Utc::now(),
        };

        self.persist(&run).await.map_err(|e| EtlError::Statistics {
            stage: run.stage.clone(),
            schema: schema.name().to_string(),
            table: run.table.clone(),
            source: Box::new(e),
        })?;

        info!(
            "{} {}.{}: inserted {:?}, result {:?}, {:.2} min",
            run.stage,
            schema,
            run.table,
            run.inserting_row_count,
            run.res_row_count,
            run.execution_time_hundredths() as f64 / 100.0
        );

        Ok(Some(run))
    }

    /// Upsert one audit row
    pub async fn persist(&self, run: &LoadRun) -> Result<()> {
        self.executor
            .execute(&TemplateRef::core(STATISTICS_TEMPLATE), Some(&run.params()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run(schema: StoreSchema) -> LoadRun {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        LoadRun {
            etl_timestamp: ts,
            stage: STAGE_POPULATE_DATALAKE.to_string(),
            schema,
            table: "malware".to_string(),
            source: Some("https://feeds.test/urls".to_string()),
            inserting_row_count: Some(10),
            res_row_count: Some(8),
            execution_time: Duration::from_secs(93),
            load_timestamp: ts,
        }
    }

    #[test]
    fn test_execution_time_rounds_to_hundredths_of_a_minute() {
        let run = run(StoreSchema::Datalake);
        assert_eq!(run.execution_time_hundredths(), 155);
        assert_eq!(run.execution_time_min().to_sql_literal(), "1.55");
    }

    #[test]
    fn test_datalake_row_matches_field_list() {
        let run = run(StoreSchema::Datalake);
        let row = run.row();
        assert_eq!(row.len(), StoreSchema::Datalake.statistics_fields().len());
        assert_eq!(row[4], FieldValue::from("https://feeds.test/urls"));
        assert_eq!(row[5], FieldValue::Integer(10));
    }

    #[test]
    fn test_dwh_row_drops_source_and_inserting_count() {
        let mut run = run(StoreSchema::Dwh);
        run.stage = STAGE_POPULATE_DWH.to_string();
        let row = run.row();
        assert_eq!(row.len(), StoreSchema::Dwh.statistics_fields().len());
        assert_eq!(row[4], FieldValue::Integer(8));
    }

    #[test]
    fn test_params_key_on_source_only_for_datalake() {
        let datalake = run(StoreSchema::Datalake).params();
        assert!(datalake.delete_where().contains(
            "build_datalake_statistics.source = datalake_build_datalake_statistics_temp.source"
        ));

        let dwh = run(StoreSchema::Dwh).params();
        assert!(!dwh.delete_where().contains("source"));
        assert!(dwh.delete_where().contains("build_dwh_statistics.table_name"));
    }

    #[test]
    fn test_scalar_results_are_not_audited() {
        assert_eq!(().into_outcome(), None);
        assert_eq!(None::<LoadOutcome>.into_outcome(), None);
        assert!(LoadOutcome::dwh("dim_domain", Some(3)).into_outcome().is_some());
    }
}
