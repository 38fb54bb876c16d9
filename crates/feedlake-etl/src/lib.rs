//! Feedlake ETL
//!
//! Loads plaintext threat-intel feeds (ad/tracker and malware domain lists)
//! into a PostgreSQL `datalake` schema, derives the `dwh` schema from it and
//! audits every load in per-schema statistics tables.
//!
//! # Stages
//!
//! - **build_schema**: run the `db_schema` DDL template
//! - **build_datalake**: fetch each configured feed, extract, validate,
//!   deduplicate and insert in chunks
//! - **build_dwh**: clear FK-dependent tables, then run one derive template
//!   per configured dwh table
//!
//! # Example
//!
//! ```no_run
//! use feedlake_etl::{EtlConfig, PipelineOrchestrator, PipelineRunContext};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::from_env()?;
//!     let orchestrator = PipelineOrchestrator::from_config(&config, PipelineRunContext::new())?;
//!     let summary = orchestrator.run().await?;
//!     println!("inserted {} rows", summary.total_inserted());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batch;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod schema;
pub mod sql;
pub mod statistics;

pub use config::{EtlConfig, StageConfig};
pub use context::PipelineRunContext;
pub use error::{EtlError, Result};
pub use pipeline::{PipelineOrchestrator, RunSummary};
