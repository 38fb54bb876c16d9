//! Feedlake ETL - threat-intel feed loader

use anyhow::{Context, Result};
use clap::Parser;
use feedlake_common::logging::{init_logging, LogConfig, LogLevel};
use feedlake_etl::config::load_dotenv;
use feedlake_etl::{EtlConfig, PipelineOrchestrator, PipelineRunContext};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "feedlake-etl")]
#[command(author, version, about = "Load threat-intel feeds into the datalake and dwh")]
struct Cli {
    /// Datalake stage config (falls back to ETL_CONF_DEFAULT when missing)
    #[arg(long, env = "ETL_CONF")]
    etl_conf: Option<PathBuf>,

    /// Dwh stage config
    #[arg(long, env = "DWH_CONF")]
    dwh_conf: Option<PathBuf>,

    /// Root of the SQL template store
    #[arg(long, env = "ETL_SQL_DIR")]
    sql_dir: Option<PathBuf>,

    /// Distinct rows per INSERT statement
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Datalake tables loaded at once
    #[arg(long)]
    max_concurrent_loads: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env backs both the env-aware flags and LOG_*
    let env_file = load_dotenv();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the CLI defaults
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("feedlake-etl")
        .build()
        .merge_env()?;

    init_logging(&log_config)?;
    if let Some(path) = env_file {
        info!("Loaded environment from {}", path.display());
    }

    let mut config = EtlConfig::from_env().context("Invalid ETL configuration")?;
    if let Some(path) = cli.etl_conf {
        config.etl_conf = path;
    }
    if let Some(path) = cli.dwh_conf {
        config.dwh_conf = path;
    }
    if let Some(dir) = cli.sql_dir {
        config.sql_dir = dir;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    if let Some(max) = cli.max_concurrent_loads {
        config.max_concurrent_loads = max;
    }
    config.validate().context("Invalid ETL configuration")?;

    info!("Database: {}:{}/{}", config.database.host, config.database.port, config.database.name);

    let context = PipelineRunContext::new();
    let orchestrator = PipelineOrchestrator::from_config(&config, context.clone())?;

    let cancel = context.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    match orchestrator.run().await {
        Ok(summary) => {
            info!(
                "ETL run {} complete: {} feeds, {} dwh tables, {} rows inserted in {:.1}s",
                summary.etl_timestamp,
                summary.datalake.len(),
                summary.dwh.len(),
                summary.total_inserted(),
                summary.elapsed.as_secs_f64()
            );
            Ok(())
        },
        Err(e) => {
            if e.is_cancelled() {
                warn!("ETL run cancelled");
            } else {
                error!("ETL run failed: {}", e);
            }
            Err(e.into())
        },
    }
}
