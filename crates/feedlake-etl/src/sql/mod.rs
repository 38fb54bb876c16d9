//! SQL layer: templates, parameters, database access and retrying execution

pub mod database;
pub mod executor;
pub mod params;
pub mod template;

pub use database::{Database, DbError, PgDatabase};
pub use executor::{RetryPolicy, SqlExecutor, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
pub use params::SqlParams;
pub use template::{SqlTemplates, TemplateError, TemplateFolder, TemplateRef};
