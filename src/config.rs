use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::records::LogicalTable;

/// What to do when one aggregate fails to compute or to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort at the first failure; nothing further is written.
    #[default]
    FailFast,
    /// Write every aggregate that can be written, then report all failures.
    BestEffort,
}

/// Physical file name of each logical table inside the source directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub customers: String,
    pub sales: String,
    pub products: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            customers: "customer_details.csv".into(),
            sales: "E-commerece sales data 2024.csv".into(),
            products: "product_details.csv".into(),
        }
    }
}

impl TableNames {
    pub fn file_name(&self, table: LogicalTable) -> &str {
        match table {
            LogicalTable::Customers => &self.customers,
            LogicalTable::Sales => &self.sales,
            LogicalTable::Products => &self.products,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub job_name: String,
    /// Catalog identifier; for the CSV source, the directory holding the tables.
    pub source_database: String,
    /// Base output location; each aggregate lands in `{output_location}/{name}/`.
    pub output_location: String,
    pub num_threads: Option<usize>,
    pub error_policy: ErrorPolicy,
    pub tables: TableNames,
    pub log_dir: Option<PathBuf>,
    pub write_success_marker: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            job_name: "ecom-aggregates".into(),
            source_database: String::new(),
            output_location: String::new(),
            num_threads: None,
            error_policy: ErrorPolicy::FailFast,
            tables: TableNames::default(),
            log_dir: None,
            write_success_marker: true,
        }
    }
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub source_database: Option<String>,
    pub output_location: Option<String>,
    pub num_threads: Option<usize>,
    pub error_policy: Option<ErrorPolicy>,
}

impl PipelineConfig {
    pub fn new(source_database: impl Into<String>, output_location: impl Into<String>) -> Self {
        Self {
            source_database: source_database.into(),
            output_location: output_location.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_database.trim().is_empty() {
            return Err(PipelineError::configuration("source_database is not set"));
        }
        if self.output_location.trim().is_empty() {
            return Err(PipelineError::configuration("output_location is not set"));
        }
        if self.num_threads == Some(0) {
            return Err(PipelineError::configuration("num_threads must be at least 1"));
        }
        Ok(())
    }
}

/// Layer an optional TOML file, `ECOM_*` environment variables and CLI
/// overrides, in that order.
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<PipelineConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix("ECOM")
            .prefix_separator("_")
            .separator("__"),
    );

    let cfg = builder.build().map_err(PipelineError::configuration)?;
    let mut config: PipelineConfig = cfg
        .try_deserialize()
        .map_err(PipelineError::configuration)?;

    if let Some(source) = &overrides.source_database {
        config.source_database = source.clone();
    }
    if let Some(output) = &overrides.output_location {
        config.output_location = output.clone();
    }
    if let Some(threads) = overrides.num_threads {
        config.num_threads = Some(threads);
    }
    if let Some(policy) = overrides.error_policy {
        config.error_policy = policy;
    }
    config.validate()?;
    Ok(config)
}
