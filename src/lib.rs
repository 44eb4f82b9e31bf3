//! Descriptive aggregates over customer, product and sales tables.
//!
//! Three base tables are read from a [`TableSource`], related through two
//! inner joins, reduced by a fixed list of [`AggregateSpec`]s and written one
//! directory per aggregate through a [`Sink`].

pub mod aggregate;
pub mod config;
pub mod error;
pub mod join;
pub mod lifecycle;
pub mod pipeline;
pub mod records;
pub mod result_set;
pub mod sink;
pub mod source;
pub mod table;
pub mod temporal;

pub use aggregate::{evaluate, standard_specs, AggFunction, AggregateSpec, GroupKey, Source};
pub use config::{load_config, ErrorPolicy, Overrides, PipelineConfig, TableNames};
pub use error::{PipelineError, Result, StorageError};
pub use join::{customer_sale_join, inner_join, product_sale_join, JoinSpec};
pub use lifecycle::{JobLifecycle, LoggingLifecycle, MarkerLifecycle};
pub use pipeline::{AggregateOutput, BaseTables, CancelToken, JoinedViews, Pipeline, RunSummary};
pub use records::LogicalTable;
pub use result_set::{AggregateName, ResultSet};
pub use sink::{output_location, MemorySink, ParquetDirSink, Sink, WriteMode};
pub use source::{CsvCatalogSource, MemorySource, TableSource};
pub use table::{Datum, Table};
