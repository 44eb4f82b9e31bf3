//! Runs one full pass: load, join, aggregate, write, commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{error, info, warn};

use crate::aggregate::{evaluate, standard_specs, AggregateSpec, Source};
use crate::config::{ErrorPolicy, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::join::{customer_sale_join, inner_join, product_sale_join, JoinSpec};
use crate::lifecycle::{JobLifecycle, LoggingLifecycle};
use crate::records::LogicalTable;
use crate::result_set::{AggregateName, ResultSet};
use crate::sink::{output_location, Sink, WriteMode};
use crate::source::TableSource;
use crate::table::Table;

/// Shared cancel flag. Checked before each aggregate and before each write.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaseTables {
    pub customers: Table,
    pub sales: Table,
    pub products: Table,
}

impl BaseTables {
    pub fn get(&self, table: LogicalTable) -> &Table {
        match table {
            LogicalTable::Customers => &self.customers,
            LogicalTable::Sales => &self.sales,
            LogicalTable::Products => &self.products,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinedViews {
    pub customer_sale: Table,
    pub product_sale: Table,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateOutput {
    pub name: AggregateName,
    pub location: String,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job_name: String,
    pub outputs: Vec<AggregateOutput>,
    pub elapsed: Duration,
}

pub struct Pipeline {
    config: PipelineConfig,
    source: Arc<dyn TableSource>,
    sink: Arc<dyn Sink>,
    lifecycle: Box<dyn JobLifecycle>,
    specs: Vec<AggregateSpec>,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, source: Arc<dyn TableSource>, sink: Arc<dyn Sink>) -> Self {
        Self {
            config,
            source,
            sink,
            lifecycle: Box::new(LoggingLifecycle::default()),
            specs: standard_specs(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Box<dyn JobLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the specs of the same names; every name still has to be produced.
    pub fn with_specs(mut self, specs: Vec<AggregateSpec>) -> Self {
        for spec in specs {
            match self.specs.iter_mut().find(|s| s.name == spec.name) {
                Some(slot) => *slot = spec,
                None => self.specs.push(spec),
            }
        }
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn thread_pool(&self) -> Result<ThreadPool> {
        ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads.unwrap_or(0))
            .thread_name(|i| format!("aggregate-{i}"))
            .build()
            .map_err(PipelineError::configuration)
    }

    pub fn load_tables(&self) -> Result<BaseTables> {
        let load = |table: LogicalTable| {
            self.source
                .get_table(table.as_str())
                .map_err(|e| e.in_load(table.as_str()))
        };
        Ok(BaseTables {
            customers: load(LogicalTable::Customers)?,
            sales: load(LogicalTable::Sales)?,
            products: load(LogicalTable::Products)?,
        })
    }

    pub fn build_joins(&self, tables: &BaseTables) -> Result<JoinedViews> {
        let run = |spec: JoinSpec| {
            inner_join(&spec, tables.get(spec.left), tables.get(spec.right))
                .map_err(|e| e.in_join(spec.name))
        };
        let (customer_sale, product_sale) =
            rayon::join(|| run(customer_sale_join()), || run(product_sale_join()));
        Ok(JoinedViews {
            customer_sale: customer_sale?,
            product_sale: product_sale?,
        })
    }

    fn evaluate_one(
        &self,
        spec: &AggregateSpec,
        tables: &BaseTables,
        joins: Option<&JoinedViews>,
        results: &ResultSet,
    ) -> Result<()> {
        self.cancel.check()?;
        let input = match (spec.source, joins) {
            (Source::Customers, _) => &tables.customers,
            (Source::Sales, _) => &tables.sales,
            (Source::Products, _) => &tables.products,
            (Source::CustomerSale, Some(j)) => &j.customer_sale,
            (Source::ProductSale, Some(j)) => &j.product_sale,
            (source, None) => {
                return Err(PipelineError::configuration(format!(
                    "{source} evaluated before its join was built"
                ))
                .in_aggregate(spec.name.as_str()))
            }
        };
        let table = evaluate(spec, input).map_err(|e| e.in_aggregate(spec.name.as_str()))?;
        results.insert(spec.name, table)
    }

    fn evaluate_specs(
        &self,
        specs: &[&AggregateSpec],
        tables: &BaseTables,
        joins: Option<&JoinedViews>,
        results: &ResultSet,
    ) -> Vec<PipelineError> {
        let run = |spec: &&AggregateSpec| self.evaluate_one(spec, tables, joins, results);
        match self.config.error_policy {
            ErrorPolicy::FailFast => specs.par_iter().try_for_each(run).err().into_iter().collect(),
            ErrorPolicy::BestEffort => specs.par_iter().filter_map(|s| run(s).err()).collect(),
        }
    }

    /// Evaluate every spec. Returns whatever was produced plus the per-aggregate
    /// failures; join and pool errors are returned as `Err`.
    fn evaluate_all(&self, tables: &BaseTables) -> Result<(ResultSet, Vec<PipelineError>)> {
        let pool = self.thread_pool()?;
        let results = ResultSet::new();
        let (on_joins, on_base): (Vec<&AggregateSpec>, Vec<&AggregateSpec>) =
            self.specs.iter().partition(|s| s.source.is_join());

        // base-table aggregates overlap with the joins
        let (joins, mut failures) = pool.install(|| {
            rayon::join(
                || self.build_joins(tables),
                || self.evaluate_specs(&on_base, tables, None, &results),
            )
        });
        let joins = joins?;
        info!(
            customer_sale_rows = joins.customer_sale.num_rows(),
            product_sale_rows = joins.product_sale.num_rows(),
            "Joins built"
        );

        if failures.is_empty() || self.config.error_policy == ErrorPolicy::BestEffort {
            failures.extend(
                pool.install(|| self.evaluate_specs(&on_joins, tables, Some(&joins), &results)),
            );
        }
        Ok((results, failures))
    }

    /// Compute the full result set without writing anything.
    pub fn compute(&self, tables: &BaseTables) -> Result<ResultSet> {
        let (results, failures) = self.evaluate_all(tables)?;
        settle(failures)?;
        results.ensure_complete()?;
        Ok(results)
    }

    fn write_results(
        &self,
        results: Vec<(AggregateName, Table)>,
    ) -> (Vec<AggregateOutput>, Vec<PipelineError>) {
        let mut outputs = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (name, table) in results {
            if let Err(e) = self.cancel.check() {
                failures.push(e);
                break;
            }
            let location = output_location(&self.config.output_location, name.as_str());
            match self.sink.write(&location, &table, WriteMode::Overwrite) {
                Ok(()) => {
                    info!(aggregate = %name, location = %location, rows = table.num_rows(), "Aggregate written");
                    outputs.push(AggregateOutput {
                        name,
                        location,
                        rows: table.num_rows(),
                    });
                }
                Err(source) => {
                    let err = PipelineError::Storage {
                        aggregate: name.to_string(),
                        source,
                    };
                    warn!(error = %err, "Aggregate write failed");
                    failures.push(err);
                    if self.config.error_policy == ErrorPolicy::FailFast {
                        break;
                    }
                }
            }
        }
        (outputs, failures)
    }

    pub fn run(&mut self) -> Result<RunSummary> {
        let started = Instant::now();
        let result = self.run_inner(started);
        if let Err(e) = &result {
            error!(job = %self.config.job_name, error = %e, "Run failed");
        }
        result
    }

    fn run_inner(&mut self, started: Instant) -> Result<RunSummary> {
        self.config.validate()?;
        self.lifecycle.init(&self.config.job_name)?;

        let tables = self.load_tables()?;
        info!(
            customers = tables.customers.num_rows(),
            sales = tables.sales.num_rows(),
            products = tables.products.num_rows(),
            "Base tables loaded"
        );

        let (results, mut failures) = self.evaluate_all(&tables)?;
        let abort_before_write = self.config.error_policy == ErrorPolicy::FailFast
            || failures
                .iter()
                .any(|e| e.is_configuration() || matches!(e, PipelineError::Cancelled));
        if !failures.is_empty() && abort_before_write {
            settle(std::mem::take(&mut failures))?;
        }
        if failures.is_empty() {
            results.ensure_complete()?;
        }

        let (outputs, write_failures) = self.write_results(results.into_ordered());
        failures.extend(write_failures);
        settle(failures)?;

        let written: Vec<AggregateName> = outputs.iter().map(|o| o.name).collect();
        self.lifecycle.commit(&written)?;

        let summary = RunSummary {
            job_name: self.config.job_name.clone(),
            outputs,
            elapsed: started.elapsed(),
        };
        info!(
            job = %summary.job_name,
            aggregates = summary.outputs.len(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Run complete"
        );
        Ok(summary)
    }
}

/// Collapse per-aggregate failures into one error, if there are any.
fn settle(mut failures: Vec<PipelineError>) -> Result<()> {
    if failures.iter().any(|e| matches!(e, PipelineError::Cancelled)) {
        return Err(PipelineError::Cancelled);
    }
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(PipelineError::Failed(failures)),
    }
}
