//! Table sources: where the three base tables come from.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use arrow2::array::*;
use arrow2::datatypes::*;
use tracing::{debug, info};

use crate::config::TableNames;
use crate::error::{PipelineError, Result};
use crate::records::{normalize_header, LogicalTable, TIMESTAMP_TYPE};
use crate::table::Table;
use crate::temporal::{parse_timestamp, to_millis};

/// Supplies base tables by logical name.
pub trait TableSource: Send + Sync {
    /// Fails with `NotFound` for an unregistered name and `Schema` when a
    /// required column is absent.
    fn get_table(&self, logical_name: &str) -> Result<Table>;
}

/// In-memory table source, mostly for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    tables: HashMap<String, Table>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, logical_name: &str, table: Table) -> Self {
        self.tables.insert(logical_name.to_string(), table);
        self
    }

    pub fn insert(&mut self, logical_name: &str, table: Table) {
        self.tables.insert(logical_name.to_string(), table);
    }
}

impl TableSource for MemorySource {
    fn get_table(&self, logical_name: &str) -> Result<Table> {
        let table = self
            .tables
            .get(logical_name)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(logical_name.to_string()))?;
        if let Ok(logical) = logical_name.parse::<LogicalTable>() {
            logical.validate(&table)?;
        }
        Ok(table)
    }
}

/// Reads each logical table from a CSV file inside the source directory.
#[derive(Debug, Clone)]
pub struct CsvCatalogSource {
    root: PathBuf,
    tables: TableNames,
}

impl CsvCatalogSource {
    pub fn new(root: impl Into<PathBuf>, tables: TableNames) -> Self {
        Self {
            root: root.into(),
            tables,
        }
    }

    pub fn path_of(&self, logical: LogicalTable) -> PathBuf {
        self.root.join(self.tables.file_name(logical))
    }
}

impl TableSource for CsvCatalogSource {
    fn get_table(&self, logical_name: &str) -> Result<Table> {
        let logical: LogicalTable = logical_name.parse()?;
        let path = self.path_of(logical);
        if !path.is_file() {
            return Err(PipelineError::NotFound(format!(
                "{} ({})",
                logical_name,
                path.display()
            )));
        }
        let table = read_csv(&path, logical)?;
        logical.validate(&table)?;
        info!(
            table = logical_name,
            rows = table.num_rows(),
            path = %path.display(),
            "Loaded table"
        );
        Ok(table)
    }
}

/// Parse a CSV file into a table, typing the required columns of `logical`.
/// Extra columns are kept as text.
pub fn read_csv(path: &Path, logical: LogicalTable) -> Result<Table> {
    let file = File::open(path).map_err(|e| {
        PipelineError::configuration(format!("cannot open {}: {}", path.display(), e))
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::schema(format!("{}: {}", path.display(), e)))?
        .iter()
        .map(normalize_header)
        .collect();

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record =
            record.map_err(|e| PipelineError::schema(format!("{}: {}", path.display(), e)))?;
        for (i, column) in cells.iter_mut().enumerate() {
            column.push(record.get(i).unwrap_or("").to_string());
        }
    }
    debug!(path = %path.display(), columns = headers.len(), "Parsed CSV");

    let mut fields = Vec::with_capacity(headers.len());
    let mut arrays = Vec::with_capacity(headers.len());
    for (name, values) in headers.into_iter().zip(cells) {
        if fields.iter().any(|f: &Field| f.name == name) {
            continue;
        }
        let data_type = logical
            .declared_type(&name)
            .cloned()
            .unwrap_or(DataType::Utf8);
        arrays.push(parse_column(&name, &data_type, &values)?);
        fields.push(Field::new(name, data_type, true));
    }
    Table::try_new(fields, arrays)
}

fn parse_column(name: &str, data_type: &DataType, values: &[String]) -> Result<Box<dyn Array>> {
    let invalid = |v: &str| PipelineError::InvalidValue {
        column: name.to_string(),
        detail: format!("'{}' is not a valid {:?}", v, data_type),
    };

    macro_rules! build_prim {
        ($ty:ty, $parse:expr) => {{
            let mut col = MutablePrimitiveArray::<$ty>::with_capacity(values.len());
            for v in values {
                if v.is_empty() {
                    col.push_null();
                } else {
                    col.push(Some($parse(v.as_str()).ok_or_else(|| invalid(v))?));
                }
            }
            col.to(data_type.clone()).as_box()
        }};
    }

    let array = match data_type {
        DataType::Int64 => build_prim!(i64, parse_int),
        DataType::Float64 => build_prim!(f64, parse_amount),
        dt if *dt == TIMESTAMP_TYPE => {
            build_prim!(i64, |v: &str| parse_timestamp(v).map(|dt| to_millis(&dt)))
        }
        _ => {
            let mut col = MutableUtf8Array::<i32>::with_capacity(values.len());
            for v in values {
                if v.is_empty() {
                    col.push_null();
                } else {
                    col.push(Some(v.as_str()));
                }
            }
            col.as_box()
        }
    };
    Ok(array)
}

fn parse_int(v: &str) -> Option<i64> {
    v.parse::<i64>()
        .ok()
        .or_else(|| v.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

// Tolerates currency decoration such as "$1,299.00".
fn parse_amount(v: &str) -> Option<f64> {
    let cleaned: String = v.chars().filter(|c| !matches!(c, '$' | ',' | ' ')).collect();
    cleaned.parse::<f64>().ok()
}
