//! The three source tables and their required columns.

use std::fmt;
use std::str::FromStr;

use arrow2::datatypes::{DataType, Field, TimeUnit};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::table::Table;

pub const TIMESTAMP_TYPE: DataType = DataType::Timestamp(TimeUnit::Millisecond, None);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalTable {
    Customers,
    Sales,
    Products,
}

impl LogicalTable {
    pub const ALL: [LogicalTable; 3] = [
        LogicalTable::Customers,
        LogicalTable::Sales,
        LogicalTable::Products,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalTable::Customers => "customers",
            LogicalTable::Sales => "sales",
            LogicalTable::Products => "products",
        }
    }

    /// Columns every table of this kind must carry.
    pub fn required_columns(&self) -> &'static [(&'static str, DataType)] {
        match self {
            LogicalTable::Customers => CUSTOMER_COLUMNS,
            LogicalTable::Sales => SALE_COLUMNS,
            LogicalTable::Products => PRODUCT_COLUMNS,
        }
    }

    pub fn required_fields(&self) -> Vec<Field> {
        self.required_columns()
            .iter()
            .map(|(name, dt)| Field::new(*name, dt.clone(), true))
            .collect()
    }

    pub fn declared_type(&self, column: &str) -> Option<&'static DataType> {
        self.required_columns()
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, dt)| dt)
    }

    /// Check that `table` carries every required column with its declared type.
    pub fn validate(&self, table: &Table) -> Result<()> {
        for (name, data_type) in self.required_columns() {
            if !table.has_column(name) {
                return Err(PipelineError::schema(format!(
                    "table '{}' is missing required column '{}'",
                    self, name
                )));
            }
            let field = table.field(name)?;
            if !same_logical_type(&field.data_type, data_type) {
                return Err(PipelineError::schema(format!(
                    "column '{}.{}' is {:?}, expected {:?}",
                    self, name, field.data_type, data_type
                )));
            }
        }
        Ok(())
    }
}

// Any timestamp unit satisfies a timestamp requirement.
fn same_logical_type(actual: &DataType, expected: &DataType) -> bool {
    match (actual, expected) {
        (DataType::Timestamp(_, _), DataType::Timestamp(_, _)) => true,
        _ => actual == expected,
    }
}

impl fmt::Display for LogicalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicalTable {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        LogicalTable::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| PipelineError::NotFound(s.to_string()))
    }
}

const CUSTOMER_COLUMNS: &[(&str, DataType)] = &[
    ("customer_id", DataType::Utf8),
    ("age", DataType::Int64),
    ("gender", DataType::Utf8),
    ("subscription_status", DataType::Utf8),
    ("purchase_amount", DataType::Float64),
];

const SALE_COLUMNS: &[(&str, DataType)] = &[
    ("user_id", DataType::Utf8),
    ("product_id", DataType::Utf8),
    ("interaction_type", DataType::Utf8),
    ("timestamp", TIMESTAMP_TYPE),
    ("item_purchased", DataType::Utf8),
    ("purchase_amount", DataType::Float64),
];

const PRODUCT_COLUMNS: &[(&str, DataType)] = &[
    ("unique_id", DataType::Utf8),
    ("name", DataType::Utf8),
    ("category", DataType::Utf8),
    ("selling_price", DataType::Float64),
];

/// Header spellings found in the raw catalog exports.
const HEADER_ALIASES: &[(&str, &str)] = &[
    ("purchase_amount_usd", "purchase_amount"),
    ("uniqe_id", "unique_id"),
    ("product_name", "name"),
    ("time_stamp", "timestamp"),
];

/// Map a raw CSV header onto a canonical column name.
///
/// `"Purchase Amount (USD)"` becomes `purchase_amount`, `"Uniqe Id"` becomes
/// `unique_id`.
pub fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().trim_start_matches('\u{feff}').chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    HEADER_ALIASES
        .iter()
        .find(|(raw, _)| *raw == out)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow2::array::{PrimitiveArray, Utf8Array};

    #[test]
    fn normalizes_catalog_headers() {
        assert_eq!(normalize_header("Customer ID"), "customer_id");
        assert_eq!(normalize_header("Purchase Amount (USD)"), "purchase_amount");
        assert_eq!(normalize_header("Uniqe Id"), "unique_id");
        assert_eq!(normalize_header("Product Name"), "name");
        assert_eq!(normalize_header("Time stamp"), "timestamp");
        assert_eq!(normalize_header("Subscription Status"), "subscription_status");
        assert_eq!(normalize_header("\u{feff}user id"), "user_id");
    }

    #[test]
    fn validate_reports_missing_column() {
        let table = Table::try_new(
            vec![
                Field::new("unique_id", DataType::Utf8, true),
                Field::new("name", DataType::Utf8, true),
                Field::new("selling_price", DataType::Float64, true),
            ],
            vec![
                Utf8Array::<i32>::from([Some("p1")]).boxed(),
                Utf8Array::<i32>::from([Some("Mug")]).boxed(),
                PrimitiveArray::<f64>::from([Some(3.5)]).boxed(),
            ],
        )
        .unwrap();
        let err = LogicalTable::Products.validate(&table).unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
        assert!(err.to_string().contains("category"));
    }

    #[test]
    fn logical_names_parse() {
        assert_eq!("sales".parse::<LogicalTable>().unwrap(), LogicalTable::Sales);
        assert!(matches!(
            "orders".parse::<LogicalTable>(),
            Err(PipelineError::NotFound(_))
        ));
    }
}
