//! Join engine: strict inner equi-joins between two tables.
//!
//! Unmatched rows are dropped on both sides and null keys never match.
//! A key value seen m times on the left and n times on the right
//! contributes m × n output rows.

use ahash::AHashMap;
use arrow2::array::PrimitiveArray;
use arrow2::datatypes::{DataType, Field};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::records::LogicalTable;
use crate::table::{datum_at, Datum, Table};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub name: &'static str,
    pub left: LogicalTable,
    pub left_key: &'static str,
    pub right: LogicalTable,
    pub right_key: &'static str,
    /// Prefix for right columns whose name also exists on the left.
    /// The left side keeps its bare names.
    pub right_alias: &'static str,
}

/// customers ⋈ sales on `customer_id = user_id`
pub fn customer_sale_join() -> JoinSpec {
    JoinSpec {
        name: "customer_sale",
        left: LogicalTable::Customers,
        left_key: "customer_id",
        right: LogicalTable::Sales,
        right_key: "user_id",
        right_alias: "sale",
    }
}

/// products ⋈ sales on `unique_id = product_id`
pub fn product_sale_join() -> JoinSpec {
    JoinSpec {
        name: "product_sale",
        left: LogicalTable::Products,
        left_key: "unique_id",
        right: LogicalTable::Sales,
        right_key: "product_id",
        right_alias: "sale",
    }
}

fn key_family(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Int32 => DataType::Int64,
        other => other.clone(),
    }
}

fn row_index(row: usize, side: &str) -> Result<u32> {
    u32::try_from(row).map_err(|_| {
        PipelineError::configuration(format!("{side} side of join exceeds {} rows", u32::MAX))
    })
}

pub fn inner_join(spec: &JoinSpec, left: &Table, right: &Table) -> Result<Table> {
    let left_keys = left.column(spec.left_key)?;
    let right_keys = right.column(spec.right_key)?;
    if key_family(left_keys.data_type()) != key_family(right_keys.data_type()) {
        return Err(PipelineError::configuration(format!(
            "join keys '{}' ({:?}) and '{}' ({:?}) are not comparable",
            spec.left_key,
            left_keys.data_type(),
            spec.right_key,
            right_keys.data_type()
        )));
    }

    let mut build: AHashMap<Datum, Vec<u32>> = AHashMap::with_capacity(left.num_rows());
    for row in 0..left.num_rows() {
        let key = datum_at(left_keys, row);
        if !key.is_null() {
            build
                .entry(key)
                .or_default()
                .push(row_index(row, spec.left.as_str())?);
        }
    }

    let mut left_idx = Vec::new();
    let mut right_idx = Vec::new();
    for row in 0..right.num_rows() {
        let key = datum_at(right_keys, row);
        if key.is_null() {
            continue;
        }
        if let Some(matches) = build.get(&key) {
            let r = row_index(row, spec.right.as_str())?;
            for &l in matches {
                left_idx.push(l);
                right_idx.push(r);
            }
        }
    }

    let left_part = left.take(&PrimitiveArray::from_vec(left_idx))?;
    let right_part = right.take(&PrimitiveArray::from_vec(right_idx))?;

    let mut fields: Vec<Field> = Vec::with_capacity(left.num_columns() + right.num_columns());
    let mut arrays = Vec::with_capacity(fields.capacity());
    for (field, array) in left_part.fields().iter().zip(left_part.chunk().arrays()) {
        fields.push(field.clone());
        arrays.push(array.clone());
    }
    for (field, array) in right_part.fields().iter().zip(right_part.chunk().arrays()) {
        let mut field = field.clone();
        if left.has_column(&field.name) {
            field.name = format!("{}_{}", spec.right_alias, field.name);
        }
        fields.push(field);
        arrays.push(array.clone());
    }

    let joined = Table::try_new(fields, arrays)?;
    debug!(
        join = spec.name,
        left_rows = left.num_rows(),
        right_rows = right.num_rows(),
        joined_rows = joined.num_rows(),
        "Inner join complete; unmatched rows dropped"
    );
    Ok(joined)
}
