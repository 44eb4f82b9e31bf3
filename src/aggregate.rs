//! Aggregation engine.
//!
//! An [`AggregateSpec`] is a plain value: which table to read, what to group
//! by, which function to apply and what to call the result. [`evaluate`]
//! turns one spec plus its input table into a result table whose rows are
//! sorted by group key, so the output never depends on input row order.

use std::fmt;

use ahash::{AHashMap, AHashSet};
use arrow2::array::Array;
use arrow2::datatypes::{DataType, Field};
use chrono::NaiveDateTime;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::result_set::AggregateName;
use crate::table::{array_from_datums, datum_at, is_numeric, Datum, Table};
use crate::temporal::{self, from_date32, from_timestamp, parse_timestamp};

/// Where a spec reads its rows from. Joins are at most one level deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Customers,
    Sales,
    Products,
    CustomerSale,
    ProductSale,
}

impl Source {
    pub fn is_join(&self) -> bool {
        matches!(self, Source::CustomerSale | Source::ProductSale)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Source::Customers => "customers",
            Source::Sales => "sales",
            Source::Products => "products",
            Source::CustomerSale => "customers ⋈ sales",
            Source::ProductSale => "products ⋈ sales",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupKey {
    Column(&'static str),
    Year(&'static str),
    Month(&'static str),
}

impl GroupKey {
    pub fn output_name(&self) -> &'static str {
        match self {
            GroupKey::Column(c) => c,
            GroupKey::Year(_) => "year",
            GroupKey::Month(_) => "month",
        }
    }

    pub fn input_column(&self) -> &'static str {
        match self {
            GroupKey::Column(c) | GroupKey::Year(c) | GroupKey::Month(c) => c,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Column(c) => write!(f, "{c}"),
            GroupKey::Year(c) => write!(f, "year({c})"),
            GroupKey::Month(c) => write!(f, "month({c})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggFunction {
    /// Number of rows in the group
    CountRows,
    /// Number of non-null values
    Count(&'static str),
    /// Sum of non-null numeric values
    Sum(&'static str),
    /// Number of distinct non-null values
    CountDistinct(&'static str),
}

impl fmt::Display for AggFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggFunction::CountRows => write!(f, "count(*)"),
            AggFunction::Count(c) => write!(f, "count({c})"),
            AggFunction::Sum(c) => write!(f, "sum({c})"),
            AggFunction::CountDistinct(c) => write!(f, "count(distinct {c})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    pub name: AggregateName,
    pub source: Source,
    pub group_by: Vec<GroupKey>,
    pub function: AggFunction,
    pub output: &'static str,
}

impl AggregateSpec {
    pub fn new(
        name: AggregateName,
        source: Source,
        group_by: Vec<GroupKey>,
        function: AggFunction,
        output: &'static str,
    ) -> Self {
        Self {
            name,
            source,
            group_by,
            function,
            output,
        }
    }
}

/// The fixed set of aggregates the pipeline materializes.
pub fn standard_specs() -> Vec<AggregateSpec> {
    use AggFunction::*;
    use AggregateName as N;
    use GroupKey::*;

    vec![
        AggregateSpec::new(
            N::CustomersByAge,
            Source::Customers,
            vec![Column("age")],
            CountRows,
            "customer_count",
        ),
        AggregateSpec::new(
            N::CustomersByGender,
            Source::Customers,
            vec![Column("gender")],
            CountRows,
            "customer_count",
        ),
        AggregateSpec::new(
            N::PurchaseSumBySubscriptionGender,
            Source::Customers,
            vec![Column("subscription_status"), Column("gender")],
            Sum("purchase_amount"),
            "total_purchase_amount",
        ),
        AggregateSpec::new(
            N::CustomersByInteractionType,
            Source::CustomerSale,
            vec![Column("interaction_type")],
            CountRows,
            "interaction_count",
        ),
        AggregateSpec::new(
            N::CustomersByPurchaseTime,
            Source::CustomerSale,
            vec![Column("timestamp")],
            CountRows,
            "purchase_count",
        ),
        AggregateSpec::new(
            N::ProductPurchaseFrequency,
            Source::CustomerSale,
            vec![Column("item_purchased")],
            Count("purchase_amount"),
            "purchase_frequency",
        ),
        AggregateSpec::new(
            N::PurchaseAmountByYearMonth,
            Source::CustomerSale,
            vec![Year("timestamp"), Month("timestamp")],
            Sum("purchase_amount"),
            "total_purchase_amount",
        ),
        AggregateSpec::new(
            N::TotalItemPrices,
            Source::Products,
            vec![],
            Sum("selling_price"),
            "total_item_price",
        ),
        AggregateSpec::new(
            N::TotalPriceByProductMaterial,
            Source::Products,
            vec![Column("name"), Column("category")],
            Sum("selling_price"),
            "total_item_price",
        ),
        AggregateSpec::new(
            N::UniqueProductCount,
            Source::ProductSale,
            vec![],
            CountDistinct("name"),
            "unique_product_count",
        ),
    ]
}

/// Resolves the per-row key for one [`GroupKey`].
struct KeyExtractor<'a> {
    key: &'a GroupKey,
    array: &'a dyn Array,
}

impl<'a> KeyExtractor<'a> {
    fn new(key: &'a GroupKey, table: &'a Table) -> Result<Self> {
        let array = table.column(key.input_column())?;
        if let GroupKey::Year(c) | GroupKey::Month(c) = key {
            if !matches!(
                array.data_type(),
                DataType::Timestamp(_, _) | DataType::Date32 | DataType::Utf8
            ) {
                return Err(PipelineError::AggregationType {
                    function: "extract date parts from",
                    column: c.to_string(),
                    data_type: format!("{:?}", array.data_type()),
                });
            }
        }
        Ok(Self { key, array })
    }

    fn output_type(&self) -> DataType {
        match self.key {
            GroupKey::Column(_) => self.array.data_type().clone(),
            GroupKey::Year(_) | GroupKey::Month(_) => DataType::Int32,
        }
    }

    fn extract(&self, row: usize) -> Result<Datum> {
        let raw = datum_at(self.array, row);
        let part: fn(&NaiveDateTime) -> i32 = match self.key {
            GroupKey::Column(_) => return Ok(raw),
            GroupKey::Year(_) => temporal::year_of,
            GroupKey::Month(_) => temporal::month_of,
        };
        let dt = match (&raw, self.array.data_type()) {
            (Datum::Null, _) => return Ok(Datum::Null),
            (Datum::Int(v), DataType::Timestamp(unit, _)) => from_timestamp(*v, *unit),
            (Datum::Int(v), DataType::Date32) => from_date32(*v as i32),
            (Datum::Str(s), _) => parse_timestamp(s),
            _ => None,
        };
        let dt = dt.ok_or_else(|| PipelineError::InvalidValue {
            column: self.key.input_column().to_string(),
            detail: format!("'{raw}' is not a timestamp"),
        })?;
        Ok(Datum::Int(part(&dt) as i64))
    }
}

/// Running state of one group.
#[derive(Debug, Clone)]
enum Accumulator {
    Count(i64),
    SumInt(i64),
    SumFloat(f64),
    Distinct(AHashSet<Datum>),
}

impl Accumulator {
    fn finish(self) -> Datum {
        match self {
            Accumulator::Count(n) | Accumulator::SumInt(n) => Datum::Int(n),
            Accumulator::SumFloat(x) => Datum::Float(x),
            Accumulator::Distinct(set) => Datum::Int(set.len() as i64),
        }
    }
}

/// Validated function plus its input column.
struct Aggregator<'a> {
    function: &'a AggFunction,
    array: Option<&'a dyn Array>,
    output_type: DataType,
}

impl<'a> Aggregator<'a> {
    fn new(function: &'a AggFunction, table: &'a Table) -> Result<Self> {
        let (array, output_type) = match function {
            AggFunction::CountRows => (None, DataType::Int64),
            AggFunction::Count(c) | AggFunction::CountDistinct(c) => {
                (Some(table.column(c)?), DataType::Int64)
            }
            AggFunction::Sum(c) => {
                let array = table.column(c)?;
                if !is_numeric(array.data_type()) {
                    return Err(PipelineError::AggregationType {
                        function: "sum",
                        column: c.to_string(),
                        data_type: format!("{:?}", array.data_type()),
                    });
                }
                let output_type = match array.data_type() {
                    DataType::Float64 => DataType::Float64,
                    _ => DataType::Int64,
                };
                (Some(array), output_type)
            }
        };
        Ok(Self {
            function,
            array,
            output_type,
        })
    }

    fn start(&self) -> Accumulator {
        match (self.function, &self.output_type) {
            (AggFunction::Sum(_), DataType::Float64) => Accumulator::SumFloat(0.0),
            (AggFunction::Sum(_), _) => Accumulator::SumInt(0),
            (AggFunction::CountDistinct(_), _) => Accumulator::Distinct(AHashSet::new()),
            _ => Accumulator::Count(0),
        }
    }

    fn update(&self, acc: &mut Accumulator, row: usize) -> Result<()> {
        let value = match self.array {
            Some(array) => datum_at(array, row),
            None => {
                if let Accumulator::Count(n) = acc {
                    *n += 1;
                }
                return Ok(());
            }
        };
        match (acc, value) {
            (_, Datum::Null) => {}
            (Accumulator::Count(n), _) => *n += 1,
            (Accumulator::SumInt(n), Datum::Int(v)) => {
                *n = n.checked_add(v).ok_or_else(|| PipelineError::InvalidValue {
                    column: self.column().to_string(),
                    detail: format!("integer sum overflows at {v}"),
                })?;
            }
            (Accumulator::SumFloat(x), Datum::Float(v)) => *x += v,
            (Accumulator::SumFloat(x), Datum::Int(v)) => *x += v as f64,
            (Accumulator::Distinct(set), v) => {
                set.insert(v);
            }
            _ => {}
        }
        Ok(())
    }

    fn column(&self) -> &'static str {
        match self.function {
            AggFunction::CountRows => "*",
            AggFunction::Count(c) | AggFunction::Sum(c) | AggFunction::CountDistinct(c) => c,
        }
    }
}

/// Evaluate one spec against its input table.
///
/// With no group keys the result is always exactly one row, even for an
/// empty input (count 0, sum 0).
pub fn evaluate(spec: &AggregateSpec, table: &Table) -> Result<Table> {
    let extractors = spec
        .group_by
        .iter()
        .map(|key| KeyExtractor::new(key, table))
        .collect::<Result<Vec<_>>>()?;
    let aggregator = Aggregator::new(&spec.function, table)?;

    let mut groups: AHashMap<Vec<Datum>, Accumulator> = AHashMap::new();
    if extractors.is_empty() {
        groups.insert(Vec::new(), aggregator.start());
    }
    for row in 0..table.num_rows() {
        let key = extractors
            .iter()
            .map(|e| e.extract(row))
            .collect::<Result<Vec<_>>>()?;
        let acc = groups.entry(key).or_insert_with(|| aggregator.start());
        aggregator.update(acc, row)?;
    }

    let mut groups: Vec<(Vec<Datum>, Accumulator)> = groups.into_iter().collect();
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    debug!(
        aggregate = %spec.name,
        input_rows = table.num_rows(),
        groups = groups.len(),
        "Evaluated aggregate"
    );

    let mut key_columns: Vec<Vec<Datum>> = vec![Vec::with_capacity(groups.len()); extractors.len()];
    let mut values = Vec::with_capacity(groups.len());
    for (key, acc) in groups {
        for (column, datum) in key_columns.iter_mut().zip(key) {
            column.push(datum);
        }
        values.push(acc.finish());
    }

    let mut fields = Vec::with_capacity(extractors.len() + 1);
    let mut arrays = Vec::with_capacity(extractors.len() + 1);
    for (extractor, column) in extractors.iter().zip(&key_columns) {
        let data_type = extractor.output_type();
        arrays.push(array_from_datums(&data_type, column));
        fields.push(Field::new(extractor.key.output_name(), data_type, true));
    }
    arrays.push(array_from_datums(&aggregator.output_type, &values));
    fields.push(Field::new(spec.output, aggregator.output_type.clone(), true));

    Table::try_new(fields, arrays)
}
