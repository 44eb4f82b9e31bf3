use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use arrow2::array::*;
use arrow2::chunk::Chunk;
use arrow2::compute::take::take;
use arrow2::datatypes::*;

use crate::error::{PipelineError, Result};

/// One cell of a table, detached from its column.
///
/// Used as a join key, a group key and for row-wise inspection. Integers of
/// every width (and the physical value of dates/timestamps) collapse to `Int`.
#[derive(Debug, Clone)]
pub enum Datum {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    fn rank(&self) -> u8 {
        match self {
            Datum::Null => 0,
            Datum::Bool(_) => 1,
            Datum::Int(_) => 2,
            Datum::Float(_) => 3,
            Datum::Str(_) => 4,
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Datum {}

impl Hash for Datum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Datum::Null => {}
            Datum::Bool(v) => v.hash(state),
            Datum::Int(v) => v.hash(state),
            Datum::Float(v) => v.to_bits().hash(state),
            Datum::Str(v) => v.hash(state),
        }
    }
}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// nulls sort first
impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Datum::Bool(a), Datum::Bool(b)) => a.cmp(b),
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::Float(a), Datum::Float(b)) => a.total_cmp(b),
            (Datum::Str(a), Datum::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "null"),
            Datum::Bool(v) => write!(f, "{v}"),
            Datum::Int(v) => write!(f, "{v}"),
            Datum::Float(v) => write!(f, "{v}"),
            Datum::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Str(v.to_string())
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float(v)
    }
}

/// Whether a column type can be carried by a [`Table`].
pub fn is_supported(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int32
            | DataType::Int64
            | DataType::Float64
            | DataType::Utf8
            | DataType::Boolean
            | DataType::Date32
            | DataType::Timestamp(_, _)
    )
}

pub fn is_numeric(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int32 | DataType::Int64 | DataType::Float64
    )
}

/// Read one cell of a supported array.
pub fn datum_at(array: &dyn Array, row: usize) -> Datum {
    if array.is_null(row) {
        return Datum::Null;
    }
    let any = array.as_any();
    match array.data_type() {
        DataType::Int32 | DataType::Date32 => any
            .downcast_ref::<PrimitiveArray<i32>>()
            .map_or(Datum::Null, |a| Datum::Int(a.value(row) as i64)),
        DataType::Int64 | DataType::Timestamp(_, _) => any
            .downcast_ref::<PrimitiveArray<i64>>()
            .map_or(Datum::Null, |a| Datum::Int(a.value(row))),
        DataType::Float64 => any
            .downcast_ref::<PrimitiveArray<f64>>()
            .map_or(Datum::Null, |a| Datum::Float(a.value(row))),
        DataType::Utf8 => any
            .downcast_ref::<Utf8Array<i32>>()
            .map_or(Datum::Null, |a| Datum::Str(a.value(row).to_string())),
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map_or(Datum::Null, |a| Datum::Bool(a.value(row))),
        _ => Datum::Null,
    }
}

/// Build a column of `data_type` from datums. Values that do not fit the
/// type become nulls.
pub fn array_from_datums(data_type: &DataType, values: &[Datum]) -> Box<dyn Array> {
    macro_rules! build_prim {
        ($ty:ty, $variant:ident) => {{
            let mut col = MutablePrimitiveArray::<$ty>::with_capacity(values.len());
            for v in values {
                match v {
                    Datum::$variant(x) => col.push(Some(*x as $ty)),
                    _ => col.push_null(),
                }
            }
            col.to(data_type.clone()).as_box()
        }};
    }

    match data_type {
        DataType::Int32 | DataType::Date32 => build_prim!(i32, Int),
        DataType::Int64 | DataType::Timestamp(_, _) => build_prim!(i64, Int),
        DataType::Float64 => build_prim!(f64, Float),
        DataType::Boolean => {
            let mut col = MutableBooleanArray::with_capacity(values.len());
            for v in values {
                match v {
                    Datum::Bool(x) => col.push(Some(*x)),
                    _ => col.push_null(),
                }
            }
            col.as_box()
        }
        _ => {
            let mut col = MutableUtf8Array::<i32>::with_capacity(values.len());
            for v in values {
                match v {
                    Datum::Str(x) => col.push(Some(x.as_str())),
                    _ => col.push_null(),
                }
            }
            col.as_box()
        }
    }
}

/// An immutable set of named, equally long columns.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Schema,
    chunk: Chunk<Box<dyn Array>>,
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.chunk == other.chunk
    }
}

impl Table {
    pub fn try_new(fields: Vec<Field>, arrays: Vec<Box<dyn Array>>) -> Result<Self> {
        if fields.len() != arrays.len() {
            return Err(PipelineError::schema(format!(
                "{} fields but {} columns",
                fields.len(),
                arrays.len()
            )));
        }
        for (field, array) in fields.iter().zip(&arrays) {
            if !is_supported(&field.data_type) {
                return Err(PipelineError::schema(format!(
                    "column '{}' has unsupported type {:?}",
                    field.name, field.data_type
                )));
            }
            if field.data_type != *array.data_type() {
                return Err(PipelineError::schema(format!(
                    "column '{}' declared as {:?} but holds {:?}",
                    field.name,
                    field.data_type,
                    array.data_type()
                )));
            }
        }
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(PipelineError::schema(format!(
                    "duplicate column '{}'",
                    field.name
                )));
            }
        }
        let chunk = Chunk::try_new(arrays)?;
        Ok(Self {
            schema: Schema::from(fields),
            chunk,
        })
    }

    /// A zero-row table with the given columns.
    pub fn empty(fields: Vec<Field>) -> Result<Self> {
        let arrays = fields
            .iter()
            .map(|f| new_empty_array(f.data_type.clone()))
            .collect();
        Self::try_new(fields, arrays)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn fields(&self) -> &[Field] {
        &self.schema.fields
    }

    pub fn chunk(&self) -> &Chunk<Box<dyn Array>> {
        &self.chunk
    }

    pub fn num_rows(&self) -> usize {
        self.chunk.len()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.fields.iter().map(|f| f.name.as_str()).collect()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.schema.fields.iter().position(|f| f.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn field(&self, name: &str) -> Result<&Field> {
        self.position(name)
            .map(|i| &self.schema.fields[i])
            .ok_or_else(|| self.missing(name))
    }

    pub fn column(&self, name: &str) -> Result<&dyn Array> {
        self.position(name)
            .map(|i| self.chunk.arrays()[i].as_ref())
            .ok_or_else(|| self.missing(name))
    }

    fn missing(&self, name: &str) -> PipelineError {
        PipelineError::configuration(format!(
            "column '{}' not found (available: {})",
            name,
            self.column_names().join(", ")
        ))
    }

    pub fn datum(&self, column: &str, row: usize) -> Result<Datum> {
        Ok(datum_at(self.column(column)?, row))
    }

    /// Gather rows by index into a new table with the same schema.
    pub fn take(&self, indices: &PrimitiveArray<u32>) -> Result<Self> {
        let arrays = self
            .chunk
            .arrays()
            .iter()
            .map(|a| take(a.as_ref(), indices))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::try_new(self.schema.fields.clone(), arrays)
    }

    pub fn row(&self, row: usize) -> Vec<Datum> {
        self.chunk
            .arrays()
            .iter()
            .map(|a| datum_at(a.as_ref(), row))
            .collect()
    }

    pub fn rows(&self) -> Vec<Vec<Datum>> {
        (0..self.num_rows()).map(|r| self.row(r)).collect()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.column_names().join(" | "))?;
        for row in self.rows() {
            let cells: Vec<String> = row.iter().map(|d| d.to_string()).collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::try_new(
            vec![
                Field::new("id", DataType::Utf8, true),
                Field::new("age", DataType::Int64, true),
            ],
            vec![
                Utf8Array::<i32>::from([Some("a"), Some("b"), None]).boxed(),
                PrimitiveArray::<i64>::from([Some(20), None, Some(30)]).boxed(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn reads_cells_as_datums() {
        let t = sample();
        assert_eq!(t.num_rows(), 3);
        assert_eq!(t.datum("id", 0).unwrap(), Datum::from("a"));
        assert_eq!(t.datum("age", 1).unwrap(), Datum::Null);
        assert_eq!(t.row(2), vec![Datum::Null, Datum::Int(30)]);
    }

    #[test]
    fn missing_column_is_configuration_error() {
        let err = sample().column("gender").unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("gender"));
    }

    #[test]
    fn rejects_mismatched_and_unsupported_columns() {
        let mismatched = Table::try_new(
            vec![Field::new("age", DataType::Utf8, true)],
            vec![PrimitiveArray::<i64>::from_vec(vec![1]).boxed()],
        );
        assert!(matches!(mismatched, Err(PipelineError::Schema(_))));

        let unsupported = Table::try_new(
            vec![Field::new("x", DataType::UInt8, true)],
            vec![PrimitiveArray::<u8>::from_vec(vec![1]).boxed()],
        );
        assert!(matches!(unsupported, Err(PipelineError::Schema(_))));
    }

    #[test]
    fn take_repeats_rows() {
        let t = sample();
        let picked = t.take(&PrimitiveArray::from_vec(vec![0u32, 0, 2])).unwrap();
        assert_eq!(picked.num_rows(), 3);
        assert_eq!(picked.datum("id", 1).unwrap(), Datum::from("a"));
        assert_eq!(picked.datum("age", 2).unwrap(), Datum::Int(30));
    }

    #[test]
    fn datum_order_puts_nulls_first() {
        let mut keys = vec![Datum::Int(3), Datum::Null, Datum::Int(1)];
        keys.sort();
        assert_eq!(keys, vec![Datum::Null, Datum::Int(1), Datum::Int(3)]);
    }

    #[test]
    fn array_from_datums_keeps_logical_type() {
        let ts = DataType::Timestamp(TimeUnit::Millisecond, None);
        let col = array_from_datums(&ts, &[Datum::Int(1_000), Datum::Null]);
        assert_eq!(col.data_type(), &ts);
        assert_eq!(datum_at(col.as_ref(), 0), Datum::Int(1_000));
        assert!(col.is_null(1));
    }
}
