//! Time-series frames.
//!
//! A result set becomes one frame: the first column is the time field, every
//! other column an int64 field. Rows are buffered column-wise in
//! `TypedColumns` while they are read and materialized into an Arrow
//! `RecordBatch` once the result set is exhausted. Row order is preserved;
//! nothing is sorted, resampled or filled.

use arrow::array::{Array, ArrayRef, Int64Array, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::sync::Arc;
use thiserror::Error;

use tsbridge_db::{DbError, DbRow, DbTimestamp};

const TIME_ZONE: &str = "UTC";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("result set has no columns")]
    NoColumns,

    #[error("expected {expected} numeric columns, buffers hold {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

/// How a result column is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Time,
    Int64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub role: ColumnRole,
}

impl ColumnDescriptor {
    /// Column 0 is the time column; every other column is int64.
    pub fn from_names(names: &[String]) -> Result<Vec<Self>, FrameError> {
        if names.is_empty() {
            return Err(FrameError::NoColumns);
        }
        Ok(names
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnDescriptor {
                name: name.clone(),
                role: if i == 0 {
                    ColumnRole::Time
                } else {
                    ColumnRole::Int64
                },
            })
            .collect())
    }
}

/// Column-wise row buffers, one per descriptor.
#[derive(Debug, Clone, Default)]
pub struct TypedColumns {
    times: Vec<DbTimestamp>,
    numbers: Vec<Vec<i64>>,
}

impl TypedColumns {
    pub fn new(descriptors: &[ColumnDescriptor]) -> Self {
        let numeric = descriptors
            .iter()
            .filter(|d| d.role == ColumnRole::Int64)
            .count();
        Self {
            times: Vec::new(),
            numbers: vec![Vec::new(); numeric],
        }
    }

    /// Decode one row and append it. Nothing is appended if any cell fails.
    pub fn push_row(&mut self, row: &DbRow) -> Result<(), DbError> {
        let time: DbTimestamp = row.get(0)?;
        let values = (0..self.numbers.len())
            .map(|i| row.get::<i64>(i + 1))
            .collect::<Result<Vec<_>, _>>()?;
        self.times.push(time);
        for (column, value) in self.numbers.iter_mut().zip(values) {
            column.push(value);
        }
        Ok(())
    }

    /// Rows buffered so far.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn numeric_columns(&self) -> usize {
        self.numbers.len()
    }
}

/// Build the frame for one result set.
pub fn assemble(
    name: &str,
    descriptors: &[ColumnDescriptor],
    columns: TypedColumns,
) -> Result<TimeSeriesFrame, FrameError> {
    let (time, numeric) = match descriptors.split_first() {
        Some(split) => split,
        None => return Err(FrameError::NoColumns),
    };
    if numeric.len() != columns.numbers.len() {
        return Err(FrameError::ShapeMismatch {
            expected: numeric.len(),
            actual: columns.numbers.len(),
        });
    }

    let mut fields = Vec::with_capacity(descriptors.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(descriptors.len());

    fields.push(Field::new(
        &time.name,
        DataType::Timestamp(TimeUnit::Microsecond, Some(TIME_ZONE.into())),
        false,
    ));
    let micros: Vec<i64> = columns.times.iter().map(DbTimestamp::unix_micros).collect();
    arrays.push(Arc::new(
        TimestampMicrosecondArray::from(micros).with_timezone(TIME_ZONE),
    ));

    for (descriptor, values) in numeric.iter().zip(columns.numbers) {
        fields.push(Field::new(&descriptor.name, DataType::Int64, false));
        arrays.push(Arc::new(Int64Array::from(values)));
    }

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
    Ok(TimeSeriesFrame {
        name: name.to_string(),
        batch,
    })
}

/// One time field followed by int64 fields, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesFrame {
    name: String,
    batch: RecordBatch,
}

impl TimeSeriesFrame {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_fields(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    fn time_array(&self) -> Option<&TimestampMicrosecondArray> {
        self.batch
            .columns()
            .first()?
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
    }

    /// Values of the time field, in row order.
    pub fn times(&self) -> Vec<DbTimestamp> {
        self.time_array()
            .map(|array| {
                array
                    .values()
                    .iter()
                    .filter_map(|micros| DbTimestamp::from_unix_micros(*micros))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Values of the int64 field at `index` (1-based position in the frame).
    pub fn int64_values(&self, index: usize) -> Option<Vec<i64>> {
        if index == 0 {
            return None;
        }
        self.batch
            .columns()
            .get(index)?
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|array| array.values().to_vec())
    }

    /// Encode as an Arrow IPC stream.
    pub fn to_ipc_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let mut sink = Vec::new();
        {
            let mut writer = StreamWriter::try_new(&mut sink, &self.batch.schema())?;
            writer.write(&self.batch)?;
            writer.finish()?;
        }
        Ok(sink)
    }
}

#[derive(serde::Serialize)]
struct FieldView<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    values: Vec<i64>,
}

/// `{name, fields: [{name, type: "time"|"number", values}]}` with times in epoch milliseconds.
impl Serialize for TimeSeriesFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let schema = self.batch.schema();
        let mut fields = Vec::with_capacity(self.num_fields());
        for (index, field) in schema.fields().iter().enumerate() {
            let view = if index == 0 {
                FieldView {
                    name: field.name(),
                    kind: "time",
                    values: self.times().iter().map(DbTimestamp::unix_millis).collect(),
                }
            } else {
                FieldView {
                    name: field.name(),
                    kind: "number",
                    values: self.int64_values(index).unwrap_or_default(),
                }
            };
            fields.push(view);
        }

        let mut state = serializer.serialize_struct("TimeSeriesFrame", 2)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("fields", &fields)?;
        state.end()
    }
}
