//! Columnar batches
//!
//! A [`ColumnarBatch`] holds one Arrow array per attribute field, an optional array of WKB
//! geometries and optional feature ids, all of the same length. Nulls are carried by the
//! arrays' validity bitmaps.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_array::builder::{
    BinaryBuilder, BooleanBuilder, Date32Builder, Float32Builder, Float64Builder, Int16Builder,
    Int32Builder, Int64Builder, StringBuilder, Time32MillisecondBuilder,
    TimestampMillisecondBuilder,
};
use arrow_array::{Array, ArrayRef, BinaryArray, Int64Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, TimeUnit};

use crate::errors::*;
use crate::vector::Feature;

/// Name of the feature id column in [`ColumnarBatch::into_record_batch`].
pub const FID_COLUMN: &str = "fid";
/// Name of the geometry column in [`ColumnarBatch::into_record_batch`].
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Equal-length typed arrays: attribute columns, geometries and feature ids.
#[derive(Clone, Debug)]
pub struct ColumnarBatch {
    columns: Vec<(String, ArrayRef)>,
    geometry: Option<BinaryArray>,
    fids: Option<Int64Array>,
    num_rows: usize,
}

impl ColumnarBatch {
    /// Builds a batch from named attribute columns and optional WKB geometries.
    ///
    /// Fails if column names repeat or if arrays differ in length.
    pub fn try_new(
        columns: Vec<(String, ArrayRef)>,
        geometry: Option<BinaryArray>,
    ) -> Result<ColumnarBatch> {
        let num_rows = columns
            .first()
            .map(|(_, array)| array.len())
            .or_else(|| geometry.as_ref().map(Array::len))
            .unwrap_or(0);
        for (idx, (name, array)) in columns.iter().enumerate() {
            if columns[..idx].iter().any(|(other, _)| other == name) {
                return Err(OgrioError::BadArgument(format!(
                    "Duplicate column name '{name}'"
                )));
            }
            if array.len() != num_rows {
                return Err(OgrioError::BadArgument(format!(
                    "Column '{name}' has {} rows, expected {num_rows}",
                    array.len()
                )));
            }
        }
        if let Some(geometry) = &geometry {
            if geometry.len() != num_rows {
                return Err(OgrioError::BadArgument(format!(
                    "Geometry array has {} rows, expected {num_rows}",
                    geometry.len()
                )));
            }
        }
        Ok(ColumnarBatch {
            columns,
            geometry,
            fids: None,
            num_rows,
        })
    }

    /// Attaches feature ids.
    pub fn with_fids(mut self, fids: Int64Array) -> Result<ColumnarBatch> {
        if fids.len() != self.num_rows {
            return Err(OgrioError::BadArgument(format!(
                "Feature id array has {} rows, expected {}",
                fids.len(),
                self.num_rows
            )));
        }
        self.fids = Some(fids);
        Ok(self)
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn columns(&self) -> &[(String, ArrayRef)] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, array)| array)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// ISO WKB geometries; nulls mark features without geometry.
    pub fn geometry(&self) -> Option<&BinaryArray> {
        self.geometry.as_ref()
    }

    pub fn fids(&self) -> Option<&Int64Array> {
        self.fids.as_ref()
    }

    /// Converts the batch into an Arrow [`RecordBatch`].
    ///
    /// Columns are laid out as `fid` (when present), the attribute columns, then `geometry`
    /// (when present) tagged with the `geoarrow.wkb` extension name.
    pub fn into_record_batch(self) -> Result<RecordBatch> {
        let mut fields = Vec::with_capacity(self.columns.len() + 2);
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len() + 2);

        if let Some(fids) = self.fids {
            fields.push(Field::new(FID_COLUMN, DataType::Int64, fids.null_count() > 0));
            arrays.push(Arc::new(fids));
        }
        for (name, array) in self.columns {
            if name == FID_COLUMN || name == GEOMETRY_COLUMN {
                return Err(OgrioError::BadArgument(format!(
                    "Column name '{name}' is reserved in record batches"
                )));
            }
            fields.push(Field::new(name, array.data_type().clone(), true));
            arrays.push(array);
        }
        if let Some(geometry) = self.geometry {
            let metadata = HashMap::from([(
                "ARROW:extension:name".to_string(),
                "geoarrow.wkb".to_string(),
            )]);
            fields.push(Field::new(GEOMETRY_COLUMN, DataType::Binary, true).with_metadata(metadata));
            arrays.push(Arc::new(geometry));
        }

        let schema = Arc::new(Schema::new(fields));
        if arrays.is_empty() {
            let options = arrow_array::RecordBatchOptions::new().with_row_count(Some(self.num_rows));
            return Ok(RecordBatch::try_new_with_options(schema, arrays, &options)?);
        }
        Ok(RecordBatch::try_new(schema, arrays)?)
    }
}

/// Typed builder for one attribute column being read.
pub(crate) enum ColumnBuilder {
    Boolean(BooleanBuilder),
    Int16(Int16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float32(Float32Builder),
    Float64(Float64Builder),
    Utf8(StringBuilder),
    Binary(BinaryBuilder),
    Date32(Date32Builder),
    Time32(Time32MillisecondBuilder),
    Timestamp(TimestampMillisecondBuilder),
}

/// Bytes reserved per row for variable length values.
const VALUE_BYTES_HINT: usize = 16;

impl ColumnBuilder {
    /// Builder for `data_type`, which must be one produced by [`crate::types::to_arrow`].
    pub(crate) fn with_capacity(data_type: &DataType, capacity: usize) -> Result<ColumnBuilder> {
        let builder = match data_type {
            DataType::Boolean => ColumnBuilder::Boolean(BooleanBuilder::with_capacity(capacity)),
            DataType::Int16 => ColumnBuilder::Int16(Int16Builder::with_capacity(capacity)),
            DataType::Int32 => ColumnBuilder::Int32(Int32Builder::with_capacity(capacity)),
            DataType::Int64 => ColumnBuilder::Int64(Int64Builder::with_capacity(capacity)),
            DataType::Float32 => ColumnBuilder::Float32(Float32Builder::with_capacity(capacity)),
            DataType::Float64 => ColumnBuilder::Float64(Float64Builder::with_capacity(capacity)),
            DataType::Utf8 => ColumnBuilder::Utf8(StringBuilder::with_capacity(
                capacity,
                capacity.saturating_mul(VALUE_BYTES_HINT),
            )),
            DataType::Binary => ColumnBuilder::Binary(BinaryBuilder::with_capacity(
                capacity,
                capacity.saturating_mul(VALUE_BYTES_HINT),
            )),
            DataType::Date32 => ColumnBuilder::Date32(Date32Builder::with_capacity(capacity)),
            DataType::Time32(TimeUnit::Millisecond) => {
                ColumnBuilder::Time32(Time32MillisecondBuilder::with_capacity(capacity))
            }
            DataType::Timestamp(TimeUnit::Millisecond, None) => {
                ColumnBuilder::Timestamp(TimestampMillisecondBuilder::with_capacity(capacity))
            }
            other => {
                return Err(OgrioError::BadArgument(format!(
                    "No column builder for {other}"
                )))
            }
        };
        Ok(builder)
    }

    /// Appends the value of field `idx` of `feature`, or a null if it has none.
    pub(crate) fn append_field(&mut self, feature: &Feature<'_>, idx: usize) {
        if !feature.has_value(idx) {
            self.append_null();
            return;
        }
        match self {
            ColumnBuilder::Boolean(b) => b.append_value(feature.field_as_i32(idx) != 0),
            ColumnBuilder::Int16(b) => b.append_value(feature.field_as_i32(idx) as i16),
            ColumnBuilder::Int32(b) => b.append_value(feature.field_as_i32(idx)),
            ColumnBuilder::Int64(b) => b.append_value(feature.field_as_i64(idx)),
            ColumnBuilder::Float32(b) => b.append_value(feature.field_as_f64(idx) as f32),
            ColumnBuilder::Float64(b) => b.append_value(feature.field_as_f64(idx)),
            ColumnBuilder::Utf8(b) => b.append_value(feature.field_as_str(idx)),
            ColumnBuilder::Binary(b) => b.append_value(feature.field_as_bytes(idx)),
            ColumnBuilder::Date32(b) => b.append_option(
                feature
                    .field_as_datetime(idx)
                    .and_then(|parts| parts.days_since_epoch()),
            ),
            ColumnBuilder::Time32(b) => b.append_option(
                feature
                    .field_as_datetime(idx)
                    .map(|parts| parts.millis_of_day()),
            ),
            ColumnBuilder::Timestamp(b) => b.append_option(
                feature
                    .field_as_datetime(idx)
                    .and_then(|parts| parts.epoch_millis()),
            ),
        }
    }

    pub(crate) fn append_null(&mut self) {
        match self {
            ColumnBuilder::Boolean(b) => b.append_null(),
            ColumnBuilder::Int16(b) => b.append_null(),
            ColumnBuilder::Int32(b) => b.append_null(),
            ColumnBuilder::Int64(b) => b.append_null(),
            ColumnBuilder::Float32(b) => b.append_null(),
            ColumnBuilder::Float64(b) => b.append_null(),
            ColumnBuilder::Utf8(b) => b.append_null(),
            ColumnBuilder::Binary(b) => b.append_null(),
            ColumnBuilder::Date32(b) => b.append_null(),
            ColumnBuilder::Time32(b) => b.append_null(),
            ColumnBuilder::Timestamp(b) => b.append_null(),
        }
    }

    pub(crate) fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Boolean(b) => Arc::new(b.finish()),
            ColumnBuilder::Int16(b) => Arc::new(b.finish()),
            ColumnBuilder::Int32(b) => Arc::new(b.finish()),
            ColumnBuilder::Int64(b) => Arc::new(b.finish()),
            ColumnBuilder::Float32(b) => Arc::new(b.finish()),
            ColumnBuilder::Float64(b) => Arc::new(b.finish()),
            ColumnBuilder::Utf8(b) => Arc::new(b.finish()),
            ColumnBuilder::Binary(b) => Arc::new(b.finish()),
            ColumnBuilder::Date32(b) => Arc::new(b.finish()),
            ColumnBuilder::Time32(b) => Arc::new(b.finish()),
            ColumnBuilder::Timestamp(b) => Arc::new(b.finish()),
        }
    }
}

#[cfg(test)]
mod tests {
    use arrow_array::{Float64Array, StringArray};

    use super::*;

    fn names() -> ArrayRef {
        Arc::new(StringArray::from(vec![Some("a"), None, Some("c")]))
    }

    #[test]
    fn test_lengths_must_agree() {
        let short: ArrayRef = Arc::new(Float64Array::from(vec![1.0, 2.0]));
        let err = ColumnarBatch::try_new(
            vec![("name".to_string(), names()), ("area".to_string(), short)],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OgrioError::BadArgument(_)));

        let geometry = BinaryArray::from(vec![Some(&b"\x01"[..])]);
        assert!(ColumnarBatch::try_new(vec![("name".to_string(), names())], Some(geometry)).is_err());

        let batch = ColumnarBatch::try_new(vec![("name".to_string(), names())], None).unwrap();
        assert!(batch.with_fids(Int64Array::from(vec![1])).is_err());
    }

    #[test]
    fn test_duplicate_names() {
        let err = ColumnarBatch::try_new(
            vec![("name".to_string(), names()), ("name".to_string(), names())],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, OgrioError::BadArgument(_)));
    }

    #[test]
    fn test_into_record_batch() {
        let geometry = BinaryArray::from(vec![Some(&b"\x01"[..]), None, Some(&b"\x02"[..])]);
        let batch = ColumnarBatch::try_new(vec![("name".to_string(), names())], Some(geometry))
            .unwrap()
            .with_fids(Int64Array::from(vec![3, 7, 9]))
            .unwrap();
        assert_eq!(batch.num_rows(), 3);

        let record_batch = batch.into_record_batch().unwrap();
        assert_eq!(record_batch.num_rows(), 3);
        let schema = record_batch.schema();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["fid", "name", "geometry"]);
        assert_eq!(
            schema
                .field(2)
                .metadata()
                .get("ARROW:extension:name")
                .map(String::as_str),
            Some("geoarrow.wkb")
        );
        assert_eq!(record_batch.column(1).null_count(), 1);
    }

    #[test]
    fn test_reserved_names() {
        let batch =
            ColumnarBatch::try_new(vec![("geometry".to_string(), names())], None).unwrap();
        assert!(batch.into_record_batch().is_err());
    }

    #[test]
    fn test_empty_batch() {
        let batch = ColumnarBatch::try_new(Vec::new(), None).unwrap();
        assert!(batch.is_empty());
        let record_batch = batch.into_record_batch().unwrap();
        assert_eq!(record_batch.num_rows(), 0);
    }
}
