//! Vectorized writing
//!
//! [`write_arrays`] writes a [`ColumnarBatch`] as one layer: one native feature per row, with
//! Arrow nulls written as native nulls. Everything that can be checked up front is checked
//! before the destination is touched: column types against the type mapping and the driver's
//! declared field types, the driver's capabilities and the CRS definition.
//!
//! Rows are committed in transactions of [`WriteOptions::batch_size`] rows when the dataset
//! supports them. A failing row aborts the write with [`OgrioError::WriteError`]: its
//! transaction is rolled back while the batches committed before it stay committed.
//!
//! ```no_run
//! use std::sync::Arc;
//! use arrow_array::{ArrayRef, Int64Array};
//! use ogrio::batch::ColumnarBatch;
//! use ogrio::write::{write_arrays, WriteOptions};
//!
//! let pop: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None]));
//! let batch = ColumnarBatch::try_new(vec![("pop".to_string(), pop)], None)?;
//! let summary = write_arrays("out.gpkg", &batch, &WriteOptions::default())?;
//! assert_eq!(summary.rows_written, 2);
//! # Ok::<(), ogrio::errors::OgrioError>(())
//! ```

use std::ops::Range;
use std::path::Path;

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    Time32MillisecondType, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt8Type,
};
use arrow_array::{Array, ArrayRef};
use arrow_schema::{DataType, TimeUnit};

use crate::batch::ColumnarBatch;
use crate::config::ConfigOptions;
use crate::cpl::CslStringList;
use crate::dataset::{Dataset, LayerOptions};
use crate::driver::{detect_write_driver, Driver, DriverCapabilities, DriverManager};
use crate::error_stack::{ErrorScope, Warning};
use crate::errors::*;
use crate::options::{DatasetOptions, GdalOpenFlags};
use crate::spatial_ref::SpatialRef;
use crate::types::{
    appends_into, driver_accepts, from_arrow, keeps_subtype, NativeFieldType,
};
use crate::utils::_is_virtual_path;
use crate::vector::{DateTimeParts, Feature, FieldDefn, GeometryType, Layer, LayerCaps};

/// Rows per transaction unless configured otherwise.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 10_000;

/// What to do when the destination already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Create a new dataset; fails if the destination exists.
    #[default]
    Create,
    /// Add the rows to the layer, creating the dataset or the layer if missing.
    Append,
    /// Replace the layer, or the whole dataset if the layer cannot be deleted on its own.
    Overwrite,
}

/// Options of [`write_arrays`].
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Driver short name; inferred from the path extension when `None`.
    pub driver: Option<String>,
    /// Layer name; defaults to the file stem of the path.
    pub layer: Option<String>,
    pub mode: WriteMode,
    /// Declared geometry type of a created layer; `Unknown` when `None` and the batch has
    /// geometries, `None` otherwise.
    pub geometry_type: Option<GeometryType>,
    /// CRS of a created layer, in any form `OSRSetFromUserInput` understands.
    pub crs: Option<String>,
    /// Driver specific dataset creation options.
    pub dataset_options: Vec<(String, String)>,
    /// Driver specific layer creation options.
    pub layer_options: Vec<(String, String)>,
    pub config: ConfigOptions,
    /// Rows per transaction.
    pub batch_size: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            driver: None,
            layer: None,
            mode: WriteMode::default(),
            geometry_type: None,
            crs: None,
            dataset_options: Vec::new(),
            layer_options: Vec::new(),
            config: ConfigOptions::default(),
            batch_size: DEFAULT_WRITE_BATCH_SIZE,
        }
    }
}

/// Outcome of a successful [`write_arrays`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows_written: usize,
    /// Name of the layer as created by the driver.
    pub layer: String,
    pub driver: String,
    pub warnings: Vec<Warning>,
}

/// A batch column resolved against the destination.
struct ColumnPlan<'b> {
    name: &'b str,
    array: &'b ArrayRef,
    native: NativeFieldType,
    keep_subtype: bool,
}

/// Writes `batch` as a layer of the dataset at `path`.
pub fn write_arrays<P: AsRef<Path>>(
    path: P,
    batch: &ColumnarBatch,
    options: &WriteOptions,
) -> Result<WriteSummary> {
    let path = path.as_ref();
    let _config = options.config.apply()?;
    let scope = ErrorScope::new();
    let result = write_inner(path, batch, options, &scope);
    let ((rows_written, layer, driver), warnings) =
        scope.finish(result, |class, msg| OgrioError::Native {
            class,
            number: 0,
            msg,
        })?;
    Ok(WriteSummary {
        rows_written,
        layer,
        driver,
        warnings,
    })
}

fn write_inner(
    path: &Path,
    batch: &ColumnarBatch,
    options: &WriteOptions,
    scope: &ErrorScope,
) -> Result<(usize, String, String)> {
    if options.batch_size == 0 {
        return Err(OgrioError::BadArgument(
            "batch_size must be greater than zero".to_string(),
        ));
    }
    let driver_name = match &options.driver {
        Some(name) => name.as_str(),
        None => detect_write_driver(path)?,
    };
    let driver = DriverManager::vector_driver(driver_name, DriverCapabilities::WRITE)?;
    let columns = plan_columns(batch, &driver)?;
    let srs = options
        .crs
        .as_deref()
        .map(SpatialRef::from_definition)
        .transpose()?;
    let layer_name = match &options.layer {
        Some(name) => name.clone(),
        None => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| {
                OgrioError::BadArgument(format!(
                    "Cannot derive a layer name from '{}'",
                    path.display()
                ))
            })?,
    };
    let geometry_type = options.geometry_type.unwrap_or(if batch.geometry().is_some() {
        GeometryType::UNKNOWN
    } else {
        GeometryType::NONE
    });
    let layer_options = CslStringList::from_pairs(&options.layer_options)?;
    let exists = !_is_virtual_path(path) && path.exists();
    if options.mode == WriteMode::Create && exists {
        return Err(OgrioError::BadArgument(format!(
            "'{}' already exists; use WriteMode::Overwrite or WriteMode::Append",
            path.display()
        )));
    }

    let (mut dataset, fresh) = open_destination(path, &driver, options, exists)?;
    let setup = setup_layer(
        &mut dataset,
        &layer_name,
        srs.as_ref(),
        geometry_type,
        &layer_options,
        &columns,
        options.mode,
    );
    let (layer_idx, field_indices, created_name) = match setup {
        Ok(setup) => setup,
        Err(e) => {
            if fresh {
                discard_dataset(dataset, &driver, path);
            }
            return Err(e);
        }
    };
    log::debug!(
        "writing {} rows to layer '{}' of '{}' with driver {}",
        batch.num_rows(),
        created_name,
        path.display(),
        driver_name
    );

    let rows_written = write_rows(
        &mut dataset,
        layer_idx,
        batch,
        &columns,
        &field_indices,
        options.batch_size,
        scope,
    )?;
    dataset.close()?;
    Ok((rows_written, created_name, driver_name.to_string()))
}

/// Maps every column to a native type the driver accepts.
fn plan_columns<'b>(batch: &'b ColumnarBatch, driver: &Driver) -> Result<Vec<ColumnPlan<'b>>> {
    let creation_types = driver.creation_field_types();
    let creation_subtypes = driver.creation_field_subtypes();
    batch
        .columns()
        .iter()
        .map(|(name, array)| {
            let native = from_arrow(name, array.data_type())?;
            if !driver_accepts(native, creation_types.as_deref()) {
                return Err(OgrioError::UnsupportedFieldType {
                    field: name.clone(),
                    dtype: format!(
                        "{} (stored as {}, not supported by driver {})",
                        array.data_type(),
                        native.type_name(),
                        driver.short_name()
                    ),
                });
            }
            Ok(ColumnPlan {
                name,
                array,
                native,
                keep_subtype: keeps_subtype(native, creation_subtypes.as_deref()),
            })
        })
        .collect()
}

/// Opens or creates the destination; the flag tells whether the dataset was created here.
fn open_destination(
    path: &Path,
    driver: &Driver,
    options: &WriteOptions,
    exists: bool,
) -> Result<(Dataset, bool)> {
    let create = |driver: &Driver| -> Result<(Dataset, bool)> {
        let dataset_options = CslStringList::from_pairs(&options.dataset_options)?;
        Ok((driver.create_vector_only(path, &dataset_options)?, true))
    };
    if !exists || options.mode == WriteMode::Create {
        return create(driver);
    }

    let driver_name = driver.short_name();
    let dataset = Dataset::open_ex(
        path,
        DatasetOptions {
            open_flags: GdalOpenFlags::GDAL_OF_UPDATE,
            allowed_drivers: Some(&[driver_name.as_str()]),
            ..Default::default()
        },
    )?;
    let layer_name = options.layer.clone().or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    });
    if options.mode == WriteMode::Overwrite {
        let can_delete_layer = unsafe {
            gdal_sys::GDALDatasetTestCapability(dataset.c_dataset(), c"DeleteLayer".as_ptr()) == 1
        };
        let other_layers = match &layer_name {
            Some(name) => dataset.layers()?.any(|layer| layer.name() != *name),
            None => false,
        };
        if !(can_delete_layer && other_layers) {
            drop(dataset);
            log::debug!("overwriting dataset '{}'", path.display());
            driver.delete_dataset(path)?;
            return create(driver);
        }
    }
    Ok((dataset, false))
}

/// Creates (or, when appending, finds) the layer and its fields.
///
/// Returns the layer position, the field index of every column and the layer name.
fn setup_layer(
    dataset: &mut Dataset,
    layer_name: &str,
    srs: Option<&SpatialRef>,
    geometry_type: GeometryType,
    layer_options: &CslStringList,
    columns: &[ColumnPlan<'_>],
    mode: WriteMode,
) -> Result<(usize, Vec<usize>, String)> {
    if let Some(idx) = dataset.layer_index(layer_name)? {
        if mode == WriteMode::Overwrite {
            log::debug!("deleting layer '{layer_name}'");
            dataset.delete_layer(idx)?;
        } else {
            let layer = dataset.layer(idx)?;
            if !layer.has_capability(LayerCaps::SequentialWrite) {
                return Err(OgrioError::BadArgument(format!(
                    "Layer '{layer_name}' of '{}' does not accept new features",
                    dataset.path()
                )));
            }
            let field_indices = ensure_fields(&layer, columns)?;
            return Ok((idx, field_indices, layer.name()));
        }
    }

    let created_name = {
        let layer = dataset.create_layer(LayerOptions {
            name: layer_name,
            srs,
            ty: geometry_type,
            options: Some(layer_options),
        })?;
        layer.name()
    };
    let idx = dataset.layer_index(&created_name)?.ok_or_else(|| OgrioError::LayerNotFound {
        path: dataset.path().to_string(),
        layer: created_name.clone(),
    })?;
    let layer = dataset.layer(idx)?;
    let field_indices = ensure_fields(&layer, columns)?;
    Ok((idx, field_indices, created_name))
}

/// Field index of every column, creating the fields the layer lacks.
///
/// Columns matching an existing field must fit its type; all of them are checked before any
/// field is created.
fn ensure_fields(layer: &Layer<'_>, columns: &[ColumnPlan<'_>]) -> Result<Vec<usize>> {
    let fields = layer.fields();
    let existing: Vec<Option<usize>> = columns
        .iter()
        .map(|column| match fields.iter().find(|f| f.name == column.name) {
            Some(def) if appends_into(def.native, column.native) => Ok(Some(def.index)),
            Some(def) => Err(OgrioError::UnsupportedFieldType {
                field: column.name.to_string(),
                dtype: format!(
                    "{} (stored as {}, existing field is {})",
                    column.array.data_type(),
                    column.native,
                    def.native
                ),
            }),
            None => Ok(None),
        })
        .collect::<Result<_>>()?;
    if let Some((column, _)) = columns.iter().zip(&existing).find(|(_, idx)| idx.is_none()) {
        if !layer.has_capability(LayerCaps::CreateField) {
            return Err(OgrioError::BadArgument(format!(
                "Layer '{}' cannot add field '{}'",
                layer.name(),
                column.name
            )));
        }
    }

    let mut indices = Vec::with_capacity(columns.len());
    for (column, existing) in columns.iter().zip(existing) {
        let idx = match existing {
            Some(idx) => idx,
            None => {
                let defn = FieldDefn::new(column.name, column.native, column.keep_subtype)?;
                defn.add_to_layer(layer, true)?;
                // Drivers may rename the field (e.g. truncation); it is always appended.
                layer.fields().len().checked_sub(1).ok_or_else(|| {
                    OgrioError::BadArgument(format!("Field '{}' was not created", column.name))
                })?
            }
        };
        indices.push(idx);
    }
    Ok(indices)
}

/// Closes and deletes a dataset created by a write that failed during setup.
fn discard_dataset(mut dataset: Dataset, driver: &Driver, path: &Path) {
    if let Err(e) = dataset.close() {
        log::debug!("closing discarded dataset: {e}");
    }
    match driver.delete_dataset(path) {
        Ok(()) => log::debug!("removed partially created dataset '{}'", path.display()),
        Err(e) => log::warn!(
            "could not remove partially created dataset '{}': {e}",
            path.display()
        ),
    }
}

/// Writes every row, committing a transaction every `batch_size` rows when supported.
fn write_rows(
    dataset: &mut Dataset,
    layer_idx: usize,
    batch: &ColumnarBatch,
    columns: &[ColumnPlan<'_>],
    field_indices: &[usize],
    batch_size: usize,
    scope: &ErrorScope,
) -> Result<usize> {
    let num_rows = batch.num_rows();
    let transactions = dataset.supports_transactions();
    let mut start = 0;
    while start < num_rows {
        let end = (start + batch_size).min(num_rows);
        if transactions {
            let txn = dataset.start_transaction()?;
            let written = {
                let mut layer = txn.layer(layer_idx)?;
                write_range(&mut layer, batch, columns, field_indices, start..end, scope)
            };
            match written {
                Ok(()) => txn.commit().map_err(|e| OgrioError::WriteError {
                    row: start,
                    class: CplErrType::Failure,
                    msg: format!("commit failed: {e}"),
                })?,
                Err(e) => {
                    if let Err(rollback) = txn.rollback() {
                        log::warn!("rollback of rows {start}..{end} failed: {rollback}");
                    }
                    return Err(e);
                }
            }
            log::trace!("committed rows {start}..{end}");
        } else {
            let mut layer = dataset.layer(layer_idx)?;
            write_range(&mut layer, batch, columns, field_indices, start..end, scope)?;
        }
        start = end;
    }
    Ok(num_rows)
}

fn write_range(
    layer: &mut Layer<'_>,
    batch: &ColumnarBatch,
    columns: &[ColumnPlan<'_>],
    field_indices: &[usize],
    rows: Range<usize>,
    scope: &ErrorScope,
) -> Result<()> {
    for row in rows {
        let row_error = |e: OgrioError| {
            if scope.has_errors() {
                scope.failure("OGR_L_CreateFeature", |class, msg| OgrioError::WriteError {
                    row,
                    class,
                    msg,
                })
            } else {
                OgrioError::WriteError {
                    row,
                    class: CplErrType::Failure,
                    msg: e.to_string(),
                }
            }
        };
        let mut feature = layer.new_feature().map_err(row_error)?;
        if let Some(geometry) = batch.geometry() {
            if geometry.is_valid(row) {
                feature
                    .set_geometry_wkb(geometry.value(row))
                    .map_err(row_error)?;
            }
        }
        for (column, &idx) in columns.iter().zip(field_indices) {
            set_field(&mut feature, idx, column, row).map_err(row_error)?;
        }
        layer.create_feature(&mut feature).map_err(row_error)?;
        if scope.has_errors() {
            return Err(scope.failure("OGR_L_CreateFeature", |class, msg| {
                OgrioError::WriteError { row, class, msg }
            }));
        }
    }
    Ok(())
}

/// Copies the value at `row` of `array` into field `idx`; nulls become native nulls.
fn set_field(
    feature: &mut Feature<'_>,
    idx: usize,
    column: &ColumnPlan<'_>,
    row: usize,
) -> Result<()> {
    let array = column.array;
    if array.is_null(row) {
        feature.set_field_null(idx);
        return Ok(());
    }
    match array.data_type() {
        DataType::Boolean => feature.set_field_i32(idx, array.as_boolean().value(row) as i32),
        DataType::Int8 => {
            feature.set_field_i32(idx, array.as_primitive::<Int8Type>().value(row).into())
        }
        DataType::Int16 => {
            feature.set_field_i32(idx, array.as_primitive::<Int16Type>().value(row).into())
        }
        DataType::Int32 => feature.set_field_i32(idx, array.as_primitive::<Int32Type>().value(row)),
        DataType::UInt8 => {
            feature.set_field_i32(idx, array.as_primitive::<UInt8Type>().value(row).into())
        }
        DataType::UInt16 => {
            feature.set_field_i32(idx, array.as_primitive::<UInt16Type>().value(row).into())
        }
        DataType::UInt32 => {
            feature.set_field_i64(idx, array.as_primitive::<UInt32Type>().value(row).into())
        }
        DataType::Int64 => feature.set_field_i64(idx, array.as_primitive::<Int64Type>().value(row)),
        DataType::Float32 => {
            feature.set_field_f64(idx, array.as_primitive::<Float32Type>().value(row).into())
        }
        DataType::Float64 => {
            feature.set_field_f64(idx, array.as_primitive::<Float64Type>().value(row))
        }
        DataType::Utf8 => feature.set_field_str(idx, array.as_string::<i32>().value(row))?,
        DataType::LargeUtf8 => feature.set_field_str(idx, array.as_string::<i64>().value(row))?,
        DataType::Binary => feature.set_field_bytes(idx, array.as_binary::<i32>().value(row))?,
        DataType::LargeBinary => {
            feature.set_field_bytes(idx, array.as_binary::<i64>().value(row))?
        }
        DataType::Date32 => {
            let days = array.as_primitive::<Date32Type>().value(row);
            let parts = DateTimeParts::from_days_since_epoch(days)
                .ok_or_else(|| out_of_range(column, row))?;
            feature.set_field_datetime(idx, &parts);
        }
        DataType::Time32(TimeUnit::Millisecond) => {
            let millis = array.as_primitive::<Time32MillisecondType>().value(row);
            let parts = DateTimeParts::from_millis_of_day(millis)
                .ok_or_else(|| out_of_range(column, row))?;
            feature.set_field_datetime(idx, &parts);
        }
        DataType::Timestamp(unit, tz) => {
            let millis = match unit {
                TimeUnit::Second => array
                    .as_primitive::<TimestampSecondType>()
                    .value(row)
                    .checked_mul(1000),
                TimeUnit::Millisecond => {
                    Some(array.as_primitive::<TimestampMillisecondType>().value(row))
                }
                TimeUnit::Microsecond => Some(
                    array
                        .as_primitive::<TimestampMicrosecondType>()
                        .value(row)
                        .div_euclid(1_000),
                ),
                TimeUnit::Nanosecond => Some(
                    array
                        .as_primitive::<TimestampNanosecondType>()
                        .value(row)
                        .div_euclid(1_000_000),
                ),
            };
            let parts = millis
                .and_then(|millis| DateTimeParts::from_epoch_millis(millis, tz.is_some()))
                .ok_or_else(|| out_of_range(column, row))?;
            feature.set_field_datetime(idx, &parts);
        }
        other => return Err(OgrioError::unsupported_field(column.name, other)),
    }
    Ok(())
}

fn out_of_range(column: &ColumnPlan<'_>, row: usize) -> OgrioError {
    OgrioError::BadArgument(format!(
        "value of '{}' at row {row} is out of the native {} range",
        column.name,
        column.native.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_array::{Int64Array, StringArray, UInt64Array};

    use super::*;
    use crate::read::{read_arrays, ReadOptions};
    use crate::test_utils::{InMemoryFixture, TempFixture};

    #[test]
    fn test_unsupported_type_leaves_no_file() {
        let output = TempFixture::empty("out.gpkg");
        let ids: ArrayRef = Arc::new(UInt64Array::from(vec![1, 2]));
        let batch = ColumnarBatch::try_new(vec![("id".to_string(), ids)], None).unwrap();
        let err = write_arrays(output.path(), &batch, &WriteOptions::default()).unwrap_err();
        assert!(
            matches!(&err, OgrioError::UnsupportedFieldType { field, .. } if field == "id"),
            "{err:?}"
        );
        assert!(!output.path().exists());
    }

    #[test]
    fn test_create_refuses_existing() {
        let output = TempFixture::empty("out.gpkg");
        let names: ArrayRef = Arc::new(StringArray::from(vec!["a"]));
        let batch = ColumnarBatch::try_new(vec![("name".to_string(), names)], None).unwrap();
        write_arrays(output.path(), &batch, &WriteOptions::default()).unwrap();
        let err = write_arrays(output.path(), &batch, &WriteOptions::default()).unwrap_err();
        assert!(matches!(err, OgrioError::BadArgument(_)), "{err:?}");
    }

    #[test]
    fn test_layer_name_defaults_to_stem() {
        let output = TempFixture::empty("counts.gpkg");
        let counts: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(3)]));
        let batch = ColumnarBatch::try_new(vec![("count".to_string(), counts)], None).unwrap();
        let summary = write_arrays(output.path(), &batch, &WriteOptions::default()).unwrap();
        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.layer, "counts");
        assert_eq!(summary.driver, "GPKG");
    }

    #[test]
    fn test_undetectable_driver() {
        let output = TempFixture::empty("out.unknown");
        let batch = ColumnarBatch::try_new(Vec::new(), None).unwrap();
        assert!(matches!(
            write_arrays(output.path(), &batch, &WriteOptions::default()),
            Err(OgrioError::BadArgument(_))
        ));
    }

    #[test]
    fn test_invalid_crs_fails_before_writing() {
        let output = TempFixture::empty("out.gpkg");
        let batch = ColumnarBatch::try_new(Vec::new(), None).unwrap();
        let options = WriteOptions {
            crs: Some("not a crs".to_string()),
            ..Default::default()
        };
        assert!(write_arrays(output.path(), &batch, &options).is_err());
        assert!(!output.path().exists());
    }

    #[test]
    fn test_write_to_virtual_file() {
        let output = InMemoryFixture::new("points.geojson");
        let wkb = [
            // POINT (1 2)
            1u8, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 240, 63, 0, 0, 0, 0, 0, 0, 0, 64,
        ];
        let geometry = arrow_array::BinaryArray::from(vec![Some(&wkb[..]), None]);
        let names: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None]));
        let batch =
            ColumnarBatch::try_new(vec![("name".to_string(), names)], Some(geometry)).unwrap();
        let options = WriteOptions {
            crs: Some("EPSG:4326".to_string()),
            geometry_type: Some(GeometryType::POINT),
            ..Default::default()
        };
        let summary = write_arrays(output.path(), &batch, &options).unwrap();
        assert_eq!(summary.driver, "GeoJSON");
        assert_eq!(summary.rows_written, 2);

        let result = read_arrays(output.path(), &ReadOptions::default()).unwrap();
        assert_eq!(result.batch.num_rows(), 2);
        let geometry = result.batch.geometry().unwrap();
        assert_eq!(geometry.value(0), &wkb[..]);
        assert!(geometry.is_null(1));
        let names = result.batch.column("name").unwrap().as_string::<i32>();
        assert_eq!(names.value(0), "a");
        assert!(names.is_null(1));
    }
}
