//! Vectorized reading
//!
//! Features are streamed from a layer in a single forward pass and decoded straight into Arrow
//! builders: one per selected attribute field, one for the WKB geometries and one for the
//! feature ids. Filters are applied by the driver while streaming, so features that do not
//! match are never decoded.
//!
//! [`read_arrays`] reads everything into one batch. [`BatchReader`] yields bounded batches for
//! layers too large to hold at once.
//!
//! ```no_run
//! use ogrio::read::{read_arrays, BoundingBox, ReadOptions};
//!
//! let options = ReadOptions {
//!     bbox: Some(BoundingBox::new(15.0, -5.0, 35.0, 15.0)?),
//!     where_clause: Some("pop > 1000000".to_string()),
//!     ..Default::default()
//! };
//! let result = read_arrays("fixtures/regions.geojson", &options)?;
//! println!("{} rows", result.batch.num_rows());
//! # Ok::<(), ogrio::errors::OgrioError>(())
//! ```

use std::path::Path;

use arrow_array::builder::{BinaryBuilder, Int64Builder};
use arrow_array::Int64Array;
use gdal_sys::{OGREnvelope, OGRLayerH};
use geo_types::{coord, Rect};

use crate::batch::{ColumnBuilder, ColumnarBatch};
use crate::config::ConfigOptions;
use crate::dataset::{Dataset, LayerSelector};
use crate::error_stack::{ErrorScope, Warning};
use crate::errors::*;
use crate::schema::{open_dataset, FieldSchema, LayerSchema};
use crate::vector::{Feature, GeometryType, Layer, LayerCaps};

/// Rows per batch of a [`BatchReader`] unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 65_536;
/// Initial builder capacity when the driver cannot count features cheaply, and the most a
/// [`BatchReader`] preallocates per batch.
const DEFAULT_CAPACITY: usize = 1_024;
/// Pseudo field name that makes `OGR_L_SetIgnoredFields` skip geometries.
const IGNORE_GEOMETRY: &str = "OGR_GEOMETRY";

/// An axis aligned rectangle in layer coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Fails unless all bounds are finite and each minimum is at most its maximum.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<BoundingBox> {
        let finite = [min_x, min_y, max_x, max_y].iter().all(|v| v.is_finite());
        if !finite || min_x > max_x || min_y > max_y {
            return Err(OgrioError::BadArgument(format!(
                "Invalid bounding box ({min_x}, {min_y}, {max_x}, {max_y})"
            )));
        }
        Ok(BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        let (min, max) = (rect.min(), rect.max());
        BoundingBox {
            min_x: min.x,
            min_y: min.y,
            max_x: max.x,
            max_y: max.y,
        }
    }
}

impl From<BoundingBox> for Rect<f64> {
    fn from(bbox: BoundingBox) -> Self {
        Rect::new(
            coord! { x: bbox.min_x, y: bbox.min_y },
            coord! { x: bbox.max_x, y: bbox.max_y },
        )
    }
}

impl From<OGREnvelope> for BoundingBox {
    fn from(envelope: OGREnvelope) -> Self {
        BoundingBox {
            min_x: envelope.MinX,
            min_y: envelope.MinY,
            max_x: envelope.MaxX,
            max_y: envelope.MaxY,
        }
    }
}

/// Options of [`read_arrays`], [`BatchReader`] and [`read_bounds`].
#[derive(Clone, Debug)]
pub struct ReadOptions {
    pub layer: LayerSelector,
    /// Restrict opening to this driver.
    pub driver: Option<String>,
    pub open_options: Vec<(String, String)>,
    pub config: ConfigOptions,
    /// Attribute fields to read, returned in layer order. Unknown names are ignored; `None`
    /// reads every field.
    pub columns: Option<Vec<String>>,
    pub read_geometry: bool,
    /// Drop Z and M dimensions from geometries.
    pub force_2d: bool,
    /// Only features whose geometry intersects this box.
    pub bbox: Option<BoundingBox>,
    /// Only features matching this OGR SQL `WHERE` expression.
    pub where_clause: Option<String>,
    /// Features to skip, after filtering.
    pub skip_features: u64,
    /// Maximum number of features to read, after filtering and skipping.
    pub max_features: Option<u64>,
    /// Read exactly these features, in this order. Excludes filters, skipping and limits.
    pub fids: Option<Vec<i64>>,
    /// Rows per batch of a [`BatchReader`].
    pub batch_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            layer: LayerSelector::default(),
            driver: None,
            open_options: Vec::new(),
            config: ConfigOptions::default(),
            columns: None,
            read_geometry: true,
            force_2d: false,
            bbox: None,
            where_clause: None,
            skip_features: 0,
            max_features: None,
            fids: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ReadOptions {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(OgrioError::BadArgument(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.fids.is_some()
            && (self.bbox.is_some()
                || self.where_clause.is_some()
                || self.skip_features > 0
                || self.max_features.is_some())
        {
            return Err(OgrioError::BadArgument(
                "fids cannot be combined with bbox, where_clause, skip_features or max_features"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn has_filters(&self) -> bool {
        self.bbox.is_some() || self.where_clause.is_some()
    }
}

/// Result of [`read_arrays`].
#[derive(Debug)]
pub struct ReadResult {
    /// Schema of the layer, restricted to the columns read.
    pub schema: LayerSchema,
    pub batch: ColumnarBatch,
    pub warnings: Vec<Warning>,
}

/// Reads the selected layer of `path` into a single batch.
///
/// Fails with [`OgrioError::ReadError`] if the driver reports an error while streaming; no
/// partial result is returned.
pub fn read_arrays<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<ReadResult> {
    let path = path.as_ref();
    options.validate()?;
    let _config = options.config.apply()?;
    let scope = ErrorScope::new();
    let result = read_arrays_inner(path, options, &scope);
    let ((schema, batch), warnings) = scope.finish(result, read_error)?;
    Ok(ReadResult {
        schema,
        batch,
        warnings,
    })
}

/// Number of rows a read will produce, when the driver can tell cheaply.
fn expected_rows(layer: &Layer<'_>, options: &ReadOptions) -> Option<usize> {
    match &options.fids {
        Some(fids) => Some(fids.len()),
        None => layer.feature_count(false).map(|count| {
            let count = count.saturating_sub(options.skip_features);
            let count = options.max_features.map_or(count, |max| count.min(max));
            usize::try_from(count).unwrap_or(usize::MAX)
        }),
    }
}

fn read_arrays_inner(
    path: &Path,
    options: &ReadOptions,
    scope: &ErrorScope,
) -> Result<(LayerSchema, ColumnarBatch)> {
    let dataset = open_dataset(path, options.driver.as_deref(), &options.open_options)?;
    let mut layer = dataset.resolve_layer(&options.layer)?;
    let schema = LayerSchema::from_layer(&layer)?.select(options.columns.as_deref());
    let mut cursor = Cursor::prepare(&mut layer, &schema, options, scope)?;

    let capacity = expected_rows(&layer, options).unwrap_or(DEFAULT_CAPACITY);
    let batch = cursor.read_batch(&mut layer, capacity, usize::MAX, scope)?;
    log::debug!(
        "read {} features from layer '{}' of '{}'",
        batch.num_rows(),
        schema.layer_name,
        path.display()
    );
    Ok((schema, batch))
}

fn read_error(class: CplErrType, msg: String) -> OgrioError {
    OgrioError::ReadError { class, msg }
}

/// Reports a geometry that could not be exported as a read failure.
fn geometry_error(e: OgrioError) -> OgrioError {
    read_error(CplErrType::Failure, e.to_string())
}

/// Where the next feature comes from.
enum Source {
    /// Sequential iteration; `None` once the layer is exhausted.
    Sequential { remaining: Option<u64> },
    /// Random access by feature id.
    Fids(std::vec::IntoIter<i64>),
}

/// Decoding state shared by every batch of one read.
struct Cursor {
    fields: Vec<FieldSchema>,
    read_geometry: bool,
    force_2d: bool,
    source: Source,
    exhausted: bool,
    wkb: Vec<u8>,
}

impl Cursor {
    /// Applies the options to `layer` and positions it on the first feature to read.
    fn prepare(
        layer: &mut Layer<'_>,
        schema: &LayerSchema,
        options: &ReadOptions,
        scope: &ErrorScope,
    ) -> Result<Cursor> {
        let read_geometry = options.read_geometry && schema.geometry_type != GeometryType::NONE;
        let ignored: Vec<String> = layer
            .fields()
            .into_iter()
            .filter(|def| schema.field(&def.name).is_none())
            .map(|def| def.name)
            .chain((!read_geometry).then(|| IGNORE_GEOMETRY.to_string()))
            .collect();
        if !ignored.is_empty() && layer.has_capability(LayerCaps::IgnoreFields) {
            let ignored: Vec<&str> = ignored.iter().map(String::as_str).collect();
            layer.set_ignored_fields(&ignored)?;
        }

        let mut cursor = Cursor {
            fields: schema.fields.clone(),
            read_geometry,
            force_2d: options.force_2d,
            source: Source::Sequential {
                remaining: options.max_features,
            },
            exhausted: false,
            wkb: Vec::new(),
        };
        if let Some(fids) = &options.fids {
            cursor.source = Source::Fids(fids.clone().into_iter());
            return Ok(cursor);
        }

        match &options.bbox {
            Some(bbox) => layer.set_spatial_filter_rect(bbox),
            None => layer.clear_spatial_filter(),
        }
        match &options.where_clause {
            Some(query) => layer.set_attribute_filter(query)?,
            None => layer.clear_attribute_filter(),
        }
        layer.reset_reading();
        cursor.skip(layer, options, scope)?;
        Ok(cursor)
    }

    fn skip(&mut self, layer: &mut Layer<'_>, options: &ReadOptions, scope: &ErrorScope) -> Result<()> {
        let skip = options.skip_features;
        if skip == 0 {
            return Ok(());
        }
        if !options.has_filters() && layer.has_capability(LayerCaps::FastSetNextByIndex) {
            if layer.feature_count(false).is_some_and(|count| skip >= count) {
                self.exhausted = true;
                return Ok(());
            }
            let mark = scope.mark();
            if layer.set_next_by_index(skip).is_ok() {
                return Ok(());
            }
            // Not positioned; fall back to discarding features.
            for record in scope.drain_since(mark) {
                log::debug!("set_next_by_index: {}", record.message);
            }
            layer.reset_reading();
        }
        for _ in 0..skip {
            if layer.next_feature().is_none() {
                self.exhausted = true;
                break;
            }
        }
        if scope.has_errors() {
            return Err(scope.failure("OGR_L_GetNextFeature", read_error));
        }
        Ok(())
    }

    fn next_feature<'a>(&mut self, layer: &mut Layer<'a>, scope: &ErrorScope) -> Result<Option<Feature<'a>>> {
        if self.exhausted {
            return Ok(None);
        }
        let feature = match &mut self.source {
            Source::Sequential { remaining } => {
                if *remaining == Some(0) {
                    None
                } else {
                    let feature = layer.next_feature();
                    if let (Some(remaining), Some(_)) = (remaining.as_mut(), &feature) {
                        *remaining -= 1;
                    }
                    feature
                }
            }
            Source::Fids(fids) => match fids.next() {
                Some(fid) => match layer.feature(fid) {
                    Some(feature) => Some(feature),
                    None => {
                        return Err(scope.failure("OGR_L_GetFeature", |class, msg| {
                            read_error(class, format!("Feature {fid} could not be read: {msg}"))
                        }))
                    }
                },
                None => None,
            },
        };
        if feature.is_none() {
            self.exhausted = true;
        }
        if scope.has_errors() {
            return Err(scope.failure("OGR_L_GetNextFeature", read_error));
        }
        Ok(feature)
    }

    /// Decodes up to `limit` features into a new batch.
    fn read_batch(
        &mut self,
        layer: &mut Layer<'_>,
        capacity: usize,
        limit: usize,
        scope: &ErrorScope,
    ) -> Result<ColumnarBatch> {
        let capacity = capacity.min(limit);
        let mut fids = Int64Builder::with_capacity(capacity);
        let mut geometry = self
            .read_geometry
            .then(|| BinaryBuilder::with_capacity(capacity, capacity.saturating_mul(64)));
        let mut columns = self
            .fields
            .iter()
            .map(|f| ColumnBuilder::with_capacity(&f.data_type, capacity))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = 0;
        while rows < limit {
            let Some(feature) = self.next_feature(layer, scope)? else {
                break;
            };
            fids.append_option(feature.fid());
            if let Some(geometry) = geometry.as_mut() {
                let has_geometry = feature
                    .geometry_wkb(self.force_2d, &mut self.wkb)
                    .map_err(geometry_error)?;
                if has_geometry {
                    geometry.append_value(&self.wkb);
                } else {
                    geometry.append_null();
                }
            }
            for (builder, field) in columns.iter_mut().zip(&self.fields) {
                builder.append_field(&feature, field.index);
            }
            rows += 1;
        }

        let columns = self
            .fields
            .iter()
            .zip(columns.iter_mut())
            .map(|(field, builder)| (field.name.clone(), builder.finish()))
            .collect();
        ColumnarBatch::try_new(columns, geometry.map(|mut g| g.finish()))?
            .with_fids(fids.finish())
    }
}

/// Streams a layer in batches of at most [`ReadOptions::batch_size`] rows.
///
/// The reader owns the dataset; dropping it closes the dataset. Reading stops early simply by
/// no longer requesting batches.
///
/// ```no_run
/// use ogrio::read::{BatchReader, ReadOptions};
///
/// let options = ReadOptions { batch_size: 2, ..Default::default() };
/// let reader = BatchReader::open("fixtures/regions.geojson", &options)?;
/// for batch in reader {
///     println!("{} rows", batch?.num_rows());
/// }
/// # Ok::<(), ogrio::errors::OgrioError>(())
/// ```
pub struct BatchReader {
    cursor: Cursor,
    c_layer: OGRLayerH,
    schema: LayerSchema,
    batch_size: usize,
    /// Initial builder capacity of each batch; builders grow past it as needed.
    capacity: usize,
    config: ConfigOptions,
    warnings: Vec<Warning>,
    // Declared last: dropped after everything referring to its layer.
    dataset: Dataset,
}

// The layer handle is owned by the dataset, which moves with the reader.
unsafe impl Send for BatchReader {}

impl BatchReader {
    pub fn open<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<BatchReader> {
        let path = path.as_ref();
        options.validate()?;
        let _config = options.config.apply()?;
        let scope = ErrorScope::new();
        let result = Self::open_inner(path, options, &scope);
        let (mut reader, warnings) = scope.finish(result, read_error)?;
        reader.warnings = warnings;
        Ok(reader)
    }

    fn open_inner(path: &Path, options: &ReadOptions, scope: &ErrorScope) -> Result<BatchReader> {
        let dataset = open_dataset(path, options.driver.as_deref(), &options.open_options)?;
        let (cursor, c_layer, schema, expected) = {
            let mut layer = dataset.resolve_layer(&options.layer)?;
            let schema = LayerSchema::from_layer(&layer)?.select(options.columns.as_deref());
            let cursor = Cursor::prepare(&mut layer, &schema, options, scope)?;
            let expected = expected_rows(&layer, options);
            (cursor, unsafe { layer.c_layer() }, schema, expected)
        };
        let capacity = expected
            .unwrap_or(DEFAULT_CAPACITY)
            .min(DEFAULT_CAPACITY)
            .min(options.batch_size);
        Ok(BatchReader {
            cursor,
            c_layer,
            schema,
            batch_size: options.batch_size,
            capacity,
            config: options.config.clone(),
            warnings: Vec::new(),
            dataset,
        })
    }

    /// Schema of the layer, restricted to the columns read.
    pub fn schema(&self) -> &LayerSchema {
        &self.schema
    }

    /// Warnings raised so far.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Reads the next batch, or `None` once the layer is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<ColumnarBatch>> {
        if self.cursor.exhausted {
            return Ok(None);
        }
        let _config = self.config.apply()?;
        let scope = ErrorScope::new();
        let mut layer = unsafe { Layer::from_c_layer(&self.dataset, self.c_layer) };
        let result = self
            .cursor
            .read_batch(&mut layer, self.capacity, self.batch_size, &scope);
        let (batch, warnings) = scope.finish(result, read_error)?;
        self.warnings.extend(warnings);
        if batch.is_empty() && self.cursor.exhausted {
            return Ok(None);
        }
        log::trace!("read batch of {} features", batch.num_rows());
        Ok(Some(batch))
    }
}

impl Iterator for BatchReader {
    type Item = Result<ColumnarBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_batch() {
            Ok(batch) => batch.map(Ok),
            Err(e) => {
                self.cursor.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

/// Feature ids and envelopes read by [`read_bounds`].
#[derive(Clone, Debug)]
pub struct FeatureBounds {
    pub fids: Int64Array,
    /// `None` for features without geometry or with an empty one.
    pub bounds: Vec<Option<BoundingBox>>,
    pub warnings: Vec<Warning>,
}

/// Reads the envelope of every selected feature without decoding attributes.
///
/// Honors the layer selector, filters, `skip_features` and `max_features` of `options`.
pub fn read_bounds<P: AsRef<Path>>(path: P, options: &ReadOptions) -> Result<FeatureBounds> {
    let path = path.as_ref();
    let options = ReadOptions {
        columns: Some(Vec::new()),
        read_geometry: true,
        ..options.clone()
    };
    options.validate()?;
    let _config = options.config.apply()?;
    let scope = ErrorScope::new();
    let result = read_bounds_inner(path, &options, &scope);
    let ((fids, bounds), warnings) = scope.finish(result, read_error)?;
    Ok(FeatureBounds {
        fids,
        bounds,
        warnings,
    })
}

fn read_bounds_inner(
    path: &Path,
    options: &ReadOptions,
    scope: &ErrorScope,
) -> Result<(Int64Array, Vec<Option<BoundingBox>>)> {
    let dataset = open_dataset(path, options.driver.as_deref(), &options.open_options)?;
    let mut layer = dataset.resolve_layer(&options.layer)?;
    let schema = LayerSchema::from_layer(&layer)?.select(options.columns.as_deref());
    let mut cursor = Cursor::prepare(&mut layer, &schema, options, scope)?;

    let mut fids = Int64Builder::new();
    let mut bounds = Vec::new();
    while let Some(feature) = cursor.next_feature(&mut layer, scope)? {
        fids.append_option(feature.fid());
        bounds.push(feature.geometry_envelope().map(BoundingBox::from));
    }
    Ok((fids.finish(), bounds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_validation() {
        assert!(BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_ok());
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 0.0).is_ok());
        assert!(BoundingBox::new(1.0, 0.0, 0.0, 1.0).is_err());
        assert!(BoundingBox::new(0.0, f64::NAN, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_bounding_box_from_rect() {
        let rect = Rect::new(coord! { x: 10.0, y: -5.0 }, coord! { x: 0.0, y: 5.0 });
        let bbox = BoundingBox::from(rect);
        assert_eq!(bbox, BoundingBox::new(0.0, -5.0, 10.0, 5.0).unwrap());
        assert_eq!(Rect::from(bbox), rect);
    }

    #[test]
    fn test_options_validation() {
        let options = ReadOptions {
            fids: Some(vec![1]),
            skip_features: 1,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(OgrioError::BadArgument(_))));

        let options = ReadOptions {
            batch_size: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
        assert!(ReadOptions::default().validate().is_ok());
    }

    #[test]
    fn test_geometry_export_failure_is_read_error() {
        let err = geometry_error(OgrioError::OgrError {
            err: gdal_sys::OGRErr::OGRERR_CORRUPT_DATA,
            method_name: "OGR_G_ExportToIsoWkb",
        });
        match err {
            OgrioError::ReadError { class, msg } => {
                assert_eq!(class, CplErrType::Failure);
                assert!(msg.contains("OGR_G_ExportToIsoWkb"), "{msg}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
