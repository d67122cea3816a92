//! Schema resolution
//!
//! Opens a dataset, resolves one of its layers and describes it: geometry type, CRS, the
//! attribute fields with the Arrow type each is read as, and the feature count.

use std::collections::HashMap;
use std::path::Path;

use arrow_schema::{DataType, Field, Schema};

use crate::config::ConfigOptions;
use crate::dataset::{Dataset, LayerSelector};
use crate::error_stack::{ErrorScope, Warning};
use crate::errors::*;
use crate::options::DatasetOptions;
use crate::read::BoundingBox;
use crate::types::{to_arrow, NativeFieldType};
use crate::vector::{FieldDef, GeometryType, Layer, LayerCaps};

/// One attribute field of a layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    /// Arrow type the field is read as.
    pub data_type: DataType,
    pub native: NativeFieldType,
    pub width: i32,
    pub precision: i32,
    pub nullable: bool,
    /// Position of the field in the layer definition.
    pub(crate) index: usize,
}

impl From<FieldDef> for FieldSchema {
    fn from(def: FieldDef) -> Self {
        FieldSchema {
            data_type: to_arrow(def.native),
            name: def.name,
            native: def.native,
            width: def.width,
            precision: def.precision,
            nullable: def.nullable,
            index: def.index,
        }
    }
}

/// Normalized description of a layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerSchema {
    pub layer_name: String,
    pub geometry_type: GeometryType,
    /// `AUTHORITY:CODE` when identifiable, WKT otherwise; `None` without a CRS.
    pub crs: Option<String>,
    pub fields: Vec<FieldSchema>,
    pub fid_column: Option<String>,
    pub geometry_column: Option<String>,
}

impl LayerSchema {
    pub fn from_layer(layer: &Layer<'_>) -> Result<LayerSchema> {
        Ok(LayerSchema {
            layer_name: layer.name(),
            geometry_type: layer.geometry_type(),
            crs: layer.crs()?,
            fields: layer.fields().into_iter().map(FieldSchema::from).collect(),
            fid_column: layer.fid_column(),
            geometry_column: layer.geometry_column(),
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Keeps the fields named in `columns`, in layer order. Unknown names are ignored.
    pub fn select(&self, columns: Option<&[String]>) -> LayerSchema {
        let Some(columns) = columns else {
            return self.clone();
        };
        LayerSchema {
            fields: self
                .fields
                .iter()
                .filter(|f| columns.contains(&f.name))
                .cloned()
                .collect(),
            ..self.clone()
        }
    }

    /// Arrow schema of the attribute fields.
    ///
    /// Every field is nullable: OGR reports unset values as nulls even on fields declared
    /// `NOT NULL`.
    pub fn to_arrow_schema(&self) -> Schema {
        let mut metadata = HashMap::new();
        if let Some(crs) = &self.crs {
            metadata.insert("crs".to_string(), crs.clone());
        }
        metadata.insert("geometry_type".to_string(), self.geometry_type.name());
        Schema::new_with_metadata(
            self.fields
                .iter()
                .map(|f| Field::new(&f.name, f.data_type.clone(), true))
                .collect::<Vec<_>>(),
            metadata,
        )
    }
}

/// Layer capabilities relevant to reading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadCapabilities {
    pub random_read: bool,
    pub fast_set_next_by_index: bool,
    pub fast_spatial_filter: bool,
    pub fast_feature_count: bool,
    pub fast_total_bounds: bool,
}

/// Everything [`read_info`] reports about a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerInfo {
    pub schema: LayerSchema,
    /// Driver short name.
    pub driver: String,
    /// `None` when the driver cannot count cheaply and no forced count was requested.
    pub feature_count: Option<u64>,
    /// `None` when the driver cannot compute it cheaply and no forced computation was
    /// requested.
    pub total_bounds: Option<BoundingBox>,
    /// `UTF-8` when the driver guarantees UTF-8 strings.
    pub encoding: Option<String>,
    pub capabilities: ReadCapabilities,
    pub warnings: Vec<Warning>,
}

/// Options of [`read_info`].
#[derive(Clone, Debug, Default)]
pub struct InfoOptions {
    pub layer: LayerSelector,
    /// Restrict opening to this driver.
    pub driver: Option<String>,
    pub open_options: Vec<(String, String)>,
    pub config: ConfigOptions,
    /// Count features even when the driver can only do so by scanning the layer.
    pub force_feature_count: bool,
    /// Compute the total bounds even when the driver can only do so by scanning the layer.
    pub force_total_bounds: bool,
}

/// Opens `path` read-only, restricted to `driver` when given.
pub(crate) fn open_dataset(
    path: &Path,
    driver: Option<&str>,
    open_options: &[(String, String)],
) -> Result<Dataset> {
    let drivers = driver.map(|d| [d]);
    let pairs: Vec<(&str, &str)> = open_options
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    Dataset::open_ex(
        path,
        DatasetOptions {
            allowed_drivers: drivers.as_ref().map(|d| &d[..]),
            open_options: (!pairs.is_empty()).then_some(&pairs[..]),
            ..Default::default()
        },
    )
}

/// Describes one layer of the dataset at `path`.
///
/// ```no_run
/// use ogrio::schema::{read_info, InfoOptions};
///
/// let info = read_info("fixtures/regions.geojson", &InfoOptions::default()).unwrap();
/// for field in &info.schema.fields {
///     println!("{}: {}", field.name, field.data_type);
/// }
/// ```
pub fn read_info<P: AsRef<Path>>(path: P, options: &InfoOptions) -> Result<LayerInfo> {
    let path = path.as_ref();
    let _config = options.config.apply()?;
    let scope = ErrorScope::new();
    let result = info_inner(path, options);
    let (mut info, warnings) = scope.finish(result, |class, msg| OgrioError::ReadError {
        class,
        msg,
    })?;
    info.warnings = warnings;
    Ok(info)
}

fn info_inner(path: &Path, options: &InfoOptions) -> Result<LayerInfo> {
    let dataset = open_dataset(path, options.driver.as_deref(), &options.open_options)?;
    let layer = dataset.resolve_layer(&options.layer)?;
    let schema = LayerSchema::from_layer(&layer)?;
    log::debug!(
        "resolved layer '{}' ({}, {} fields) in '{}'",
        schema.layer_name,
        schema.geometry_type,
        schema.fields.len(),
        path.display()
    );
    let capabilities = ReadCapabilities {
        random_read: layer.has_capability(LayerCaps::RandomRead),
        fast_set_next_by_index: layer.has_capability(LayerCaps::FastSetNextByIndex),
        fast_spatial_filter: layer.has_capability(LayerCaps::FastSpatialFilter),
        fast_feature_count: layer.has_capability(LayerCaps::FastFeatureCount),
        fast_total_bounds: layer.has_capability(LayerCaps::FastGetExtent),
    };
    let has_geometry = schema.geometry_type != GeometryType::NONE;
    Ok(LayerInfo {
        driver: dataset.driver()?.short_name(),
        feature_count: layer.feature_count(options.force_feature_count),
        total_bounds: if has_geometry {
            layer.extent(options.force_total_bounds)
        } else {
            None
        },
        encoding: layer
            .has_capability(LayerCaps::StringsAsUtf8)
            .then(|| "UTF-8".to_string()),
        capabilities,
        schema,
        warnings: Vec::new(),
    })
}

/// Name and geometry type of every layer of the dataset at `path`, in dataset order.
pub fn list_layers<P: AsRef<Path>>(path: P) -> Result<Vec<(String, GeometryType)>> {
    let path = path.as_ref();
    let scope = ErrorScope::new();
    let result = Dataset::open(path).and_then(|dataset| {
        Ok(dataset
            .layers()?
            .map(|layer| (layer.name(), layer.geometry_type()))
            .collect::<Vec<_>>())
    });
    let (layers, _) = scope.finish(result, |class, msg| OgrioError::ReadError { class, msg })?;
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture;

    #[test]
    fn test_read_info() {
        let info = read_info(fixture("regions.geojson"), &InfoOptions::default()).unwrap();
        assert_eq!(info.driver, "GeoJSON");
        assert_eq!(info.schema.layer_name, "regions");
        assert_eq!(info.schema.geometry_type, GeometryType::POLYGON);
        assert_eq!(info.schema.crs.as_deref(), Some("EPSG:4326"));
        let fields: Vec<_> = info
            .schema
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.data_type.clone()))
            .collect();
        assert_eq!(
            fields,
            vec![
                ("name", DataType::Utf8),
                ("pop", DataType::Int64),
                ("area", DataType::Float64),
            ]
        );
        assert_eq!(info.encoding.as_deref(), Some("UTF-8"));
    }

    #[test]
    fn test_forced_count() {
        let options = InfoOptions {
            force_feature_count: true,
            ..Default::default()
        };
        let info = read_info(fixture("regions.geojson"), &options).unwrap();
        assert_eq!(info.feature_count, Some(5));
    }

    #[test]
    fn test_forced_bounds() {
        let options = InfoOptions {
            force_total_bounds: true,
            ..Default::default()
        };
        let info = read_info(fixture("regions.geojson"), &options).unwrap();
        assert_eq!(
            info.total_bounds,
            Some(BoundingBox::new(0.0, 0.0, 50.0, 50.0).unwrap())
        );
    }

    #[test]
    fn test_schema_fidelity() {
        let info = read_info(fixture("regions.geojson"), &InfoOptions::default()).unwrap();
        for field in &info.schema.fields {
            assert_eq!(field.data_type, to_arrow(field.native));
        }
    }

    #[test]
    fn test_select_keeps_layer_order() {
        let info = read_info(fixture("regions.geojson"), &InfoOptions::default()).unwrap();
        let columns = vec!["area".to_string(), "missing".to_string(), "name".to_string()];
        let selected = info.schema.select(Some(&columns));
        let names: Vec<_> = selected.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "area"]);
    }

    #[test]
    fn test_arrow_schema() {
        let info = read_info(fixture("regions.geojson"), &InfoOptions::default()).unwrap();
        let schema = info.schema.to_arrow_schema();
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.metadata().get("crs").map(String::as_str), Some("EPSG:4326"));
        assert!(schema.field_with_name("pop").unwrap().is_nullable());
    }

    #[test]
    fn test_list_layers() {
        let layers = list_layers(fixture("regions.geojson")).unwrap();
        assert_eq!(
            layers,
            vec![("regions".to_string(), GeometryType::POLYGON)]
        );
    }

    #[test]
    fn test_missing_layer() {
        let options = InfoOptions {
            layer: "nope".into(),
            ..Default::default()
        };
        assert!(matches!(
            read_info(fixture("regions.geojson"), &options),
            Err(OgrioError::LayerNotFound { .. })
        ));
    }
}
