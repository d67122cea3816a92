use std::ffi::{c_char, c_int, CString};
use std::marker::PhantomData;
use std::ptr::null;

use gdal_sys::{OGREnvelope, OGRErr, OGRFeatureDefnH, OGRLayerH};

use crate::cpl::CslStringList;
use crate::dataset::Dataset;
use crate::errors::*;
use crate::read::BoundingBox;
use crate::spatial_ref::crs_to_string;
use crate::utils::{_string, _string_opt};
use crate::vector::defn::{field_defs, FieldDef};
use crate::vector::{Feature, GeometryType};

/// Layer capabilities, as tested by `OGR_L_TestCapability`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerCaps {
    /// `OLCRandomRead`
    RandomRead,
    /// `OLCSequentialWrite`
    SequentialWrite,
    /// `OLCFastSpatialFilter`
    FastSpatialFilter,
    /// `OLCFastFeatureCount`
    FastFeatureCount,
    /// `OLCFastGetExtent`
    FastGetExtent,
    /// `OLCFastSetNextByIndex`
    FastSetNextByIndex,
    /// `OLCCreateField`
    CreateField,
    /// `OLCIgnoreFields`
    IgnoreFields,
    /// `OLCStringsAsUTF8`
    StringsAsUtf8,
}

impl LayerCaps {
    fn name(self) -> &'static std::ffi::CStr {
        match self {
            LayerCaps::RandomRead => c"RandomRead",
            LayerCaps::SequentialWrite => c"SequentialWrite",
            LayerCaps::FastSpatialFilter => c"FastSpatialFilter",
            LayerCaps::FastFeatureCount => c"FastFeatureCount",
            LayerCaps::FastGetExtent => c"FastGetExtent",
            LayerCaps::FastSetNextByIndex => c"FastSetNextByIndex",
            LayerCaps::CreateField => c"CreateField",
            LayerCaps::IgnoreFields => c"IgnoreFields",
            LayerCaps::StringsAsUtf8 => c"StringsAsUTF8",
        }
    }
}

/// Layer in a vector dataset
///
/// A layer is a borrowed view of its [`Dataset`] and cannot outlive it.
///
/// ```no_run
/// use ogrio::Dataset;
///
/// let dataset = Dataset::open("fixtures/regions.geojson").unwrap();
/// let layer = dataset.layer(0).unwrap();
/// println!("{} has {:?} features", layer.name(), layer.feature_count(false));
/// ```
#[derive(Debug)]
pub struct Layer<'a> {
    c_layer: OGRLayerH,
    c_defn: OGRFeatureDefnH,
    phantom: PhantomData<&'a Dataset>,
}

impl<'a> Layer<'a> {
    /// Creates a new Layer from a GDAL layer pointer
    ///
    /// # Safety
    /// This method operates on a raw C pointer
    pub(crate) unsafe fn from_c_layer(_: &'a Dataset, c_layer: OGRLayerH) -> Layer<'a> {
        let c_defn = gdal_sys::OGR_L_GetLayerDefn(c_layer);
        Layer {
            c_layer,
            c_defn,
            phantom: PhantomData,
        }
    }

    /// Returns the wrapped C pointer
    ///
    /// # Safety
    /// This method returns a raw C pointer
    pub unsafe fn c_layer(&self) -> OGRLayerH {
        self.c_layer
    }

    /// Returns the C pointer of the layer definition
    ///
    /// # Safety
    /// This method returns a raw C pointer
    pub unsafe fn c_defn(&self) -> OGRFeatureDefnH {
        self.c_defn
    }

    pub fn name(&self) -> String {
        let rv = unsafe { gdal_sys::OGR_L_GetName(self.c_layer) };
        _string(rv)
    }

    pub fn geometry_type(&self) -> GeometryType {
        GeometryType::from_raw(unsafe { gdal_sys::OGR_L_GetGeomType(self.c_layer) })
    }

    /// CRS of the layer, `AUTHORITY:CODE` when identifiable and WKT otherwise.
    pub fn crs(&self) -> Result<Option<String>> {
        unsafe { crs_to_string(gdal_sys::OGR_L_GetSpatialRef(self.c_layer)) }
    }

    /// The attribute fields of the layer, in definition order.
    pub fn fields(&self) -> Vec<FieldDef> {
        unsafe { field_defs(self.c_defn) }
    }

    /// Name of the column holding feature ids, if the driver exposes one.
    pub fn fid_column(&self) -> Option<String> {
        _string_opt(unsafe { gdal_sys::OGR_L_GetFIDColumn(self.c_layer) })
    }

    /// Name of the geometry column, if the driver exposes one.
    pub fn geometry_column(&self) -> Option<String> {
        _string_opt(unsafe { gdal_sys::OGR_L_GetGeometryColumn(self.c_layer) })
    }

    pub fn has_capability(&self, capability: LayerCaps) -> bool {
        unsafe { gdal_sys::OGR_L_TestCapability(self.c_layer, capability.name().as_ptr()) == 1 }
    }

    /// Number of features matching the current filters.
    ///
    /// Without `force`, only drivers that can count cheaply answer; the others return `None`
    /// instead of scanning the layer.
    pub fn feature_count(&self, force: bool) -> Option<u64> {
        let rv = unsafe { gdal_sys::OGR_L_GetFeatureCount(self.c_layer, force as c_int) };
        u64::try_from(rv).ok()
    }

    /// Extent of the layer; without `force`, `None` unless the driver knows it cheaply.
    pub fn extent(&self, force: bool) -> Option<BoundingBox> {
        let mut envelope = OGREnvelope {
            MinX: 0.0,
            MaxX: 0.0,
            MinY: 0.0,
            MaxY: 0.0,
        };
        let rv = unsafe { gdal_sys::OGR_L_GetExtent(self.c_layer, &mut envelope, force as c_int) };
        if rv != OGRErr::OGRERR_NONE {
            return None;
        }
        Some(BoundingBox::from(envelope))
    }

    /// Restricts iteration to features whose geometry intersects `bbox`.
    pub fn set_spatial_filter_rect(&mut self, bbox: &BoundingBox) {
        unsafe {
            gdal_sys::OGR_L_SetSpatialFilterRect(
                self.c_layer,
                bbox.min_x,
                bbox.min_y,
                bbox.max_x,
                bbox.max_y,
            )
        };
    }

    pub fn clear_spatial_filter(&mut self) {
        unsafe { gdal_sys::OGR_L_SetSpatialFilter(self.c_layer, std::ptr::null_mut()) };
    }

    /// Restricts iteration to features matching `query`, an OGR SQL `WHERE` expression.
    pub fn set_attribute_filter(&mut self, query: &str) -> Result<()> {
        let c_str = CString::new(query)?;
        let rv = unsafe { gdal_sys::OGR_L_SetAttributeFilter(self.c_layer, c_str.as_ptr()) };
        if rv != OGRErr::OGRERR_NONE {
            let msg = _string(unsafe { gdal_sys::CPLGetLastErrorMsg() });
            return Err(OgrioError::BadArgument(format!(
                "Invalid attribute filter '{query}': {msg}"
            )));
        }
        Ok(())
    }

    pub fn clear_attribute_filter(&mut self) {
        unsafe { gdal_sys::OGR_L_SetAttributeFilter(self.c_layer, null()) };
    }

    /// Tells the driver it may skip decoding the named fields; `OGR_GEOMETRY` names the
    /// geometry. An empty list decodes everything again.
    pub fn set_ignored_fields(&mut self, fields: &[&str]) -> Result<()> {
        let mut list = CslStringList::new();
        for field in fields {
            list.add_string(field)?;
        }
        let c_fields = if list.is_empty() {
            null()
        } else {
            list.as_const_ptr()
        };
        let rv =
            unsafe { gdal_sys::OGR_L_SetIgnoredFields(self.c_layer, c_fields as *mut *const c_char) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "OGR_L_SetIgnoredFields",
            });
        }
        Ok(())
    }

    /// Restarts sequential reading at the first feature.
    pub fn reset_reading(&mut self) {
        unsafe { gdal_sys::OGR_L_ResetReading(self.c_layer) };
    }

    /// Next feature in iteration order, or `None` at the end of the layer.
    ///
    /// A native failure also ends the iteration; the caller's [`ErrorScope`] sees it.
    ///
    /// [`ErrorScope`]: crate::error_stack::ErrorScope
    pub fn next_feature(&mut self) -> Option<Feature<'a>> {
        let c_feature = unsafe { gdal_sys::OGR_L_GetNextFeature(self.c_layer) };
        if c_feature.is_null() {
            None
        } else {
            Some(unsafe { Feature::from_c_feature(c_feature) })
        }
    }

    /// Moves the read cursor so that the next feature returned is the `index`-th one.
    pub fn set_next_by_index(&mut self, index: u64) -> Result<()> {
        let index = i64::try_from(index)
            .map_err(|_| OgrioError::BadArgument(format!("feature index {index} is too large")))?;
        let rv = unsafe { gdal_sys::OGR_L_SetNextByIndex(self.c_layer, index) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "OGR_L_SetNextByIndex",
            });
        }
        Ok(())
    }

    /// Fetches the feature with id `fid`, if it exists.
    pub fn feature(&self, fid: i64) -> Option<Feature<'a>> {
        let c_feature = unsafe { gdal_sys::OGR_L_GetFeature(self.c_layer, fid) };
        if c_feature.is_null() {
            None
        } else {
            Some(unsafe { Feature::from_c_feature(c_feature) })
        }
    }

    /// Creates an empty feature bound to this layer's definition.
    pub fn new_feature(&self) -> Result<Feature<'a>> {
        unsafe { Feature::new(self.c_defn) }
    }

    /// Writes `feature` to the layer as a new feature.
    pub fn create_feature(&mut self, feature: &mut Feature<'_>) -> Result<()> {
        let rv = unsafe { gdal_sys::OGR_L_CreateFeature(self.c_layer, feature.c_feature()) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "OGR_L_CreateFeature",
            });
        }
        Ok(())
    }
}
