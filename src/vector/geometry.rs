use std::fmt::{Display, Formatter};

use gdal_sys::OGRwkbGeometryType;

use crate::utils::_string;

/// Geometry type of a layer, as declared by its driver.
///
/// Wraps the native `OGRwkbGeometryType` code; [`name`](GeometryType::name) renders it as
/// `Point`, `MultiPolygon Z`, `Unknown`, and so on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryType(OGRwkbGeometryType::Type);

impl GeometryType {
    pub const UNKNOWN: GeometryType = GeometryType(OGRwkbGeometryType::wkbUnknown);
    pub const POINT: GeometryType = GeometryType(OGRwkbGeometryType::wkbPoint);
    pub const LINE_STRING: GeometryType = GeometryType(OGRwkbGeometryType::wkbLineString);
    pub const POLYGON: GeometryType = GeometryType(OGRwkbGeometryType::wkbPolygon);
    pub const MULTI_POINT: GeometryType = GeometryType(OGRwkbGeometryType::wkbMultiPoint);
    pub const MULTI_LINE_STRING: GeometryType =
        GeometryType(OGRwkbGeometryType::wkbMultiLineString);
    pub const MULTI_POLYGON: GeometryType = GeometryType(OGRwkbGeometryType::wkbMultiPolygon);
    pub const GEOMETRY_COLLECTION: GeometryType =
        GeometryType(OGRwkbGeometryType::wkbGeometryCollection);
    /// The layer has no geometry column.
    pub const NONE: GeometryType = GeometryType(OGRwkbGeometryType::wkbNone);

    pub fn from_raw(raw: OGRwkbGeometryType::Type) -> Self {
        GeometryType(raw)
    }

    pub fn raw(self) -> OGRwkbGeometryType::Type {
        self.0
    }

    /// The same type without Z or M dimensions.
    pub fn flatten(self) -> Self {
        GeometryType(unsafe { gdal_sys::OGR_GT_Flatten(self.0) })
    }

    pub fn has_z(self) -> bool {
        unsafe { gdal_sys::OGR_GT_HasZ(self.0) != 0 }
    }

    /// The same type with a Z dimension.
    pub fn with_z(self) -> Self {
        GeometryType(unsafe { gdal_sys::OGR_GT_SetZ(self.0) })
    }

    pub fn name(self) -> String {
        let flat = self.flatten();
        let base = match flat.0 {
            OGRwkbGeometryType::wkbUnknown => "Unknown".to_string(),
            OGRwkbGeometryType::wkbPoint => "Point".to_string(),
            OGRwkbGeometryType::wkbLineString => "LineString".to_string(),
            OGRwkbGeometryType::wkbPolygon => "Polygon".to_string(),
            OGRwkbGeometryType::wkbMultiPoint => "MultiPoint".to_string(),
            OGRwkbGeometryType::wkbMultiLineString => "MultiLineString".to_string(),
            OGRwkbGeometryType::wkbMultiPolygon => "MultiPolygon".to_string(),
            OGRwkbGeometryType::wkbGeometryCollection => "GeometryCollection".to_string(),
            OGRwkbGeometryType::wkbNone => return "None".to_string(),
            other => _string(unsafe { gdal_sys::OGRGeometryTypeToName(other) }),
        };
        if self.has_z() {
            format!("{base} Z")
        } else {
            base
        }
    }
}

impl Default for GeometryType {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl Display for GeometryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(GeometryType::POINT.name(), "Point");
        assert_eq!(GeometryType::MULTI_POLYGON.with_z().name(), "MultiPolygon Z");
        assert_eq!(GeometryType::NONE.name(), "None");
        assert_eq!(
            GeometryType::from_raw(OGRwkbGeometryType::wkbPolygon25D).flatten(),
            GeometryType::POLYGON
        );
    }
}
