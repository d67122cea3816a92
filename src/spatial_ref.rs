//! Coordinate reference systems
//!
//! Layers expose their CRS as a string: `AUTHORITY:CODE` when GDAL can identify it, WKT
//! otherwise. Writers accept any definition understood by `OSRSetFromUserInput`
//! (`EPSG:4326`, WKT, PROJ strings, PROJJSON).

use std::ffi::{c_char, c_void, CString};
use std::ptr::{self, null_mut};

use gdal_sys::{OGRErr, OGRSpatialReferenceH};

use crate::errors::*;
use crate::utils::{_last_null_pointer_err, _string, _string_opt};

/// An owned spatial reference, released on drop.
#[derive(Debug)]
pub struct SpatialRef(OGRSpatialReferenceH);

impl SpatialRef {
    /// Parses `definition` with `OSRSetFromUserInput`.
    ///
    /// The axis order is forced to the traditional GIS order (x = longitude/easting), matching the
    /// coordinate order of WKB geometries.
    pub fn from_definition(definition: &str) -> Result<SpatialRef> {
        let c_str = CString::new(definition)?;
        let c_obj = unsafe { gdal_sys::OSRNewSpatialReference(ptr::null()) };
        if c_obj.is_null() {
            return Err(_last_null_pointer_err("OSRNewSpatialReference"));
        }
        let srs = SpatialRef(c_obj);
        let rv = unsafe { gdal_sys::OSRSetFromUserInput(c_obj, c_str.as_ptr()) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::BadArgument(format!(
                "Invalid CRS definition '{definition}'"
            )));
        }
        unsafe {
            gdal_sys::OSRSetAxisMappingStrategy(
                c_obj,
                gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
            )
        };
        Ok(srs)
    }

    /// Returns the wrapped C pointer
    ///
    /// # Safety
    /// This method returns a raw C pointer
    pub unsafe fn to_c_hsrs(&self) -> OGRSpatialReferenceH {
        self.0
    }

    /// Serializes the spatial reference, see [`crs_to_string`].
    pub fn to_crs_string(&self) -> Result<Option<String>> {
        unsafe { crs_to_string(self.0) }
    }
}

impl Drop for SpatialRef {
    fn drop(&mut self) {
        unsafe { gdal_sys::OSRRelease(self.0) };
    }
}

/// Serializes a borrowed native spatial reference.
///
/// Returns `AUTHORITY:CODE` when the authority can be identified, the WKT definition otherwise,
/// and `None` for a NULL handle.
///
/// # Safety
/// `c_srs` must be NULL or a valid spatial reference handle.
pub unsafe fn crs_to_string(c_srs: OGRSpatialReferenceH) -> Result<Option<String>> {
    if c_srs.is_null() {
        return Ok(None);
    }

    // Identification may modify the object; work on a copy.
    let c_clone = gdal_sys::OSRClone(c_srs);
    if c_clone.is_null() {
        return Err(_last_null_pointer_err("OSRClone"));
    }
    let clone = SpatialRef(c_clone);

    // Not every CRS has an EPSG equivalent; a failure here only means we fall back to WKT.
    gdal_sys::OSRAutoIdentifyEPSG(c_clone);
    let authority = _string_opt(gdal_sys::OSRGetAuthorityName(c_clone, ptr::null()));
    let code = _string_opt(gdal_sys::OSRGetAuthorityCode(c_clone, ptr::null()));
    if let (Some(authority), Some(code)) = (authority, code) {
        return Ok(Some(format!("{authority}:{code}")));
    }

    let mut c_wkt: *mut c_char = null_mut();
    let rv = gdal_sys::OSRExportToWkt(clone.0, &mut c_wkt);
    if rv != OGRErr::OGRERR_NONE {
        return Err(OgrioError::OgrError {
            err: rv,
            method_name: "OSRExportToWkt",
        });
    }
    let wkt = _string(c_wkt);
    gdal_sys::VSIFree(c_wkt as *mut c_void);
    Ok(Some(wkt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsg_round_trip() {
        let srs = SpatialRef::from_definition("EPSG:4326").unwrap();
        assert_eq!(srs.to_crs_string().unwrap(), Some("EPSG:4326".to_string()));
    }

    #[test]
    fn test_unidentified_falls_back_to_wkt() {
        let srs = SpatialRef::from_definition(
            "+proj=tmerc +lat_0=0 +lon_0=13.37 +k=0.9996 +x_0=500000 +y_0=0 +ellps=GRS80 +units=m",
        )
        .unwrap();
        let crs = srs.to_crs_string().unwrap().unwrap();
        assert!(crs.starts_with("PROJCS["), "{crs}");
    }

    #[test]
    fn test_invalid_definition() {
        assert!(matches!(
            SpatialRef::from_definition("not a crs"),
            Err(OgrioError::BadArgument(_))
        ));
    }

    #[test]
    fn test_null_handle() {
        assert_eq!(unsafe { crs_to_string(ptr::null_mut()) }.unwrap(), None);
    }
}
