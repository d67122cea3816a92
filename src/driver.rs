//! Driver catalog
//!
//! Enumerates the drivers registered with GDAL together with their capabilities, and resolves
//! the driver used to open or create a vector dataset.

use std::ffi::{c_int, CStr, CString};
use std::path::Path;
use std::sync::Once;

use bitflags::bitflags;
use gdal_sys::{GDALDataType, GDALDriverH};

use crate::cpl::CslStringList;
use crate::dataset::Dataset;
use crate::error_stack::ErrorScope;
use crate::errors::*;
use crate::utils::{_last_null_pointer_err, _path_to_c_string, _string, _string_opt};

static START: Once = Once::new();

pub(crate) fn _register_drivers() {
    START.call_once(|| unsafe {
        gdal_sys::GDALAllRegister();
    });
}

bitflags! {
    /// Capabilities advertised by a driver through its `DCAP_*` metadata.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DriverCapabilities: u32 {
        /// The driver can open existing datasets.
        const READ = 0x01;
        /// The driver can create new datasets.
        const WRITE = 0x02;
        /// The driver handles vector data.
        const VECTOR = 0x04;
        /// The driver handles raster data.
        const RASTER = 0x08;
    }
}

/// A registered GDAL driver.
#[derive(Debug)]
pub struct Driver {
    c_driver: GDALDriverH,
}

impl Driver {
    /// Creates a new Driver by wrapping a C pointer
    ///
    /// # Safety
    /// This method operates on a raw C pointer
    pub unsafe fn from_c_driver(c_driver: GDALDriverH) -> Driver {
        Driver { c_driver }
    }

    /// Returns the wrapped C pointer
    ///
    /// # Safety
    /// This method returns a raw C pointer
    pub unsafe fn c_driver(&self) -> GDALDriverH {
        self.c_driver
    }

    /// Short name of the driver, e.g. `GPKG`.
    pub fn short_name(&self) -> String {
        let rv = unsafe { gdal_sys::GDALGetDriverShortName(self.c_driver) };
        _string(rv)
    }

    /// Long name of the driver, e.g. `GeoPackage`.
    pub fn long_name(&self) -> String {
        let rv = unsafe { gdal_sys::GDALGetDriverLongName(self.c_driver) };
        _string(rv)
    }

    /// Value of a metadata item in the default domain.
    pub fn metadata_item(&self, key: &str) -> Option<String> {
        let c_key = CString::new(key).ok()?;
        let rv = unsafe {
            gdal_sys::GDALGetMetadataItem(self.c_driver, c_key.as_ptr(), std::ptr::null())
        };
        _string_opt(rv)
    }

    fn flag(&self, key: &CStr) -> bool {
        let rv = unsafe {
            gdal_sys::GDALGetMetadataItem(self.c_driver, key.as_ptr(), std::ptr::null())
        };
        _string_opt(rv).is_some_and(|v| v.eq_ignore_ascii_case("YES"))
    }

    pub fn capabilities(&self) -> DriverCapabilities {
        let mut caps = DriverCapabilities::empty();
        caps.set(DriverCapabilities::READ, self.flag(c"DCAP_OPEN"));
        caps.set(DriverCapabilities::WRITE, self.flag(c"DCAP_CREATE"));
        caps.set(DriverCapabilities::VECTOR, self.flag(c"DCAP_VECTOR"));
        caps.set(DriverCapabilities::RASTER, self.flag(c"DCAP_RASTER"));
        caps
    }

    /// Field types the driver accepts when creating fields, if it declares them.
    ///
    /// Names follow `OGR_GetFieldTypeName`, e.g. `Integer64` or `DateTime`.
    pub fn creation_field_types(&self) -> Option<Vec<String>> {
        self.metadata_item("DMD_CREATIONFIELDDATATYPES")
            .map(|types| types.split_whitespace().map(str::to_string).collect())
    }

    /// Field sub-types the driver accepts when creating fields, if it declares them.
    pub fn creation_field_subtypes(&self) -> Option<Vec<String>> {
        self.metadata_item("DMD_CREATIONFIELDDATASUBTYPES")
            .map(|types| types.split_whitespace().map(str::to_string).collect())
    }

    /// Creates a new dataset without raster bands, for vector layers.
    ///
    /// `options` are driver specific dataset creation options.
    pub fn create_vector_only(&self, path: &Path, options: &CslStringList) -> Result<Dataset> {
        let c_path = _path_to_c_string(path)?;
        let scope = ErrorScope::new();
        let c_dataset = unsafe {
            gdal_sys::GDALCreate(
                self.c_driver,
                c_path.as_ptr(),
                0,
                0,
                0,
                GDALDataType::GDT_Unknown,
                options.as_ptr(),
            )
        };
        if c_dataset.is_null() {
            return Err(scope.native_failure("GDALCreate"));
        }
        Ok(unsafe { Dataset::from_c_dataset(c_dataset, path) })
    }

    /// Deletes the dataset at `path` with this driver, removing every file that belongs to it.
    pub fn delete_dataset(&self, path: &Path) -> Result<()> {
        let c_path = _path_to_c_string(path)?;
        let scope = ErrorScope::new();
        let rv = unsafe { gdal_sys::GDALDeleteDataset(self.c_driver, c_path.as_ptr()) };
        if rv != gdal_sys::CPLErr::CE_None {
            return Err(scope.native_failure("GDALDeleteDataset"));
        }
        scope.check()?;
        Ok(())
    }
}

/// Catalog of the drivers registered with GDAL.
pub struct DriverManager;

impl DriverManager {
    /// Number of registered drivers.
    pub fn count() -> usize {
        _register_drivers();
        let count = unsafe { gdal_sys::GDALGetDriverCount() };
        count as usize
    }

    /// Driver at position `index` in registration order.
    pub fn get_driver(index: usize) -> Result<Driver> {
        _register_drivers();
        let c_driver = unsafe { gdal_sys::GDALGetDriver(index as c_int) };
        if c_driver.is_null() {
            return Err(_last_null_pointer_err("GDALGetDriver"));
        }
        Ok(Driver { c_driver })
    }

    /// Driver registered under the short name `name`.
    pub fn get_driver_by_name(name: &str) -> Result<Driver> {
        _register_drivers();
        let c_name = CString::new(name)?;
        let c_driver = unsafe { gdal_sys::GDALGetDriverByName(c_name.as_ptr()) };
        if c_driver.is_null() {
            unsafe { gdal_sys::CPLErrorReset() };
            return Err(OgrioError::UnsupportedDriver {
                driver: name.to_string(),
                msg: "no driver registered under this name".to_string(),
            });
        }
        Ok(Driver { c_driver })
    }

    /// Iterates over all registered drivers in registration order.
    pub fn all() -> DriverIterator {
        DriverIterator {
            current: 0,
            count: DriverManager::count(),
        }
    }

    /// Resolves `name` to a vector driver, checking that it supports `required`.
    pub fn vector_driver(name: &str, required: DriverCapabilities) -> Result<Driver> {
        let driver = Self::get_driver_by_name(name)?;
        let caps = driver.capabilities();
        if !caps.contains(DriverCapabilities::VECTOR) {
            return Err(OgrioError::UnsupportedDriver {
                driver: name.to_string(),
                msg: "driver does not support vector data".to_string(),
            });
        }
        if !caps.contains(required) {
            let missing = if required.contains(DriverCapabilities::WRITE)
                && !caps.contains(DriverCapabilities::WRITE)
            {
                "driver does not support creating datasets"
            } else {
                "driver does not support opening datasets"
            };
            return Err(OgrioError::UnsupportedDriver {
                driver: name.to_string(),
                msg: missing.to_string(),
            });
        }
        Ok(driver)
    }
}

pub struct DriverIterator {
    current: usize,
    count: usize,
}

impl Iterator for DriverIterator {
    type Item = Driver;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current < self.count {
            let idx = self.current;
            self.current += 1;
            if let Ok(driver) = DriverManager::get_driver(idx) {
                return Some(driver);
            }
        }
        None
    }
}

/// Entry of the driver catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverInfo {
    pub name: String,
    pub long_name: String,
    pub capabilities: DriverCapabilities,
}

impl DriverInfo {
    pub fn can_read(&self) -> bool {
        self.capabilities.contains(DriverCapabilities::READ)
    }

    pub fn can_write(&self) -> bool {
        self.capabilities.contains(DriverCapabilities::WRITE)
    }

    pub fn is_vector(&self) -> bool {
        self.capabilities.contains(DriverCapabilities::VECTOR)
    }
}

/// Lists every registered driver with its capabilities, in registration order.
pub fn list_drivers() -> Vec<DriverInfo> {
    DriverManager::all()
        .map(|driver| DriverInfo {
            name: driver.short_name(),
            long_name: driver.long_name(),
            capabilities: driver.capabilities(),
        })
        .collect()
}

/// Lists the registered drivers that handle vector data.
pub fn list_vector_drivers() -> Vec<DriverInfo> {
    list_drivers().into_iter().filter(DriverInfo::is_vector).collect()
}

/// Infers the write driver from the extension of `path`.
pub fn detect_write_driver(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let driver = match ext.as_str() {
        "shp" => "ESRI Shapefile",
        "gpkg" => "GPKG",
        "geojson" | "json" => "GeoJSON",
        "geojsonl" | "geojsons" => "GeoJSONSeq",
        "fgb" => "FlatGeobuf",
        "gml" => "GML",
        "sqlite" => "SQLite",
        _ => {
            return Err(OgrioError::BadArgument(format!(
                "Could not infer driver from path '{}'; specify the driver explicitly",
                path.display()
            )))
        }
    };
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_write_driver() {
        assert_eq!(
            detect_write_driver(Path::new("out/regions.shp")).unwrap(),
            "ESRI Shapefile"
        );
        assert_eq!(detect_write_driver(Path::new("a.GPKG")).unwrap(), "GPKG");
        assert_eq!(detect_write_driver(Path::new("a.json")).unwrap(), "GeoJSON");
        assert_eq!(
            detect_write_driver(Path::new("a.geojsonl")).unwrap(),
            "GeoJSONSeq"
        );
        assert!(matches!(
            detect_write_driver(Path::new("a.xyz")),
            Err(OgrioError::BadArgument(_))
        ));
        assert!(detect_write_driver(Path::new("noext")).is_err());
    }

    #[test]
    fn test_geojson_capabilities() {
        let driver = DriverManager::vector_driver(
            "GeoJSON",
            DriverCapabilities::READ | DriverCapabilities::WRITE,
        )
        .unwrap();
        assert_eq!(driver.short_name(), "GeoJSON");
        let types = driver.creation_field_types().unwrap();
        assert!(types.iter().any(|t| t == "Integer64"));
    }

    #[test]
    fn test_unknown_driver() {
        assert!(matches!(
            DriverManager::get_driver_by_name("NotADriver"),
            Err(OgrioError::UnsupportedDriver { .. })
        ));
    }

    #[test]
    fn test_raster_only_driver_rejected() {
        let err = DriverManager::vector_driver("GTiff", DriverCapabilities::READ).unwrap_err();
        assert!(matches!(err, OgrioError::UnsupportedDriver { driver, .. } if driver == "GTiff"));
    }

    #[test]
    fn test_list_drivers() {
        let drivers = list_drivers();
        assert_eq!(drivers.len(), DriverManager::count());
        let geojson = drivers.iter().find(|d| d.name == "GeoJSON").unwrap();
        assert!(geojson.can_read() && geojson.can_write() && geojson.is_vector());
        assert!(list_vector_drivers().iter().all(DriverInfo::is_vector));
    }
}
