use std::ffi::{c_char, CStr, CString};
use std::path::Path;

use crate::errors::*;

pub fn _string(raw_ptr: *const c_char) -> String {
    let c_str = unsafe { CStr::from_ptr(raw_ptr) };
    c_str.to_string_lossy().into_owned()
}

/// Like [`_string`], but maps a NULL pointer or an empty string to `None`.
pub fn _string_opt(raw_ptr: *const c_char) -> Option<String> {
    if raw_ptr.is_null() {
        return None;
    }
    let s = _string(raw_ptr);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Splits a `KEY=VALUE` entry of a native string list.
pub fn _string_tuple(raw_ptr: *const c_char, delim: char) -> Option<(String, String)> {
    let c_str = unsafe { CStr::from_ptr(raw_ptr) };
    c_str
        .to_string_lossy()
        .split_once(delim)
        .map(|(k, v)| (k.to_string(), v.to_string()))
}

pub fn _last_null_pointer_err(method_name: &'static str) -> OgrioError {
    let last_err_msg = _string(unsafe { gdal_sys::CPLGetLastErrorMsg() });
    unsafe { gdal_sys::CPLErrorReset() };
    OgrioError::NullPointer {
        method_name,
        msg: last_err_msg,
    }
}

pub fn _path_to_c_string(path: &Path) -> Result<CString> {
    let path_str = path.to_string_lossy();
    CString::new(path_str.as_ref()).map_err(Into::into)
}

/// Whether `path` points into one of GDAL's virtual file systems or a remote resource,
/// in which case its existence can not be checked through the local file system.
pub fn _is_virtual_path(path: &Path) -> bool {
    let s = path.to_string_lossy();
    if s.starts_with("/vsi") || s.contains("://") {
        return true;
    }
    // Driver-prefixed connection strings such as `PG:dbname=gis`; a single letter is a drive.
    match s.split_once(':') {
        Some((prefix, _)) => prefix.len() > 1 && prefix.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_opt() {
        let empty = CString::new("").unwrap();
        let full = CString::new("EPSG").unwrap();
        assert_eq!(_string_opt(std::ptr::null()), None);
        assert_eq!(_string_opt(empty.as_ptr()), None);
        assert_eq!(_string_opt(full.as_ptr()), Some("EPSG".to_string()));
    }

    #[test]
    fn test_virtual_path() {
        assert!(_is_virtual_path(Path::new("/vsimem/test.gpkg")));
        assert!(_is_virtual_path(Path::new("/vsizip/archive.zip/a.shp")));
        assert!(_is_virtual_path(Path::new("https://example.com/data.fgb")));
        assert!(_is_virtual_path(Path::new("PG:dbname=gis")));
        assert!(!_is_virtual_path(Path::new("fixtures/regions.geojson")));
        assert!(!_is_virtual_path(Path::new("C:/data/regions.geojson")));
    }
}
