//! GDAL Configuration Functions
//!
//! GDAL can be configured at runtime using environment variables or by using functions in this
//! module. Options set by calling functions in this module override options set in environment
//! variables.
//!
//! Process-wide options ([`set_config_option`]) are shared by every thread and every operation
//! in the process. They are not synchronized with reads or writes running concurrently and
//! should be set once, during initialization, before any dataset is opened.
//!
//! Options that only concern one operation belong in [`ConfigOptions`], passed through
//! [`ReadOptions`](crate::read::ReadOptions) or [`WriteOptions`](crate::write::WriteOptions).
//! They are applied to the calling thread only for the duration of that operation.
//!
//! ```no_run
//! use ogrio::config::*;
//!
//! // Stop the Shapefile driver from re-encoding attribute values
//! set_config_option("SHAPE_ENCODING", "").unwrap();
//! assert_eq!(get_config_option("SHAPE_ENCODING", "XXX").unwrap(), "");
//!
//! clear_config_option("SHAPE_ENCODING").unwrap();
//! assert_eq!(get_config_option("SHAPE_ENCODING", "XXX").unwrap(), "XXX");
//! ```
//!
//! Refer to [GDAL `ConfigOptions`](https://gdal.org/user/configoptions.html) for
//! a full list of options.

use std::ffi::CString;
use std::marker::PhantomData;

use crate::errors::Result;
use crate::utils::{_string, _string_opt};

/// Set a process-wide GDAL configuration option.
pub fn set_config_option(key: &str, value: &str) -> Result<()> {
    let c_key = CString::new(key.as_bytes())?;
    let c_val = CString::new(value.as_bytes())?;
    unsafe {
        gdal_sys::CPLSetConfigOption(c_key.as_ptr(), c_val.as_ptr());
    };
    Ok(())
}

/// Get the value of a GDAL configuration option.
///
/// If the config option specified by `key` is not found, `default` is returned.
pub fn get_config_option(key: &str, default: &str) -> Result<String> {
    let c_key = CString::new(key.as_bytes())?;
    let c_default = CString::new(default.as_bytes())?;
    let rv = unsafe { gdal_sys::CPLGetConfigOption(c_key.as_ptr(), c_default.as_ptr()) };
    Ok(_string(rv))
}

/// Clear the value of a process-wide GDAL configuration option.
pub fn clear_config_option(key: &str) -> Result<()> {
    let c_key = CString::new(key.as_bytes())?;
    unsafe {
        gdal_sys::CPLSetConfigOption(c_key.as_ptr(), ::std::ptr::null());
    };
    Ok(())
}

/// An ordered set of configuration options scoped to a single operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOptions {
    options: Vec<(String, String)>,
}

impl ConfigOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an option.
    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        match self.options.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.options.push((key.to_string(), value.to_string())),
        }
        self
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Applies every option to the calling thread until the returned guard is dropped.
    pub fn apply(&self) -> Result<ConfigScope> {
        let mut scope = ConfigScope {
            previous: Vec::with_capacity(self.options.len()),
            _private: PhantomData,
        };
        for (key, value) in &self.options {
            let c_key = CString::new(key.as_bytes())?;
            let c_val = CString::new(value.as_bytes())?;
            let previous = unsafe {
                _string_opt(gdal_sys::CPLGetThreadLocalConfigOption(
                    c_key.as_ptr(),
                    std::ptr::null(),
                ))
            };
            unsafe { gdal_sys::CPLSetThreadLocalConfigOption(c_key.as_ptr(), c_val.as_ptr()) };
            scope.previous.push((c_key, previous));
        }
        Ok(scope)
    }
}

/// Restores the calling thread's configuration options on drop.
pub struct ConfigScope {
    previous: Vec<(CString, Option<String>)>,
    // Thread-local options must be restored on the thread that set them.
    _private: PhantomData<*mut ()>,
}

impl Drop for ConfigScope {
    fn drop(&mut self) {
        for (key, previous) in self.previous.drain(..).rev() {
            let previous = previous.and_then(|p| CString::new(p).ok());
            let value_ptr = previous
                .as_ref()
                .map_or(std::ptr::null(), |value| value.as_ptr());
            unsafe { gdal_sys::CPLSetThreadLocalConfigOption(key.as_ptr(), value_ptr) };
        }
    }
}
