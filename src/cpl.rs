//! Native string lists
//!
//! GDAL passes `KEY=VALUE` options (open options, creation options) and plain string lists
//! (ignored field names) as NULL-terminated arrays of C strings.

use std::ffi::{c_char, CString};
use std::fmt::{Debug, Formatter};
use std::ptr;

use gdal_sys::{CSLAddString, CSLCount, CSLDestroy, CSLDuplicate, CSLFetchNameValue, CSLSetNameValue};

use crate::errors::{OgrioError, Result};
use crate::utils::{_string, _string_tuple};

/// Wraps a [`gdal_sys::CSLConstList`] (a.k.a. `char **papszStrList`).
pub struct CslStringList {
    list_ptr: *mut *mut c_char,
}

impl CslStringList {
    /// Creates an empty string list.
    pub fn new() -> Self {
        Self {
            list_ptr: ptr::null_mut(),
        }
    }

    /// Builds a list of `KEY=VALUE` entries.
    pub fn from_pairs<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Result<Self> {
        let mut list = Self::new();
        for (name, value) in pairs {
            list.set_name_value(name.as_ref(), value.as_ref())?;
        }
        Ok(list)
    }

    /// Assigns `value` to `name`, overwriting a previous entry with the same `name`.
    ///
    /// Fails if `name` contains characters other than alphanumerics, `-` and `_`, or if
    /// `value` spans multiple lines.
    pub fn set_name_value(&mut self, name: &str, value: &str) -> Result<()> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(OgrioError::BadArgument(format!(
                "Invalid characters in option name: '{name}'"
            )));
        }
        if value.contains(['\n', '\r']) {
            return Err(OgrioError::BadArgument(format!(
                "Invalid characters in option value: '{value}'"
            )));
        }
        let psz_name = CString::new(name)?;
        let psz_value = CString::new(value)?;

        unsafe {
            self.list_ptr = CSLSetNameValue(self.list_ptr, psz_name.as_ptr(), psz_value.as_ptr());
        }

        Ok(())
    }

    /// Appends a plain string entry.
    pub fn add_string(&mut self, value: &str) -> Result<()> {
        let psz_value = CString::new(value)?;
        unsafe {
            self.list_ptr = CSLAddString(self.list_ptr, psz_value.as_ptr());
        }
        Ok(())
    }

    /// Looks up the value corresponding to `key`.
    pub fn fetch_name_value(&self, key: &str) -> Result<Option<String>> {
        let key = CString::new(key)?;
        let c_value = unsafe { CSLFetchNameValue(self.as_ptr(), key.as_ptr()) };
        let value = if c_value.is_null() {
            None
        } else {
            Some(_string(c_value))
        };
        Ok(value)
    }

    /// Number of entries in the list.
    pub fn len(&self) -> usize {
        (unsafe { CSLCount(self.as_ptr()) }) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the `KEY=VALUE` entries of the list.
    pub fn iter(&self) -> CslStringListIterator<'_> {
        CslStringListIterator {
            list: self,
            idx: 0,
            count: self.len(),
        }
    }

    /// Get the raw pointer to the underlying data.
    pub fn as_ptr(&self) -> gdal_sys::CSLConstList {
        self.list_ptr
    }

    /// Raw pointer suitable for `const char* const*` parameters; NULL when the list is empty.
    pub(crate) fn as_const_ptr(&self) -> *const *const c_char {
        self.list_ptr as *const *const c_char
    }
}

impl Drop for CslStringList {
    fn drop(&mut self) {
        unsafe { CSLDestroy(self.list_ptr) }
    }
}

impl Default for CslStringList {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CslStringList {
    fn clone(&self) -> Self {
        let list_ptr = unsafe { CSLDuplicate(self.list_ptr) };
        Self { list_ptr }
    }
}

impl Debug for CslStringList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (k, v) in self.iter() {
            f.write_fmt(format_args!("{k}={v}\n"))?;
        }
        Ok(())
    }
}

/// State for iterator over [`CslStringList`] entries.
pub struct CslStringListIterator<'a> {
    list: &'a CslStringList,
    idx: usize,
    count: usize,
}

impl Iterator for CslStringListIterator<'_> {
    type Item = (String, String);

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.count {
            return None;
        }

        let field = unsafe {
            let slice = std::slice::from_raw_parts(self.list.list_ptr, self.count);
            slice[self.idx]
        };
        if field.is_null() {
            None
        } else {
            self.idx += 1;
            _string_tuple(field, '=')
        }
    }
}
