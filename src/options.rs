use std::ffi::c_uint;

use bitflags::bitflags;

/// Open options for [`crate::Dataset`]
#[derive(Debug, Default)]
pub struct DatasetOptions<'a> {
    pub open_flags: GdalOpenFlags,
    /// Restrict the drivers tried when opening; validated against the driver catalog.
    pub allowed_drivers: Option<&'a [&'a str]>,
    /// Driver specific `KEY=VALUE` open options.
    pub open_options: Option<&'a [(&'a str, &'a str)]>,
}

// These are skipped by bindgen and manually updated.
bitflags! {
    /// Extended open flags used by [`Dataset::open_ex`](crate::Dataset::open_ex).
    ///
    /// `GDAL_OF_SHARED` is deliberately absent: a shared dataset handle would break the
    /// exclusive ownership [`Dataset`](crate::Dataset) relies on to be `Send`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GdalOpenFlags: c_uint {
        /// Open in read-only mode (default).
        const GDAL_OF_READONLY = 0x00;
        /// Open in update mode.
        const GDAL_OF_UPDATE = 0x01;
        /// Allow vector drivers to be used.
        const GDAL_OF_VECTOR = 0x04;
        /// Emit error message in case of failed open.
        const GDAL_OF_VERBOSE_ERROR = 0x40;
    }
}

impl Default for GdalOpenFlags {
    fn default() -> GdalOpenFlags {
        GdalOpenFlags::GDAL_OF_READONLY
    }
}
