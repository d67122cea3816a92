use std::ffi::NulError;
use std::fmt::{Display, Formatter};
use std::str::Utf8Error;

use arrow_schema::{ArrowError, DataType};
use gdal_sys::{CPLErr, OGRErr};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OgrioError>;

#[derive(Debug, Error)]
pub enum OgrioError {
    #[error("FfiNulError")]
    FfiNulError(#[from] NulError),
    #[error("StrUtf8Error")]
    StrUtf8Error(#[from] Utf8Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Arrow(#[from] ArrowError),

    #[error("Dataset '{path}' not found: {msg}")]
    DatasetNotFound { path: String, msg: String },
    #[error("Unsupported driver '{driver}': {msg}")]
    UnsupportedDriver { driver: String, msg: String },
    #[error("Layer '{layer}' not found in dataset '{path}'")]
    LayerNotFound { path: String, layer: String },
    #[error("Dataset '{path}' contains {count} layers; a layer name or index must be specified")]
    AmbiguousLayer { path: String, count: usize },
    #[error("Field '{field}' has unsupported type {dtype}")]
    UnsupportedFieldType { field: String, dtype: String },
    #[error("Read error ({class}): {msg}")]
    ReadError { class: CplErrType, msg: String },
    #[error("Write error at row {row} ({class}): {msg}")]
    WriteError {
        row: usize,
        class: CplErrType,
        msg: String,
    },
    #[error("Operation on closed {resource}")]
    ClosedResource { resource: &'static str },

    #[error("Native error ({class}), error number: '{number}', error msg: '{msg}'")]
    Native {
        class: CplErrType,
        number: i32,
        msg: String,
    },
    #[error("GDAL method '{method_name}' returned a NULL pointer. Error msg: '{msg}'")]
    NullPointer {
        method_name: &'static str,
        msg: String,
    },
    #[error("OGR method '{method_name}' returned error: '{err:?}'")]
    OgrError {
        err: OGRErr::Type,
        method_name: &'static str,
    },
    #[error("Bad argument: {0}")]
    BadArgument(String),
}

impl OgrioError {
    /// Builds an [`OgrioError::UnsupportedFieldType`] for an Arrow type the writer cannot map.
    pub(crate) fn unsupported_field(field: &str, dtype: &DataType) -> Self {
        OgrioError::UnsupportedFieldType {
            field: field.to_string(),
            dtype: dtype.to_string(),
        }
    }

    /// The native message text carried by this error, if any.
    pub fn native_message(&self) -> Option<&str> {
        match self {
            OgrioError::DatasetNotFound { msg, .. }
            | OgrioError::UnsupportedDriver { msg, .. }
            | OgrioError::ReadError { msg, .. }
            | OgrioError::WriteError { msg, .. }
            | OgrioError::Native { msg, .. }
            | OgrioError::NullPointer { msg, .. } => Some(msg),
            _ => None,
        }
    }
}

/// Severity of a record raised by the native error stack.
///
/// Ordered from least to most severe, so records can be compared to find the worst one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CplErrType {
    None = 0,
    Debug = 1,
    Warning = 2,
    Failure = 3,
    Fatal = 4,
}

impl CplErrType {
    /// Whether a record of this severity fails the operation that raised it.
    pub fn is_error(self) -> bool {
        self >= CplErrType::Failure
    }
}

impl From<CPLErr::Type> for CplErrType {
    fn from(error_type: CPLErr::Type) -> Self {
        if error_type > 4 {
            return Self::Fatal; // bindgen should prevent this
        }

        match error_type {
            CPLErr::CE_None => Self::None,
            CPLErr::CE_Debug => Self::Debug,
            CPLErr::CE_Warning => Self::Warning,
            CPLErr::CE_Failure => Self::Failure,
            _ => Self::Fatal,
        }
    }
}

impl Display for CplErrType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CplErrType::None => "none",
            CplErrType::Debug => "debug",
            CplErrType::Warning => "warning",
            CplErrType::Failure => "failure",
            CplErrType::Fatal => "fatal",
        };
        f.write_str(name)
    }
}
