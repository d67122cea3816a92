//! Mapping between OGR field types and Arrow data types
//!
//! Reading maps every native type to exactly one Arrow type, never narrowing:
//!
//! | OGR type / sub-type   | Arrow type                          |
//! |-----------------------|-------------------------------------|
//! | Integer / Boolean     | `Boolean`                           |
//! | Integer / Int16       | `Int16`                             |
//! | Integer               | `Int32`                             |
//! | Integer64             | `Int64`                             |
//! | Real / Float32        | `Float32`                           |
//! | Real                  | `Float64`                           |
//! | String                | `Utf8`                              |
//! | Binary                | `Binary`                            |
//! | Date                  | `Date32` (days since the epoch)     |
//! | Time                  | `Time32(Millisecond)`               |
//! | DateTime              | `Timestamp(Millisecond, None)`      |
//! | lists, wide strings   | `Utf8`, as rendered by OGR          |
//!
//! Writing is strict: an Arrow type without a native counterpart fails with
//! [`OgrioError::UnsupportedFieldType`] instead of being coerced.

use std::fmt::{Display, Formatter};

use arrow_schema::{DataType, TimeUnit};
use gdal_sys::{OGRFieldSubType, OGRFieldType};

use crate::errors::{OgrioError, Result};
use crate::utils::_string;

/// A native field type: the OGR type plus its sub-type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NativeFieldType {
    pub field_type: OGRFieldType::Type,
    pub subtype: OGRFieldSubType::Type,
}

impl NativeFieldType {
    pub const fn new(field_type: OGRFieldType::Type) -> Self {
        NativeFieldType {
            field_type,
            subtype: OGRFieldSubType::OFSTNone,
        }
    }

    pub const fn with_subtype(
        field_type: OGRFieldType::Type,
        subtype: OGRFieldSubType::Type,
    ) -> Self {
        NativeFieldType {
            field_type,
            subtype,
        }
    }

    /// Type name as used in driver metadata, e.g. `Integer64`.
    pub fn type_name(&self) -> String {
        _string(unsafe { gdal_sys::OGR_GetFieldTypeName(self.field_type) })
    }

    /// Sub-type name as used in driver metadata, e.g. `Boolean`.
    pub fn subtype_name(&self) -> String {
        _string(unsafe { gdal_sys::OGR_GetFieldSubTypeName(self.subtype) })
    }
}

impl Display for NativeFieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.subtype == OGRFieldSubType::OFSTNone {
            f.write_str(&self.type_name())
        } else {
            write!(f, "{}({})", self.type_name(), self.subtype_name())
        }
    }
}

/// Arrow type used when reading a native field.
pub fn to_arrow(native: NativeFieldType) -> DataType {
    match (native.field_type, native.subtype) {
        (OGRFieldType::OFTInteger, OGRFieldSubType::OFSTBoolean) => DataType::Boolean,
        (OGRFieldType::OFTInteger, OGRFieldSubType::OFSTInt16) => DataType::Int16,
        (OGRFieldType::OFTInteger, _) => DataType::Int32,
        (OGRFieldType::OFTInteger64, _) => DataType::Int64,
        (OGRFieldType::OFTReal, OGRFieldSubType::OFSTFloat32) => DataType::Float32,
        (OGRFieldType::OFTReal, _) => DataType::Float64,
        (OGRFieldType::OFTString, _) => DataType::Utf8,
        (OGRFieldType::OFTBinary, _) => DataType::Binary,
        (OGRFieldType::OFTDate, _) => DataType::Date32,
        (OGRFieldType::OFTTime, _) => DataType::Time32(TimeUnit::Millisecond),
        (OGRFieldType::OFTDateTime, _) => DataType::Timestamp(TimeUnit::Millisecond, None),
        // Lists and deprecated wide strings are read through their text rendering.
        _ => DataType::Utf8,
    }
}

/// Native type used when writing an Arrow column named `field`.
pub fn from_arrow(field: &str, data_type: &DataType) -> Result<NativeFieldType> {
    use OGRFieldSubType::*;
    use OGRFieldType::*;

    let native = match data_type {
        DataType::Boolean => NativeFieldType::with_subtype(OFTInteger, OFSTBoolean),
        DataType::Int8 | DataType::Int16 => NativeFieldType::with_subtype(OFTInteger, OFSTInt16),
        DataType::UInt8 | DataType::UInt16 | DataType::Int32 => NativeFieldType::new(OFTInteger),
        DataType::UInt32 | DataType::Int64 => NativeFieldType::new(OFTInteger64),
        DataType::Float32 => NativeFieldType::with_subtype(OFTReal, OFSTFloat32),
        DataType::Float64 => NativeFieldType::new(OFTReal),
        DataType::Utf8 | DataType::LargeUtf8 => NativeFieldType::new(OFTString),
        DataType::Binary | DataType::LargeBinary => NativeFieldType::new(OFTBinary),
        DataType::Date32 => NativeFieldType::new(OFTDate),
        DataType::Time32(TimeUnit::Millisecond) => NativeFieldType::new(OFTTime),
        DataType::Timestamp(_, _) => NativeFieldType::new(OFTDateTime),
        other => return Err(OgrioError::unsupported_field(field, other)),
    };
    Ok(native)
}

/// Checks that a driver accepts `native`, given its declared creation types.
///
/// Drivers that do not declare their creation types accept everything. Sub-types are not
/// checked here: without one the driver stores the plain type, which only widens.
pub fn driver_accepts(native: NativeFieldType, creation_types: Option<&[String]>) -> bool {
    match creation_types {
        Some(types) => {
            let name = native.type_name();
            types.iter().any(|t| *t == name)
        }
        None => true,
    }
}

/// Whether the sub-type of `native` should be set on a field created by a driver that
/// declares `creation_subtypes`.
pub fn keeps_subtype(native: NativeFieldType, creation_subtypes: Option<&[String]>) -> bool {
    if native.subtype == OGRFieldSubType::OFSTNone {
        return false;
    }
    match creation_subtypes {
        Some(subtypes) => {
            let name = native.subtype_name();
            subtypes.iter().any(|s| *s == name)
        }
        None => true,
    }
}

/// Whether values of type `incoming` can be appended to an existing field of type `existing`
/// without losing information.
///
/// The types must match, except that `Integer` widens into `Integer64`. A sub-type on the
/// existing field narrows it, so the incoming values must carry the same sub-type.
pub fn appends_into(existing: NativeFieldType, incoming: NativeFieldType) -> bool {
    if existing.field_type == OGRFieldType::OFTInteger64
        && incoming.field_type == OGRFieldType::OFTInteger
    {
        return incoming.subtype != OGRFieldSubType::OFSTBoolean;
    }
    existing.field_type == incoming.field_type
        && (existing.subtype == OGRFieldSubType::OFSTNone || existing.subtype == incoming.subtype)
}
