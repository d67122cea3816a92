use std::ffi::{c_int, CString};

use gdal_sys::{OGRErr, OGRFeatureDefnH, OGRFieldDefnH};

use crate::errors::*;
use crate::types::NativeFieldType;
use crate::utils::{_last_null_pointer_err, _string};

/// Native description of one attribute field, as declared by the layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    /// Position of the field in the layer definition.
    pub index: usize,
    pub name: String,
    pub native: NativeFieldType,
    /// Formatting width; zero means unspecified.
    pub width: i32,
    /// Formatting precision; normally zero except for `Real` fields.
    pub precision: i32,
    pub nullable: bool,
}

/// Reads every field definition of a layer definition.
///
/// # Safety
/// `c_defn` must be a valid feature definition handle.
pub(crate) unsafe fn field_defs(c_defn: OGRFeatureDefnH) -> Vec<FieldDef> {
    let count = gdal_sys::OGR_FD_GetFieldCount(c_defn).max(0) as usize;
    (0..count)
        .map(|index| {
            let c_field = gdal_sys::OGR_FD_GetFieldDefn(c_defn, index as c_int);
            FieldDef {
                index,
                name: _string(gdal_sys::OGR_Fld_GetNameRef(c_field)),
                native: NativeFieldType::with_subtype(
                    gdal_sys::OGR_Fld_GetType(c_field),
                    gdal_sys::OGR_Fld_GetSubType(c_field),
                ),
                width: gdal_sys::OGR_Fld_GetWidth(c_field),
                precision: gdal_sys::OGR_Fld_GetPrecision(c_field),
                nullable: gdal_sys::OGR_Fld_IsNullable(c_field) != 0,
            }
        })
        .collect()
}

/// An owned field definition used to create fields on a layer.
pub struct FieldDefn {
    c_obj: OGRFieldDefnH,
}

impl Drop for FieldDefn {
    fn drop(&mut self) {
        unsafe { gdal_sys::OGR_Fld_Destroy(self.c_obj) };
    }
}

impl FieldDefn {
    pub fn new(name: &str, field_type: NativeFieldType, keep_subtype: bool) -> Result<FieldDefn> {
        let c_str = CString::new(name)?;
        let c_obj = unsafe { gdal_sys::OGR_Fld_Create(c_str.as_ptr(), field_type.field_type) };
        if c_obj.is_null() {
            return Err(_last_null_pointer_err("OGR_Fld_Create"));
        };
        if keep_subtype {
            unsafe { gdal_sys::OGR_Fld_SetSubType(c_obj, field_type.subtype) };
        }
        Ok(FieldDefn { c_obj })
    }

    /// Adds the field to `layer`; `approx_ok` lets the driver alter width or precision.
    pub fn add_to_layer(&self, layer: &super::Layer<'_>, approx_ok: bool) -> Result<()> {
        let rv = unsafe {
            gdal_sys::OGR_L_CreateField(layer.c_layer(), self.c_obj, approx_ok as c_int)
        };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "OGR_L_CreateField",
            });
        }
        Ok(())
    }
}
