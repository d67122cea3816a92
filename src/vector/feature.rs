use std::borrow::Cow;
use std::ffi::{c_int, CStr, CString};
use std::marker::PhantomData;
use std::ptr::null_mut;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike};
use gdal_sys::{OGREnvelope, OGRErr, OGRFeatureDefnH, OGRFeatureH, OGRwkbByteOrder};

use crate::errors::*;
use crate::utils::_last_null_pointer_err;

/// `OGRNullFID`
const NULL_FID: i64 = -1;
/// Days from 0001-01-01 (CE) to 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// A native feature, destroyed on drop.
///
/// Features only live for the duration of one row of a read or write; the lifetime ties them
/// to the layer they were fetched from or created for.
#[derive(Debug)]
pub struct Feature<'a> {
    c_feature: OGRFeatureH,
    _layer: PhantomData<&'a ()>,
}

impl<'a> Feature<'a> {
    /// Creates an empty feature for the given layer definition.
    ///
    /// # Safety
    /// `c_defn` must be a valid feature definition handle that outlives the feature.
    pub(crate) unsafe fn new(c_defn: OGRFeatureDefnH) -> Result<Feature<'a>> {
        let c_feature = gdal_sys::OGR_F_Create(c_defn);
        if c_feature.is_null() {
            return Err(_last_null_pointer_err("OGR_F_Create"));
        }
        Ok(Feature {
            c_feature,
            _layer: PhantomData,
        })
    }

    /// Takes ownership of a feature returned by the native layer.
    ///
    /// # Safety
    /// `c_feature` must be a valid, owned feature handle.
    pub(crate) unsafe fn from_c_feature(c_feature: OGRFeatureH) -> Feature<'a> {
        Feature {
            c_feature,
            _layer: PhantomData,
        }
    }

    /// Returns the wrapped C pointer
    ///
    /// # Safety
    /// This method returns a raw C pointer
    pub unsafe fn c_feature(&self) -> OGRFeatureH {
        self.c_feature
    }

    /// Feature id, or `None` if the driver did not assign one.
    pub fn fid(&self) -> Option<i64> {
        let fid = unsafe { gdal_sys::OGR_F_GetFID(self.c_feature) };
        if fid == NULL_FID {
            None
        } else {
            Some(fid)
        }
    }

    /// Whether field `idx` holds a value (is set and not null).
    pub fn has_value(&self, idx: usize) -> bool {
        unsafe { gdal_sys::OGR_F_IsFieldSetAndNotNull(self.c_feature, idx as c_int) != 0 }
    }

    pub fn field_as_i32(&self, idx: usize) -> i32 {
        unsafe { gdal_sys::OGR_F_GetFieldAsInteger(self.c_feature, idx as c_int) }
    }

    pub fn field_as_i64(&self, idx: usize) -> i64 {
        unsafe { gdal_sys::OGR_F_GetFieldAsInteger64(self.c_feature, idx as c_int) }
    }

    pub fn field_as_f64(&self, idx: usize) -> f64 {
        unsafe { gdal_sys::OGR_F_GetFieldAsDouble(self.c_feature, idx as c_int) }
    }

    /// Text value of field `idx`; any field type can be rendered as text.
    pub fn field_as_str(&self, idx: usize) -> Cow<'_, str> {
        let rv = unsafe { gdal_sys::OGR_F_GetFieldAsString(self.c_feature, idx as c_int) };
        if rv.is_null() {
            return Cow::Borrowed("");
        }
        unsafe { CStr::from_ptr(rv) }.to_string_lossy()
    }

    pub fn field_as_bytes(&self, idx: usize) -> &[u8] {
        let mut len: c_int = 0;
        let rv =
            unsafe { gdal_sys::OGR_F_GetFieldAsBinary(self.c_feature, idx as c_int, &mut len) };
        if rv.is_null() || len <= 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(rv as *const u8, len as usize) }
    }

    /// Date and time components of a `Date`, `Time` or `DateTime` field.
    pub fn field_as_datetime(&self, idx: usize) -> Option<DateTimeParts> {
        let mut parts = DateTimeParts::default();
        let ok = unsafe {
            gdal_sys::OGR_F_GetFieldAsDateTimeEx(
                self.c_feature,
                idx as c_int,
                &mut parts.year,
                &mut parts.month,
                &mut parts.day,
                &mut parts.hour,
                &mut parts.minute,
                &mut parts.second,
                &mut parts.tz_flag,
            )
        };
        (ok != 0).then_some(parts)
    }

    /// Exports the geometry as ISO WKB into `buf`, replacing its content.
    ///
    /// Returns `false`, leaving `buf` empty, if the feature has no geometry.
    pub fn geometry_wkb(&self, force_2d: bool, buf: &mut Vec<u8>) -> Result<bool> {
        buf.clear();
        let c_geom = unsafe { gdal_sys::OGR_F_GetGeometryRef(self.c_feature) };
        if c_geom.is_null() {
            return Ok(false);
        }
        if force_2d {
            // The geometry is owned by this feature, which is discarded after decoding.
            unsafe { gdal_sys::OGR_G_FlattenTo2D(c_geom) };
        }
        let size = unsafe { gdal_sys::OGR_G_WkbSize(c_geom) };
        if size <= 0 {
            return Ok(false);
        }
        buf.resize(size as usize, 0);
        let rv = unsafe {
            gdal_sys::OGR_G_ExportToIsoWkb(c_geom, OGRwkbByteOrder::wkbNDR, buf.as_mut_ptr())
        };
        if rv != OGRErr::OGRERR_NONE {
            buf.clear();
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "OGR_G_ExportToIsoWkb",
            });
        }
        Ok(true)
    }

    /// Envelope of the geometry, or `None` if the feature has no (or an empty) geometry.
    pub fn geometry_envelope(&self) -> Option<OGREnvelope> {
        let c_geom = unsafe { gdal_sys::OGR_F_GetGeometryRef(self.c_feature) };
        if c_geom.is_null() || unsafe { gdal_sys::OGR_G_IsEmpty(c_geom) } != 0 {
            return None;
        }
        let mut envelope = OGREnvelope {
            MinX: 0.0,
            MaxX: 0.0,
            MinY: 0.0,
            MaxY: 0.0,
        };
        unsafe { gdal_sys::OGR_G_GetEnvelope(c_geom, &mut envelope) };
        Some(envelope)
    }

    pub fn set_field_null(&mut self, idx: usize) {
        unsafe { gdal_sys::OGR_F_SetFieldNull(self.c_feature, idx as c_int) };
    }

    pub fn set_field_i32(&mut self, idx: usize, value: i32) {
        unsafe { gdal_sys::OGR_F_SetFieldInteger(self.c_feature, idx as c_int, value) };
    }

    pub fn set_field_i64(&mut self, idx: usize, value: i64) {
        unsafe { gdal_sys::OGR_F_SetFieldInteger64(self.c_feature, idx as c_int, value) };
    }

    pub fn set_field_f64(&mut self, idx: usize, value: f64) {
        unsafe { gdal_sys::OGR_F_SetFieldDouble(self.c_feature, idx as c_int, value) };
    }

    pub fn set_field_str(&mut self, idx: usize, value: &str) -> Result<()> {
        let c_str = CString::new(value)?;
        unsafe { gdal_sys::OGR_F_SetFieldString(self.c_feature, idx as c_int, c_str.as_ptr()) };
        Ok(())
    }

    pub fn set_field_bytes(&mut self, idx: usize, value: &[u8]) -> Result<()> {
        let len = c_int::try_from(value.len()).map_err(|_| {
            OgrioError::BadArgument(format!(
                "binary value of {} bytes is too large",
                value.len()
            ))
        })?;
        unsafe {
            gdal_sys::OGR_F_SetFieldBinary(self.c_feature, idx as c_int, len, value.as_ptr() as _)
        };
        Ok(())
    }

    pub fn set_field_datetime(&mut self, idx: usize, parts: &DateTimeParts) {
        unsafe {
            gdal_sys::OGR_F_SetFieldDateTimeEx(
                self.c_feature,
                idx as c_int,
                parts.year,
                parts.month,
                parts.day,
                parts.hour,
                parts.minute,
                parts.second,
                parts.tz_flag,
            )
        };
    }

    /// Parses `wkb` and hands the resulting geometry to the feature.
    pub fn set_geometry_wkb(&mut self, wkb: &[u8]) -> Result<()> {
        let len = c_int::try_from(wkb.len()).map_err(|_| {
            OgrioError::BadArgument(format!("geometry of {} bytes is too large", wkb.len()))
        })?;
        let mut c_geom = null_mut();
        let rv = unsafe {
            gdal_sys::OGR_G_CreateFromWkb(wkb.as_ptr() as _, null_mut(), &mut c_geom, len)
        };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "OGR_G_CreateFromWkb",
            });
        }
        // Ownership of the geometry moves to the feature, even on failure.
        let rv = unsafe { gdal_sys::OGR_F_SetGeometryDirectly(self.c_feature, c_geom) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "OGR_F_SetGeometryDirectly",
            });
        }
        Ok(())
    }
}

impl Drop for Feature<'_> {
    fn drop(&mut self) {
        unsafe { gdal_sys::OGR_F_Destroy(self.c_feature) };
    }
}

/// Date and time components as exchanged with OGR.
///
/// `tz_flag` follows OGR: 0 unknown, 1 local time, 100 UTC, and `100 + n` an offset of
/// `n * 15` minutes from UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DateTimeParts {
    pub year: c_int,
    pub month: c_int,
    pub day: c_int,
    pub hour: c_int,
    pub minute: c_int,
    pub second: f32,
    pub tz_flag: c_int,
}

impl DateTimeParts {
    const TZ_UNKNOWN: c_int = 0;
    const TZ_UTC: c_int = 100;

    /// Offset from UTC in minutes, when the value carries an explicit one.
    fn utc_offset_minutes(&self) -> Option<i64> {
        (self.tz_flag >= 2).then(|| i64::from(self.tz_flag - Self::TZ_UTC) * 15)
    }

    fn date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32)
    }

    /// Milliseconds since midnight.
    pub fn millis_of_day(&self) -> i32 {
        let millis = (f64::from(self.second) * 1000.0).round() as i32;
        self.hour * 3_600_000 + self.minute * 60_000 + millis
    }

    /// Days since 1970-01-01.
    pub fn days_since_epoch(&self) -> Option<i32> {
        self.date()
            .map(|date| date.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
    }

    /// Milliseconds since the epoch; values with an explicit offset are normalized to UTC.
    pub fn epoch_millis(&self) -> Option<i64> {
        let days = i64::from(self.days_since_epoch()?);
        let local = days * MILLIS_PER_DAY + i64::from(self.millis_of_day());
        Some(local - self.utc_offset_minutes().unwrap_or(0) * 60_000)
    }

    pub fn from_days_since_epoch(days: i32) -> Option<Self> {
        let date = NaiveDate::from_num_days_from_ce_opt(days.checked_add(EPOCH_DAYS_FROM_CE)?)?;
        Some(DateTimeParts {
            year: date.year(),
            month: date.month() as c_int,
            day: date.day() as c_int,
            ..Default::default()
        })
    }

    pub fn from_millis_of_day(millis: i32) -> Option<Self> {
        let time = NaiveTime::from_num_seconds_from_midnight_opt(
            u32::try_from(millis / 1000).ok()?,
            u32::try_from((millis % 1000) * 1_000_000).ok()?,
        )?;
        Some(DateTimeParts {
            hour: time.hour() as c_int,
            minute: time.minute() as c_int,
            second: time.second() as f32 + (millis % 1000) as f32 / 1000.0,
            ..Default::default()
        })
    }

    /// Components of `millis` since the epoch, flagged as UTC when `utc` is set.
    pub fn from_epoch_millis(millis: i64, utc: bool) -> Option<Self> {
        let dt = DateTime::from_timestamp_millis(millis)?.naive_utc();
        let sub_millis = dt.and_utc().timestamp_subsec_millis();
        Some(DateTimeParts {
            year: dt.year(),
            month: dt.month() as c_int,
            day: dt.day() as c_int,
            hour: dt.hour() as c_int,
            minute: dt.minute() as c_int,
            second: dt.second() as f32 + sub_millis as f32 / 1000.0,
            tz_flag: if utc { Self::TZ_UTC } else { Self::TZ_UNKNOWN },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_conversion() {
        let epoch = DateTimeParts {
            year: 1970,
            month: 1,
            day: 1,
            ..Default::default()
        };
        assert_eq!(epoch.days_since_epoch(), Some(0));

        let parts = DateTimeParts::from_days_since_epoch(19_000).unwrap();
        assert_eq!((parts.year, parts.month, parts.day), (2022, 1, 8));
        assert_eq!(parts.days_since_epoch(), Some(19_000));

        let invalid = DateTimeParts {
            year: 2021,
            month: 2,
            day: 30,
            ..Default::default()
        };
        assert_eq!(invalid.days_since_epoch(), None);
    }

    #[test]
    fn test_time_conversion() {
        let parts = DateTimeParts::from_millis_of_day(45_296_789).unwrap();
        assert_eq!((parts.hour, parts.minute), (12, 34));
        assert_eq!(parts.millis_of_day(), 45_296_789);
        assert!(DateTimeParts::from_millis_of_day(-1).is_none());
    }

    #[test]
    fn test_datetime_offsets() {
        // 2020-06-15T12:00:00+02:00
        let offset = DateTimeParts {
            year: 2020,
            month: 6,
            day: 15,
            hour: 12,
            minute: 0,
            second: 0.0,
            tz_flag: 108,
        };
        let utc = DateTimeParts {
            hour: 10,
            tz_flag: 100,
            ..offset
        };
        assert_eq!(offset.epoch_millis(), utc.epoch_millis());
        assert_eq!(utc.epoch_millis(), Some(1_592_215_200_000));

        let naive = DateTimeParts { tz_flag: 0, ..utc };
        assert_eq!(naive.epoch_millis(), utc.epoch_millis());
    }

    #[test]
    fn test_epoch_millis_round_trip() {
        let millis = 1_592_215_200_123;
        let parts = DateTimeParts::from_epoch_millis(millis, true).unwrap();
        assert_eq!(parts.tz_flag, 100);
        assert_eq!(parts.epoch_millis(), Some(millis));

        let before_epoch = DateTimeParts::from_epoch_millis(-86_400_500, false).unwrap();
        assert_eq!((before_epoch.year, before_epoch.month, before_epoch.day), (1969, 12, 30));
        assert_eq!(before_epoch.epoch_millis(), Some(-86_400_500));
    }
}
