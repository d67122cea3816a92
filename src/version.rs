//! GDAL version inspection
//!
//! ```rust, no_run
//! use ogrio::version::VersionInfo;
//! println!("{}", VersionInfo::VERSION_SUMMARY);
//! ```
//! ```text,
//! GDAL 3.8.4, released 2024/02/08
//! ```

use std::ffi::CStr;
use std::fmt::{Debug, Display, Formatter};

use crate::errors::*;
use crate::utils::_string;

/// Calls `GDALVersionInfo` with `key`, one of `VERSION_NUM`, `RELEASE_DATE`, `RELEASE_NAME`,
/// `--version`, `LICENSE` or `BUILD_INFO`.
///
/// See [`VersionInfo`] for a typed selector.
pub fn version_info(key: &str) -> Result<String> {
    let c_key = std::ffi::CString::new(key)?;
    Ok(_string(unsafe { gdal_sys::GDALVersionInfo(c_key.as_ptr()) }))
}

/// Runtime GDAL version as `(major, minor, revision)`.
pub fn gdal_version() -> (u32, u32, u32) {
    let num = VersionInfo::VERSION_NUM
        .to_string()
        .parse::<u32>()
        .unwrap_or_default();
    (num / 1_000_000, num / 10_000 % 100, num / 100 % 100)
}

/// Selector for the properties of the GDAL version information.
///
/// `Display` fetches the value from GDAL; `Debug` on [`VERSION_REPORT`](Self::VERSION_REPORT)
/// renders every property except the license.
#[allow(non_camel_case_types)]
#[non_exhaustive]
#[derive(Copy, Clone, Default)]
pub enum VersionInfo {
    /// One line summary, e.g. `GDAL 3.8.4, released 2024/02/08`.
    #[default]
    VERSION_SUMMARY,
    /// `GDAL_VERSION_NUM` as a string, e.g. `3080400`.
    VERSION_NUM,
    /// `GDAL_RELEASE_DATE` as a string, e.g. `20240208`.
    RELEASE_DATE,
    /// `GDAL_RELEASE_NAME`, e.g. `3.8.4`.
    RELEASE_NAME,
    /// Build time options as `NAME=VALUE` lines.
    BUILD_INFO,
    /// All of the above in one multiline report.
    VERSION_REPORT,
}

use VersionInfo::*;

impl VersionInfo {
    pub fn name(&self) -> &'static str {
        match self {
            VERSION_SUMMARY => "VERSION_SUMMARY",
            VERSION_NUM => "VERSION_NUM",
            RELEASE_DATE => "RELEASE_DATE",
            RELEASE_NAME => "RELEASE_NAME",
            BUILD_INFO => "BUILD_INFO",
            VERSION_REPORT => "VERSION_REPORT",
        }
    }

    fn gdal_key(&self) -> Option<&'static CStr> {
        match self {
            VERSION_SUMMARY => Some(c"--version"),
            VERSION_NUM => Some(c"VERSION_NUM"),
            RELEASE_DATE => Some(c"RELEASE_DATE"),
            RELEASE_NAME => Some(c"RELEASE_NAME"),
            BUILD_INFO => Some(c"BUILD_INFO"),
            VERSION_REPORT => None,
        }
    }
}

impl Debug for VersionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VERSION_REPORT => f
                .debug_struct("GDALVersionInfo")
                .field(RELEASE_NAME.name(), &RELEASE_NAME.to_string())
                .field(RELEASE_DATE.name(), &RELEASE_DATE.to_string())
                .field(VERSION_NUM.name(), &VERSION_NUM.to_string())
                .field(BUILD_INFO.name(), &BUILD_INFO)
                .finish(),
            BUILD_INFO => {
                let mut builder = f.debug_struct("");
                let text = BUILD_INFO.to_string();
                for (key, value) in text.lines().filter_map(|l| l.split_once('=')) {
                    builder.field(key, &value);
                }
                builder.finish()
            }
            other => f.debug_tuple(other.name()).field(&other.to_string()).finish(),
        }
    }
}

impl Display for VersionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.gdal_key() {
            Some(key) => f.write_str(&_string(unsafe { gdal_sys::GDALVersionInfo(key.as_ptr()) })),
            None => write!(f, "{self:#?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_summary() {
        let release_date = version_info("RELEASE_DATE").unwrap();
        let release_name = version_info("RELEASE_NAME").unwrap();
        let mut date = release_date.chars();
        let expected = format!(
            "GDAL {}, released {}/{}/{}",
            release_name,
            date.by_ref().take(4).collect::<String>(),
            date.by_ref().take(2).collect::<String>(),
            date.by_ref().take(2).collect::<String>(),
        );
        assert_eq!(VERSION_SUMMARY.to_string(), expected);
    }

    #[test]
    fn test_version_report() {
        let name = RELEASE_NAME.to_string();
        assert!(VERSION_REPORT.to_string().contains(&name));
        let (major, minor, _) = gdal_version();
        assert!(major >= 3);
        assert!(name.starts_with(&format!("{major}.{minor}")));
    }

    #[test]
    fn test_key_with_nul() {
        assert!(version_info("VERSION\0NUM").is_err());
    }
}
