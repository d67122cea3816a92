use std::ffi::CString;
use std::path::{Path, PathBuf};

/// A temporary directory and the path of a file in it.
///
/// The directory is removed, with everything written into it, on drop.
pub struct TempFixture {
    _temp_dir: tempfile::TempDir,
    temp_path: PathBuf,
}

impl TempFixture {
    /// Copies `fixtures/<name>` into a fresh temporary directory.
    pub fn fixture(name: &str) -> Self {
        let staging = Self::empty(name);
        std::fs::copy(fixture(name), &staging.temp_path).unwrap();
        staging
    }

    /// A path named `name` in a fresh temporary directory; the file does not exist.
    pub fn empty(name: &str) -> Self {
        let _temp_dir = tempfile::tempdir().unwrap();
        let temp_path = _temp_dir.path().join(name);
        Self {
            _temp_dir,
            temp_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }
}

impl AsRef<Path> for TempFixture {
    fn as_ref(&self) -> &Path {
        self.path()
    }
}

/// Returns the fully qualified path to `filename` in `${CARGO_MANIFEST_DIR}/fixtures`.
pub fn fixture(filename: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(filename)
}

/// A `/vsimem/` path, unlinked on drop.
pub struct InMemoryFixture {
    path: PathBuf,
}

impl InMemoryFixture {
    pub fn new(filename: &str) -> Self {
        Self {
            path: Path::new("/vsimem").join(filename),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InMemoryFixture {
    fn drop(&mut self) {
        let c_path = CString::new(self.path.to_string_lossy().as_ref()).unwrap();
        unsafe { gdal_sys::VSIUnlink(c_path.as_ptr()) };
    }
}
