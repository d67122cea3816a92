use std::ffi::{c_int, CString};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::ptr::{self, null_mut};

use gdal_sys::{GDALDatasetH, OGRErr};

use crate::cpl::CslStringList;
use crate::driver::{DriverCapabilities, DriverManager, _register_drivers, Driver};
use crate::error_stack::ErrorScope;
use crate::errors::*;
use crate::options::{DatasetOptions, GdalOpenFlags};
use crate::spatial_ref::SpatialRef;
use crate::utils::{_is_virtual_path, _last_null_pointer_err, _path_to_c_string};
use crate::vector::{GeometryType, Layer};

/// Wrapper around a [`GDALDataset`][GDALDataset] opened as a vector dataset.
///
/// The dataset is closed when dropped, or explicitly with [`close`](Dataset::close). Every
/// operation on a closed dataset fails with [`OgrioError::ClosedResource`].
///
/// [GDALDataset]: https://gdal.org/api/gdaldataset_cpp.html#_CPPv411GDALDataset
#[derive(Debug)]
pub struct Dataset {
    c_dataset: GDALDatasetH,
    path: String,
}

// GDAL Docs state: The returned dataset should only be accessed by one thread at a time.
// See: https://gdal.org/api/raster_c_api.html#_CPPv48GDALOpenPKc10GDALAccess
unsafe impl Send for Dataset {}

/// Selects the layer an operation works on.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LayerSelector {
    /// The only layer of the dataset; datasets with several layers are ambiguous.
    #[default]
    Unspecified,
    Name(String),
    Index(usize),
}

impl From<&str> for LayerSelector {
    fn from(name: &str) -> Self {
        LayerSelector::Name(name.to_string())
    }
}

impl From<String> for LayerSelector {
    fn from(name: String) -> Self {
        LayerSelector::Name(name)
    }
}

impl From<usize> for LayerSelector {
    fn from(index: usize) -> Self {
        LayerSelector::Index(index)
    }
}

/// Parameters used to create a new layer, see [`Dataset::create_layer`].
#[derive(Debug, Default)]
pub struct LayerOptions<'a> {
    pub name: &'a str,
    pub srs: Option<&'a SpatialRef>,
    pub ty: GeometryType,
    /// Driver specific layer creation options.
    pub options: Option<&'a CslStringList>,
}

impl Dataset {
    /// Returns the wrapped C pointer, NULL once the dataset is closed.
    ///
    /// # Safety
    /// This method returns a raw C pointer
    pub unsafe fn c_dataset(&self) -> GDALDatasetH {
        self.c_dataset
    }

    fn handle(&self) -> Result<GDALDatasetH> {
        if self.c_dataset.is_null() {
            return Err(OgrioError::ClosedResource {
                resource: "dataset",
            });
        }
        Ok(self.c_dataset)
    }

    /// Opens a vector dataset read-only, letting GDAL pick the driver.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Dataset> {
        Self::open_ex(path, DatasetOptions::default())
    }

    /// Opens a vector dataset with extended options.
    ///
    /// A dataset that cannot be found fails with [`OgrioError::DatasetNotFound`]; one that
    /// exists but that no (allowed) driver recognizes fails with
    /// [`OgrioError::UnsupportedDriver`].
    pub fn open_ex<P: AsRef<Path>>(path: P, options: DatasetOptions) -> Result<Dataset> {
        let path = path.as_ref();
        _register_drivers();
        let c_path = _path_to_c_string(path)?;

        let mut c_drivers = CslStringList::new();
        if let Some(drivers) = options.allowed_drivers {
            for name in drivers {
                DriverManager::vector_driver(name, DriverCapabilities::READ)?;
                c_drivers.add_string(name)?;
            }
        }
        let c_open_options = match options.open_options {
            Some(pairs) => CslStringList::from_pairs(pairs)?,
            None => CslStringList::new(),
        };
        let flags = options.open_flags
            | GdalOpenFlags::GDAL_OF_VECTOR
            | GdalOpenFlags::GDAL_OF_VERBOSE_ERROR;

        let scope = ErrorScope::new();
        let c_dataset = unsafe {
            gdal_sys::GDALOpenEx(
                c_path.as_ptr(),
                flags.bits(),
                c_drivers.as_const_ptr(),
                c_open_options.as_const_ptr(),
                ptr::null(),
            )
        };
        if c_dataset.is_null() {
            return Err(scope.failure("GDALOpenEx", |_, msg| {
                open_error(path, options.allowed_drivers, msg)
            }));
        }
        log::debug!("opened dataset '{}'", path.display());
        Ok(Dataset {
            c_dataset,
            path: path.display().to_string(),
        })
    }

    /// Creates a new Dataset by wrapping a C pointer
    ///
    /// # Safety
    /// This method operates on a raw C pointer
    pub(crate) unsafe fn from_c_dataset(c_dataset: GDALDatasetH, path: &Path) -> Dataset {
        Dataset {
            c_dataset,
            path: path.display().to_string(),
        }
    }

    /// The path or URI the dataset was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.c_dataset.is_null()
    }

    /// Flushes and closes the dataset. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.c_dataset.is_null() {
            return Ok(());
        }
        let c_dataset = std::mem::replace(&mut self.c_dataset, null_mut());
        let scope = ErrorScope::new();

        #[cfg(any(all(major_is_3, minor_ge_7), major_ge_4))]
        {
            let rv = unsafe { gdal_sys::GDALClose(c_dataset) };
            if rv != gdal_sys::CPLErr::CE_None {
                return Err(scope.native_failure("GDALClose"));
            }
        }
        #[cfg(not(any(all(major_is_3, minor_ge_7), major_ge_4)))]
        {
            unsafe { gdal_sys::GDALClose(c_dataset) };
        }

        scope.check()?;
        Ok(())
    }

    /// The driver that opened or created the dataset.
    pub fn driver(&self) -> Result<Driver> {
        let c_driver = unsafe { gdal_sys::GDALGetDatasetDriver(self.handle()?) };
        if c_driver.is_null() {
            return Err(_last_null_pointer_err("GDALGetDatasetDriver"));
        }
        Ok(unsafe { Driver::from_c_driver(c_driver) })
    }

    pub fn layer_count(&self) -> Result<usize> {
        let count = unsafe { gdal_sys::GDALDatasetGetLayerCount(self.handle()?) };
        Ok(count.max(0) as usize)
    }

    /// Layer at position `idx`.
    pub fn layer(&self, idx: usize) -> Result<Layer<'_>> {
        let c_dataset = self.handle()?;
        let c_layer = match c_int::try_from(idx) {
            Ok(idx) => unsafe { gdal_sys::GDALDatasetGetLayer(c_dataset, idx) },
            Err(_) => null_mut(),
        };
        if c_layer.is_null() {
            unsafe { gdal_sys::CPLErrorReset() };
            return Err(OgrioError::LayerNotFound {
                path: self.path.clone(),
                layer: idx.to_string(),
            });
        }
        Ok(unsafe { Layer::from_c_layer(self, c_layer) })
    }

    /// Layer named `name`.
    pub fn layer_by_name(&self, name: &str) -> Result<Layer<'_>> {
        let c_dataset = self.handle()?;
        let c_name = CString::new(name)?;
        let c_layer = unsafe { gdal_sys::GDALDatasetGetLayerByName(c_dataset, c_name.as_ptr()) };
        if c_layer.is_null() {
            unsafe { gdal_sys::CPLErrorReset() };
            return Err(OgrioError::LayerNotFound {
                path: self.path.clone(),
                layer: name.to_string(),
            });
        }
        Ok(unsafe { Layer::from_c_layer(self, c_layer) })
    }

    /// Iterates over every layer, in dataset order.
    pub fn layers(&self) -> Result<LayerIterator<'_>> {
        Ok(LayerIterator {
            dataset: self,
            idx: 0,
            count: self.layer_count()?,
        })
    }

    /// Resolves `selector` to a layer of this dataset.
    pub fn resolve_layer(&self, selector: &LayerSelector) -> Result<Layer<'_>> {
        match selector {
            LayerSelector::Name(name) => self.layer_by_name(name),
            LayerSelector::Index(idx) => self.layer(*idx),
            LayerSelector::Unspecified => match self.layer_count()? {
                1 => self.layer(0),
                0 => Err(OgrioError::LayerNotFound {
                    path: self.path.clone(),
                    layer: "<any>".to_string(),
                }),
                count => Err(OgrioError::AmbiguousLayer {
                    path: self.path.clone(),
                    count,
                }),
            },
        }
    }

    /// Position of the layer named `name`, if any.
    pub fn layer_index(&self, name: &str) -> Result<Option<usize>> {
        Ok(self.layers()?.position(|layer| layer.name() == name))
    }

    /// Creates a new layer.
    ///
    /// ```no_run
    /// # use ogrio::{Dataset, LayerOptions};
    /// # use ogrio::vector::GeometryType;
    /// # let mut dataset: Dataset = unimplemented!();
    /// let layer = dataset.create_layer(LayerOptions {
    ///     name: "regions",
    ///     ty: GeometryType::POLYGON,
    ///     ..Default::default()
    /// })?;
    /// # Ok::<(), ogrio::errors::OgrioError>(())
    /// ```
    pub fn create_layer(&mut self, options: LayerOptions<'_>) -> Result<Layer<'_>> {
        let c_dataset = self.handle()?;
        let c_name = CString::new(options.name)?;
        let c_srs = match options.srs {
            Some(srs) => unsafe { srs.to_c_hsrs() },
            None => null_mut(),
        };
        let c_options = match options.options {
            Some(options) => options.as_ptr(),
            None => null_mut(),
        };
        let c_layer = unsafe {
            gdal_sys::GDALDatasetCreateLayer(
                c_dataset,
                c_name.as_ptr(),
                c_srs,
                options.ty.raw(),
                c_options,
            )
        };
        if c_layer.is_null() {
            return Err(_last_null_pointer_err("GDALDatasetCreateLayer"));
        };
        Ok(unsafe { Layer::from_c_layer(self, c_layer) })
    }

    /// Deletes the layer at position `idx`.
    pub fn delete_layer(&mut self, idx: usize) -> Result<()> {
        let c_dataset = self.handle()?;
        let rv = unsafe { gdal_sys::GDALDatasetDeleteLayer(c_dataset, idx as c_int) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "GDALDatasetDeleteLayer",
            });
        }
        Ok(())
    }

    /// Whether the dataset supports native transactions (`ODsCTransactions`).
    pub fn supports_transactions(&self) -> bool {
        match self.handle() {
            Ok(c_dataset) => unsafe {
                gdal_sys::GDALDatasetTestCapability(c_dataset, c"Transactions".as_ptr()) == 1
            },
            Err(_) => false,
        }
    }

    /// Starts a native transaction.
    ///
    /// Datasets without native transaction support fail with
    /// [`OGRErr::OGRERR_UNSUPPORTED_OPERATION`]; emulated transactions are never used.
    pub fn start_transaction(&mut self) -> Result<Transaction<'_>> {
        let c_dataset = self.handle()?;
        let force = 0;
        let rv = unsafe { gdal_sys::GDALDatasetStartTransaction(c_dataset, force) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "GDALDatasetStartTransaction",
            });
        }
        Ok(Transaction {
            dataset: self,
            rollback_on_drop: true,
        })
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if !self.c_dataset.is_null() {
            unsafe { gdal_sys::GDALClose(self.c_dataset) };
        }
    }
}

/// Maps a failed open to the error kind callers can act on.
fn open_error(path: &Path, allowed_drivers: Option<&[&str]>, msg: String) -> OgrioError {
    let unrecognized = msg.contains("not recognized as");
    if !unrecognized && (_is_virtual_path(path) || !path.exists()) {
        return OgrioError::DatasetNotFound {
            path: path.display().to_string(),
            msg,
        };
    }
    OgrioError::UnsupportedDriver {
        driver: allowed_drivers
            .map(|drivers| drivers.join(","))
            .unwrap_or_else(|| "<auto>".to_string()),
        msg,
    }
}

pub struct LayerIterator<'a> {
    dataset: &'a Dataset,
    idx: usize,
    count: usize,
}

impl<'a> Iterator for LayerIterator<'a> {
    type Item = Layer<'a>;

    #[inline]
    fn next(&mut self) -> Option<Layer<'a>> {
        while self.idx < self.count {
            let idx = self.idx;
            self.idx += 1;
            if let Ok(layer) = self.dataset.layer(idx) {
                return Some(layer);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.idx;
        (0, Some(remaining))
    }
}

/// Represents an in-flight transaction on a dataset.
///
/// It can either be committed by calling [`commit`](Transaction::commit) or rolled back by calling
/// [`rollback`](Transaction::rollback).
///
/// If the transaction is not explicitly committed when it is dropped, it is implicitly rolled
/// back.
///
/// The transaction holds a mutable borrow on the `Dataset` that it was created from; the dataset
/// is reached through the `Deref` implementations meanwhile.
#[derive(Debug)]
pub struct Transaction<'a> {
    dataset: &'a mut Dataset,
    rollback_on_drop: bool,
}

impl Transaction<'_> {
    /// Commits this transaction.
    pub fn commit(mut self) -> Result<()> {
        self.rollback_on_drop = false;
        let rv = unsafe { gdal_sys::GDALDatasetCommitTransaction(self.dataset.handle()?) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "GDALDatasetCommitTransaction",
            });
        }
        Ok(())
    }

    /// Rolls back the dataset to its state before the start of this transaction.
    pub fn rollback(mut self) -> Result<()> {
        self.rollback_on_drop = false;
        let rv = unsafe { gdal_sys::GDALDatasetRollbackTransaction(self.dataset.handle()?) };
        if rv != OGRErr::OGRERR_NONE {
            return Err(OgrioError::OgrError {
                err: rv,
                method_name: "GDALDatasetRollbackTransaction",
            });
        }
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = Dataset;

    fn deref(&self) -> &Self::Target {
        self.dataset
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.dataset
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.rollback_on_drop && !self.dataset.is_closed() {
            // Errors cannot be reported from drop.
            unsafe { gdal_sys::GDALDatasetRollbackTransaction(self.dataset.c_dataset) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixture;

    #[test]
    fn test_open_and_resolve() {
        let dataset = Dataset::open(fixture("regions.geojson")).unwrap();
        assert_eq!(dataset.layer_count().unwrap(), 1);
        let layer = dataset.resolve_layer(&LayerSelector::Unspecified).unwrap();
        assert_eq!(layer.name(), "regions");
        assert!(dataset.resolve_layer(&"regions".into()).is_ok());
        assert!(matches!(
            dataset.resolve_layer(&"nope".into()),
            Err(OgrioError::LayerNotFound { layer, .. }) if layer == "nope"
        ));
        assert!(matches!(
            dataset.resolve_layer(&LayerSelector::Index(3)),
            Err(OgrioError::LayerNotFound { .. })
        ));
    }

    #[test]
    fn test_open_missing() {
        let err = Dataset::open(fixture("does-not-exist.gpkg")).unwrap_err();
        assert!(matches!(err, OgrioError::DatasetNotFound { .. }), "{err:?}");
    }

    #[test]
    fn test_open_unrecognized() {
        let err = Dataset::open(fixture("not-vector.dat")).unwrap_err();
        assert!(matches!(err, OgrioError::UnsupportedDriver { .. }), "{err:?}");
    }

    #[test]
    fn test_open_with_disallowed_driver() {
        let options = DatasetOptions {
            allowed_drivers: Some(&["GPKG"]),
            ..Default::default()
        };
        let err = Dataset::open_ex(fixture("regions.geojson"), options).unwrap_err();
        assert!(matches!(err, OgrioError::UnsupportedDriver { .. }), "{err:?}");
    }

    #[test]
    fn test_closed_dataset() {
        let mut dataset = Dataset::open(fixture("regions.geojson")).unwrap();
        dataset.close().unwrap();
        assert!(dataset.is_closed());
        assert!(matches!(
            dataset.layer_count(),
            Err(OgrioError::ClosedResource { resource: "dataset" })
        ));
        dataset.close().unwrap();
    }
}
