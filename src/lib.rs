//! Vectorized access to [OGR](https://gdal.org/) vector data through Arrow arrays.
//!
//! Layers are read into whole columns at once: one Arrow array per attribute field, a binary
//! array of ISO WKB geometries and, on request, the feature ids. Writing goes the other way,
//! from a [`ColumnarBatch`] to a new or existing layer.
//!
//! ## Use
//!
//! ```no_run
//! use ogrio::read::{read_arrays, ReadOptions};
//!
//! let options = ReadOptions {
//!     where_clause: Some("pop > 1000000".to_string()),
//!     ..Default::default()
//! };
//! let result = read_arrays("fixtures/regions.geojson", &options).unwrap();
//! for name in result.batch.column_names() {
//!     println!("{name}: {:?}", result.batch.column(name).map(|c| c.data_type()));
//! }
//! let record_batch = result.batch.into_record_batch().unwrap();
//! println!("{} rows", record_batch.num_rows());
//! ```
//!
//! Every operation captures the native error stack for its duration (see [`error_stack`]):
//! native failures come back as [`errors::OgrioError`] values and native warnings are logged
//! through the `log` facade and returned with the result.

#![crate_name = "ogrio"]
#![crate_type = "lib"]

pub mod batch;
pub mod config;
pub mod cpl;
mod dataset;
mod driver;
pub mod error_stack;
pub mod errors;
mod options;
pub mod read;
pub mod schema;
pub mod spatial_ref;
pub mod types;
mod utils;
pub mod vector;
pub mod version;
pub mod write;

#[cfg(test)]
mod test_utils;

pub use batch::ColumnarBatch;
pub use dataset::{Dataset, LayerIterator, LayerOptions, LayerSelector, Transaction};
pub use driver::{
    detect_write_driver, list_drivers, list_vector_drivers, Driver, DriverCapabilities,
    DriverInfo, DriverIterator, DriverManager,
};
pub use options::{DatasetOptions, GdalOpenFlags};
pub use read::{read_arrays, read_bounds, BatchReader, BoundingBox, ReadOptions};
pub use schema::{list_layers, read_info, LayerInfo, LayerSchema};
pub use vector::{GeometryType, Layer};
pub use write::{write_arrays, WriteMode, WriteOptions};
