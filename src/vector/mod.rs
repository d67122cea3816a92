//! Vector layers and features
//!
//! Thin wrappers over the OGR layer, feature and field definition handles. They are the
//! building blocks of the columnar [`read`](crate::read) and [`write`](crate::write) paths and
//! are rarely needed directly.

mod defn;
mod feature;
mod geometry;
mod layer;

pub use defn::{FieldDef, FieldDefn};
pub use feature::{DateTimeParts, Feature};
pub use geometry::GeometryType;
pub use layer::{Layer, LayerCaps};
