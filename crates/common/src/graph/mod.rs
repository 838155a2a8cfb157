//! Dynamic object graph carried by envelopes.
//!
//! Objects and collections are shared nodes with pointer identity; arrays,
//! maps and primitives are plain values. Graphs may contain cycles.

mod eq;
pub mod shape;
pub mod value;

pub use shape::{FieldAccess, FieldDescriptor, Shape, ShapeBuilder, ShapeRegistry, PLACEHOLDER_SHAPE};
pub use value::{CollectionRef, ObjectRef, Value};
