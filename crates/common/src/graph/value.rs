use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::shape::Shape;
use crate::errors::GraphError;

/// A node of a task graph.
///
/// `Array` and `Map` are plain values: copying one copies its contents.
/// `Object` and `Collection` are shared nodes: clones point at the same
/// storage, and that storage is what reconciliation preserves.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(ObjectRef),
    Collection(CollectionRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or a primitive.
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
        )
    }

    /// Pointer identity of shared nodes; `None` for plain values.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Object(object) => Some(object.identity()),
            Value::Collection(collection) => Some(collection.identity()),
            _ => None,
        }
    }

    /// Identity comparison for shared nodes, structural comparison otherwise.
    pub fn same(&self, other: &Value) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self == other,
            _ => false,
        }
    }

    pub fn kind_name(&self) -> String {
        match self {
            Value::Null => "null".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "string".into(),
            Value::Array(_) => "array".into(),
            Value::Map(_) => "map".into(),
            Value::Object(object) => object.shape_name().to_string(),
            Value::Collection(_) => "collection".into(),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&CollectionRef> {
        match self {
            Value::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Array(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Value::Map(value)
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Value::Object(value)
    }
}

impl From<CollectionRef> for Value {
    fn from(value: CollectionRef) -> Self {
        Value::Collection(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

struct ObjectNode {
    shape: Arc<Shape>,
    values: RwLock<Vec<Value>>,
}

/// Shared handle to an object node. Locks are only held for the duration of
/// a single field access, so cyclic graphs can be walked without deadlocks.
#[derive(Clone)]
pub struct ObjectRef(Arc<ObjectNode>);

impl ObjectRef {
    /// New object with every field set to null.
    pub fn new(shape: Arc<Shape>) -> Self {
        let values = vec![Value::Null; shape.fields().len()];
        ObjectRef(Arc::new(ObjectNode {
            shape,
            values: RwLock::new(values),
        }))
    }

    pub fn placeholder() -> Self {
        Self::new(Shape::placeholder())
    }

    pub fn shape(&self) -> &Arc<Shape> {
        &self.0.shape
    }

    pub fn shape_name(&self) -> &str {
        self.0.shape.name()
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Construction-time assignment; ignores field access.
    pub fn init(self, field: &str, value: impl Into<Value>) -> Result<Self, GraphError> {
        let index = self.index_of(field)?;
        self.set_at(index, value.into());
        Ok(self)
    }

    pub fn get(&self, field: &str) -> Result<Value, GraphError> {
        let index = self.index_of(field)?;
        Ok(self.get_at(index))
    }

    /// Assignment through the shape's declared capabilities.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<(), GraphError> {
        let index = self.index_of(field)?;
        if !self.0.shape.fields()[index].access.is_writable() {
            return Err(GraphError::NotWritable {
                shape: self.shape_name().to_string(),
                field: field.to_string(),
            });
        }
        self.set_at(index, value.into());
        Ok(())
    }

    /// Value of the identifier field, if the shape declares one.
    pub fn identifier(&self) -> Option<Value> {
        self.0.shape.identifier_index().map(|index| self.get_at(index))
    }

    pub(crate) fn get_at(&self, index: usize) -> Value {
        self.read().get(index).cloned().unwrap_or_default()
    }

    pub(crate) fn set_at(&self, index: usize, value: Value) {
        if let Some(slot) = self.write().get_mut(index) {
            *slot = value;
        }
    }

    pub(crate) fn values(&self) -> Vec<Value> {
        self.read().clone()
    }

    fn index_of(&self, field: &str) -> Result<usize, GraphError> {
        self.0
            .shape
            .index_of(field)
            .ok_or_else(|| GraphError::UnknownField {
                shape: self.shape_name().to_string(),
                field: field.to_string(),
            })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.0.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.0.values.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:x}", self.shape_name(), self.identity())
    }
}

/// Shared, ordered, identity-bearing collection of values.
#[derive(Clone)]
pub struct CollectionRef(Arc<RwLock<Vec<Value>>>);

impl CollectionRef {
    pub fn new(items: Vec<Value>) -> Self {
        CollectionRef(Arc::new(RwLock::new(items)))
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &CollectionRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.read().get(index).cloned()
    }

    pub fn first(&self) -> Option<Value> {
        self.get(0)
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.write().push(value.into());
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let mut items = self.write();
        (index < items.len()).then(|| items.remove(index))
    }

    /// Snapshot of the current elements.
    pub fn items(&self) -> Vec<Value> {
        self.read().clone()
    }

    pub(crate) fn replace_items(&self, items: Vec<Value>) {
        *self.write() = items;
    }

    /// Keeps the elements whose position satisfies `keep`.
    pub(crate) fn retain_positions(&self, mut keep: impl FnMut(usize) -> bool) {
        let mut items = self.write();
        let mut position = 0;
        items.retain(|_| {
            let kept = keep(position);
            position += 1;
            kept
        });
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Value>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Value>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Ok(items) => write!(f, "Collection#{:x}(len={})", self.identity(), items.len()),
            Err(_) => write!(f, "Collection#{:x}", self.identity()),
        }
    }
}
