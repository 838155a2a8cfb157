use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::errors::RegistryError;

/// Name of the built-in shape used when a worker has no task to answer with.
pub const PLACEHOLDER_SHAPE: &str = "placeholder";

const DEFAULT_IDENTIFIER: &str = "id";

/// Static capability of a field, fixed when the shape is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// Readable and writable after construction.
    Mutable,
    /// Readable, assigned only at construction.
    ReadOnly,
    /// Neither readable nor writable from outside; still serialized.
    Internal,
}

impl FieldAccess {
    pub fn is_readable(self) -> bool {
        !matches!(self, FieldAccess::Internal)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, FieldAccess::Mutable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub access: FieldAccess,
}

/// Descriptor of a structural type: its fields in declaration order and the
/// field used to recognise the same logical entity across graphs.
#[derive(Debug, PartialEq, Eq)]
pub struct Shape {
    name: String,
    fields: Vec<FieldDescriptor>,
    identifier: Option<usize>,
}

impl Shape {
    pub fn builder(name: impl Into<String>) -> ShapeBuilder {
        ShapeBuilder {
            name: name.into(),
            fields: Vec::new(),
            identifier: None,
        }
    }

    pub fn placeholder() -> Arc<Shape> {
        static PLACEHOLDER: OnceLock<Arc<Shape>> = OnceLock::new();
        PLACEHOLDER
            .get_or_init(|| Shape::builder(PLACEHOLDER_SHAPE).build())
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == field)
    }

    pub fn identifier_index(&self) -> Option<usize> {
        self.identifier
    }
}

pub struct ShapeBuilder {
    name: String,
    fields: Vec<FieldDescriptor>,
    identifier: Option<String>,
}

impl ShapeBuilder {
    pub fn field(mut self, name: impl Into<String>, access: FieldAccess) -> Self {
        let name = name.into();
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == name) {
            existing.access = access;
        } else {
            self.fields.push(FieldDescriptor { name, access });
        }
        self
    }

    pub fn mutable(self, name: impl Into<String>) -> Self {
        self.field(name, FieldAccess::Mutable)
    }

    pub fn read_only(self, name: impl Into<String>) -> Self {
        self.field(name, FieldAccess::ReadOnly)
    }

    pub fn internal(self, name: impl Into<String>) -> Self {
        self.field(name, FieldAccess::Internal)
    }

    /// Overrides the identifier field, which otherwise is the field named `id`.
    pub fn identifier(mut self, name: impl Into<String>) -> Self {
        self.identifier = Some(name.into());
        self
    }

    pub fn build(self) -> Arc<Shape> {
        let wanted = self.identifier.as_deref().unwrap_or(DEFAULT_IDENTIFIER);
        let identifier = self.fields.iter().position(|f| f.name == wanted);
        Arc::new(Shape {
            name: self.name,
            fields: self.fields,
            identifier,
        })
    }
}

/// Shapes known to one side of the process boundary. Dispatcher and worker
/// must register the same shapes for the codec to round-trip a task.
#[derive(Debug, Clone)]
pub struct ShapeRegistry {
    shapes: HashMap<String, Arc<Shape>>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        let placeholder = Shape::placeholder();
        let mut shapes = HashMap::new();
        shapes.insert(placeholder.name().to_string(), placeholder);
        Self { shapes }
    }

    pub fn register(&mut self, shape: Arc<Shape>) -> Result<(), RegistryError> {
        let name = shape.name().to_string();
        if self.shapes.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.shapes.insert(name, shape);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Shape>> {
        self.shapes.get(name).cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shapes.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
