//! Identity-preserving deep reconciliation.
//!
//! Copies the observable state of a freshly decoded graph (the worker's
//! result) into the graph the caller still holds. Nodes of the target graph
//! keep their identity; nodes that only exist in the source are adopted, and
//! once matching is complete every reference to a matched source node is
//! rewritten to the matching target.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::trace;

use crate::errors::ReconcileError;
use crate::graph::{CollectionRef, FieldDescriptor, ObjectRef, Value};

/// Reconciliation engine. The identity cache maps a source node to the target
/// node it was matched with and lives for exactly one `reconcile` call.
#[derive(Debug, Default)]
pub struct Reconciler {
    matched: HashMap<usize, Value>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.matched.clear();
    }

    /// Folds `source` into `target`. Both must be objects of the same shape or
    /// both collections. Fields copied before an error stay copied.
    pub fn reconcile(&mut self, source: &Value, target: &Value) -> Result<(), ReconcileError> {
        self.reset();
        let result = match (source, target) {
            (Value::Object(s), Value::Object(t)) => self.copy_object(s, t),
            (Value::Collection(s), Value::Collection(t)) => self.copy_collection(s, t),
            _ => Err(mismatch(source, target)),
        };
        self.relink(target);
        trace!(matched = self.matched.len(), ok = result.is_ok(), "reconciliation finished");
        result
    }

    fn copy_object(&mut self, source: &ObjectRef, target: &ObjectRef) -> Result<(), ReconcileError> {
        if source.shape_name() != target.shape_name() {
            return Err(ReconcileError::ShapeMismatch {
                source_kind: source.shape_name().to_string(),
                target_kind: target.shape_name().to_string(),
            });
        }
        self.matched
            .insert(source.identity(), Value::Object(target.clone()));
        if source.ptr_eq(target) {
            return Ok(());
        }

        let shape = target.shape().clone();
        for (index, field) in shape.fields().iter().enumerate() {
            if !field.access.is_readable() {
                continue;
            }
            let Some(source_index) = source.shape().index_of(&field.name) else {
                continue;
            };
            let source_value = source.get_at(source_index);
            let target_value = target.get_at(index);
            self.copy_field(target, index, field, source_value, target_value)?;
        }
        Ok(())
    }

    fn copy_field(
        &mut self,
        target: &ObjectRef,
        index: usize,
        field: &FieldDescriptor,
        source_value: Value,
        target_value: Value,
    ) -> Result<(), ReconcileError> {
        match (&source_value, &target_value) {
            (Value::Collection(s), Value::Collection(t)) => {
                return match self.cached(s.identity()) {
                    Some(cached) => assign_cached(target, index, field, cached, &target_value),
                    None => self.copy_collection(s, t),
                };
            }
            (Value::Object(s), Value::Object(t)) => {
                return match self.cached(s.identity()) {
                    Some(cached) => assign_cached(target, index, field, cached, &target_value),
                    None => self.copy_object(s, t),
                };
            }
            (Value::Object(_), Value::Collection(_)) | (Value::Collection(_), Value::Object(_)) => {
                return Err(mismatch(&source_value, &target_value));
            }
            _ => {}
        }

        if !field.access.is_writable() {
            return Ok(());
        }

        match (source_value, target_value) {
            (source_value, target_value) if source_value.is_simple() || target_value.is_null() => {
                let adopted = self.adopt(source_value);
                target.set_at(index, adopted);
                Ok(())
            }
            (Value::Map(s), Value::Map(t)) => {
                let merged = self.copy_map(s, &t)?;
                target.set_at(index, Value::Map(merged));
                Ok(())
            }
            (Value::Array(s), Value::Array(t)) => {
                let merged = self.copy_array(s, &t)?;
                target.set_at(index, Value::Array(merged));
                Ok(())
            }
            (Value::Object(_), _) => Err(ReconcileError::NoTarget {
                shape: target.shape_name().to_string(),
                field: field.name.clone(),
            }),
            (source_value, target_value) => Err(mismatch(&source_value, &target_value)),
        }
    }

    fn copy_collection(
        &mut self,
        source: &CollectionRef,
        target: &CollectionRef,
    ) -> Result<(), ReconcileError> {
        self.matched
            .insert(source.identity(), Value::Collection(target.clone()));
        if source.ptr_eq(target) {
            return Ok(());
        }

        let original_len = target.len();
        let mut kept = vec![false; original_len];

        for (position, item) in source.items().into_iter().enumerate() {
            let current = target.items();

            let Value::Object(object) = &item else {
                match current.get(position) {
                    Some(existing) if position < original_len && *existing == item => {
                        kept[position] = true;
                    }
                    _ => target.push(self.adopt(item)),
                }
                continue;
            };

            if let Some(cached) = self.cached(object.identity()) {
                match current.iter().position(|existing| existing.same(&cached)) {
                    Some(found) if found < original_len => kept[found] = true,
                    Some(_) => {}
                    None => target.push(cached),
                }
                continue;
            }

            if let Some(found) = find_by_identifier(&current, object) {
                if let Some(existing) = current[found].as_object() {
                    self.copy_object(object, existing)?;
                }
                if found < original_len {
                    kept[found] = true;
                }
                continue;
            }

            if let Some(Value::Object(existing)) = current.get(position) {
                if position < original_len
                    && existing.shape_name() == object.shape_name()
                    && existing.identifier() == object.identifier()
                {
                    self.copy_object(object, existing)?;
                    kept[position] = true;
                    continue;
                }
            }

            target.push(self.adopt(item));
        }

        target.retain_positions(|position| position >= original_len || kept[position]);
        Ok(())
    }

    fn copy_map(
        &mut self,
        source: BTreeMap<String, Value>,
        target: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, ReconcileError> {
        let mut merged = BTreeMap::new();
        for (key, value) in source {
            let value = self.merge_entry(value, target.get(&key))?;
            merged.insert(key, value);
        }
        Ok(merged)
    }

    fn copy_array(&mut self, source: Vec<Value>, target: &[Value]) -> Result<Vec<Value>, ReconcileError> {
        source
            .into_iter()
            .enumerate()
            .map(|(position, value)| self.merge_entry(value, target.get(position)))
            .collect()
    }

    /// One entry of a value-typed mapping: a fresh object reconciled into the
    /// same-shaped object under the same key, anything else adopted.
    fn merge_entry(&mut self, value: Value, existing: Option<&Value>) -> Result<Value, ReconcileError> {
        if let (Value::Object(object), Some(Value::Object(existing))) = (&value, existing) {
            if self.cached(object.identity()).is_none() && object.shape_name() == existing.shape_name() {
                self.copy_object(object, existing)?;
                return Ok(Value::Object(existing.clone()));
            }
        }
        Ok(self.adopt(value))
    }

    /// Takes a source value into the target graph as-is. Its references to
    /// source nodes are redirected by [`Reconciler::relink`] once matching is
    /// over, so nodes met here stay available for identifier matching.
    fn adopt(&self, value: Value) -> Value {
        match value.identity().and_then(|identity| self.cached(identity)) {
            Some(cached) => cached,
            None => value,
        }
    }

    /// Walks the target graph and points every reference to a matched source
    /// node at its target. Iterative so long chains cannot overflow the stack.
    fn relink(&self, root: &Value) {
        let mut visited = HashSet::new();
        let mut pending = vec![root.clone()];
        while let Some(value) = pending.pop() {
            match value {
                Value::Object(object) => {
                    if !visited.insert(object.identity()) {
                        continue;
                    }
                    for (index, current) in object.values().into_iter().enumerate() {
                        if current.is_simple() {
                            continue;
                        }
                        let (redirected, changed) = self.redirect(current);
                        if changed {
                            object.set_at(index, redirected.clone());
                        }
                        pending.push(redirected);
                    }
                }
                Value::Collection(collection) => {
                    if !visited.insert(collection.identity()) {
                        continue;
                    }
                    let mut changed = false;
                    let items: Vec<Value> = collection
                        .items()
                        .into_iter()
                        .map(|item| {
                            let (item, moved) = self.redirect(item);
                            changed |= moved;
                            item
                        })
                        .collect();
                    if changed {
                        collection.replace_items(items.clone());
                    }
                    pending.extend(items);
                }
                Value::Array(items) => pending.extend(items),
                Value::Map(map) => pending.extend(map.into_values()),
                _ => {}
            }
        }
    }

    /// The value to store in place of `value`, and whether it differs.
    fn redirect(&self, value: Value) -> (Value, bool) {
        match value {
            Value::Object(_) | Value::Collection(_) => {
                match value.identity().and_then(|identity| self.cached(identity)) {
                    Some(cached) if !cached.same(&value) => (cached, true),
                    _ => (value, false),
                }
            }
            Value::Array(items) => {
                let mut changed = false;
                let items = items
                    .into_iter()
                    .map(|item| {
                        let (item, moved) = self.redirect(item);
                        changed |= moved;
                        item
                    })
                    .collect();
                (Value::Array(items), changed)
            }
            Value::Map(map) => {
                let mut changed = false;
                let map = map
                    .into_iter()
                    .map(|(key, item)| {
                        let (item, moved) = self.redirect(item);
                        changed |= moved;
                        (key, item)
                    })
                    .collect();
                (Value::Map(map), changed)
            }
            simple => (simple, false),
        }
    }

    fn cached(&self, identity: usize) -> Option<Value> {
        self.matched.get(&identity).cloned()
    }
}

/// Convenience wrapper around a one-off [`Reconciler`].
pub fn reconcile(source: &Value, target: &Value) -> Result<(), ReconcileError> {
    Reconciler::new().reconcile(source, target)
}

fn assign_cached(
    target: &ObjectRef,
    index: usize,
    field: &FieldDescriptor,
    cached: Value,
    current: &Value,
) -> Result<(), ReconcileError> {
    if cached.same(current) {
        return Ok(());
    }
    if !field.access.is_writable() {
        return Err(ReconcileError::NotWritable {
            value_shape: cached.kind_name(),
            target_shape: target.shape_name().to_string(),
            field: field.name.clone(),
        });
    }
    target.set_at(index, cached);
    Ok(())
}

fn find_by_identifier(items: &[Value], object: &ObjectRef) -> Option<usize> {
    let id = object.identifier().filter(|id| !id.is_null())?;
    items.iter().position(|item| {
        item.as_object().is_some_and(|candidate| {
            candidate.shape_name() == object.shape_name() && candidate.identifier().as_ref() == Some(&id)
        })
    })
}

fn mismatch(source: &Value, target: &Value) -> ReconcileError {
    ReconcileError::ShapeMismatch {
        source_kind: source.kind_name(),
        target_kind: target.kind_name(),
    }
}
