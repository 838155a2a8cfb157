//! Wire format of envelopes:
//! `base64(JSON({"nodes": [..], "task": value, "stamps": [..]}))`.
//!
//! Objects and collections live in the `nodes` table, indexed in traversal
//! order; every occurrence in a value is written as `{"$ref": index}`. An
//! unchanged envelope always encodes to the same text.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

use crate::envelope::Envelope;
use crate::errors::CodecError;
use crate::graph::{CollectionRef, ObjectRef, ShapeRegistry, Value};
use crate::stamp::{CustomStamp, ErrorDetails, HandledStamp, Stamp};

const NODES: &str = "nodes";
const TASK: &str = "task";
const STAMPS: &str = "stamps";
const REF: &str = "$ref";
const SHAPE: &str = "$shape";
const FIELDS: &str = "$fields";
const ITEMS: &str = "$items";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireStamp {
    ErrorDetails(ErrorDetails),
    Handled(HandledStamp),
    Custom(CustomStamp),
}

impl WireStamp {
    fn from_stamp(stamp: &Stamp) -> Option<Self> {
        match stamp {
            Stamp::ErrorDetails(details) => Some(WireStamp::ErrorDetails(details.clone())),
            Stamp::Handled(handled) => Some(WireStamp::Handled(handled.clone())),
            Stamp::Custom(custom) => Some(WireStamp::Custom(custom.clone())),
            Stamp::HandledCallback(_) | Stamp::Process(_) => None,
        }
    }

    fn into_stamp(self) -> Stamp {
        match self {
            WireStamp::ErrorDetails(details) => Stamp::ErrorDetails(details),
            WireStamp::Handled(handled) => Stamp::Handled(handled),
            WireStamp::Custom(custom) => Stamp::Custom(custom),
        }
    }
}

/// Envelope codec bound to the shapes known on this side of the boundary.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    shapes: Arc<ShapeRegistry>,
}

impl EnvelopeCodec {
    pub fn new(shapes: Arc<ShapeRegistry>) -> Self {
        Self { shapes }
    }

    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    /// Serializes the task and every transportable stamp.
    pub fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        let mut writer = GraphWriter::default();
        let task = writer.write(envelope.task())?;
        let nodes = writer.finish()?;
        let stamps = envelope
            .stamps()
            .iter()
            .filter_map(WireStamp::from_stamp)
            .collect::<Vec<_>>();

        let mut document = Map::new();
        document.insert(NODES.into(), Json::Array(nodes));
        document.insert(TASK.into(), task);
        document.insert(STAMPS.into(), serde_json::to_value(stamps)?);
        let text = serde_json::to_string(&Json::Object(document))?;
        Ok(general_purpose::STANDARD.encode(text))
    }

    pub fn decode(&self, encoded: &str) -> Result<Envelope, CodecError> {
        let bytes = general_purpose::STANDARD.decode(encoded.trim())?;
        let mut document: Json = serde_json::from_slice(&bytes)?;
        let Some(body) = document.as_object_mut() else {
            return Err(CodecError::Malformed("envelope is not a JSON object".into()));
        };
        let task = body
            .remove(TASK)
            .ok_or_else(|| CodecError::Malformed("missing task".into()))?;
        let nodes = match body.remove(NODES) {
            Some(Json::Array(nodes)) => nodes,
            Some(_) => return Err(CodecError::Malformed("node table is not a list".into())),
            None => Vec::new(),
        };
        let stamps: Vec<WireStamp> = match body.remove(STAMPS) {
            Some(stamps) => serde_json::from_value(stamps)?,
            None => Vec::new(),
        };

        let reader = GraphReader::allocate(&self.shapes, nodes)?;
        let task = reader.read(task)?;
        Ok(Envelope::new(task).with_all(stamps.into_iter().map(WireStamp::into_stamp)))
    }
}

/// Writes every object and collection once into a flat node table and
/// refers to it by index everywhere else, so JSON nesting does not grow
/// with the depth of the graph.
#[derive(Default)]
struct GraphWriter {
    // The registered nodes are kept alive so their addresses cannot be
    // reused while the graph is being written.
    ids: HashMap<usize, u64>,
    pending: Vec<Value>,
}

impl GraphWriter {
    fn write(&mut self, value: &Value) -> Result<Json, CodecError> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number(Number::from(*i)),
            Value::Float(f) => Json::Number(
                Number::from_f64(*f).ok_or_else(|| CodecError::UnrepresentableNumber(f.to_string()))?,
            ),
            Value::Str(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.write(item))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    if key.starts_with('$') {
                        return Err(CodecError::ReservedKey(key.clone()));
                    }
                    out.insert(key.clone(), self.write(item)?);
                }
                Json::Object(out)
            }
            Value::Object(object) => reference(self.register(object.identity(), value)),
            Value::Collection(collection) => reference(self.register(collection.identity(), value)),
        })
    }

    fn register(&mut self, identity: usize, value: &Value) -> u64 {
        if let Some(id) = self.ids.get(&identity) {
            return *id;
        }
        let id = self.pending.len() as u64;
        self.ids.insert(identity, id);
        self.pending.push(value.clone());
        id
    }

    /// Writes the bodies of all registered nodes, in id order. Writing a body
    /// may register further nodes, which are picked up by the same loop.
    fn finish(mut self) -> Result<Vec<Json>, CodecError> {
        let mut nodes = Vec::with_capacity(self.pending.len());
        let mut next = 0;
        while let Some(value) = self.pending.get(next).cloned() {
            nodes.push(self.body(&value)?);
            next += 1;
        }
        Ok(nodes)
    }

    fn body(&mut self, value: &Value) -> Result<Json, CodecError> {
        let mut node = Map::new();
        match value {
            Value::Object(object) => {
                let shape = object.shape().clone();
                let mut fields = Vec::with_capacity(shape.fields().len());
                for (field, current) in shape.fields().iter().zip(object.values()) {
                    fields.push(Json::Array(vec![
                        Json::String(field.name.clone()),
                        self.write(&current)?,
                    ]));
                }
                node.insert(SHAPE.into(), Json::from(shape.name()));
                node.insert(FIELDS.into(), Json::Array(fields));
            }
            Value::Collection(collection) => {
                let items = collection
                    .items()
                    .iter()
                    .map(|item| self.write(item))
                    .collect::<Result<Vec<_>, _>>()?;
                node.insert(ITEMS.into(), Json::Array(items));
            }
            _ => return Err(CodecError::Malformed("only objects and collections are nodes".into())),
        }
        Ok(Json::Object(node))
    }
}

fn reference(id: u64) -> Json {
    let mut node = Map::new();
    node.insert(REF.into(), Json::from(id));
    Json::Object(node)
}

/// Rebuilds a graph from its node table: every node is allocated first, then
/// filled, so references may point anywhere in the table.
struct GraphReader {
    nodes: Vec<Value>,
}

impl GraphReader {
    fn allocate(shapes: &ShapeRegistry, table: Vec<Json>) -> Result<Self, CodecError> {
        let mut bodies = Vec::with_capacity(table.len());
        let mut nodes = Vec::with_capacity(table.len());
        for entry in table {
            let Json::Object(mut entry) = entry else {
                return Err(CodecError::Malformed("node is not a JSON object".into()));
            };
            if let Some(shape_name) = entry.remove(SHAPE) {
                let shape_name = shape_name
                    .as_str()
                    .ok_or_else(|| CodecError::Malformed("shape name is not a string".into()))?;
                let shape = shapes
                    .get(shape_name)
                    .ok_or_else(|| CodecError::UnknownShape(shape_name.to_string()))?;
                let fields = match entry.remove(FIELDS) {
                    Some(Json::Array(fields)) => fields,
                    Some(_) => return Err(CodecError::Malformed("fields are not a list".into())),
                    None => Vec::new(),
                };
                nodes.push(Value::Object(ObjectRef::new(shape)));
                bodies.push(fields);
            } else if let Some(items) = entry.remove(ITEMS) {
                let Json::Array(items) = items else {
                    return Err(CodecError::Malformed("collection items are not a list".into()));
                };
                nodes.push(Value::Collection(CollectionRef::empty()));
                bodies.push(items);
            } else {
                return Err(CodecError::Malformed("node is neither an object nor a collection".into()));
            }
        }

        let reader = GraphReader { nodes };
        for (node, body) in reader.nodes.iter().zip(bodies) {
            match node {
                Value::Object(object) => {
                    for entry in body {
                        let (name, raw) = field_entry(entry)?;
                        let index = object.shape().index_of(&name).ok_or_else(|| {
                            CodecError::UnknownField {
                                shape: object.shape_name().to_string(),
                                field: name.clone(),
                            }
                        })?;
                        object.set_at(index, reader.read(raw)?);
                    }
                }
                Value::Collection(collection) => {
                    for item in body {
                        collection.push(reader.read(item)?);
                    }
                }
                _ => {}
            }
        }
        Ok(reader)
    }

    fn read(&self, json: Json) -> Result<Value, CodecError> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::Number(n) => read_number(&n),
            Json::String(s) => Ok(Value::Str(s)),
            Json::Array(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(|item| self.read(item))
                    .collect::<Result<_, _>>()?,
            )),
            Json::Object(mut object) => {
                if let Some(reference) = object.remove(REF) {
                    let id = node_id(&reference)?;
                    return usize::try_from(id)
                        .ok()
                        .and_then(|index| self.nodes.get(index))
                        .cloned()
                        .ok_or(CodecError::DanglingReference(id));
                }
                let mut map = BTreeMap::new();
                for (key, item) in object {
                    if key.starts_with('$') {
                        return Err(CodecError::ReservedKey(key));
                    }
                    map.insert(key, self.read(item)?);
                }
                Ok(Value::Map(map))
            }
        }
    }
}

fn read_number(n: &Number) -> Result<Value, CodecError> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Int(i));
    }
    if n.is_u64() {
        return Err(CodecError::UnrepresentableNumber(n.to_string()));
    }
    n.as_f64()
        .map(Value::Float)
        .ok_or_else(|| CodecError::UnrepresentableNumber(n.to_string()))
}

fn node_id(json: &Json) -> Result<u64, CodecError> {
    json.as_u64()
        .ok_or_else(|| CodecError::Malformed(format!("invalid node id {json}")))
}

fn field_entry(entry: Json) -> Result<(String, Json), CodecError> {
    if let Json::Array(mut pair) = entry {
        if pair.len() == 2 {
            let raw = pair.pop().unwrap_or(Json::Null);
            if let Some(Json::String(name)) = pair.pop() {
                return Ok((name, raw));
            }
        }
    }
    Err(CodecError::Malformed("field entry is not a [name, value] pair".into()))
}
