//! Layered variable scope: local -> document -> entity -> world.
//!
//! `local` and `document` are owned maps. `entity` and `world` are opaque providers supplied by
//! the host; the core never assumes anything about their storage.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{CoreError, Result};
use crate::value::Value;

pub type Locals = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeLayer {
    Local,
    Document,
    Entity,
    World,
}

impl ScopeLayer {
    /// Explicit layer addressing: `local.x`, `document.x`, `entity.x`, `world.x`.
    pub fn from_root(name: &str) -> Option<Self> {
        match name {
            "local" => Some(ScopeLayer::Local),
            "document" => Some(ScopeLayer::Document),
            "entity" => Some(ScopeLayer::Entity),
            "world" => Some(ScopeLayer::World),
            _ => None,
        }
    }
}

/// Host-supplied key/value store backing the `entity` and `world` layers.
pub trait ScopeProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, _value: Value) -> Result<()> {
        Err(CoreError::ReadOnlyScope {
            path: key.to_string(),
        })
    }
}

/// In-memory provider, mostly useful for tests and the CLI.
#[derive(Debug, Default)]
pub struct MapProvider {
    values: RwLock<BTreeMap<String, Value>>,
    writable: bool,
}

impl MapProvider {
    pub fn read_only(values: BTreeMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
            writable: false,
        }
    }

    pub fn writable(values: BTreeMap<String, Value>) -> Self {
        Self {
            values: RwLock::new(values),
            writable: true,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        match self.values.read() {
            Ok(values) => values.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ScopeProvider for MapProvider {
    fn get(&self, key: &str) -> Option<Value> {
        match self.values.read() {
            Ok(values) => values.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        if !self.writable {
            return Err(CoreError::ReadOnlyScope {
                path: key.to_string(),
            });
        }
        match self.values.write() {
            Ok(mut values) => values.insert(key.to_string(), value),
            Err(poisoned) => poisoned.into_inner().insert(key.to_string(), value),
        };
        Ok(())
    }
}

/// Read access used by the expression evaluator.
pub trait VariableLookup {
    /// Resolve an unprefixed root name through the layer chain.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Resolve a key in one specific layer.
    fn lookup_in(&self, layer: ScopeLayer, key: &str) -> Option<Value>;

    /// Resolve a dotted path (`a.b.0.c`), honouring explicit layer roots.
    fn get_path(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = match ScopeLayer::from_root(root) {
            Some(layer) => self.lookup_in(layer, segments.next()?)?,
            None => self.lookup(root)?,
        };
        for segment in segments {
            current = current.member(segment)?.clone();
        }
        Some(current)
    }
}

/// The scope an execution starts from: document variables plus optional host providers.
#[derive(Clone, Default)]
pub struct VariableScope {
    document: BTreeMap<String, Value>,
    entity: Option<Arc<dyn ScopeProvider>>,
    world: Option<Arc<dyn ScopeProvider>>,
}

impl fmt::Debug for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableScope")
            .field("document", &self.document)
            .field("entity", &self.entity.is_some())
            .field("world", &self.world.is_some())
            .finish()
    }
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.document.extend(variables);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.document.insert(name.into(), value.into());
        self
    }

    pub fn with_entity(mut self, provider: Arc<dyn ScopeProvider>) -> Self {
        self.entity = Some(provider);
        self
    }

    pub fn with_world(mut self, provider: Arc<dyn ScopeProvider>) -> Self {
        self.world = Some(provider);
        self
    }

    pub fn document(&self) -> &BTreeMap<String, Value> {
        &self.document
    }

    pub fn into_document(self) -> BTreeMap<String, Value> {
        self.document
    }

    /// Seed a document variable only if the caller has not already provided one.
    pub fn insert_default(&mut self, name: &str, value: Value) {
        self.document.entry(name.to_string()).or_insert(value);
    }

    /// Write without a local frame (`local.` paths are rejected).
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        assign_path(None, self, path, value)
    }
}

impl VariableLookup for VariableScope {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.document
            .get(name)
            .cloned()
            .or_else(|| self.entity.as_ref().and_then(|p| p.get(name)))
            .or_else(|| self.world.as_ref().and_then(|p| p.get(name)))
    }

    fn lookup_in(&self, layer: ScopeLayer, key: &str) -> Option<Value> {
        match layer {
            ScopeLayer::Local => None,
            ScopeLayer::Document => self.document.get(key).cloned(),
            ScopeLayer::Entity => self.entity.as_ref()?.get(key),
            ScopeLayer::World => self.world.as_ref()?.get(key),
        }
    }
}

/// A channel's view of the scope: its own locals layered over the shared execution scope.
pub struct ScopeChain<'a> {
    locals: &'a mut Locals,
    shared: &'a mut VariableScope,
}

impl<'a> ScopeChain<'a> {
    pub fn new(locals: &'a mut Locals, shared: &'a mut VariableScope) -> Self {
        Self { locals, shared }
    }

    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        assign_path(Some(&mut *self.locals), &mut *self.shared, path, value)
    }

    pub fn set_local(&mut self, name: &str, value: Value) {
        self.locals.insert(name.to_string(), value);
    }

    pub fn remove_local(&mut self, name: &str) -> Option<Value> {
        self.locals.remove(name)
    }

    /// Add `delta` to the number at `path` (absent counts as zero) and return the new value.
    pub fn increment(&mut self, path: &str, delta: f64) -> Result<f64> {
        let current = match self.get_path(path) {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(n)) => n,
            Some(other) => {
                return Err(CoreError::TypeMismatch {
                    path: path.to_string(),
                    expected: "number",
                    found: other.type_name(),
                })
            }
        };
        let next = current + delta;
        self.set(path, Value::Number(next))?;
        Ok(next)
    }
}

impl VariableLookup for ScopeChain<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.locals
            .get(name)
            .cloned()
            .or_else(|| self.shared.lookup(name))
    }

    fn lookup_in(&self, layer: ScopeLayer, key: &str) -> Option<Value> {
        match layer {
            ScopeLayer::Local => self.locals.get(key).cloned(),
            other => self.shared.lookup_in(other, key),
        }
    }
}

fn assign_path(
    locals: Option<&mut Locals>,
    shared: &mut VariableScope,
    path: &str,
    value: Value,
) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::InvalidPath {
            path: path.to_string(),
        });
    }

    let (layer, rest) = match ScopeLayer::from_root(segments[0]) {
        Some(layer) if segments.len() > 1 => (Some(layer), &segments[1..]),
        Some(_) => {
            return Err(CoreError::InvalidPath {
                path: path.to_string(),
            })
        }
        None => (None, &segments[..]),
    };

    let root = rest[0];
    let tail = &rest[1..];

    let layer = match layer {
        Some(layer) => layer,
        None => match &locals {
            Some(locals) if locals.contains_key(root) => ScopeLayer::Local,
            _ => ScopeLayer::Document,
        },
    };

    match layer {
        ScopeLayer::Local => {
            let Some(locals) = locals else {
                return Err(CoreError::ReadOnlyScope {
                    path: path.to_string(),
                });
            };
            assign_in_map(locals, root, tail, value, path)
        }
        ScopeLayer::Document => assign_in_map(&mut shared.document, root, tail, value, path),
        ScopeLayer::Entity | ScopeLayer::World => {
            let provider = if layer == ScopeLayer::Entity {
                shared.entity.as_ref()
            } else {
                shared.world.as_ref()
            };
            let Some(provider) = provider else {
                return Err(CoreError::ReadOnlyScope {
                    path: path.to_string(),
                });
            };
            let mut root_value = provider.get(root).unwrap_or(Value::Null);
            if tail.is_empty() {
                root_value = value;
            } else {
                assign_nested(&mut root_value, tail, value, path)?;
            }
            provider.set(root, root_value)
        }
    }
}

fn assign_in_map(
    map: &mut BTreeMap<String, Value>,
    root: &str,
    tail: &[&str],
    value: Value,
    full_path: &str,
) -> Result<()> {
    if tail.is_empty() {
        map.insert(root.to_string(), value);
        return Ok(());
    }
    let slot = map.entry(root.to_string()).or_insert_with(Value::map);
    assign_nested(slot, tail, value, full_path)
}

fn assign_nested(target: &mut Value, tail: &[&str], value: Value, full_path: &str) -> Result<()> {
    let Some((head, rest)) = tail.split_first() else {
        *target = value;
        return Ok(());
    };

    if target.is_null() {
        *target = Value::map();
    }

    match target {
        Value::Map(map) => {
            let slot = map.entry(head.to_string()).or_insert(Value::Null);
            assign_nested(slot, rest, value, full_path)
        }
        Value::List(items) => {
            let index = head.parse::<usize>().map_err(|_| CoreError::InvalidPath {
                path: full_path.to_string(),
            })?;
            let slot = items.get_mut(index).ok_or_else(|| CoreError::UndefinedVariable {
                path: full_path.to_string(),
            })?;
            assign_nested(slot, rest, value, full_path)
        }
        other => Err(CoreError::TypeMismatch {
            path: full_path.to_string(),
            expected: "map",
            found: other.type_name(),
        }),
    }
}
