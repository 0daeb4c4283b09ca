//! Runtime values of the Eiko language.
//!
//! Values are immutable once exposed to user code. Compound values share
//! their payload behind `Arc` cells; a resource closing construction seals
//! itself and freezes every container it holds. Everything here is
//! `Send + Sync` so the deployer can carry values across tasks.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use indexmap::IndexMap;
use tokio::sync::watch;

use crate::plugin::PluginDef;
use crate::resource::ResourceDef;
use crate::types::{EnumDef, Type};

#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// Redacted in every user-visible rendering.
    ProtectedStr(Arc<str>),
    Path(Arc<PathBuf>),
    None,
    List(Arc<ListCell>),
    Dict(Arc<DictCell>),
    EnumMember(EnumMember),
    Resource(Arc<ResourceCell>),
    Promise(Arc<PromiseCell>),
    /// A type used as a value (`isinstance(x, Debian)`).
    Type(Type),
    /// A resource definition used as a constructor.
    ResourceDef(Arc<ResourceDef>),
    /// A host-provided plugin callable.
    Plugin(Arc<PluginDef>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub def: Arc<EnumDef>,
    pub member: String,
}

/// Dictionary keys are restricted to hashable scalar kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Bool(bool),
    Int(i64),
    Str(String),
    /// (enum name, member name)
    Enum(String, String),
}

impl DictKey {
    pub fn from_value(value: &Value) -> Option<DictKey> {
        match value {
            Value::Bool(b) => Some(DictKey::Bool(*b)),
            Value::Int(i) => Some(DictKey::Int(*i)),
            Value::Str(s) | Value::ProtectedStr(s) => Some(DictKey::Str(s.to_string())),
            Value::EnumMember(m) => Some(DictKey::Enum(m.def.name.clone(), m.member.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Bool(b) => Value::Bool(*b),
            DictKey::Int(i) => Value::Int(*i),
            DictKey::Str(s) => Value::Str(Arc::from(s.as_str())),
            // The enum definition is not kept on the key; good enough for
            // iteration, which only needs a printable value.
            DictKey::Enum(_, member) => Value::Str(Arc::from(member.as_str())),
        }
    }
}

/// Shared list payload. Append is legal until the list is frozen by the
/// first resource that seals while holding it.
pub struct ListCell {
    element_type: RwLock<Type>,
    elements: RwLock<Vec<Value>>,
    frozen: AtomicBool,
}

impl ListCell {
    pub fn new(element_type: Type, elements: Vec<Value>) -> Self {
        Self {
            element_type: RwLock::new(element_type),
            elements: RwLock::new(elements),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn element_type(&self) -> Type {
        self.element_type.read().expect("lock poisoned").clone()
    }

    pub fn set_element_type(&self, ty: Type) {
        *self.element_type.write().expect("lock poisoned") = ty;
    }

    pub fn elements(&self) -> Vec<Value> {
        self.elements.read().expect("lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.elements.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.elements.read().expect("lock poisoned").get(index).cloned()
    }

    pub fn append(&self, value: Value) -> Result<(), &'static str> {
        if self.frozen.load(Ordering::Acquire) {
            return Err("list belongs to a constructed resource and can no longer change");
        }
        self.elements.write().expect("lock poisoned").push(value);
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }
}

/// Shared dict payload; insertion order is semantic.
pub struct DictCell {
    key_type: RwLock<Type>,
    value_type: RwLock<Type>,
    elements: RwLock<IndexMap<DictKey, Value>>,
    frozen: AtomicBool,
}

impl DictCell {
    pub fn new(key_type: Type, value_type: Type, elements: IndexMap<DictKey, Value>) -> Self {
        Self {
            key_type: RwLock::new(key_type),
            value_type: RwLock::new(value_type),
            elements: RwLock::new(elements),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn key_type(&self) -> Type {
        self.key_type.read().expect("lock poisoned").clone()
    }

    pub fn value_type(&self) -> Type {
        self.value_type.read().expect("lock poisoned").clone()
    }

    pub fn entries(&self) -> Vec<(DictKey, Value)> {
        self.elements
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.elements.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &DictKey) -> Option<Value> {
        self.elements.read().expect("lock poisoned").get(key).cloned()
    }

    pub fn insert(&self, key: DictKey, value: Value) -> Result<bool, &'static str> {
        if self.frozen.load(Ordering::Acquire) {
            return Err("dict belongs to a constructed resource and can no longer change");
        }
        let mut elements = self.elements.write().expect("lock poisoned");
        if elements.contains_key(&key) {
            return Ok(false);
        }
        elements.insert(key, value);
        Ok(true)
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }
}

/// One resource instance under construction or sealed.
pub struct ResourceCell {
    pub def: Arc<ResourceDef>,
    index: OnceLock<String>,
    properties: RwLock<IndexMap<String, Value>>,
    promises: RwLock<IndexMap<String, Arc<PromiseCell>>>,
    sealed: AtomicBool,
    /// Cached linked-model instance; conversions reuse it so identity is
    /// preserved across plugin calls.
    model_cache: OnceLock<Arc<dyn Any + Send + Sync>>,
}

impl ResourceCell {
    pub fn new(def: Arc<ResourceDef>) -> Self {
        Self {
            def,
            index: OnceLock::new(),
            properties: RwLock::new(IndexMap::new()),
            promises: RwLock::new(IndexMap::new()),
            sealed: AtomicBool::new(false),
            model_cache: OnceLock::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.properties.read().expect("lock poisoned").get(name).cloned()
    }

    /// Assign a property. A property never transitions to a different value.
    pub fn set(&self, name: &str, value: Value) -> Result<(), String> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(format!(
                "resource '{}' is already constructed",
                self.def.name
            ));
        }
        let mut properties = self.properties.write().expect("lock poisoned");
        if properties.contains_key(name) {
            return Err(format!(
                "attempted to reassign property '{name}' that was already assigned"
            ));
        }
        properties.insert(name.to_string(), value);
        Ok(())
    }

    /// Replace a property value during coercion, before sealing.
    pub(crate) fn overwrite(&self, name: &str, value: Value) {
        assert!(
            !self.sealed.load(Ordering::Acquire),
            "cannot overwrite properties of a sealed resource"
        );
        self.properties
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), value);
    }

    pub fn register_promise(&self, name: &str, promise: Arc<PromiseCell>) {
        self.promises
            .write()
            .expect("lock poisoned")
            .insert(name.to_string(), promise);
    }

    pub fn promises(&self) -> Vec<(String, Arc<PromiseCell>)> {
        self.promises
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn promise(&self, name: &str) -> Option<Arc<PromiseCell>> {
        self.promises.read().expect("lock poisoned").get(name).cloned()
    }

    pub fn properties(&self) -> Vec<(String, Value)> {
        self.properties
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn property_names(&self) -> Vec<String> {
        self.properties.read().expect("lock poisoned").keys().cloned().collect()
    }

    /// Close construction: freeze held containers and forbid writes.
    pub fn seal(&self, index: String) {
        let _ = self.index.set(index);
        for (_, value) in self.properties() {
            freeze_value(&value);
        }
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn index(&self) -> Option<&str> {
        self.index.get().map(String::as_str)
    }

    /// Promise properties whose owner is a *different* resource; these are
    /// the ones creating inter-task dependencies.
    pub fn external_promises(self: &Arc<Self>) -> Vec<(String, Arc<PromiseCell>)> {
        let mut external = Vec::new();
        for (name, value) in self.properties() {
            if let Value::Promise(promise) = value {
                match promise.owner_cell() {
                    Some(owner) if Arc::ptr_eq(&owner, self) => {}
                    _ => external.push((name, promise)),
                }
            }
        }
        external
    }

    pub fn model_cache(&self) -> &OnceLock<Arc<dyn Any + Send + Sync>> {
        &self.model_cache
    }
}

impl fmt::Debug for ResourceCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("def", &self.def.name)
            .field("index", &self.index.get())
            .finish_non_exhaustive()
    }
}

fn freeze_value(value: &Value) {
    match value {
        Value::List(cell) => {
            cell.freeze();
            for element in cell.elements() {
                freeze_value(&element);
            }
        }
        Value::Dict(cell) => {
            cell.freeze();
            for (_, element) in cell.entries() {
                freeze_value(&element);
            }
        }
        _ => {}
    }
}

/// State of a deploy-time hole.
#[derive(Debug, Clone)]
pub enum PromiseState {
    Unresolved,
    Resolved(Value),
    /// The owning task failed or was skipped without resolving the slot.
    Failed,
}

/// One-shot slot filled during the owning resource's deployment.
pub struct PromiseCell {
    pub name: String,
    pub ty: Type,
    owner: OnceLock<Weak<ResourceCell>>,
    tx: watch::Sender<PromiseState>,
}

impl PromiseCell {
    pub fn new(name: String, ty: Type) -> Self {
        let (tx, _) = watch::channel(PromiseState::Unresolved);
        Self {
            name,
            ty,
            owner: OnceLock::new(),
            tx,
        }
    }

    pub fn bind_owner(&self, owner: &Arc<ResourceCell>) {
        let _ = self.owner.set(Arc::downgrade(owner));
    }

    pub fn owner_cell(&self) -> Option<Arc<ResourceCell>> {
        self.owner.get().and_then(Weak::upgrade)
    }

    pub fn owner_index(&self) -> Option<String> {
        self.owner_cell()
            .and_then(|cell| cell.index().map(str::to_string))
    }

    /// Resolve the slot. A slot transitions Unresolved -> Resolved exactly
    /// once; a second resolution is an error.
    pub fn resolve(&self, value: Value) -> Result<(), String> {
        let mut result = Ok(());
        self.tx.send_modify(|state| match state {
            PromiseState::Unresolved => *state = PromiseState::Resolved(value.clone()),
            _ => result = Err(format!("promise '{}' was already resolved", self.name)),
        });
        result
    }

    /// Mark the slot as never-resolvable; waiters observe the failure.
    pub fn fail(&self) {
        self.tx.send_modify(|state| {
            if matches!(state, PromiseState::Unresolved) {
                *state = PromiseState::Failed;
            }
        });
    }

    pub fn state(&self) -> PromiseState {
        self.tx.borrow().clone()
    }

    pub fn get(&self) -> Option<Value> {
        match &*self.tx.borrow() {
            PromiseState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Suspend until the slot leaves `Unresolved`.
    pub async fn wait(&self) -> Result<Value, PromiseState> {
        let mut rx = self.tx.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, PromiseState::Unresolved))
            .await
            .map_err(|_| PromiseState::Failed)?;
        match &*state {
            PromiseState::Resolved(value) => Ok(value.clone()),
            other => Err(other.clone()),
        }
    }
}

impl fmt::Debug for PromiseCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Promise({}.{})",
            self.owner_index().unwrap_or_else(|| "?".to_string()),
            self.name
        )
    }
}

impl Value {
    pub fn str(value: impl Into<String>) -> Value {
        Value::Str(Arc::from(value.into().as_str()))
    }

    /// The type of this value.
    pub fn type_of(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Str(_) => Type::Str,
            Value::ProtectedStr(_) => Type::ProtectedStr,
            Value::Path(_) => Type::Path,
            Value::None => Type::None,
            Value::List(cell) => Type::List(Box::new(cell.element_type())),
            Value::Dict(cell) => {
                Type::Dict(Box::new(cell.key_type()), Box::new(cell.value_type()))
            }
            Value::EnumMember(member) => Type::Enum(member.def.clone()),
            Value::Resource(cell) => Type::Resource(cell.def.clone()),
            // A promise stands in for its declared property type.
            Value::Promise(cell) => cell.ty.clone(),
            Value::Type(_) | Value::ResourceDef(_) | Value::Plugin(_) => Type::Any,
        }
    }

    pub fn truthiness(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) | Value::ProtectedStr(s) => !s.is_empty(),
            Value::Path(_) => true,
            Value::None => false,
            Value::List(cell) => !cell.is_empty(),
            Value::Dict(cell) => !cell.is_empty(),
            Value::EnumMember(_) => true,
            Value::Resource(_) => true,
            Value::Promise(_) => true,
            Value::Type(_) | Value::ResourceDef(_) | Value::Plugin(_) => true,
        }
    }

    /// String form used when computing resource indexes.
    pub fn index_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.to_string()),
            Value::ProtectedStr(s) => Some(s.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Path(p) => Some(p.display().to_string()),
            Value::EnumMember(m) => Some(m.member.clone()),
            Value::Bool(b) => Some(if *b { "True" } else { "False" }.to_string()),
            Value::Resource(cell) => cell.index().map(str::to_string),
            _ => None,
        }
    }

    /// Rendering used by f-string interpolation. Protected strings keep
    /// their payload here: interpolation builds program data, not output.
    pub fn interpolate(&self) -> String {
        match self {
            Value::Str(s) | Value::ProtectedStr(s) => s.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::None => "None".to_string(),
            Value::Path(p) => p.display().to_string(),
            other => other.to_string(),
        }
    }

    /// JSON rendering for `--output-model`; secrets are redacted.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::ProtectedStr(_) => serde_json::Value::String("***".to_string()),
            Value::Path(p) => serde_json::Value::String(p.display().to_string()),
            Value::None => serde_json::Value::Null,
            Value::List(cell) => {
                serde_json::Value::Array(cell.elements().iter().map(Value::to_json).collect())
            }
            Value::Dict(cell) => {
                let mut map = serde_json::Map::new();
                for (key, value) in cell.entries() {
                    let key = match key {
                        DictKey::Bool(b) => b.to_string(),
                        DictKey::Int(i) => i.to_string(),
                        DictKey::Str(s) => s,
                        DictKey::Enum(_, member) => member,
                    };
                    map.insert(key, value.to_json());
                }
                serde_json::Value::Object(map)
            }
            Value::EnumMember(m) => {
                serde_json::Value::String(format!("{}.{}", m.def.name, m.member))
            }
            Value::Resource(cell) => {
                let mut map = serde_json::Map::new();
                for (name, value) in cell.properties() {
                    map.insert(name, value.to_json());
                }
                serde_json::Value::Object(map)
            }
            Value::Promise(cell) => match cell.get() {
                Some(value) => value.to_json(),
                Option::None => serde_json::Value::String(format!(
                    "<promise {}.{}>",
                    cell.owner_index().unwrap_or_else(|| "?".to_string()),
                    cell.name
                )),
            },
            Value::Type(t) => serde_json::Value::String(t.to_string()),
            Value::ResourceDef(def) => {
                serde_json::Value::String(format!("<resource definition {}>", def.name))
            }
            Value::Plugin(def) => serde_json::Value::String(format!("<plugin {}>", def.name)),
        }
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    /// User-visible rendering; protected strings are redacted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::ProtectedStr(_) => write!(f, "***"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::None => write!(f, "None"),
            Value::Path(p) => write!(f, "{}", p.display()),
            Value::List(cell) => {
                let items: Vec<String> = cell.elements().iter().map(Value::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Value::Dict(cell) => {
                let items: Vec<String> = cell
                    .entries()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value(), v))
                    .collect();
                write!(f, "{{{}}}", items.join(", "))
            }
            Value::EnumMember(m) => write!(f, "{}.{}", m.def.name, m.member),
            Value::Resource(cell) => write!(
                f,
                "{} '{}'",
                cell.def.name,
                cell.index().unwrap_or("<unindexed>")
            ),
            Value::Promise(cell) => write!(
                f,
                "<promise {}.{}>",
                cell.owner_index().unwrap_or_else(|| "?".to_string()),
                cell.name
            ),
            Value::Type(t) => write!(f, "{t}"),
            Value::ResourceDef(def) => write!(f, "<resource definition {}>", def.name),
            Value::Plugin(def) => write!(f, "<plugin {}>", def.name),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::ProtectedStr(_) => write!(f, "ProtectedStr(***)"),
            other => write!(f, "{other}"),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality for values; identity (by index) for resources.
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b))
            | (Value::ProtectedStr(a), Value::ProtectedStr(b))
            | (Value::Str(a), Value::ProtectedStr(b))
            | (Value::ProtectedStr(a), Value::Str(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::List(a), Value::List(b)) => {
                Arc::ptr_eq(a, b) || a.elements() == b.elements()
            }
            (Value::Dict(a), Value::Dict(b)) => {
                Arc::ptr_eq(a, b) || a.entries() == b.entries()
            }
            (Value::EnumMember(a), Value::EnumMember(b)) => {
                a.def.name == b.def.name && a.member == b.member
            }
            (Value::Resource(a), Value::Resource(b)) => match (a.index(), b.index()) {
                (Some(ia), Some(ib)) => a.def.name == b.def.name && ia == ib,
                _ => Arc::ptr_eq(a, b),
            },
            (Value::Promise(a), Value::Promise(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
