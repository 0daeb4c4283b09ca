//! The plugin bridge: host-provided callables and linked models.
//!
//! Host extensions register by name string before compilation; the
//! resolver links plugins into a module's environment when that module
//! loads. Handlers use the same two-phase pattern but are linked on the
//! runtime side, keyed by resource definition name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::types::Type;
use crate::value::Value;

/// Failure modes distinguishable by the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    /// Raised deliberately by the plugin; surfaces as a compile error
    /// carrying the plugin's own message.
    #[error("{0}")]
    User(String),
    /// Anything else that went wrong inside the host function.
    #[error("{message}")]
    Internal {
        message: String,
        /// Host backtrace, surfaced only with `--enable-plugin-stacktrace`.
        trace: Option<String>,
    },
}

impl PluginError {
    pub fn user(message: impl Into<String>) -> Self {
        PluginError::User(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        PluginError::Internal {
            message: message.into(),
            trace: None,
        }
    }
}

pub type PluginResult = Result<Value, PluginError>;
pub type PluginBody = Box<dyn Fn(&[Value]) -> PluginResult + Send + Sync>;

/// One host function callable from Eiko source at compile time.
pub struct PluginDef {
    pub name: String,
    /// Declared parameter types; call marshalling coerces against these.
    pub params: Vec<PluginParam>,
    pub return_type: Type,
    pub body: PluginBody,
}

#[derive(Debug, Clone)]
pub struct PluginParam {
    pub name: String,
    pub ty: Type,
}

impl PluginDef {
    pub fn new(
        name: impl Into<String>,
        params: Vec<PluginParam>,
        return_type: Type,
        body: impl Fn(&[Value]) -> PluginResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            return_type,
            body: Box::new(body),
        }
    }
}

impl fmt::Debug for PluginDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

/// Host extensions waiting to be linked, keyed by dotted module path.
///
/// The embedding application fills this before compilation; the module
/// resolver injects the matching plugins into each module environment as
/// it loads (the name-based replacement for loading a sibling host file).
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    plugins: HashMap<String, Vec<Arc<PluginDef>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under a module path, e.g. `"std.ssh"`.
    pub fn register_plugin(&mut self, module: impl Into<String>, plugin: PluginDef) {
        self.plugins
            .entry(module.into())
            .or_default()
            .push(Arc::new(plugin));
    }

    pub fn plugins_for(&self, module: &str) -> &[Arc<PluginDef>] {
        self.plugins.get(module).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Host-side view of a resource: a typed struct built from the property
/// map. Conversions are cached on the resource so identity is preserved
/// across plugin calls.
pub trait ResourceModel: Sized + Send + Sync + 'static {
    /// The `__eiko_resource__` tag: which resource definition this model
    /// is linked to.
    fn resource_name() -> &'static str;

    fn from_resource(resource: &Arc<crate::value::ResourceCell>) -> Result<Self, String>;
}

/// Convert a resource to its linked model, reusing the cached instance.
pub fn linked_model<M: ResourceModel>(
    resource: &Arc<crate::value::ResourceCell>,
) -> Result<Arc<M>, String> {
    if let Some(cached) = resource.model_cache().get() {
        return cached
            .clone()
            .downcast::<M>()
            .map_err(|_| format!("resource '{}' is linked to a different model", M::resource_name()));
    }
    let model = Arc::new(M::from_resource(resource)?);
    let _ = resource.model_cache().set(model.clone());
    Ok(model)
}

/// Builtin plugins available in every module without an import.
pub fn builtin_plugins() -> Vec<PluginDef> {
    vec![
        PluginDef::new(
            "isinstance",
            vec![
                PluginParam {
                    name: "obj".to_string(),
                    ty: Type::Any,
                },
                PluginParam {
                    name: "cls".to_string(),
                    ty: Type::Any,
                },
            ],
            Type::Bool,
            |args| {
                let target = match &args[1] {
                    Value::Type(ty) => ty.clone(),
                    Value::ResourceDef(def) => Type::Resource(def.clone()),
                    other => {
                        return Err(PluginError::user(format!(
                            "isinstance expects a type as its second argument, got '{}'",
                            other.type_of()
                        )));
                    }
                };
                // Typedefs count as their base for isinstance purposes.
                let target = match target {
                    Type::Typedef(def) => def.base.clone(),
                    other => other,
                };
                Ok(Value::Bool(args[0].type_of().is_subtype(&target)))
            },
        ),
        PluginDef::new(
            "type",
            vec![PluginParam {
                name: "obj".to_string(),
                ty: Type::Any,
            }],
            Type::Str,
            |args| Ok(Value::str(args[0].type_of().to_string())),
        ),
        PluginDef::new(
            "human_readable",
            vec![PluginParam {
                name: "number".to_string(),
                ty: Type::Int,
            }],
            Type::Str,
            |args| {
                let Value::Int(number) = &args[0] else {
                    return Err(PluginError::internal("expected an int"));
                };
                Ok(Value::str(human_readable(*number)))
            },
        ),
        PluginDef::new(
            "machine_readable",
            vec![PluginParam {
                name: "number".to_string(),
                ty: Type::Str,
            }],
            Type::Int,
            |args| {
                let text = match &args[0] {
                    Value::Str(s) | Value::ProtectedStr(s) => s.to_string(),
                    _ => return Err(PluginError::internal("expected a str")),
                };
                machine_readable(&text).map(Value::Int).map_err(PluginError::user)
            },
        ),
    ]
}

/// Turn a number of bits into a human readable byte string.
fn human_readable(number: i64) -> String {
    let mut number = number / 8;
    for unit in ["", "K", "M", "G", "T"] {
        if number < 10240 {
            return format!("{number}{unit}B");
        }
        number /= 1024;
    }
    format!("{number}PB")
}

/// Parse a human readable byte string back into an integer.
fn machine_readable(number: &str) -> Result<i64, String> {
    if number.chars().all(|c| c.is_ascii_digit()) && !number.is_empty() {
        return number
            .parse()
            .map_err(|_| format!("Cannot convert value of '{number}' to an integer."));
    }
    let suffixes: [(&str, i64); 6] = [
        ("PB", 1024i64.pow(5)),
        ("TB", 1024i64.pow(4)),
        ("GB", 1024i64.pow(3)),
        ("MB", 1024i64.pow(2)),
        ("KB", 1024),
        ("B", 1),
    ];
    for (suffix, factor) in suffixes {
        if let Some(stripped) = number.strip_suffix(suffix) {
            return stripped
                .parse::<i64>()
                .map(|n| n * factor)
                .map_err(|_| format!("Cannot convert value of '{number}' to an integer."));
        }
    }
    Err(format!("Cannot convert value of '{number}' to an integer."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_readable_rounds_down_through_units() {
        assert_eq!(human_readable(8), "1B");
        assert_eq!(human_readable(81920), "10KB");
        assert_eq!(human_readable(8 * 1024 * 1024 * 20), "20MB");
    }

    #[test]
    fn machine_readable_parses_suffixes() {
        assert_eq!(machine_readable("100").unwrap(), 100);
        assert_eq!(machine_readable("4B").unwrap(), 4);
        assert_eq!(machine_readable("2KB").unwrap(), 2048);
        assert_eq!(machine_readable("1MB").unwrap(), 1024 * 1024);
        assert!(machine_readable("oops").is_err());
    }

    #[test]
    fn registry_links_by_module_path() {
        let mut registry = ExtensionRegistry::new();
        registry.register_plugin(
            "std.net",
            PluginDef::new("noop", vec![], Type::None, |_| Ok(Value::None)),
        );
        assert_eq!(registry.plugins_for("std.net").len(), 1);
        assert!(registry.plugins_for("std.ssh").is_empty());
    }
}
