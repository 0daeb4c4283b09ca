//! The Eiko compiler: single-pass, statically typed, eagerly evaluated.
//!
//! Compilation is synchronous and single-threaded: source is tokenized,
//! parsed, and evaluated module by module into an immutable object graph
//! of resources. The graph, together with the resource table, is what the
//! exporter lowers into deployable tasks.

pub mod error;
pub mod eval;
pub mod ops;
pub mod plugin;
pub mod project;
pub mod resolver;
pub mod resource;
pub mod scope;
pub mod types;
pub mod value;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use eiko_foundation::SourceMap;

pub use error::{Error, Result};
pub use plugin::ExtensionRegistry;
pub use project::ProjectSettings;
pub use scope::Scope;
pub use value::Value;

/// State of one module in the import graph.
pub(crate) enum ModuleState {
    /// Being evaluated right now; hitting this during resolution means a
    /// cyclic import.
    Loading,
    Loaded(Scope),
}

/// Everything the exporter needs from a finished compilation.
pub struct Compilation {
    pub source_map: SourceMap,
    pub entry_scope: Scope,
    /// Every resource constructed anywhere in the compilation, in
    /// construction order, unique by `(definition name, index)`.
    pub resources: Vec<Arc<value::ResourceCell>>,
    pub settings: ProjectSettings,
}

impl Compilation {
    /// JSON dump of the compiled model, for `--output-model`.
    pub fn model_json(&self) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for resource in &self.resources {
            let key = resource.index().unwrap_or("<unindexed>").to_string();
            out.insert(key, Value::Resource(resource.clone()).to_json());
        }
        serde_json::Value::Object(out)
    }
}

/// A failed compilation: the errors plus the source map to render their
/// spans against.
pub struct CompileFailure {
    pub source_map: SourceMap,
    pub errors: Vec<Error>,
}

impl CompileFailure {
    /// Human-readable rendering, one block per error, with the offending
    /// source line when the error has a span.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for err in &self.errors {
            if !out.is_empty() {
                out.push('\n');
            }
            match err.span() {
                Some(span) if (span.file_id as usize) < self.source_map.file_count() => {
                    out.push_str(&format!("error: {err}\n  --> {}", self.source_map.render(&span)));
                }
                _ => out.push_str(&format!("error: {err}")),
            }
        }
        out
    }
}

/// The compiler driver: owns the source map, the module cache, the
/// resource table and the host extension registry.
pub struct Compiler {
    pub source_map: SourceMap,
    pub settings: ProjectSettings,
    extensions: ExtensionRegistry,
    pub(crate) modules: HashMap<PathBuf, ModuleState>,
    /// Module environments by dotted path, for definition-site lookups.
    pub(crate) module_scopes: HashMap<String, Scope>,
    pub(crate) search_paths: Vec<PathBuf>,
    /// Process-local resource table keyed by `(definition name, index)`.
    pub(crate) resources: IndexMap<(String, String), Arc<value::ResourceCell>>,
    /// Stack of resources currently executing a constructor body.
    pub(crate) construction_stack: Vec<Arc<value::ResourceCell>>,
    /// Stack of files being evaluated, for relative imports.
    pub(crate) file_stack: Vec<PathBuf>,
    /// Dotted path of the module currently being evaluated.
    pub(crate) module_stack: Vec<String>,
    pub(crate) plugin_stacktrace: bool,
    /// Names available in every scope without an import.
    pub(crate) builtins: HashMap<String, Value>,
    /// Parse errors collected across modules; reported together.
    pub(crate) diagnostics: Vec<Error>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(ExtensionRegistry::default())
    }
}

impl Compiler {
    pub fn new(extensions: ExtensionRegistry) -> Self {
        let mut builtins: HashMap<String, Value> = HashMap::new();
        for (name, ty) in [
            ("bool", types::Type::Bool),
            ("int", types::Type::Int),
            ("float", types::Type::Float),
            ("str", types::Type::Str),
            ("ProtectedStr", types::Type::ProtectedStr),
            ("Path", types::Type::Path),
        ] {
            builtins.insert(name.to_string(), Value::Type(ty));
        }
        for plugin in plugin::builtin_plugins() {
            builtins.insert(plugin.name.clone(), Value::Plugin(Arc::new(plugin)));
        }

        Self {
            source_map: SourceMap::new(),
            settings: ProjectSettings::default(),
            extensions,
            modules: HashMap::new(),
            module_scopes: HashMap::new(),
            search_paths: Vec::new(),
            resources: IndexMap::new(),
            construction_stack: Vec::new(),
            file_stack: Vec::new(),
            module_stack: Vec::new(),
            plugin_stacktrace: true,
            builtins,
            diagnostics: Vec::new(),
        }
    }

    /// Keep host backtraces out of plugin errors unless asked for.
    pub fn set_plugin_stacktrace(&mut self, enabled: bool) {
        self.plugin_stacktrace = enabled;
    }

    pub(crate) fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Compile an entry file to an object graph.
    ///
    /// The first evaluation error aborts compilation; parse errors within
    /// a single file are all reported.
    pub fn compile_file(mut self, entry: &Path) -> std::result::Result<Compilation, CompileFailure> {
        let entry = match entry.canonicalize() {
            Ok(entry) => entry,
            Err(e) => {
                return Err(CompileFailure {
                    source_map: self.source_map,
                    errors: vec![Error::internal(format!(
                        "cannot open {}: {e}",
                        entry.display()
                    ))],
                });
            }
        };
        let entry_dir = entry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        self.settings = match ProjectSettings::read(&entry_dir) {
            Ok(settings) => settings,
            Err(e) => {
                return Err(CompileFailure {
                    source_map: self.source_map,
                    errors: vec![e],
                });
            }
        };
        self.search_paths = vec![entry_dir.clone(), entry_dir.join(".eikobot_modules")];

        info!(entry = %entry.display(), "compiling");
        let entry_scope = match self.load_module(&entry, "__main__", None) {
            Ok(scope) => scope,
            Err(err) => {
                let mut errors = std::mem::take(&mut self.diagnostics);
                if errors.is_empty() {
                    errors.push(err);
                }
                return Err(CompileFailure {
                    source_map: self.source_map,
                    errors,
                });
            }
        };
        debug!(resources = self.resources.len(), "compilation finished");

        Ok(Compilation {
            source_map: self.source_map,
            entry_scope,
            resources: self.resources.into_iter().map(|(_, r)| r).collect(),
            settings: self.settings,
        })
    }

    /// Compile Eiko source text directly, without touching the filesystem.
    /// Imports resolve relative to `dir` when given.
    pub fn compile_source(
        mut self,
        source: &str,
        dir: Option<&Path>,
    ) -> std::result::Result<Compilation, CompileFailure> {
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        self.search_paths = vec![dir.clone(), dir.join(".eikobot_modules")];

        let pseudo_path = dir.join("__main__.eiko");
        let scope = match self.eval_source(source, pseudo_path, "__main__") {
            Ok(scope) => scope,
            Err(err) => {
                let mut errors = std::mem::take(&mut self.diagnostics);
                if errors.is_empty() {
                    errors.push(err);
                }
                return Err(CompileFailure {
                    source_map: self.source_map,
                    errors,
                });
            }
        };

        Ok(Compilation {
            source_map: self.source_map,
            entry_scope: scope,
            resources: self.resources.into_iter().map(|(_, r)| r).collect(),
            settings: self.settings,
        })
    }
}
