//! Module and import resolution.
//!
//! Modules are cached by canonical path and evaluated at most once per
//! compilation. A directory is a package iff it contains `__init__.eiko`.
//! Imports resolve relative to the current file when the statement uses
//! leading dots, otherwise against the search path (entry directory, then
//! installed package roots).

use std::path::{Path, PathBuf};

use eiko_foundation::Span;
use tracing::debug;

use crate::error::{Error, Result};
use crate::project::ProjectSettings;
use crate::scope::{Scope, SetError, Stored};
use crate::value::Value;
use crate::{Compiler, ModuleState};

pub const FILE_EXT: &str = "eiko";
pub const PACKAGE_MARKER: &str = "__init__.eiko";

impl Compiler {
    /// Load (or reuse) the module at `path`, registered under the dotted
    /// `module_path`. `span` points at the import statement, when any.
    pub(crate) fn load_module(
        &mut self,
        path: &Path,
        module_path: &str,
        span: Option<Span>,
    ) -> Result<Scope> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        match self.modules.get(&canonical) {
            Some(ModuleState::Loaded(scope)) => return Ok(scope.clone()),
            Some(ModuleState::Loading) => {
                return Err(Error::ImportCyclic {
                    module: module_path.to_string(),
                    span: span.unwrap_or(Span::zero(0)),
                });
            }
            None => {}
        }

        let source = std::fs::read_to_string(&canonical).map_err(|_| Error::ImportNotFound {
            module: module_path.to_string(),
            span: span.unwrap_or(Span::zero(0)),
        })?;

        self.modules.insert(canonical.clone(), ModuleState::Loading);
        debug!(module = module_path, file = %canonical.display(), "loading module");

        let result = self.eval_source(&source, canonical.clone(), module_path);
        match &result {
            Ok(scope) => {
                self.modules
                    .insert(canonical, ModuleState::Loaded(scope.clone()));
            }
            Err(_) => {
                self.modules.remove(&canonical);
            }
        }
        result
    }

    /// `import a.b.c [as name]` — loads every package level, then binds
    /// either the chain root or the alias in `scope`.
    pub(crate) fn eval_import(
        &mut self,
        path: &[String],
        alias: Option<&str>,
        scope: &Scope,
        span: Span,
    ) -> Result<()> {
        let (final_scope, chain) = self.resolve_module_chain(path, span)?;

        if let Some(alias) = alias {
            scope.set_module(alias, final_scope).map_err(|_| Error::Reassign {
                name: alias.to_string(),
                span,
            })?;
            return Ok(());
        }

        // Bind the root and nest each level inside the previous one.
        let mut target = scope.clone();
        for (segment, module_scope) in path.iter().zip(chain) {
            match target.get_local(segment) {
                Some(Stored::Module(existing)) => {
                    target = existing;
                }
                Some(_) => {
                    return Err(Error::Reassign {
                        name: segment.clone(),
                        span,
                    });
                }
                None => {
                    target
                        .set_module(segment, module_scope.clone())
                        .map_err(|_| Error::Reassign {
                            name: segment.clone(),
                            span,
                        })?;
                    target = module_scope;
                }
            }
        }
        Ok(())
    }

    /// `from [.]a.b import c [as d]`.
    pub(crate) fn eval_from_import(
        &mut self,
        dots: usize,
        path: &[String],
        names: &[(String, Option<String>)],
        scope: &Scope,
        span: Span,
    ) -> Result<()> {
        let (module_scope, module_dir, module_path) = if dots > 0 {
            self.resolve_relative(dots, path, span)?
        } else {
            let (scope, _chain) = self.resolve_module_chain(path, span)?;
            let dir = self.module_dir_of(path, span)?;
            (scope, dir, path.join("."))
        };

        for (name, alias) in names {
            let binding = match module_scope.get_local(name) {
                Some(stored) => stored,
                None => {
                    // Not defined in the module body; try a submodule file.
                    let sub = self.resolve_in_dir(&module_dir, name);
                    match sub {
                        Some(sub_path) => {
                            let sub_scope = self.load_module(
                                &sub_path,
                                &format!("{module_path}.{name}"),
                                Some(span),
                            )?;
                            Stored::Module(sub_scope)
                        }
                        None => {
                            return Err(Error::ImportNotFound {
                                module: format!("{module_path}.{name}"),
                                span,
                            });
                        }
                    }
                }
            };
            let bound_name = alias.as_deref().unwrap_or(name);
            let result = match binding {
                Stored::Module(module) => scope.set_module(bound_name, module),
                Stored::Value(value) => scope.set(bound_name, value).map(|_| ()),
                Stored::Unset(_) => {
                    return Err(Error::UnsetRead {
                        name: name.clone(),
                        span,
                    });
                }
            };
            result.map_err(|_: SetError| Error::Reassign {
                name: bound_name.to_string(),
                span,
            })?;
        }
        Ok(())
    }

    /// Walk `a.b.c` against the search path, loading each level.
    /// Returns the final module's scope and the scopes of every level.
    fn resolve_module_chain(
        &mut self,
        path: &[String],
        span: Span,
    ) -> Result<(Scope, Vec<Scope>)> {
        let root = path.first().ok_or_else(|| Error::internal("empty import path"))?;

        let search_paths = self.search_paths.clone();
        for base in &search_paths {
            let Some(root_file) = self.resolve_in_dir(base, root) else {
                continue;
            };
            self.check_package_version(base, root, span)?;

            let mut chain = Vec::new();
            let mut module_path = root.clone();
            let mut scope = self.load_module(&root_file, &module_path, Some(span))?;
            self.module_scopes.insert(module_path.clone(), scope.clone());
            chain.push(scope.clone());

            let mut dir = base.join(root);
            for segment in &path[1..] {
                let file = self.resolve_in_dir(&dir, segment).ok_or_else(|| {
                    Error::ImportNotFound {
                        module: format!("{module_path}.{segment}"),
                        span,
                    }
                })?;
                module_path = format!("{module_path}.{segment}");
                scope = self.load_module(&file, &module_path, Some(span))?;
                self.module_scopes.insert(module_path.clone(), scope.clone());
                chain.push(scope.clone());
                dir = dir.join(segment);
            }
            return Ok((scope, chain));
        }

        Err(Error::ImportNotFound {
            module: path.join("."),
            span,
        })
    }

    /// Relative import: dots climb from the current file's directory.
    fn resolve_relative(
        &mut self,
        dots: usize,
        path: &[String],
        span: Span,
    ) -> Result<(Scope, PathBuf, String)> {
        let current = self
            .file_stack
            .last()
            .cloned()
            .ok_or_else(|| Error::internal("relative import outside a module"))?;
        let mut dir = current
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        for _ in 1..dots {
            dir = dir
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::ImportNotFound {
                    module: format!("{}{}", ".".repeat(dots), path.join(".")),
                    span,
                })?;
        }

        let mut module_path = String::new();
        let mut scope = None;
        for segment in path {
            let file = self
                .resolve_in_dir(&dir, segment)
                .ok_or_else(|| Error::ImportNotFound {
                    module: format!("{}{}", ".".repeat(dots), path.join(".")),
                    span,
                })?;
            module_path = if module_path.is_empty() {
                segment.clone()
            } else {
                format!("{module_path}.{segment}")
            };
            scope = Some(self.load_module(&file, &module_path, Some(span))?);
            dir = dir.join(segment);
        }

        match scope {
            Some(scope) => Ok((scope, dir, module_path)),
            // `from . import x`: the "module" is the current directory.
            None => {
                let init = dir.join(PACKAGE_MARKER);
                if init.is_file() {
                    let scope = self.load_module(&init, ".", Some(span))?;
                    Ok((scope, dir, ".".to_string()))
                } else {
                    Err(Error::ImportNotFound {
                        module: ".".repeat(dots),
                        span,
                    })
                }
            }
        }
    }

    /// A module named `name` inside `dir`: either `name.eiko` or a package
    /// directory `name/__init__.eiko`.
    fn resolve_in_dir(&self, dir: &Path, name: &str) -> Option<PathBuf> {
        let package = dir.join(name).join(PACKAGE_MARKER);
        if package.is_file() {
            return Some(package);
        }
        let file = dir.join(format!("{name}.{FILE_EXT}"));
        if file.is_file() {
            return Some(file);
        }
        None
    }

    fn module_dir_of(&self, path: &[String], span: Span) -> Result<PathBuf> {
        for base in &self.search_paths {
            let mut dir = base.clone();
            for segment in path {
                dir = dir.join(segment);
            }
            if dir.is_dir() {
                return Ok(dir);
            }
            // A plain-file module has no directory to look for submodules in;
            // fall back to its parent.
            if path.len() == 1 {
                let file = base.join(format!("{}.{FILE_EXT}", path[0]));
                if file.is_file() {
                    return Ok(base.clone());
                }
            }
        }
        Err(Error::ImportNotFound {
            module: path.join("."),
            span,
        })
    }

    /// Installed packages may pin an engine version in their own eiko.toml.
    fn check_package_version(&self, base: &Path, root: &str, _span: Span) -> Result<()> {
        let manifest = base.join(root).join("eiko.toml");
        let Ok(text) = std::fs::read_to_string(&manifest) else {
            return Ok(());
        };
        ProjectSettings::parse(&text).map_err(|e| match e {
            Error::ImportVersionMismatch { required, actual, .. } => {
                Error::ImportVersionMismatch {
                    package: root.to_string(),
                    required,
                    actual,
                }
            }
            other => other,
        })?;
        Ok(())
    }

    /// Inject host plugins registered for `module_path`, plus the builtin
    /// plugins every module receives.
    pub(crate) fn link_plugins(&mut self, scope: &Scope, module_path: &str) -> Result<()> {
        let plugins: Vec<_> = self
            .extensions()
            .plugins_for(module_path)
            .iter()
            .cloned()
            .collect();
        for plugin in plugins {
            let name = plugin.name.clone();
            scope
                .set(&name, Value::Plugin(plugin))
                .map_err(|_| Error::internal(format!(
                    "plugin '{name}' collides with a binding in module '{module_path}'"
                )))?;
        }
        Ok(())
    }
}
