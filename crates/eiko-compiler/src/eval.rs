//! Statement and expression evaluation.
//!
//! The evaluator walks the AST once, eagerly, building the immutable
//! object graph. It also owns the pieces of the type system that need to
//! run user code: typedef refinements and constructor constraint dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use eiko_foundation::Span;
use eiko_parser::ast::{
    AssignTarget, BinaryOp, CallArg, Expr, ExprKind, FStringPart, ResourceDecl, Stmt, StmtKind,
    TypeExpr, TypeExprKind, UnaryOp,
};
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::ops;
use crate::plugin::PluginDef;
use crate::resource::{Constructor, CtorParam, PropertySchema, ResourceDef};
use crate::scope::{Scope, SetError, Stored};
use crate::types::{EnumDef, Type, TypedefDef};
use crate::value::{DictCell, DictKey, EnumMember, ListCell, PromiseCell, ResourceCell, Value};
use crate::Compiler;

/// A dotted path can name a value or a module environment.
enum Resolved {
    Value(Value),
    Module(Scope),
}

impl Compiler {
    /// Tokenize, parse and evaluate one source file into a module scope.
    pub(crate) fn eval_source(
        &mut self,
        source: &str,
        path: PathBuf,
        module_path: &str,
    ) -> Result<Scope> {
        let file_id = self.source_map.add_file(path.clone(), source.to_string());
        let tokens = eiko_lexer::lex(source, file_id).map_err(|e| Error::Lex {
            message: e.message,
            span: e.span,
        })?;

        let (module, parse_errors) = eiko_parser::parse_module(&tokens);
        if !parse_errors.is_empty() {
            for err in &parse_errors {
                self.diagnostics.push(Error::Syntax {
                    message: err.message.clone(),
                    span: err.span,
                });
            }
            let first = parse_errors.into_iter().next().expect("checked non-empty");
            return Err(Error::Syntax {
                message: first.message,
                span: first.span,
            });
        }

        let scope = Scope::new(module_path);
        self.module_scopes
            .insert(module_path.to_string(), scope.clone());
        self.file_stack.push(path);
        self.module_stack.push(module_path.to_string());

        let mut run = || -> Result<()> {
            for stmt in &module.statements {
                self.eval_stmt(stmt, &scope)?;
            }
            Ok(())
        };
        let result = run();

        self.file_stack.pop();
        self.module_stack.pop();
        result?;

        // Host extensions link in when the module closes.
        self.link_plugins(&scope, module_path)?;
        debug!(module = module_path, "module evaluated");
        Ok(scope)
    }

    fn current_module(&self) -> String {
        self.module_stack
            .last()
            .cloned()
            .unwrap_or_else(|| "__main__".to_string())
    }

    /// Name lookup through the scope chain, then the builtins.
    fn lookup(&self, scope: &Scope, name: &str, span: Span) -> Result<Stored> {
        if let Some(stored) = scope.get(name) {
            return Ok(stored);
        }
        if let Some(value) = self.builtins.get(name) {
            return Ok(Stored::Value(value.clone()));
        }
        Err(Error::Name {
            name: name.to_string(),
            span,
        })
    }

    // === Statements ===

    pub(crate) fn eval_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> Result<()> {
        match &stmt.kind {
            StmtKind::Import { path, alias } => {
                self.eval_import(path, alias.as_deref(), scope, stmt.span)
            }
            StmtKind::FromImport { dots, path, names } => {
                self.eval_from_import(*dots, path, names, scope, stmt.span)
            }
            StmtKind::Declare { name, annotation } => {
                let ty = self.resolve_type(annotation, scope)?;
                scope.declare(name, ty).map_err(|_| Error::Reassign {
                    name: name.clone(),
                    span: stmt.span,
                })
            }
            StmtKind::Assign {
                target,
                annotation,
                value,
            } => self.eval_assign(target, annotation.as_ref(), value, scope, stmt.span),
            StmtKind::If(if_stmt) => {
                if self.eval_expr(&if_stmt.condition, scope)?.truthiness() {
                    for inner in &if_stmt.body {
                        self.eval_stmt(inner, scope)?;
                    }
                } else {
                    for inner in &if_stmt.orelse {
                        self.eval_stmt(inner, scope)?;
                    }
                }
                Ok(())
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => self.eval_for(var, iterable, body, scope),
            StmtKind::ResourceDef(decl) => self.eval_resource_def(decl, stmt.span, scope),
            StmtKind::TypedefDef(decl) => {
                let base = self.resolve_type(&decl.base, scope)?;
                let def = TypedefDef {
                    name: decl.name.clone(),
                    base,
                    condition: decl.condition.clone(),
                    module: self.current_module(),
                };
                scope
                    .set(&decl.name, Value::Type(Type::Typedef(Arc::new(def))))
                    .map_err(|_| Error::Reassign {
                        name: decl.name.clone(),
                        span: stmt.span,
                    })
            }
            StmtKind::EnumDef(decl) => {
                let def = EnumDef {
                    name: decl.name.clone(),
                    members: decl.members.clone(),
                    module: self.current_module(),
                };
                scope
                    .set(&decl.name, Value::Type(Type::Enum(Arc::new(def))))
                    .map_err(|_| Error::Reassign {
                        name: decl.name.clone(),
                        span: stmt.span,
                    })
            }
            StmtKind::ExprStmt(expr) => {
                self.eval_expr(expr, scope)?;
                Ok(())
            }
        }
    }

    fn eval_assign(
        &mut self,
        target: &AssignTarget,
        annotation: Option<&TypeExpr>,
        value: &Expr,
        scope: &Scope,
        span: Span,
    ) -> Result<()> {
        let mut evaluated = self.eval_expr(value, scope)?;

        match target {
            AssignTarget::Name(name) => {
                if let Some(annotation) = annotation {
                    let ty = self.resolve_type(annotation, scope)?;
                    evaluated = self.coerce(evaluated, &ty, value.span)?;
                }
                scope.set(name, evaluated).map_err(|e| match e {
                    SetError::AlreadyAssigned => Error::Reassign {
                        name: name.clone(),
                        span,
                    },
                    SetError::DeclaredTypeMismatch { declared } => Error::TypeMismatch {
                        expected: declared.to_string(),
                        found: "an incompatible value".to_string(),
                        span: value.span,
                    },
                })
            }
            AssignTarget::Attr { object, name } => {
                if !matches!(object.kind, ExprKind::SelfRef) {
                    return Err(Error::Operation {
                        message: "property assignment is only allowed on 'self' inside a constructor"
                            .to_string(),
                        span,
                    });
                }
                let Stored::Value(Value::Resource(cell)) = self.lookup(scope, "self", span)? else {
                    return Err(Error::Name {
                        name: "self".to_string(),
                        span,
                    });
                };
                if cell.is_sealed()
                    || !self
                        .construction_stack
                        .iter()
                        .any(|open| Arc::ptr_eq(open, &cell))
                {
                    return Err(Error::Operation {
                        message: format!("resource '{}' is already constructed", cell.def.name),
                        span,
                    });
                }
                let Some(schema) = cell.def.properties.get(name).cloned() else {
                    return Err(Error::Constructor {
                        message: format!(
                            "resource '{}' has no property '{}'",
                            cell.def.name, name
                        ),
                        span,
                    });
                };
                if schema.promise {
                    return Err(Error::Constructor {
                        message: format!(
                            "property '{name}' is a promise and is filled during deploy"
                        ),
                        span,
                    });
                }
                if cell.get(name).is_some() {
                    return Err(Error::Reassign {
                        name: name.clone(),
                        span,
                    });
                }
                cell.set(name, evaluated).map_err(|message| Error::Constructor {
                    message,
                    span,
                })
            }
        }
    }

    fn eval_for(
        &mut self,
        var: &str,
        iterable: &Expr,
        body: &[Stmt],
        scope: &Scope,
    ) -> Result<()> {
        let collection = self.eval_expr(iterable, scope)?;
        let items: Vec<Value> = match &collection {
            Value::List(cell) => cell.elements(),
            // Dicts iterate their keys, in insertion order.
            Value::Dict(cell) => cell.entries().iter().map(|(k, _)| k.to_value()).collect(),
            other => {
                return Err(Error::Operation {
                    message: format!("'{}' is not iterable", other.type_of()),
                    span: iterable.span,
                });
            }
        };

        for item in items {
            // Fresh binding per iteration; the body cannot leak or reassign
            // across iterations.
            let iter_scope = scope.child(format!("for-{var}"));
            iter_scope
                .set(var, item)
                .map_err(|_| Error::internal("fresh loop scope rejected its binding"))?;
            for stmt in body {
                self.eval_stmt(stmt, &iter_scope)?;
            }
        }
        Ok(())
    }

    // === Types ===

    pub(crate) fn resolve_type(&mut self, texpr: &TypeExpr, scope: &Scope) -> Result<Type> {
        match &texpr.kind {
            TypeExprKind::Name(path) => self.resolve_type_name(path, scope, texpr.span),
            TypeExprKind::Generic { name, args } => {
                let head = name.join(".");
                match head.as_str() {
                    "Optional" => {
                        self.expect_type_arity(&head, args, 1, texpr.span)?;
                        let inner = self.resolve_type(&args[0], scope)?;
                        Ok(Type::Optional(Box::new(inner)))
                    }
                    "Union" => {
                        let mut members = Vec::new();
                        for arg in args {
                            members.push(self.resolve_type(arg, scope)?);
                        }
                        if members.len() == 1 {
                            Ok(members.pop().expect("checked len"))
                        } else {
                            Ok(Type::Union(members))
                        }
                    }
                    "list" | "List" => {
                        self.expect_type_arity(&head, args, 1, texpr.span)?;
                        let inner = self.resolve_type(&args[0], scope)?;
                        Ok(Type::List(Box::new(inner)))
                    }
                    "dict" | "Dict" => {
                        self.expect_type_arity(&head, args, 2, texpr.span)?;
                        let key = self.resolve_type(&args[0], scope)?;
                        let value = self.resolve_type(&args[1], scope)?;
                        if !key.valid_dict_key() {
                            return Err(Error::TypeMismatch {
                                expected: "a hashable key type (bool, int, str, enum)".to_string(),
                                found: key.to_string(),
                                span: args[0].span,
                            });
                        }
                        Ok(Type::Dict(Box::new(key), Box::new(value)))
                    }
                    other => Err(Error::Syntax {
                        message: format!("type '{other}' does not take parameters"),
                        span: texpr.span,
                    }),
                }
            }
        }
    }

    fn expect_type_arity(
        &self,
        name: &str,
        args: &[TypeExpr],
        expected: usize,
        span: Span,
    ) -> Result<()> {
        if args.len() != expected {
            return Err(Error::Syntax {
                message: format!(
                    "'{name}' takes {expected} type parameter{}, got {}",
                    if expected == 1 { "" } else { "s" },
                    args.len()
                ),
                span,
            });
        }
        Ok(())
    }

    fn resolve_type_name(&mut self, path: &[String], scope: &Scope, span: Span) -> Result<Type> {
        if path.len() == 1 {
            match path[0].as_str() {
                "bool" => return Ok(Type::Bool),
                "int" => return Ok(Type::Int),
                "float" => return Ok(Type::Float),
                "str" => return Ok(Type::Str),
                "ProtectedStr" => return Ok(Type::ProtectedStr),
                "Path" => return Ok(Type::Path),
                "None" => return Ok(Type::None),
                _ => {}
            }
        }

        // Walk `mod.sub.Name` through module environments.
        let mut current = self.lookup(scope, &path[0], span)?;
        for segment in &path[1..] {
            current = match current {
                Stored::Module(module) => {
                    module.get_local(segment).ok_or_else(|| Error::Name {
                        name: segment.clone(),
                        span,
                    })?
                }
                _ => {
                    return Err(Error::TypeMismatch {
                        expected: "a module".to_string(),
                        found: path.join("."),
                        span,
                    });
                }
            };
        }

        match current {
            Stored::Value(Value::Type(ty)) => Ok(ty),
            Stored::Value(Value::ResourceDef(def)) => Ok(Type::Resource(def)),
            _ => Err(Error::TypeMismatch {
                expected: "a type".to_string(),
                found: path.join("."),
                span,
            }),
        }
    }

    // === Coercion ===

    /// Coerce `value` to `target`, running typedef refinements as needed.
    pub(crate) fn coerce(&mut self, value: Value, target: &Type, span: Span) -> Result<Value> {
        if value.type_of().is_subtype(target) {
            return Ok(value);
        }

        match target {
            Type::Float => {
                if let Value::Int(i) = &value {
                    return Ok(Value::Float(*i as f64));
                }
            }
            Type::ProtectedStr => {
                if let Value::Str(s) = &value {
                    return Ok(Value::ProtectedStr(s.clone()));
                }
            }
            Type::Typedef(def) => {
                let inner = self.coerce(value, &def.base, span)?;
                if let Some(condition) = &def.condition {
                    let module_scope = self
                        .module_scopes
                        .get(&def.module)
                        .cloned()
                        .unwrap_or_else(|| Scope::new(def.module.clone()));
                    let cond_scope = module_scope.child(format!("{}-typedef", def.name));
                    cond_scope
                        .set("self", inner.clone())
                        .map_err(|_| Error::internal("typedef scope rejected 'self'"))?;
                    let result = self.eval_expr(condition, &cond_scope)?;
                    if !result.truthiness() {
                        return Err(Error::Refinement {
                            type_name: def.name.clone(),
                            value: inner.to_string(),
                            span,
                        });
                    }
                }
                return Ok(inner);
            }
            Type::Optional(inner) => {
                if matches!(value, Value::None) {
                    return Ok(Value::None);
                }
                return self.coerce(value, inner, span);
            }
            Type::Union(members) => {
                for member in members {
                    if let Ok(coerced) = self.coerce(value.clone(), member, span) {
                        return Ok(coerced);
                    }
                }
            }
            Type::List(element_type) => {
                if let Value::List(cell) = &value {
                    let mut coerced = Vec::new();
                    for element in cell.elements() {
                        coerced.push(self.coerce(element, element_type, span)?);
                    }
                    // Element-wise coercion constructs a new container.
                    return Ok(Value::List(Arc::new(ListCell::new(
                        (**element_type).clone(),
                        coerced,
                    ))));
                }
            }
            Type::Dict(key_type, value_type) => {
                if let Value::Dict(cell) = &value {
                    let mut entries = IndexMap::new();
                    for (key, element) in cell.entries() {
                        let key_value = self.coerce(key.to_value(), key_type, span)?;
                        let key = DictKey::from_value(&key_value).ok_or_else(|| {
                            Error::TypeMismatch {
                                expected: "a hashable key".to_string(),
                                found: key_value.type_of().to_string(),
                                span,
                            }
                        })?;
                        entries.insert(key, self.coerce(element, value_type, span)?);
                    }
                    return Ok(Value::Dict(Arc::new(DictCell::new(
                        (**key_type).clone(),
                        (**value_type).clone(),
                        entries,
                    ))));
                }
            }
            _ => {}
        }

        Err(Error::NotCoercible {
            from: value.type_of().to_string(),
            to: target.to_string(),
            span,
        })
    }

    // === Expressions ===

    pub(crate) fn eval_expr(&mut self, expr: &Expr, scope: &Scope) -> Result<Value> {
        match &expr.kind {
            ExprKind::Int(value) => Ok(Value::Int(*value)),
            ExprKind::Float(value) => Ok(Value::Float(*value)),
            ExprKind::Str(value) => Ok(Value::str(value.clone())),
            ExprKind::Bool(value) => Ok(Value::Bool(*value)),
            ExprKind::None => Ok(Value::None),
            ExprKind::FString(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStringPart::Lit(text) => out.push_str(text),
                        FStringPart::Expr(inner) => {
                            let value = self.eval_expr(inner, scope)?;
                            out.push_str(&value.interpolate());
                        }
                    }
                }
                Ok(Value::str(out))
            }
            ExprKind::Ident(name) => match self.lookup(scope, name, expr.span)? {
                Stored::Value(value) => Ok(value),
                Stored::Unset(_) => Err(Error::UnsetRead {
                    name: name.clone(),
                    span: expr.span,
                }),
                Stored::Module(_) => Err(Error::Operation {
                    message: format!("module '{name}' cannot be used as a value"),
                    span: expr.span,
                }),
            },
            ExprKind::SelfRef => match self.lookup(scope, "self", expr.span)? {
                Stored::Value(value) => Ok(value),
                _ => Err(Error::Name {
                    name: "self".to_string(),
                    span: expr.span,
                }),
            },
            ExprKind::Unary { op, operand } => {
                let value = self.eval_expr(operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.truthiness())),
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Ok(Value::Int(-i)),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(Error::Operation {
                            message: format!("cannot negate '{}'", other.type_of()),
                            span: expr.span,
                        }),
                    },
                }
            }
            ExprKind::Binary { op, left, right } => {
                self.eval_binary(*op, left, right, scope, expr.span)
            }
            ExprKind::Index { object, index } => self.eval_index(object, index, scope, expr.span),
            ExprKind::Attr { object, name } => {
                let base = self.resolve_path(object, scope)?;
                match base {
                    Resolved::Module(module) => match module.get_local(name) {
                        Some(Stored::Value(value)) => Ok(value),
                        Some(Stored::Module(_)) => Err(Error::Operation {
                            message: format!("module '{name}' cannot be used as a value"),
                            span: expr.span,
                        }),
                        Some(Stored::Unset(_)) => Err(Error::UnsetRead {
                            name: name.clone(),
                            span: expr.span,
                        }),
                        None => Err(Error::Name {
                            name: name.clone(),
                            span: expr.span,
                        }),
                    },
                    Resolved::Value(value) => self.attr_on_value(&value, name, expr.span),
                }
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, scope, expr.span),
            ExprKind::List(elements) => {
                let mut values = Vec::new();
                let mut element_type = Type::Any;
                for element in elements {
                    let value = self.eval_expr(element, scope)?;
                    element_type = if values.is_empty() {
                        value.type_of()
                    } else {
                        Type::unify(&element_type, &value.type_of())
                    };
                    values.push(value);
                }
                Ok(Value::List(Arc::new(ListCell::new(element_type, values))))
            }
            ExprKind::Dict(pairs) => {
                let mut entries = IndexMap::new();
                let mut key_type = Type::Any;
                let mut value_type = Type::Any;
                for (key_expr, value_expr) in pairs {
                    let key_value = self.eval_expr(key_expr, scope)?;
                    let key = DictKey::from_value(&key_value).ok_or_else(|| {
                        Error::TypeMismatch {
                            expected: "a hashable key (bool, int, str, enum)".to_string(),
                            found: key_value.type_of().to_string(),
                            span: key_expr.span,
                        }
                    })?;
                    let value = self.eval_expr(value_expr, scope)?;
                    key_type = if entries.is_empty() {
                        key_value.type_of()
                    } else {
                        Type::unify(&key_type, &key_value.type_of())
                    };
                    value_type = if entries.is_empty() {
                        value.type_of()
                    } else {
                        Type::unify(&value_type, &value.type_of())
                    };
                    if entries.insert(key, value).is_some() {
                        return Err(Error::Operation {
                            message: "duplicate key in dict literal".to_string(),
                            span: key_expr.span,
                        });
                    }
                }
                Ok(Value::Dict(Arc::new(DictCell::new(
                    key_type, value_type, entries,
                ))))
            }
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &Scope,
        span: Span,
    ) -> Result<Value> {
        match op {
            BinaryOp::And => {
                let lhs = self.eval_expr(left, scope)?;
                if !lhs.truthiness() {
                    return Ok(Value::Bool(false));
                }
                let rhs = self.eval_expr(right, scope)?;
                Ok(Value::Bool(rhs.truthiness()))
            }
            BinaryOp::Or => {
                let lhs = self.eval_expr(left, scope)?;
                if lhs.truthiness() {
                    return Ok(Value::Bool(true));
                }
                let rhs = self.eval_expr(right, scope)?;
                Ok(Value::Bool(rhs.truthiness()))
            }
            BinaryOp::In => {
                let needle = self.eval_expr(left, scope)?;
                let haystack = self.eval_expr(right, scope)?;
                match &haystack {
                    Value::List(cell) => {
                        Ok(Value::Bool(cell.elements().iter().any(|e| *e == needle)))
                    }
                    Value::Dict(cell) => Ok(Value::Bool(
                        cell.entries().iter().any(|(k, _)| k.to_value() == needle),
                    )),
                    Value::Str(s) => match &needle {
                        Value::Str(sub) => Ok(Value::Bool(s.contains(sub.as_ref()))),
                        other => Err(Error::Operation {
                            message: format!(
                                "'in <str>' needs a str on the left, got '{}'",
                                other.type_of()
                            ),
                            span,
                        }),
                    },
                    other => Err(Error::Operation {
                        message: format!("'{}' is not a container", other.type_of()),
                        span,
                    }),
                }
            }
            _ => {
                let lhs = self.eval_expr(left, scope)?;
                let rhs = self.eval_expr(right, scope)?;
                ops::apply_binary(op, &lhs, &rhs)
                    .map_err(|message| Error::Operation { message, span })
            }
        }
    }

    fn eval_index(
        &mut self,
        object: &Expr,
        index: &Expr,
        scope: &Scope,
        span: Span,
    ) -> Result<Value> {
        let container = self.eval_expr(object, scope)?;
        match &container {
            Value::List(cell) => {
                let Value::Int(i) = self.eval_expr(index, scope)? else {
                    return Err(Error::TypeMismatch {
                        expected: "int".to_string(),
                        found: "a non-integer index".to_string(),
                        span: index.span,
                    });
                };
                let len = cell.len() as i64;
                let effective = if i < 0 { len + i } else { i };
                if effective < 0 || effective >= len {
                    return Err(Error::Operation {
                        message: format!("list index {i} out of range (len {len})"),
                        span,
                    });
                }
                Ok(cell.get(effective as usize).expect("bounds checked"))
            }
            Value::Dict(cell) => {
                let key_value = self.eval_expr(index, scope)?;
                if !key_value.type_of().is_subtype(&cell.key_type()) {
                    return Err(Error::TypeMismatch {
                        expected: cell.key_type().to_string(),
                        found: key_value.type_of().to_string(),
                        span: index.span,
                    });
                }
                let key = DictKey::from_value(&key_value).ok_or_else(|| Error::TypeMismatch {
                    expected: "a hashable key".to_string(),
                    found: key_value.type_of().to_string(),
                    span: index.span,
                })?;
                cell.get(&key).ok_or_else(|| Error::Operation {
                    message: "no value stored for the given key".to_string(),
                    span,
                })
            }
            other => Err(Error::Operation {
                message: format!("'{}' is not indexable", other.type_of()),
                span,
            }),
        }
    }

    fn resolve_path(&mut self, expr: &Expr, scope: &Scope) -> Result<Resolved> {
        match &expr.kind {
            ExprKind::Ident(name) => match self.lookup(scope, name, expr.span)? {
                Stored::Module(module) => Ok(Resolved::Module(module)),
                Stored::Value(value) => Ok(Resolved::Value(value)),
                Stored::Unset(_) => Err(Error::UnsetRead {
                    name: name.clone(),
                    span: expr.span,
                }),
            },
            ExprKind::Attr { object, name } => {
                let base = self.resolve_path(object, scope)?;
                match base {
                    Resolved::Module(module) => match module.get_local(name) {
                        Some(Stored::Module(sub)) => Ok(Resolved::Module(sub)),
                        Some(Stored::Value(value)) => Ok(Resolved::Value(value)),
                        Some(Stored::Unset(_)) => Err(Error::UnsetRead {
                            name: name.clone(),
                            span: expr.span,
                        }),
                        None => Err(Error::Name {
                            name: name.clone(),
                            span: expr.span,
                        }),
                    },
                    Resolved::Value(value) => {
                        Ok(Resolved::Value(self.attr_on_value(&value, name, expr.span)?))
                    }
                }
            }
            _ => Ok(Resolved::Value(self.eval_expr(expr, scope)?)),
        }
    }

    fn attr_on_value(&mut self, value: &Value, name: &str, span: Span) -> Result<Value> {
        match value {
            Value::Resource(cell) => cell.get(name).ok_or_else(|| Error::Operation {
                message: format!(
                    "resource '{}' has no property '{name}'",
                    cell.def.name
                ),
                span,
            }),
            Value::Type(Type::Enum(def)) => {
                if def.members.iter().any(|m| m == name) {
                    Ok(Value::EnumMember(EnumMember {
                        def: def.clone(),
                        member: name.to_string(),
                    }))
                } else {
                    Err(Error::Name {
                        name: format!("{}.{name}", def.name),
                        span,
                    })
                }
            }
            other => Err(Error::Operation {
                message: format!(
                    "object of type '{}' has no property '{name}'",
                    other.type_of()
                ),
                span,
            }),
        }
    }

    // === Calls ===

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[CallArg],
        scope: &Scope,
        span: Span,
    ) -> Result<Value> {
        if let ExprKind::Attr { object, name } = &callee.kind {
            let base = self.resolve_path(object, scope)?;
            match base {
                Resolved::Module(module) => {
                    let member = match module.get_local(name) {
                        Some(Stored::Value(value)) => value,
                        Some(_) | None => {
                            return Err(Error::Name {
                                name: name.clone(),
                                span: callee.span,
                            });
                        }
                    };
                    return self.call_value(member, args, scope, span);
                }
                Resolved::Value(Value::List(cell)) if name == "append" => {
                    return self.call_list_append(&cell, args, scope, span);
                }
                Resolved::Value(value) => {
                    let member = self.attr_on_value(&value, name, callee.span)?;
                    return self.call_value(member, args, scope, span);
                }
            }
        }

        let callee_value = self.eval_expr(callee, scope)?;
        self.call_value(callee_value, args, scope, span)
    }

    fn call_list_append(
        &mut self,
        cell: &Arc<ListCell>,
        args: &[CallArg],
        scope: &Scope,
        span: Span,
    ) -> Result<Value> {
        if args.len() != 1 || args[0].name.is_some() {
            return Err(Error::Operation {
                message: "append takes exactly one positional argument".to_string(),
                span,
            });
        }
        let value = self.eval_expr(&args[0].value, scope)?;
        let element_type = cell.element_type();
        let value = if value.type_of().is_subtype(&element_type) {
            value
        } else if cell.is_empty() || matches!(element_type, Type::Any) {
            // Appending to a fresh or untyped list widens its element type.
            cell.set_element_type(Type::unify(&element_type, &value.type_of()));
            value
        } else {
            self.coerce(value, &element_type, span)?
        };
        cell.append(value).map_err(|message| Error::Operation {
            message: message.to_string(),
            span,
        })?;
        Ok(Value::None)
    }

    fn call_value(
        &mut self,
        callee: Value,
        args: &[CallArg],
        scope: &Scope,
        span: Span,
    ) -> Result<Value> {
        match callee {
            Value::ResourceDef(def) => self.construct_resource(def, args, scope, span),
            Value::Plugin(plugin) => self.call_plugin(&plugin, args, scope, span),
            Value::Type(ty) => self.convert_call(ty, args, scope, span),
            other => Err(Error::Operation {
                message: format!("'{}' is not callable", other.type_of()),
                span,
            }),
        }
    }

    fn call_plugin(
        &mut self,
        plugin: &Arc<PluginDef>,
        args: &[CallArg],
        scope: &Scope,
        span: Span,
    ) -> Result<Value> {
        if args.iter().any(|a| a.name.is_some()) {
            return Err(Error::Operation {
                message: format!("plugin '{}' takes positional arguments only", plugin.name),
                span,
            });
        }
        if args.len() != plugin.params.len() {
            return Err(Error::Constructor {
                message: format!(
                    "plugin '{}' takes {} argument(s), got {}",
                    plugin.name,
                    plugin.params.len(),
                    args.len()
                ),
                span,
            });
        }

        let mut values = Vec::new();
        for (arg, param) in args.iter().zip(&plugin.params) {
            let value = self.eval_expr(&arg.value, scope)?;
            let value = if matches!(param.ty, Type::Any) {
                value
            } else {
                self.coerce(value, &param.ty, arg.span)?
            };
            values.push(value);
        }

        trace!(plugin = %plugin.name, "calling plugin");
        (plugin.body)(&values).map_err(|e| match e {
            crate::plugin::PluginError::User(message) => Error::PluginUser {
                plugin: plugin.name.clone(),
                message,
                span,
            },
            crate::plugin::PluginError::Internal { message, trace } => Error::PluginInternal {
                plugin: plugin.name.clone(),
                message,
                trace: if self.plugin_stacktrace { trace } else { None },
                span,
            },
        })
    }

    /// Calling a type converts the argument: `int("5")`, `Port(8080)`.
    fn convert_call(
        &mut self,
        target: Type,
        args: &[CallArg],
        scope: &Scope,
        span: Span,
    ) -> Result<Value> {
        if args.len() != 1 || args[0].name.is_some() {
            return Err(Error::Operation {
                message: format!("'{target}' takes exactly one positional argument"),
                span,
            });
        }
        let value = self.eval_expr(&args[0].value, scope)?;

        if matches!(target, Type::Typedef(_)) {
            return self.coerce(value, &target, span);
        }

        let converted = match (&target, &value) {
            (Type::Int, Value::Int(_)) => value.clone(),
            (Type::Int, Value::Float(f)) => Value::Int(*f as i64),
            (Type::Int, Value::Bool(b)) => Value::Int(i64::from(*b)),
            (Type::Int, Value::Str(s)) => Value::Int(s.trim().parse().map_err(|_| {
                Error::Operation {
                    message: format!("cannot convert '{s}' to an int"),
                    span,
                }
            })?),
            (Type::Float, Value::Float(_)) => value.clone(),
            (Type::Float, Value::Int(i)) => Value::Float(*i as f64),
            (Type::Float, Value::Str(s)) => Value::Float(s.trim().parse().map_err(|_| {
                Error::Operation {
                    message: format!("cannot convert '{s}' to a float"),
                    span,
                }
            })?),
            (Type::Str, other) => Value::str(other.interpolate()),
            (Type::Bool, other) => Value::Bool(other.truthiness()),
            (Type::Path, Value::Str(s)) => Value::Path(Arc::new(PathBuf::from(s.as_ref()))),
            (Type::Path, Value::Path(_)) => value.clone(),
            (Type::ProtectedStr, Value::Str(s)) => Value::ProtectedStr(s.clone()),
            (Type::ProtectedStr, Value::ProtectedStr(_)) => value.clone(),
            _ => {
                return Err(Error::NotCoercible {
                    from: value.type_of().to_string(),
                    to: target.to_string(),
                    span,
                });
            }
        };
        Ok(converted)
    }

    // === Resource definitions ===

    fn eval_resource_def(
        &mut self,
        decl: &ResourceDecl,
        span: Span,
        scope: &Scope,
    ) -> Result<()> {
        let parent = match &decl.parent {
            Some(texpr) => match self.resolve_type(texpr, scope)? {
                Type::Resource(def) => Some(def),
                other => {
                    return Err(Error::TypeMismatch {
                        expected: "a resource definition".to_string(),
                        found: other.to_string(),
                        span: texpr.span,
                    });
                }
            },
            None => None,
        };

        if decl.inherit_only && parent.is_none() {
            return Err(Error::Constructor {
                message: format!("resource '{}' has a '...' body but no parent", decl.name),
                span,
            });
        }

        // A derived definition starts from a copy of the parent's schema.
        let mut properties: IndexMap<String, PropertySchema> = parent
            .as_ref()
            .map(|p| p.properties.clone())
            .unwrap_or_default();

        for prop in &decl.properties {
            let ty = self.resolve_type(&prop.ty, scope)?;
            if let Some(inherited) = properties.get(&prop.name) {
                // Overriding may only tighten the type.
                if !ty.is_subtype(&inherited.ty) {
                    return Err(Error::TypeMismatch {
                        expected: format!("a subtype of '{}'", inherited.ty),
                        found: ty.to_string(),
                        span: prop.span,
                    });
                }
            }
            properties.insert(
                prop.name.clone(),
                PropertySchema {
                    name: prop.name.clone(),
                    ty,
                    default: prop.default.clone(),
                    promise: prop.promise,
                    span: prop.span,
                },
            );
        }

        if properties.is_empty() {
            return Err(Error::Unindexable {
                def_name: decl.name.clone(),
                message: "it has no properties".to_string(),
                span,
            });
        }

        // Constructors are never inherited.
        let mut constructors = Vec::new();
        for ctor in &decl.constructors {
            if constructors.iter().any(|c: &Constructor| c.name == ctor.name) {
                return Err(Error::Constructor {
                    message: format!(
                        "constructor '{}' is defined twice on '{}'",
                        ctor.name, decl.name
                    ),
                    span: ctor.span,
                });
            }
            let mut params = Vec::new();
            for param in &ctor.params {
                params.push(CtorParam {
                    name: param.name.clone(),
                    ty: param
                        .ty
                        .as_ref()
                        .map(|t| self.resolve_type(t, scope))
                        .transpose()?,
                    default: param.default.clone(),
                    span: param.span,
                });
            }
            constructors.push(Constructor {
                name: ctor.name.clone(),
                params,
                body: ctor.body.clone(),
                constraint: ctor.constraint.clone(),
                span: ctor.span,
            });
        }

        let mut index_keys = Vec::new();
        for decorator in &decl.decorators {
            match decorator.name.as_str() {
                "index" => {
                    if decorator.args.len() != 1 {
                        return Err(Error::Syntax {
                            message: "@index takes one list argument".to_string(),
                            span: decorator.span,
                        });
                    }
                    let value = self.eval_expr(&decorator.args[0], scope)?;
                    let Value::List(list) = value else {
                        return Err(Error::TypeMismatch {
                            expected: "list[str]".to_string(),
                            found: value.type_of().to_string(),
                            span: decorator.span,
                        });
                    };
                    for element in list.elements() {
                        match element {
                            Value::Str(s) => index_keys.push(s.to_string()),
                            other => {
                                return Err(Error::TypeMismatch {
                                    expected: "str".to_string(),
                                    found: other.type_of().to_string(),
                                    span: decorator.span,
                                });
                            }
                        }
                    }
                }
                other => {
                    return Err(Error::Syntax {
                        message: format!("unknown decorator '@{other}'"),
                        span: decorator.span,
                    });
                }
            }
        }
        if index_keys.is_empty() {
            // Default rule: the first property serves as the index.
            let first = properties
                .first()
                .map(|(name, _)| name.clone())
                .expect("checked non-empty");
            index_keys.push(first);
        }

        let def = Arc::new(ResourceDef {
            name: decl.name.clone(),
            module: self.current_module(),
            span,
            parent,
            properties,
            constructors,
            index_keys,
        });

        scope
            .set(&decl.name, Value::ResourceDef(def))
            .map_err(|_| Error::Reassign {
                name: decl.name.clone(),
                span,
            })
    }

    // === Resource construction ===

    fn construct_resource(
        &mut self,
        def: Arc<ResourceDef>,
        args: &[CallArg],
        scope: &Scope,
        span: Span,
    ) -> Result<Value> {
        // Arguments evaluate exactly once, in the caller's scope.
        let mut positional: Vec<(Value, Span)> = Vec::new();
        let mut keyword: IndexMap<String, (Value, Span)> = IndexMap::new();
        for arg in args {
            let value = self.eval_expr(&arg.value, scope)?;
            match &arg.name {
                Some(name) => {
                    if keyword.insert(name.clone(), (value, arg.span)).is_some() {
                        return Err(Error::Constructor {
                            message: format!("duplicate keyword argument '{name}'"),
                            span: arg.span,
                        });
                    }
                }
                None => {
                    if !keyword.is_empty() {
                        return Err(Error::Constructor {
                            message: "positional argument after keyword argument".to_string(),
                            span: arg.span,
                        });
                    }
                    positional.push((value, arg.span));
                }
            }
        }

        let resource = Arc::new(ResourceCell::new(def.clone()));
        self.construction_stack.push(resource.clone());
        let result = self.run_construction(&resource, &def, positional, keyword, scope, span);
        self.construction_stack.pop();
        result?;

        // Compute and register the index; duplicates are compile errors.
        let index = def
            .index_of(|name| resource.get(name))
            .map_err(|message| Error::Unindexable {
                def_name: def.name.clone(),
                message,
                span,
            })?;
        let key = (def.name.clone(), index.clone());
        if self.resources.contains_key(&key) {
            return Err(Error::DuplicateIndex {
                def_name: def.name.clone(),
                index,
                span,
            });
        }
        resource.seal(index.clone());
        self.resources.insert(key, resource.clone());
        trace!(resource = %index, "resource constructed");

        Ok(Value::Resource(resource))
    }

    fn run_construction(
        &mut self,
        resource: &Arc<ResourceCell>,
        def: &Arc<ResourceDef>,
        positional: Vec<(Value, Span)>,
        keyword: IndexMap<String, (Value, Span)>,
        caller_scope: &Scope,
        span: Span,
    ) -> Result<()> {
        let module_scope = self
            .module_scopes
            .get(&def.module)
            .cloned()
            .unwrap_or_else(|| Scope::new(def.module.clone()));

        if def.constructors.is_empty() {
            self.run_default_construction(resource, def, positional, keyword, &module_scope, span)?;
        } else {
            let (ctor, binding) =
                self.dispatch_constructor(def, &positional, &keyword, caller_scope, span)?;
            let exec_scope = module_scope.child(format!("{}.{}", def.name, ctor.name));
            exec_scope
                .set("self", Value::Resource(resource.clone()))
                .map_err(|_| Error::internal("constructor scope rejected 'self'"))?;
            for (name, value) in &binding {
                exec_scope
                    .set(name, value.clone())
                    .map_err(|_| Error::internal("constructor scope rejected a parameter"))?;
            }
            // Unbound parameters take their default expressions.
            for param in &ctor.params {
                if binding.contains_key(&param.name) {
                    continue;
                }
                let default = param.default.clone().ok_or_else(|| Error::Constructor {
                    message: format!("missing argument '{}'", param.name),
                    span,
                })?;
                let mut value = self.eval_expr(&default, &exec_scope)?;
                if let Some(ty) = &param.ty {
                    value = self.coerce(value, ty, span)?;
                }
                exec_scope
                    .set(&param.name, value)
                    .map_err(|_| Error::internal("constructor scope rejected a default"))?;
            }
            let body = ctor.body.clone();
            for stmt in &body {
                self.eval_stmt(stmt, &exec_scope)?;
            }
        }

        // Promise properties get their one-shot slots after the body ran.
        for (name, schema) in &def.properties {
            if !schema.promise {
                continue;
            }
            if resource.get(name).is_some() {
                return Err(Error::Constructor {
                    message: format!("constructor assigned promise property '{name}'"),
                    span,
                });
            }
            let cell = Arc::new(PromiseCell::new(name.clone(), schema.ty.clone()));
            cell.bind_owner(resource);
            resource
                .set(name, Value::Promise(cell.clone()))
                .map_err(|message| Error::Constructor { message, span })?;
            resource.register_promise(name, cell);
        }

        // Fill defaults, require the rest, and coerce everything.
        for (name, schema) in &def.properties {
            if schema.promise {
                continue;
            }
            let value = match resource.get(name) {
                Some(value) => value,
                None => {
                    let default = schema.default.clone().ok_or_else(|| Error::Constructor {
                        message: format!(
                            "property '{}' of '{}' was never assigned",
                            name, def.name
                        ),
                        span,
                    })?;
                    let value = self.eval_expr(&default, &module_scope)?;
                    resource
                        .set(name, value.clone())
                        .map_err(|message| Error::Constructor { message, span })?;
                    value
                }
            };
            let coerced = self.coerce(value, &schema.ty, span)?;
            resource.overwrite(name, coerced);
        }
        Ok(())
    }

    /// No explicit constructors: bind arguments to the property schema in
    /// declaration order.
    fn run_default_construction(
        &mut self,
        resource: &Arc<ResourceCell>,
        def: &Arc<ResourceDef>,
        positional: Vec<(Value, Span)>,
        keyword: IndexMap<String, (Value, Span)>,
        _module_scope: &Scope,
        span: Span,
    ) -> Result<()> {
        let assignable: Vec<&PropertySchema> = def
            .properties
            .values()
            .filter(|schema| !schema.promise)
            .collect();

        if positional.len() > assignable.len() {
            return Err(Error::Constructor {
                message: format!(
                    "'{}' takes at most {} argument(s), got {}",
                    def.name,
                    assignable.len(),
                    positional.len()
                ),
                span,
            });
        }

        let mut bound: IndexMap<String, (Value, Span)> = IndexMap::new();
        for (schema, value) in assignable.iter().zip(positional) {
            bound.insert(schema.name.clone(), value);
        }
        for (name, value) in keyword {
            if !def.properties.contains_key(&name) || def.properties[&name].promise {
                return Err(Error::Constructor {
                    message: format!("'{}' has no settable property '{name}'", def.name),
                    span: value.1,
                });
            }
            if bound.insert(name.clone(), value).is_some() {
                return Err(Error::Constructor {
                    message: format!("property '{name}' given twice"),
                    span,
                });
            }
        }

        for (name, (value, value_span)) in bound {
            resource
                .set(&name, value)
                .map_err(|message| Error::Constructor {
                    message,
                    span: value_span,
                })?;
        }
        Ok(())
    }

    /// Overload resolution: arity and names, then parameter types, then
    /// `@constraint` truth. Exactly one candidate must survive.
    fn dispatch_constructor(
        &mut self,
        def: &Arc<ResourceDef>,
        positional: &[(Value, Span)],
        keyword: &IndexMap<String, (Value, Span)>,
        caller_scope: &Scope,
        span: Span,
    ) -> Result<(Constructor, IndexMap<String, Value>)> {
        let single = def.constructors.len() == 1;
        let overloads = def.constructors.clone();
        let mut candidates: Vec<(usize, IndexMap<String, Value>)> = Vec::new();

        for (idx, ctor) in overloads.iter().enumerate() {
            match self.try_bind(ctor, positional, keyword, span) {
                Ok(Some(binding)) => candidates.push((idx, binding)),
                Ok(None) => {}
                // With a single overload the coercion failure is the real
                // diagnostic; with several it just eliminates a candidate.
                Err(e) if single => return Err(e),
                Err(_) => {}
            }
        }

        match candidates.len() {
            0 => Err(Error::Constructor {
                message: format!("no constructor of '{}' matches the given arguments", def.name),
                span,
            }),
            1 => {
                let (idx, binding) = candidates.into_iter().next().expect("checked len");
                Ok((def.constructors[idx].clone(), binding))
            }
            _ => {
                // Constraint dispatch. Every remaining overload needs one.
                if candidates
                    .iter()
                    .any(|(idx, _)| def.constructors[*idx].constraint.is_none())
                {
                    return Err(Error::Ambiguous {
                        message: format!(
                            "multiple constructors of '{}' match; add @constraint to disambiguate",
                            def.name
                        ),
                        span,
                    });
                }

                let mut matching = Vec::new();
                for (idx, binding) in candidates {
                    let constraint = def.constructors[idx]
                        .constraint
                        .clone()
                        .expect("checked above");
                    let constraint_scope = caller_scope.child("constraint");
                    for (name, value) in &binding {
                        constraint_scope
                            .set(name, value.clone())
                            .map_err(|_| Error::internal("constraint scope rejected a binding"))?;
                    }
                    if self.eval_expr(&constraint, &constraint_scope)?.truthiness() {
                        matching.push((idx, binding));
                    }
                }

                match matching.len() {
                    1 => {
                        let (idx, binding) = matching.into_iter().next().expect("checked len");
                        Ok((def.constructors[idx].clone(), binding))
                    }
                    0 => Err(Error::Constructor {
                        message: format!(
                            "no constructor constraint of '{}' holds for the given arguments",
                            def.name
                        ),
                        span,
                    }),
                    _ => Err(Error::Ambiguous {
                        message: format!(
                            "constraints of '{}' are ambiguous: more than one holds",
                            def.name
                        ),
                        span,
                    }),
                }
            }
        }
    }

    /// Bind arguments against one overload's signature.
    ///
    /// `Ok(None)` means the shape does not fit (arity or names);
    /// `Err` means the shape fits but a value failed type coercion.
    fn try_bind(
        &mut self,
        ctor: &Constructor,
        positional: &[(Value, Span)],
        keyword: &IndexMap<String, (Value, Span)>,
        span: Span,
    ) -> Result<Option<IndexMap<String, Value>>> {
        if positional.len() > ctor.params.len() {
            return Ok(None);
        }

        let mut binding: IndexMap<String, (Value, Span)> = IndexMap::new();
        for (param, value) in ctor.params.iter().zip(positional.iter().cloned()) {
            binding.insert(param.name.clone(), value);
        }
        for (name, value) in keyword {
            if !ctor.params.iter().any(|p| p.name == *name) {
                return Ok(None);
            }
            if binding.insert(name.clone(), value.clone()).is_some() {
                return Ok(None);
            }
        }
        // Unbound parameters must have defaults.
        for param in &ctor.params {
            if !binding.contains_key(&param.name) && param.default.is_none() {
                return Ok(None);
            }
        }

        let mut coerced: IndexMap<String, Value> = IndexMap::new();
        for param in &ctor.params {
            let Some((value, value_span)) = binding.shift_remove(&param.name) else {
                continue;
            };
            let value = match &param.ty {
                Some(ty) => {
                    let target_span = if value_span.is_empty() { span } else { value_span };
                    self.coerce(value, ty, target_span)?
                }
                None => value,
            };
            coerced.insert(param.name.clone(), value);
        }
        Ok(Some(coerced))
    }
}
