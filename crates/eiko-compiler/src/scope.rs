//! Lexical scopes.
//!
//! Scopes hold variables, definitions and module environments. A module's
//! scope is reused across imports; constructor bodies and typedef
//! refinements get sub-scopes chained to their defining scope.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::types::Type;
use crate::value::Value;

/// What a name can be bound to.
#[derive(Debug, Clone)]
pub enum Stored {
    Value(Value),
    /// Forward declaration: `x: int`. May be written exactly once.
    Unset(Type),
    /// A module environment (`import a.b` binds `a` to one).
    Module(Scope),
}

#[derive(Debug)]
struct ScopeData {
    name: String,
    bindings: IndexMap<String, Stored>,
    parent: Option<Scope>,
}

/// Shared handle to one scope frame.
#[derive(Debug, Clone)]
pub struct Scope(Rc<RefCell<ScopeData>>);

/// Outcome of a `set` on an existing binding.
#[derive(Debug)]
pub enum SetError {
    /// The name is already bound to a value.
    AlreadyAssigned,
    /// Forward-declared with an incompatible type.
    DeclaredTypeMismatch { declared: Type },
}

impl PartialEq for SetError {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (SetError::AlreadyAssigned, SetError::AlreadyAssigned)
                | (SetError::DeclaredTypeMismatch { .. }, SetError::DeclaredTypeMismatch { .. })
        )
    }
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Scope(Rc::new(RefCell::new(ScopeData {
            name: name.into(),
            bindings: IndexMap::new(),
            parent: None,
        })))
    }

    /// A child scope that reads through to `self`.
    pub fn child(&self, name: impl Into<String>) -> Scope {
        Scope(Rc::new(RefCell::new(ScopeData {
            name: name.into(),
            bindings: IndexMap::new(),
            parent: Some(self.clone()),
        })))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn same_frame(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Look a name up here or in any ancestor scope.
    pub fn get(&self, name: &str) -> Option<Stored> {
        let data = self.0.borrow();
        if let Some(stored) = data.bindings.get(name) {
            return Some(stored.clone());
        }
        data.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Look a name up in this frame only.
    pub fn get_local(&self, name: &str) -> Option<Stored> {
        self.0.borrow().bindings.get(name).cloned()
    }

    /// Bind a name. Rebinding is only legal over a compatible forward
    /// declaration; everything else is a reassignment error.
    pub fn set(&self, name: &str, value: Value) -> Result<(), SetError> {
        let mut data = self.0.borrow_mut();
        match data.bindings.get(name) {
            Some(Stored::Unset(declared)) => {
                if !value.type_of().is_subtype(declared) {
                    return Err(SetError::DeclaredTypeMismatch {
                        declared: declared.clone(),
                    });
                }
            }
            Some(_) => return Err(SetError::AlreadyAssigned),
            None => {}
        }
        data.bindings.insert(name.to_string(), Stored::Value(value));
        Ok(())
    }

    /// Forward-declare a name with a type, without a value.
    pub fn declare(&self, name: &str, ty: Type) -> Result<(), SetError> {
        let mut data = self.0.borrow_mut();
        if data.bindings.contains_key(name) {
            return Err(SetError::AlreadyAssigned);
        }
        data.bindings.insert(name.to_string(), Stored::Unset(ty));
        Ok(())
    }

    /// Bind a module environment, or return the existing one.
    pub fn get_or_insert_module(&self, name: &str) -> Result<Scope, SetError> {
        let mut data = self.0.borrow_mut();
        match data.bindings.get(name) {
            Some(Stored::Module(scope)) => Ok(scope.clone()),
            Some(_) => Err(SetError::AlreadyAssigned),
            None => {
                let scope = Scope::new(name);
                data.bindings
                    .insert(name.to_string(), Stored::Module(scope.clone()));
                Ok(scope)
            }
        }
    }

    pub fn set_module(&self, name: &str, module: Scope) -> Result<(), SetError> {
        let mut data = self.0.borrow_mut();
        if data.bindings.contains_key(name) {
            return Err(SetError::AlreadyAssigned);
        }
        data.bindings.insert(name.to_string(), Stored::Module(module));
        Ok(())
    }

    /// Snapshot of the bindings in this frame, in insertion order.
    pub fn bindings(&self) -> Vec<(String, Stored)> {
        self.0
            .borrow()
            .bindings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_reassign_fails() {
        let scope = Scope::new("test");
        scope.set("a", Value::Int(1)).unwrap();
        assert_eq!(scope.set("a", Value::Int(2)), Err(SetError::AlreadyAssigned));
    }

    #[test]
    fn forward_declaration_allows_one_write() {
        let scope = Scope::new("test");
        scope.declare("a", Type::Int).unwrap();
        scope.set("a", Value::Int(1)).unwrap();
        assert_eq!(scope.set("a", Value::Int(2)), Err(SetError::AlreadyAssigned));
    }

    #[test]
    fn forward_declaration_enforces_type() {
        let scope = Scope::new("test");
        scope.declare("a", Type::Int).unwrap();
        let err = scope.set("a", Value::str("nope")).unwrap_err();
        assert!(matches!(err, SetError::DeclaredTypeMismatch { .. }));
    }

    #[test]
    fn child_reads_through_to_parent() {
        let parent = Scope::new("module");
        parent.set("a", Value::Int(1)).unwrap();
        let child = parent.child("block");
        assert!(matches!(child.get("a"), Some(Stored::Value(Value::Int(1)))));
        // Shadowing in the child is a fresh binding, not a reassignment.
        child.set("a", Value::Int(2)).unwrap();
        assert!(matches!(parent.get("a"), Some(Stored::Value(Value::Int(1)))));
    }
}
