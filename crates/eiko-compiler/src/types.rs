//! Type representation and the subtyping lattice.
//!
//! Coercion that needs to run user code (typedef refinements) lives on the
//! evaluator; everything purely structural is here.

use std::fmt;
use std::sync::Arc;

use eiko_parser::ast::Expr;

use crate::resource::ResourceDef;

/// A named refinement of a base type: `typedef Port int if ...`.
#[derive(Debug)]
pub struct TypedefDef {
    pub name: String,
    pub base: Type,
    /// Condition evaluated with `self` bound to the candidate value.
    pub condition: Option<Expr>,
    /// Module the typedef was declared in, for diagnostics.
    pub module: String,
}

/// An enumeration: a closed set of named members.
#[derive(Debug, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub members: Vec<String>,
    pub module: String,
}

#[derive(Debug, Clone)]
pub enum Type {
    Bool,
    Int,
    Float,
    Str,
    /// A `str` whose value is redacted in all user-visible output.
    ProtectedStr,
    Path,
    None,
    List(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    Union(Vec<Type>),
    Optional(Box<Type>),
    Resource(Arc<ResourceDef>),
    Typedef(Arc<TypedefDef>),
    Enum(Arc<EnumDef>),
    /// Element type of empty containers; compatible with everything.
    Any,
}

impl Type {
    /// Is `self` usable where `expected` is required, without coercion?
    pub fn is_subtype(&self, expected: &Type) -> bool {
        match (self, expected) {
            (_, Type::Any) | (Type::Any, _) => true,
            (Type::Bool, Type::Bool)
            | (Type::Int, Type::Int)
            | (Type::Float, Type::Float)
            | (Type::Str, Type::Str)
            | (Type::Path, Type::Path)
            | (Type::None, Type::None) => true,
            // A protected string is still a string.
            (Type::ProtectedStr, Type::ProtectedStr) | (Type::ProtectedStr, Type::Str) => true,
            (Type::List(a), Type::List(b)) => a.is_subtype(b),
            (Type::Dict(ka, va), Type::Dict(kb, vb)) => ka.is_subtype(kb) && va.is_subtype(vb),
            (Type::Optional(inner), expected) if matches!(expected, Type::Optional(_)) => {
                let Type::Optional(other) = expected else {
                    unreachable!()
                };
                inner.is_subtype(other)
            }
            (Type::None, Type::Optional(_)) => true,
            (t, Type::Optional(inner)) => t.is_subtype(inner),
            (Type::Union(members), expected) => {
                members.iter().all(|m| m.is_subtype(expected))
            }
            (t, Type::Union(members)) => members.iter().any(|m| t.is_subtype(m)),
            (Type::Resource(a), Type::Resource(b)) => {
                let mut current = Some(a.clone());
                while let Some(def) = current {
                    if Arc::ptr_eq(&def, b) || def.name == b.name && def.module == b.module {
                        return true;
                    }
                    current = def.parent.clone();
                }
                false
            }
            // A typedef is a subtype of its base (and of its base's bases).
            (Type::Typedef(a), expected) => {
                if let Type::Typedef(b) = expected {
                    if Arc::ptr_eq(a, b) || (a.name == b.name && a.module == b.module) {
                        return true;
                    }
                }
                a.base.is_subtype(expected)
            }
            (Type::Enum(a), Type::Enum(b)) => {
                Arc::ptr_eq(a, b) || (a.name == b.name && a.module == b.module)
            }
            _ => false,
        }
    }

    /// Smallest type admitting both `a` and `b`; used for inferring
    /// container element types from literals.
    pub fn unify(a: &Type, b: &Type) -> Type {
        if a.is_subtype(b) {
            return b.clone();
        }
        if b.is_subtype(a) {
            return a.clone();
        }
        let mut members = Vec::new();
        let mut push = |t: &Type| {
            if let Type::Union(inner) = t {
                for m in inner {
                    if !members.iter().any(|e: &Type| t_eq(e, m)) {
                        members.push(m.clone());
                    }
                }
            } else if !members.iter().any(|e: &Type| t_eq(e, t)) {
                members.push(t.clone());
            }
        };
        push(a);
        push(b);
        Type::Union(members)
    }

    /// Dict keys are restricted to hashable scalar kinds.
    pub fn valid_dict_key(&self) -> bool {
        match self {
            Type::Bool | Type::Int | Type::Str | Type::Enum(_) => true,
            Type::Typedef(def) => def.base.valid_dict_key(),
            _ => false,
        }
    }

    /// Types whose values can serve as a resource's default index.
    pub fn indexable(&self) -> bool {
        match self {
            Type::Str | Type::Int | Type::Path | Type::Enum(_) | Type::ProtectedStr => true,
            Type::Typedef(def) => def.base.indexable(),
            _ => false,
        }
    }
}

/// Structural equality good enough for dedup in unions.
fn t_eq(a: &Type, b: &Type) -> bool {
    a.to_string() == b.to_string()
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Str => write!(f, "str"),
            Type::ProtectedStr => write!(f, "ProtectedStr"),
            Type::Path => write!(f, "Path"),
            Type::None => write!(f, "None"),
            Type::List(t) => write!(f, "list[{t}]"),
            Type::Dict(k, v) => write!(f, "dict[{k}, {v}]"),
            Type::Union(members) => {
                let names: Vec<String> = members.iter().map(Type::to_string).collect();
                write!(f, "Union[{}]", names.join(", "))
            }
            Type::Optional(t) => write!(f, "Optional[{t}]"),
            Type::Resource(def) => write!(f, "{}", def.name),
            Type::Typedef(def) => write!(f, "{}", def.name),
            Type::Enum(def) => write!(f, "{}", def.name),
            Type::Any => write!(f, "Any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_their_own_subtypes() {
        assert!(Type::Int.is_subtype(&Type::Int));
        assert!(!Type::Int.is_subtype(&Type::Str));
    }

    #[test]
    fn protected_str_is_a_str() {
        assert!(Type::ProtectedStr.is_subtype(&Type::Str));
        assert!(!Type::Str.is_subtype(&Type::ProtectedStr));
    }

    #[test]
    fn optional_admits_none_and_inner() {
        let opt = Type::Optional(Box::new(Type::Int));
        assert!(Type::None.is_subtype(&opt));
        assert!(Type::Int.is_subtype(&opt));
        assert!(!Type::Str.is_subtype(&opt));
    }

    #[test]
    fn union_membership() {
        let union = Type::Union(vec![Type::Int, Type::Str]);
        assert!(Type::Int.is_subtype(&union));
        assert!(Type::Str.is_subtype(&union));
        assert!(!Type::Float.is_subtype(&union));
    }

    #[test]
    fn typedef_is_subtype_of_base() {
        let port = Type::Typedef(Arc::new(TypedefDef {
            name: "Port".to_string(),
            base: Type::Int,
            condition: None,
            module: "__main__".to_string(),
        }));
        assert!(port.is_subtype(&Type::Int));
        assert!(!Type::Int.is_subtype(&port));
    }

    #[test]
    fn unify_builds_unions() {
        let unified = Type::unify(&Type::Int, &Type::Str);
        assert_eq!(unified.to_string(), "Union[int, str]");
        assert_eq!(Type::unify(&Type::Int, &Type::Int).to_string(), "int");
    }

    #[test]
    fn dict_key_restriction() {
        assert!(Type::Str.valid_dict_key());
        assert!(Type::Int.valid_dict_key());
        assert!(Type::Bool.valid_dict_key());
        assert!(!Type::Float.valid_dict_key());
        assert!(!Type::List(Box::new(Type::Int)).valid_dict_key());
    }
}
