//! Resource definitions: property schemas, constructor overloads and
//! index rules.

use std::sync::Arc;

use eiko_foundation::Span;
use eiko_parser::ast::{Expr, Stmt};
use indexmap::IndexMap;

use crate::types::Type;
use crate::value::Value;

/// Schema of one resource property.
#[derive(Debug, Clone)]
pub struct PropertySchema {
    pub name: String,
    pub ty: Type,
    /// Default expression, evaluated in the defining module's scope when
    /// the constructor leaves the property unassigned.
    pub default: Option<Expr>,
    /// Declared with the `promise` marker; filled during deployment.
    pub promise: bool,
    pub span: Span,
}

/// One constructor overload.
#[derive(Debug, Clone)]
pub struct Constructor {
    pub name: String,
    pub params: Vec<CtorParam>,
    pub body: Vec<Stmt>,
    /// `@constraint(expr)` evaluated with bound arguments for dispatch.
    pub constraint: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct CtorParam {
    pub name: String,
    pub ty: Option<Type>,
    pub default: Option<Expr>,
    pub span: Span,
}

/// The compiled form of a `resource` block.
#[derive(Debug)]
pub struct ResourceDef {
    pub name: String,
    /// Module the definition came from, for diagnostics and identity.
    pub module: String,
    pub span: Span,
    pub parent: Option<Arc<ResourceDef>>,
    /// Full property schema, parent properties first.
    pub properties: IndexMap<String, PropertySchema>,
    /// Constructor overloads; never inherited from the parent.
    pub constructors: Vec<Constructor>,
    /// Property paths making up the index, from `@index([...])` or the
    /// default first-property rule.
    pub index_keys: Vec<String>,
}

impl ResourceDef {
    /// Compute the index string of a constructed resource: the definition
    /// name and each key path's value, joined with `-`.
    pub fn index_of(&self, lookup: impl Fn(&str) -> Option<Value>) -> Result<String, String> {
        let mut parts = vec![self.name.clone()];
        for key in &self.index_keys {
            let mut value = lookup(
                key.split('.')
                    .next()
                    .expect("split always yields at least one part"),
            )
            .ok_or_else(|| format!("index property '{key}' was never assigned"))?;
            // Dot-paths walk through nested resources.
            for step in key.split('.').skip(1) {
                match value {
                    Value::Resource(cell) => {
                        value = cell
                            .get(step)
                            .ok_or_else(|| format!("index path '{key}' has no property '{step}'"))?;
                    }
                    _ => return Err(format!("index path '{key}' does not traverse a resource")),
                }
            }
            parts.push(
                value
                    .index_string()
                    .ok_or_else(|| format!("property '{key}' has no usable string form"))?,
            );
        }
        Ok(parts.join("-"))
    }

    /// Walk the inheritance chain, self first.
    pub fn ancestry(self: &Arc<Self>) -> Vec<Arc<ResourceDef>> {
        let mut chain = vec![self.clone()];
        let mut current = self.parent.clone();
        while let Some(def) = current {
            current = def.parent.clone();
            chain.push(def);
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eiko_foundation::Span;

    fn def_with_keys(keys: &[&str]) -> ResourceDef {
        ResourceDef {
            name: "Wheel".to_string(),
            module: "__main__".to_string(),
            span: Span::zero(0),
            parent: None,
            properties: IndexMap::new(),
            constructors: Vec::new(),
            index_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn index_joins_parts_with_dashes() {
        let def = def_with_keys(&["brand"]);
        let index = def
            .index_of(|name| (name == "brand").then(|| Value::str("Toyota")))
            .unwrap();
        assert_eq!(index, "Wheel-Toyota");
    }

    #[test]
    fn index_with_multiple_keys() {
        let def = def_with_keys(&["brand", "size"]);
        let index = def
            .index_of(|name| match name {
                "brand" => Some(Value::str("Toyota")),
                "size" => Some(Value::Int(17)),
                _ => None,
            })
            .unwrap();
        assert_eq!(index, "Wheel-Toyota-17");
    }

    #[test]
    fn index_fails_on_missing_property() {
        let def = def_with_keys(&["brand"]);
        assert!(def.index_of(|_| None).is_err());
    }
}
