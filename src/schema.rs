//! Attribute registry.
//!
//! Every fact store is tied to one [`Schema`], which hands out the [`Attr`]
//! identifiers clauses and facts are keyed by. The `Type` attribute is
//! reserved and registered first in every schema.

use indexmap::IndexMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ConstructionError;

/// Name of the reserved attribute carrying an entity's runtime type.
pub const TYPE_ATTR_NAME: &str = "Type";

/// Source of schema identities; every built schema takes the next one
static NEXT_SCHEMA_ID: AtomicU64 = AtomicU64::new(0);

/// Identifier of an entity attribute, issued by a [`Schema`]
///
/// An attribute remembers the schema that issued it, so attributes of two
/// schemas never compare equal even when declared at the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attr {
    schema: u64,
    idx: u32,
}

impl Attr {
    pub(crate) fn index(self) -> usize {
        self.idx as usize
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.idx)
    }
}

/// Immutable set of attribute declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    id: u64,
    name: String,
    attrs: IndexMap<String, Attr>,
}

impl Schema {
    /// Start declaring a schema called `name`
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            attrs: vec![TYPE_ATTR_NAME.to_string()],
        }
    }

    /// Schema name, used in diagnostics
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve an attribute by name
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::UnknownAttribute`] if `name` was never declared.
    pub fn attr(&self, name: &str) -> Result<Attr, ConstructionError> {
        self.attrs
            .get(name)
            .copied()
            .ok_or_else(|| ConstructionError::UnknownAttribute {
                schema: self.name.clone(),
                name: name.to_string(),
            })
    }

    /// The reserved `Type` attribute
    #[must_use]
    pub fn type_attr(&self) -> Attr {
        Attr {
            schema: self.id,
            idx: 0,
        }
    }

    /// Name an attribute was declared under
    #[must_use]
    pub fn attr_name(&self, attr: Attr) -> Option<&str> {
        self.attrs.get_index(attr.index()).map(|(name, _)| name.as_str())
    }

    /// Whether `attr` was issued by this schema
    #[must_use]
    pub fn contains(&self, attr: Attr) -> bool {
        attr.schema == self.id && attr.index() < self.attrs.len()
    }

    /// Number of declared attributes, including `Type`
    #[must_use]
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    /// Always false: `Type` is always declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// All attributes in declaration order
    pub fn attrs(&self) -> impl Iterator<Item = (&str, Attr)> {
        self.attrs.iter().map(|(name, attr)| (name.as_str(), *attr))
    }
}

/// Collects attribute names for a [`Schema`]
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    attrs: Vec<String>,
}

impl SchemaBuilder {
    /// Declare an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.attrs.push(name.into());
        self
    }

    /// Finish the schema
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::DuplicateAttribute`] if a name was declared
    /// twice, including a redeclaration of `Type`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(self) -> Result<Schema, ConstructionError> {
        let id = NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed);
        let mut attrs = IndexMap::with_capacity(self.attrs.len());
        for (idx, name) in self.attrs.into_iter().enumerate() {
            if attrs.contains_key(&name) {
                return Err(ConstructionError::DuplicateAttribute {
                    schema: self.name,
                    name,
                });
            }
            let attr = Attr {
                schema: id,
                idx: idx as u32,
            };
            attrs.insert(name, attr);
        }
        Ok(Schema {
            id,
            name: self.name,
            attrs,
        })
    }
}
