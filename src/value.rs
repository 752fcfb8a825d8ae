use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Identifier of an entity in a [`FactStore`](crate::FactStore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Runtime type descriptor used by type constraints.
///
/// Two tags are equal when they were derived from the same Rust type, or from
/// two types that convert into the same [`Value`] variant: every integer type
/// with a `Value` conversion tags as `i64`, every string type as `str`. A
/// [`Value`] sample tags as its payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(TypeId);

impl TypeTag {
    /// Tag of the type `T`
    #[must_use]
    pub fn of<T: Any + ?Sized>() -> Self {
        Self::canonical(TypeId::of::<T>())
    }

    /// Tag of the concrete type behind `sample`
    #[must_use]
    pub fn of_val(sample: &dyn Any) -> Self {
        if let Some(value) = sample.downcast_ref::<Value>() {
            return value.type_tag();
        }
        Self::canonical(sample.type_id())
    }

    fn canonical(id: TypeId) -> Self {
        let ints = [TypeId::of::<i32>(), TypeId::of::<u32>()];
        let strs = [
            TypeId::of::<&'static str>(),
            TypeId::of::<String>(),
            TypeId::of::<Arc<str>>(),
        ];
        if ints.contains(&id) {
            Self(TypeId::of::<i64>())
        } else if strs.contains(&id) {
            Self(TypeId::of::<str>())
        } else {
            Self(id)
        }
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({:?})", self.0)
    }
}

/// A value stored in a fact or bound to a variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Boolean literal
    Bool(bool),
    /// Signed integer literal
    Int(i64),
    /// String literal
    Str(Arc<str>),
    /// Reference to an entity
    Entity(EntityId),
    /// Runtime type descriptor, the value of the reserved `Type` attribute
    ///
    /// Type identities are process-local, so this variant has no serialized
    /// form: serializing it is an error.
    #[cfg_attr(feature = "serde", serde(skip))]
    Type(TypeTag),
}

impl Value {
    /// The entity this value refers to, if it is an entity reference
    #[must_use]
    pub fn as_entity(&self) -> Option<EntityId> {
        match self {
            Value::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// The string payload, if this is a string
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Tag of the Rust type carried by this value, as [`TypeTag::of_val`]
    /// reports it for the value's source types
    #[must_use]
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Bool(_) => TypeTag::of::<bool>(),
            Value::Int(_) => TypeTag::of::<i64>(),
            Value::Str(_) => TypeTag::of::<str>(),
            Value::Entity(_) => TypeTag::of::<EntityId>(),
            Value::Type(_) => TypeTag::of::<TypeTag>(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Entity(id) => write!(f, "{id}"),
            Value::Type(tag) => write!(f, "{tag:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<EntityId> for Value {
    fn from(id: EntityId) -> Self {
        Value::Entity(id)
    }
}

impl From<TypeTag> for Value {
    fn from(tag: TypeTag) -> Self {
        Value::Type(tag)
    }
}
