//! Clause language.
//!
//! A query is the conjunction of [`Clause`]s. Clauses are built with the
//! methods on [`Var`] and the free functions [`triple`], [`and`] and
//! [`filter`]; their structure is private to the crate so the evaluator can
//! dispatch over a closed set of variants.

use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::ConstructionError;
use crate::schema::{Attr, Schema};
use crate::value::{TypeTag, Value};

/// A query variable, identified by its name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Var(Arc<str>);

impl Var {
    /// Declare a variable called `name`
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    /// The variable's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// The entity bound to this var has `value` for `attr`.
    #[must_use]
    pub fn attr_eq(&self, attr: Attr, value: impl Into<Value>) -> Clause {
        triple(self, attr, Expr::Value(value.into()))
    }

    /// The entity bound to this var has one of `values` for `attr`.
    #[must_use]
    pub fn attr_in<I>(&self, attr: Attr, values: I) -> Clause
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        triple(self, attr, Expr::any_of(values))
    }

    /// The entity bound to this var has, for `attr`, the value bound to `other`.
    #[must_use]
    pub fn attr_eq_var(&self, attr: Attr, other: &Var) -> Clause {
        triple(self, attr, Expr::Var(other.clone()))
    }

    /// This var is bound to `value`.
    #[must_use]
    pub fn equals(&self, value: impl Into<Value>) -> Clause {
        Clause::new(ClauseKind::Eq {
            var: self.clone(),
            value: Expr::Value(value.into()),
        })
    }

    /// This var is bound to the same value as `other`.
    #[must_use]
    pub fn equals_var(&self, other: &Var) -> Clause {
        Clause::new(ClauseKind::Eq {
            var: self.clone(),
            value: Expr::Var(other.clone()),
        })
    }

    /// This var is bound to one of `values`.
    #[must_use]
    pub fn one_of<I>(&self, values: I) -> Clause
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Clause::new(ClauseKind::Eq {
            var: self.clone(),
            value: Expr::any_of(values),
        })
    }

    /// The entity bound to this var has the runtime type of one of `samples`.
    ///
    /// Each sample is only inspected for its type, through
    /// [`TypeTag::of_val`], so `3` and `"x"` name the same types as
    /// `Value::from(3).type_tag()` and `Value::from("x").type_tag()`. One
    /// sample constrains the schema's `Type` attribute to a single tag,
    /// several samples to a set.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::NoTypeSamples`] when `samples` is empty.
    pub fn type_of(&self, schema: &Schema, samples: &[&dyn Any]) -> Result<Clause, ConstructionError> {
        let tags: Vec<TypeTag> = samples.iter().map(|s| TypeTag::of_val(*s)).collect();
        match tags.as_slice() {
            [] => Err(ConstructionError::NoTypeSamples { var: self.clone() }),
            [tag] => Ok(self.attr_eq(schema.type_attr(), *tag)),
            _ => Ok(self.attr_in(schema.type_attr(), tags)),
        }
    }

    /// Every entity in `entities` has this var's value for `attr`.
    #[must_use]
    pub fn entities(&self, attr: Attr, entities: &[Var]) -> Clause {
        and(entities.iter().map(|e| e.attr_eq_var(attr, self)))
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Right-hand side of a triple or equality clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A single literal
    Value(Value),
    /// Alternative literals, tried in order
    AnyOf(Vec<Value>),
    /// The value bound to another variable
    Var(Var),
}

impl Expr {
    fn any_of<I>(values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Expr::AnyOf(values.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Value(v) => write!(f, "{v}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::AnyOf(values) => {
                write!(f, "{{")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

pub(crate) type Predicate = Arc<dyn Fn(&[Value]) -> anyhow::Result<bool> + Send + Sync>;

/// A constraint over query variables
#[derive(Clone, PartialEq)]
pub struct Clause(ClauseKind);

#[derive(Clone)]
pub(crate) enum ClauseKind {
    Triple {
        entity: Var,
        attr: Attr,
        value: Expr,
    },
    Eq {
        var: Var,
        value: Expr,
    },
    And(Vec<Clause>),
    Filter(FilterDecl),
}

#[derive(Clone)]
pub(crate) struct FilterDecl {
    pub(crate) name: String,
    pub(crate) vars: SmallVec<[Var; 4]>,
    pub(crate) predicate: Predicate,
}

impl PartialEq for ClauseKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                ClauseKind::Triple { entity, attr, value },
                ClauseKind::Triple {
                    entity: e2,
                    attr: a2,
                    value: v2,
                },
            ) => entity == e2 && attr == a2 && value == v2,
            (ClauseKind::Eq { var, value }, ClauseKind::Eq { var: v2, value: x2 }) => {
                var == v2 && value == x2
            }
            (ClauseKind::And(a), ClauseKind::And(b)) => a == b,
            (ClauseKind::Filter(a), ClauseKind::Filter(b)) => {
                a.name == b.name && a.vars == b.vars && Arc::ptr_eq(&a.predicate, &b.predicate)
            }
            _ => false,
        }
    }
}

impl Clause {
    fn new(kind: ClauseKind) -> Self {
        Self(kind)
    }

    pub(crate) fn kind(&self) -> &ClauseKind {
        &self.0
    }

    /// A clause that always holds
    #[must_use]
    pub fn truth() -> Self {
        Self(ClauseKind::And(Vec::new()))
    }

    /// Variables mentioned by this clause, in first-mention order, with repeats
    pub(crate) fn visit_vars<'a>(&'a self, out: &mut Vec<&'a Var>) {
        match &self.0 {
            ClauseKind::Triple { entity, value, .. } => {
                out.push(entity);
                if let Expr::Var(v) = value {
                    out.push(v);
                }
            }
            ClauseKind::Eq { var, value } => {
                out.push(var);
                if let Expr::Var(v) = value {
                    out.push(v);
                }
            }
            ClauseKind::And(terms) => terms.iter().for_each(|t| t.visit_vars(out)),
            ClauseKind::Filter(decl) => out.extend(decl.vars.iter()),
        }
    }
}

impl fmt::Debug for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clause({self})")
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ClauseKind::Triple { entity, attr, value } => write!(f, "{entity}[{attr}] = {value}"),
            ClauseKind::Eq { var, value } => write!(f, "{var} = {value}"),
            ClauseKind::And(terms) => {
                write!(f, "and(")?;
                for (i, t) in terms.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            ClauseKind::Filter(decl) => {
                write!(f, "filter {}(", decl.name)?;
                for (i, v) in decl.vars.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// The entity bound to `entity` has `value` for `attr`.
///
/// This introduces `entity` as an entity variable if it is not one already.
#[must_use]
pub fn triple(entity: &Var, attr: Attr, value: Expr) -> Clause {
    Clause::new(ClauseKind::Triple {
        entity: entity.clone(),
        attr,
        value,
    })
}

/// Conjunction of `terms`. Nested conjunctions are flattened and an empty
/// conjunction always holds.
#[must_use]
pub fn and<I>(terms: I) -> Clause
where
    I: IntoIterator<Item = Clause>,
{
    let mut flat = Vec::new();
    for term in terms {
        match term.0 {
            ClauseKind::And(inner) => flat.extend(inner),
            kind => flat.push(Clause(kind)),
        }
    }
    Clause::new(ClauseKind::And(flat))
}

/// Start a filter clause over `vars`. The predicate is supplied with
/// [`FilterBuilder::predicate`] or [`FilterBuilder::try_predicate`].
#[must_use]
pub fn filter(name: impl Into<String>, vars: &[Var]) -> FilterBuilder {
    FilterBuilder {
        name: name.into(),
        vars: vars.iter().cloned().collect(),
    }
}

/// First stage of a filter clause: name and variables are known
pub struct FilterBuilder {
    name: String,
    vars: SmallVec<[Var; 4]>,
}

impl FilterBuilder {
    /// Finish with an infallible predicate over the bound values of the vars,
    /// passed in declaration order.
    #[must_use]
    pub fn predicate<F>(self, f: F) -> Clause
    where
        F: Fn(&[Value]) -> bool + Send + Sync + 'static,
    {
        self.try_predicate(move |values| Ok(f(values)))
    }

    /// Finish with a fallible predicate. An `Err` aborts the evaluation.
    #[must_use]
    pub fn try_predicate<F>(self, f: F) -> Clause
    where
        F: Fn(&[Value]) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Clause::new(ClauseKind::Filter(FilterDecl {
            name: self.name,
            vars: self.vars,
            predicate: Arc::new(f),
        }))
    }
}

impl fmt::Debug for FilterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterBuilder")
            .field("name", &self.name)
            .field("vars", &self.vars)
            .finish_non_exhaustive()
    }
}
