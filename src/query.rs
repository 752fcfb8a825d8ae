use indexmap::{IndexMap, IndexSet};
use std::fmt;
use std::sync::Arc;

use crate::clause::{Clause, Var};
use crate::error::{ConstructionError, EvaluationError};
use crate::eval::{Plan, Search};
use crate::store::FactStore;
use crate::value::{EntityId, Value};

/// One satisfying assignment, restricted to the query's variables of interest
///
/// With the `serde` feature a solution serializes as its bindings map.
/// Serialization fails if a projected variable is bound to a
/// [`Value::Type`] tag, which has no serialized form; leave such variables
/// out of the projection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Solution {
    /// Bound values, in the order the variables were requested
    pub bindings: IndexMap<Var, Value>,
}

impl Solution {
    /// Value bound to `var`
    #[must_use]
    pub fn get(&self, var: &Var) -> Option<&Value> {
        self.bindings.get(var)
    }

    /// Entity bound to `var`, if `var` holds an entity reference
    #[must_use]
    pub fn entity(&self, var: &Var) -> Option<EntityId> {
        self.get(var).and_then(Value::as_entity)
    }
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (var, value)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{var}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// A compiled conjunction of clauses with a projection
///
/// A query can be evaluated any number of times, against any store.
#[derive(Clone)]
pub struct Query {
    plan: Arc<Plan>,
    projection: Arc<[Var]>,
}

impl Query {
    /// Compile `clause`, projecting solutions onto `vars`.
    ///
    /// An empty `vars` keeps every variable the clause mentions, in the order
    /// they are first mentioned.
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::UnknownVariable`] if one of `vars` is not
    /// mentioned by `clause`.
    pub fn new(vars: &[Var], clause: &Clause) -> Result<Self, ConstructionError> {
        let plan = Plan::compile(clause);
        if let Some(missing) = vars.iter().find(|v| !plan.vars().contains(*v)) {
            return Err(ConstructionError::UnknownVariable(missing.clone()));
        }
        let projection: Arc<[Var]> = if vars.is_empty() {
            plan.vars().iter().cloned().collect()
        } else {
            vars.iter().cloned().collect::<IndexSet<_>>().into_iter().collect()
        };
        Ok(Self {
            plan: Arc::new(plan),
            projection,
        })
    }

    /// Variables each solution is restricted to
    #[must_use]
    pub fn vars(&self) -> &[Var] {
        &self.projection
    }

    /// Lazily enumerate the distinct solutions in `store`
    #[must_use]
    pub fn iter<'s>(&self, store: &'s FactStore) -> Solutions<'s> {
        Solutions {
            search: Search::new(Arc::clone(&self.plan), store),
            projection: Arc::clone(&self.projection),
            seen: IndexSet::new(),
        }
    }

    /// All distinct solutions in `store`
    ///
    /// # Errors
    ///
    /// Returns the first [`EvaluationError`] raised by a filter.
    pub fn collect(&self, store: &FactStore) -> Result<Vec<Solution>, EvaluationError> {
        self.iter(store).collect()
    }

    /// The first solution in `store`, without searching further
    ///
    /// # Errors
    ///
    /// Returns an [`EvaluationError`] raised by a filter before a solution was found.
    pub fn first(&self, store: &FactStore) -> Result<Option<Solution>, EvaluationError> {
        self.iter(store).next().transpose()
    }

    /// Whether any solution exists in `store`
    ///
    /// # Errors
    ///
    /// Returns an [`EvaluationError`] raised by a filter before a solution was found.
    pub fn exists(&self, store: &FactStore) -> Result<bool, EvaluationError> {
        Ok(self.first(store)?.is_some())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("vars", &self.projection)
            .finish_non_exhaustive()
    }
}

/// Lazily enumerate the distinct solutions of `clause` in `store`, projected
/// onto `vars`.
///
/// # Errors
///
/// Returns [`ConstructionError::UnknownVariable`] if one of `vars` is not
/// mentioned by `clause`.
pub fn solve<'s>(
    vars: &[Var],
    clause: &Clause,
    store: &'s FactStore,
) -> Result<Solutions<'s>, ConstructionError> {
    Ok(Query::new(vars, clause)?.iter(store))
}

/// Lazy stream of solutions
///
/// Each call to `next` resumes the search only as far as the next distinct
/// solution. After an `Err` item the stream is exhausted.
pub struct Solutions<'s> {
    search: Search<'s>,
    projection: Arc<[Var]>,
    seen: IndexSet<Vec<Value>>,
}

impl Iterator for Solutions<'_> {
    type Item = Result<Solution, EvaluationError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut bindings = match self.search.next()? {
                Ok(bindings) => bindings,
                Err(err) => return Some(Err(err)),
            };
            // Every projected var is mentioned by a clause, and every mentioned
            // var is bound in a complete solution.
            let key: Option<Vec<Value>> = self
                .projection
                .iter()
                .map(|v| bindings.swap_remove(v))
                .collect();
            let Some(key) = key else {
                continue;
            };
            if self.seen.contains(&key) {
                continue;
            }
            let solution = Solution {
                bindings: self.projection.iter().cloned().zip(key.iter().cloned()).collect(),
            };
            self.seen.insert(key);
            return Some(Ok(solution));
        }
    }
}

impl fmt::Debug for Solutions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solutions")
            .field("vars", &self.projection)
            .field("yielded", &self.seen.len())
            .finish_non_exhaustive()
    }
}
