//! Backtracking evaluation of a conjunction of clauses.
//!
//! The search keeps a stack of partial bindings. Each pop runs the filters
//! whose variables have all become bound, then either reports a solution or
//! picks the most selective remaining clause and pushes one child per
//! candidate extension:
//!
//! - a clause whose variables are bound is checked with a direct lookup
//! - an unbound entity is seeded from the (attribute, value) index, one probe
//!   per alternative when the value is a set
//! - an unbound entity related to an unbound value scans the attribute index
//!
//! Children are pushed in reverse so they are popped in candidate order,
//! which keeps the solution order a pure function of the store and the clause
//! tree.

use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::clause::{Clause, ClauseKind, Expr, FilterDecl, Var};
use crate::error::EvaluationError;
use crate::schema::Attr;
use crate::store::FactStore;
use crate::value::Value;

/// Values bound so far, in binding order
pub(crate) type Bindings = IndexMap<Var, Value>;

type Extension = SmallVec<[(Var, Value); 2]>;

/// Triple or equality clause after flattening
#[derive(Debug, Clone)]
enum Atom {
    Triple { entity: Var, attr: Attr, value: Expr },
    Eq { var: Var, value: Expr },
}

/// A flattened clause tree ready for evaluation
pub(crate) struct Plan {
    atoms: Vec<Atom>,
    filters: Vec<FilterDecl>,
    vars: IndexSet<Var>,
}

impl Plan {
    pub(crate) fn compile(clause: &Clause) -> Self {
        let mut plan = Plan {
            atoms: Vec::new(),
            filters: Vec::new(),
            vars: IndexSet::new(),
        };
        let mut mentioned = Vec::new();
        clause.visit_vars(&mut mentioned);
        plan.vars.extend(mentioned.into_iter().cloned());
        plan.push(clause);
        debug!(
            "compiled {} clauses and {} filters over {} variables",
            plan.atoms.len(),
            plan.filters.len(),
            plan.vars.len()
        );
        plan
    }

    fn push(&mut self, clause: &Clause) {
        match clause.kind() {
            ClauseKind::Triple { entity, attr, value } => self.atoms.push(Atom::Triple {
                entity: entity.clone(),
                attr: *attr,
                value: value.clone(),
            }),
            ClauseKind::Eq { var, value } => self.atoms.push(Atom::Eq {
                var: var.clone(),
                value: value.clone(),
            }),
            ClauseKind::And(terms) => terms.iter().for_each(|t| self.push(t)),
            ClauseKind::Filter(decl) => self.filters.push(decl.clone()),
        }
    }

    /// Every variable mentioned, in first-mention order
    pub(crate) fn vars(&self) -> &IndexSet<Var> {
        &self.vars
    }
}

/// Right-hand side of an atom under the current bindings
enum Resolved<'a> {
    Known(&'a Value),
    Alternatives(&'a [Value]),
    Free(&'a Var),
}

fn resolve<'a>(expr: &'a Expr, bindings: &'a Bindings) -> Resolved<'a> {
    match expr {
        Expr::Value(v) => Resolved::Known(v),
        Expr::AnyOf(values) => Resolved::Alternatives(values),
        Expr::Var(var) => match bindings.get(var) {
            Some(v) => Resolved::Known(v),
            None => Resolved::Free(var),
        },
    }
}

/// Check `actual` against `expr`, binding the expression's variable if it is free.
/// `None` means the values disagree.
fn unify(expr: &Expr, actual: &Value, bindings: &Bindings) -> Option<Extension> {
    match resolve(expr, bindings) {
        Resolved::Known(v) => (v == actual).then(Extension::new),
        Resolved::Alternatives(values) => values.contains(actual).then(Extension::new),
        Resolved::Free(var) => {
            let mut ext = Extension::new();
            ext.push((var.clone(), actual.clone()));
            Some(ext)
        }
    }
}

fn single(var: &Var, value: Value) -> Extension {
    let mut ext = Extension::new();
    ext.push((var.clone(), value));
    ext
}

/// How expensive it is to process an atom next: lower rank first, then
/// smaller estimated fan-out
type Cost = (u8, usize);

impl Atom {
    /// `None` when the atom cannot be seeded from any index yet
    fn cost(&self, bindings: &Bindings, store: &FactStore) -> Option<Cost> {
        match self {
            Atom::Eq { var, value } => {
                if bindings.contains_key(var) {
                    return Some((0, 1));
                }
                match resolve(value, bindings) {
                    Resolved::Known(_) => Some((0, 1)),
                    Resolved::Alternatives(values) => Some((1, values.len())),
                    Resolved::Free(_) => None,
                }
            }
            Atom::Triple { entity, attr, value } => {
                if bindings.contains_key(entity) {
                    return Some((0, 1));
                }
                match resolve(value, bindings) {
                    Resolved::Known(v) => Some((2, store.candidate_count(*attr, v))),
                    Resolved::Alternatives(values) => Some((
                        3,
                        values.iter().map(|v| store.candidate_count(*attr, v)).sum(),
                    )),
                    Resolved::Free(_) => Some((4, store.attr_count(*attr))),
                }
            }
        }
    }

    /// Candidate extensions of `bindings` satisfying this atom, in order
    fn extensions(&self, bindings: &Bindings, store: &FactStore) -> Vec<Extension> {
        match self {
            Atom::Eq { var, value } => match bindings.get(var) {
                Some(bound) => unify(value, bound, bindings).into_iter().collect(),
                None => match resolve(value, bindings) {
                    Resolved::Known(v) => vec![single(var, v.clone())],
                    Resolved::Alternatives(values) => {
                        values.iter().map(|v| single(var, v.clone())).collect()
                    }
                    Resolved::Free(_) => Vec::new(),
                },
            },
            Atom::Triple { entity, attr, value } => match bindings.get(entity) {
                Some(bound) => bound
                    .as_entity()
                    .and_then(|id| store.get(id, *attr))
                    .and_then(|actual| unify(value, actual, bindings))
                    .into_iter()
                    .collect(),
                None => match resolve(value, bindings) {
                    Resolved::Known(v) => store
                        .candidates(*attr, v)
                        .map(|id| single(entity, Value::Entity(id)))
                        .collect(),
                    Resolved::Alternatives(values) => values
                        .iter()
                        .flat_map(|v| store.candidates(*attr, v))
                        .map(|id| single(entity, Value::Entity(id)))
                        .collect(),
                    Resolved::Free(other) => store
                        .candidates_for_attr(*attr)
                        .filter_map(|id| {
                            let actual = store.get(id, *attr)?;
                            let own = Value::Entity(id);
                            if other == entity {
                                return (*actual == own).then(|| single(entity, own));
                            }
                            let mut ext = single(entity, own);
                            ext.push((other.clone(), actual.clone()));
                            Some(ext)
                        })
                        .collect(),
                },
            },
        }
    }
}

/// One node of the search tree
#[derive(Debug, Clone)]
struct Branch {
    bindings: Bindings,
    /// Indexes into `Plan::atoms` still to satisfy
    atoms: SmallVec<[usize; 8]>,
    /// Indexes into `Plan::filters` not yet run
    filters: SmallVec<[usize; 4]>,
}

/// Lazy depth-first enumeration of complete bindings
pub(crate) struct Search<'s> {
    plan: Arc<Plan>,
    store: &'s FactStore,
    stack: Vec<Branch>,
    failed: bool,
}

impl<'s> Search<'s> {
    pub(crate) fn new(plan: Arc<Plan>, store: &'s FactStore) -> Self {
        let root = Branch {
            bindings: Bindings::new(),
            atoms: (0..plan.atoms.len()).collect(),
            filters: (0..plan.filters.len()).collect(),
        };
        Self {
            plan,
            store,
            stack: vec![root],
            failed: false,
        }
    }

    /// Run the branch's filters whose variables are all bound, in declaration
    /// order. `Ok(false)` means a filter rejected the branch.
    fn run_ready_filters(&self, branch: &mut Branch) -> Result<bool, EvaluationError> {
        let mut idx = 0;
        while idx < branch.filters.len() {
            let decl = &self.plan.filters[branch.filters[idx]];
            let args: Option<SmallVec<[Value; 4]>> = decl
                .vars
                .iter()
                .map(|v| branch.bindings.get(v).cloned())
                .collect();
            let Some(args) = args else {
                idx += 1;
                continue;
            };

            branch.filters.remove(idx);
            match (decl.predicate)(&args) {
                Ok(true) => {}
                Ok(false) => {
                    trace!("filter {:?} rejected {:?}", decl.name, args.as_slice());
                    return Ok(false);
                }
                Err(source) => {
                    debug!("filter {:?} failed: {source:#}", decl.name);
                    return Err(EvaluationError::Filter {
                        name: decl.name.clone(),
                        source,
                    });
                }
            }
        }
        Ok(true)
    }

    /// Replace `branch` on the stack by its children
    fn expand(&mut self, mut branch: Branch) {
        let chosen = branch
            .atoms
            .iter()
            .enumerate()
            .filter_map(|(pos, &atom)| {
                self.plan.atoms[atom]
                    .cost(&branch.bindings, self.store)
                    .map(|cost| (cost, pos))
            })
            .min();

        let Some((cost, pos)) = chosen else {
            trace!(
                "pruned: {} clauses relate only unbound variables",
                branch.atoms.len()
            );
            return;
        };

        let atom = &self.plan.atoms[branch.atoms.remove(pos)];
        let extensions = atom.extensions(&branch.bindings, self.store);
        trace!(
            "expanding {atom:?} at cost {cost:?} into {} branches",
            extensions.len()
        );

        for ext in extensions.into_iter().rev() {
            let mut child = branch.clone();
            child.bindings.extend(ext);
            self.stack.push(child);
        }
    }
}

impl Iterator for Search<'_> {
    type Item = Result<Bindings, EvaluationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while let Some(mut branch) = self.stack.pop() {
            match self.run_ready_filters(&mut branch) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    self.failed = true;
                    self.stack.clear();
                    return Some(Err(err));
                }
            }

            if branch.atoms.is_empty() {
                if branch.filters.is_empty() {
                    return Some(Ok(branch.bindings));
                }
                trace!(
                    "pruned: {} filters reference variables no clause binds",
                    branch.filters.len()
                );
                continue;
            }
            self.expand(branch);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{and, filter};
    use crate::schema::Schema;
    use crate::value::EntityId;

    fn store() -> FactStore {
        let schema = Schema::builder("test")
            .attr("Color")
            .attr("Owner")
            .build()
            .unwrap();
        let mut store = FactStore::new(Arc::new(schema));
        let color = store.schema().attr("Color").unwrap();
        let owner = store.schema().attr("Owner").unwrap();

        store.insert(EntityId(1), color, "red").unwrap();
        store.insert(EntityId(2), color, "blue").unwrap();
        store.insert(EntityId(3), color, "red").unwrap();
        store.insert(EntityId(3), owner, EntityId(1)).unwrap();
        store.insert(EntityId(4), owner, EntityId(2)).unwrap();
        store
    }

    fn run(clause: &Clause, store: &FactStore) -> Vec<Bindings> {
        Search::new(Arc::new(Plan::compile(clause)), store)
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn entity(bindings: &Bindings, var: &Var) -> EntityId {
        bindings[var].as_entity().unwrap()
    }

    #[test]
    fn test_plan_flattens_and_separates_filters() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let v = Var::new("v");
        let clause = and([
            filter("f", &[v.clone()]).predicate(|_| true),
            and([v.attr_eq(color, "red"), v.one_of([EntityId(1)])]),
        ]);

        let plan = Plan::compile(&clause);
        assert_eq!(plan.atoms.len(), 2);
        assert_eq!(plan.filters.len(), 1);
        assert_eq!(plan.vars().len(), 1);
    }

    #[test]
    fn test_truth_has_one_empty_solution() {
        let store = store();
        let results = run(&Clause::truth(), &store);
        assert_eq!(results, vec![Bindings::new()]);
    }

    #[test]
    fn test_literal_seek_uses_value_index() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let v = Var::new("v");

        let results = run(&v.attr_eq(color, "red"), &store);
        let found: Vec<_> = results.iter().map(|b| entity(b, &v)).collect();
        assert_eq!(found, vec![EntityId(1), EntityId(3)]);
    }

    #[test]
    fn test_alternatives_branch_in_list_order() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let v = Var::new("v");

        let results = run(&v.attr_in(color, ["blue", "green", "red"]), &store);
        let found: Vec<_> = results.iter().map(|b| entity(b, &v)).collect();
        assert_eq!(found, vec![EntityId(2), EntityId(1), EntityId(3)]);
    }

    #[test]
    fn test_join_through_entity_reference() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let owner = store.schema().attr("Owner").unwrap();
        let (pet, person) = (Var::new("pet"), Var::new("person"));

        // pets whose owner is red
        let clause = and([
            pet.attr_eq_var(owner, &person),
            person.attr_eq(color, "red"),
        ]);
        let results = run(&clause, &store);
        assert_eq!(results.len(), 1);
        assert_eq!(entity(&results[0], &pet), EntityId(3));
        assert_eq!(entity(&results[0], &person), EntityId(1));
    }

    #[test]
    fn test_free_pair_scans_attribute() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let (v, c) = (Var::new("v"), Var::new("c"));

        let results = run(&v.attr_eq_var(color, &c), &store);
        assert_eq!(results.len(), 3);
        assert_eq!(results[1][&c], Value::from("blue"));
    }

    #[test]
    fn test_self_reference_requires_entity_to_point_at_itself() {
        let mut store = store();
        let owner = store.schema().attr("Owner").unwrap();
        store.insert(EntityId(9), owner, EntityId(9)).unwrap();
        let v = Var::new("v");

        let results = run(&v.attr_eq_var(owner, &v), &store);
        assert_eq!(results.len(), 1);
        assert_eq!(entity(&results[0], &v), EntityId(9));
    }

    #[test]
    fn test_contradiction_yields_nothing() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let v = Var::new("v");

        let clause = and([v.attr_eq(color, "red"), v.attr_eq(color, "blue")]);
        assert!(run(&clause, &store).is_empty());

        let x = Var::new("x");
        assert!(run(&and([x.equals(1), x.equals(2)]), &store).is_empty());
    }

    #[test]
    fn test_unseekable_equality_yields_nothing() {
        let store = store();
        let (a, b) = (Var::new("a"), Var::new("b"));
        assert!(run(&a.equals_var(&b), &store).is_empty());
    }

    #[test]
    fn test_equality_between_vars_once_bound() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let (a, b) = (Var::new("a"), Var::new("b"));

        let clause = and([a.attr_eq(color, "blue"), a.equals_var(&b)]);
        let results = run(&clause, &store);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0][&b], Value::Entity(EntityId(2)));
    }

    #[test]
    fn test_one_of_branches_in_list_order() {
        let store = store();
        let x = Var::new("x");

        let results = run(&x.one_of([3, 1, 2]), &store);
        let values: Vec<_> = results.iter().map(|b| b[&x].clone()).collect();
        assert_eq!(values, vec![Value::from(3), Value::from(1), Value::from(2)]);
    }

    #[test]
    fn test_one_of_keeps_duplicate_literals_as_branches() {
        let store = store();
        let x = Var::new("x");

        // the evaluator does not deduplicate; projection does
        let results = run(&x.one_of([3, 1, 3]), &store);
        let values: Vec<_> = results.iter().map(|b| b[&x].clone()).collect();
        assert_eq!(values, vec![Value::from(3), Value::from(1), Value::from(3)]);
    }

    #[test]
    fn test_one_of_drives_a_triple_join() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let (v, c) = (Var::new("v"), Var::new("c"));

        let clause = and([v.attr_eq_var(color, &c), c.one_of(["blue", "red"])]);
        let results = run(&clause, &store);
        let found: Vec<_> = results.iter().map(|b| entity(b, &v)).collect();
        assert_eq!(found, vec![EntityId(2), EntityId(1), EntityId(3)]);
    }

    #[test]
    fn test_one_of_checks_an_already_bound_var() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let (v, c) = (Var::new("v"), Var::new("c"));

        let clause = and([v.attr_eq_var(color, &c), c.one_of(["blue", "green"])]);
        let plan = Plan::compile(&clause);
        let mut bindings = Bindings::new();
        bindings.insert(c.clone(), Value::from("red"));
        assert_eq!(plan.atoms[1].cost(&bindings, &store), Some((0, 1)));
        assert!(plan.atoms[1].extensions(&bindings, &store).is_empty());

        bindings.insert(c, Value::from("blue"));
        assert_eq!(plan.atoms[1].extensions(&bindings, &store).len(), 1);
    }

    #[test]
    fn test_equality_binds_free_var_from_bound_one() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let (a, b) = (Var::new("a"), Var::new("b"));

        // `b` is on the left and free; `a` on the right gets bound first
        let clause = and([b.equals_var(&a), a.attr_eq(color, "blue")]);
        let results = run(&clause, &store);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0][&b], Value::Entity(EntityId(2)));

        let atom = Atom::Eq {
            var: b.clone(),
            value: Expr::Var(a.clone()),
        };
        assert_eq!(atom.cost(&Bindings::new(), &store), None, "unseekable while both are free");
        let mut bindings = Bindings::new();
        bindings.insert(a, Value::Entity(EntityId(2)));
        assert_eq!(atom.cost(&bindings, &store), Some((0, 1)));
        let ext = atom.extensions(&bindings, &store);
        assert_eq!(ext.len(), 1);
        assert_eq!(ext[0].as_slice(), &[(b, Value::Entity(EntityId(2)))]);
    }

    #[test]
    fn test_filter_runs_once_per_branch_with_bound_values() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let (v, c) = (Var::new("v"), Var::new("c"));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let clause = and([
            filter("is_red", &[c.clone()]).predicate(move |vals| {
                seen.fetch_add(1, Ordering::SeqCst);
                vals[0] == Value::from("red")
            }),
            v.attr_eq_var(color, &c),
        ]);
        let results = run(&clause, &store);
        assert_eq!(results.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3, "one call per candidate");
    }

    #[test]
    fn test_filter_on_unconstrained_var_never_runs() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let (v, loose) = (Var::new("v"), Var::new("loose"));

        let clause = and([
            v.attr_eq(color, "red"),
            filter("never", &[loose]).predicate(|_| panic!("ran with an unbound variable")),
        ]);
        assert!(run(&clause, &store).is_empty());
    }

    #[test]
    fn test_filter_error_ends_search() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let v = Var::new("v");

        let clause = and([
            v.attr_in(color, ["red", "blue"]),
            filter("blue_fails", &[v.clone()]).try_predicate(|vals| {
                if vals[0] == Value::Entity(EntityId(2)) {
                    anyhow::bail!("cannot judge e2");
                }
                Ok(true)
            }),
        ]);

        let mut search = Search::new(Arc::new(Plan::compile(&clause)), &store);
        assert!(search.next().unwrap().is_ok(), "e1 is yielded before the failure");
        assert!(search.next().unwrap().is_ok(), "e3 is yielded before the failure");
        let err = search.next().unwrap().unwrap_err();
        assert!(matches!(err, EvaluationError::Filter { ref name, .. } if name == "blue_fails"));
        assert!(search.next().is_none());
    }

    #[test]
    fn test_cheapest_atom_chosen_first() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let owner = store.schema().attr("Owner").unwrap();
        let (v, w) = (Var::new("v"), Var::new("w"));
        let bindings = Bindings::new();

        let free_pair = Atom::Triple {
            entity: v.clone(),
            attr: owner,
            value: Expr::Var(w),
        };
        let literal = Atom::Triple {
            entity: v.clone(),
            attr: color,
            value: Expr::Value(Value::from("blue")),
        };
        let alternatives = Atom::Triple {
            entity: v,
            attr: color,
            value: Expr::AnyOf(vec![Value::from("red"), Value::from("blue")]),
        };
        assert_eq!(literal.cost(&bindings, &store), Some((2, 1)));
        assert_eq!(alternatives.cost(&bindings, &store), Some((3, 3)));
        assert_eq!(free_pair.cost(&bindings, &store), Some((4, 2)));
    }

    #[test]
    fn test_stops_when_consumer_stops() {
        let store = store();
        let color = store.schema().attr("Color").unwrap();
        let v = Var::new("v");

        let clause = and([
            v.attr_eq(color, "red"),
            filter("boom_on_second", &[v.clone()]).try_predicate(|vals| {
                if vals[0] == Value::Entity(EntityId(3)) {
                    anyhow::bail!("explored past the first solution");
                }
                Ok(true)
            }),
        ]);
        let mut search = Search::new(Arc::new(Plan::compile(&clause)), &store);
        assert!(search.next().unwrap().is_ok());
        drop(search);
    }
}
