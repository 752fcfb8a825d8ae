//! # Microrel
//!
//! A minimal entity-attribute-value query engine in Rust.
//!
//! ## Features
//!
//! - Clause combinators over typed variables and schema attributes
//! - Indexed fact store with (attribute, value) and attribute lookups
//! - Lazy backtracking evaluation with late-bound filter predicates
//! - Range-keyed configuration records that ingest into the fact store
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use microrel::{and, EntityId, FactStore, Query, Schema, Var};
//!
//! let schema = Arc::new(Schema::builder("shapes").attr("Color").build().unwrap());
//! let color = schema.attr("Color").unwrap();
//!
//! let mut store = FactStore::new(Arc::clone(&schema));
//! store.insert(EntityId(1), color, "red").unwrap();
//! store.insert(EntityId(2), color, "blue").unwrap();
//!
//! let v = Var::new("v");
//! let query = Query::new(&[v.clone()], &and([v.attr_in(color, ["red", "blue"])])).unwrap();
//! let found: Vec<_> = query
//!     .collect(&store)
//!     .unwrap()
//!     .iter()
//!     .filter_map(|s| s.entity(&v))
//!     .collect();
//! assert_eq!(found, vec![EntityId(1), EntityId(2)]);
//! ```

/// Clause combinators.
pub mod clause;
/// Error types.
pub mod error;
mod eval;
/// Query facade.
pub mod query;
/// Attribute registry.
pub mod schema;
/// Range-keyed configuration records.
pub mod span_config;
/// Fact store and indexes.
pub mod store;
/// Values and type tags.
pub mod value;

pub use clause::{and, filter, triple, Clause, Expr, FilterBuilder, Var};
pub use error::{AccessorError, ConstructionError, Error, EvaluationError, Result, StoreError};
pub use query::{solve, Query, Solution, Solutions};
pub use schema::{Attr, Schema, SchemaBuilder, TYPE_ATTR_NAME};
pub use store::{Fact, FactStore};
pub use value::{EntityId, TypeTag, Value};
