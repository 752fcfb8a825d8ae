use indexmap::{IndexMap, IndexSet};
use log::trace;
use std::any::Any;
use std::sync::Arc;

use crate::error::StoreError;
use crate::schema::{Attr, Schema};
use crate::value::{EntityId, TypeTag, Value};

/// All attribute values recorded for one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    /// The described entity
    pub entity: EntityId,
    /// Attribute values of the entity
    pub attrs: IndexMap<Attr, Value>,
}

impl Fact {
    /// An entity with no attributes yet
    #[must_use]
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            attrs: IndexMap::new(),
        }
    }

    /// Add an attribute value
    #[must_use]
    pub fn with(mut self, attr: Attr, value: impl Into<Value>) -> Self {
        self.attrs.insert(attr, value.into());
        self
    }
}

/// Secondary indexes for one attribute
#[derive(Debug, Clone, Default)]
struct AttrIndex {
    /// Every entity with any value for the attribute
    /// For `e1[Color]="red", e2[Color]="blue", e3[Color]="red"`: `{e1, e2, e3}`
    entities: IndexSet<EntityId>,
    /// Entities grouped by value
    /// For the same facts: `{"red" -> {e1, e3}, "blue" -> {e2}}`
    by_value: IndexMap<Value, IndexSet<EntityId>>,
}

impl AttrIndex {
    fn add(&mut self, entity: EntityId, value: &Value) {
        self.entities.insert(entity);
        self.by_value
            .entry(value.clone())
            .or_default()
            .insert(entity);
    }

    fn remove(&mut self, entity: EntityId, value: &Value) {
        self.entities.swap_remove(&entity);
        if let Some(bucket) = self.by_value.get_mut(value) {
            bucket.swap_remove(&entity);
            if bucket.is_empty() {
                self.by_value.swap_remove(value);
            }
        }
    }
}

/// In-memory entity-attribute-value fact store
///
/// The store keeps one primary map from entity to attribute values plus, for
/// every schema attribute, an index by attribute and an index by
/// (attribute, value). All mutations go through `&mut self`, so readers never
/// observe a half-applied update.
#[derive(Debug, Clone)]
pub struct FactStore {
    schema: Arc<Schema>,
    facts: IndexMap<EntityId, IndexMap<Attr, Value>>,
    /// Indexed by `Attr::index()`
    by_attr: Vec<AttrIndex>,
    next_entity: u64,
}

impl FactStore {
    /// Create an empty store for `schema`
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        let by_attr = (0..schema.len()).map(|_| AttrIndex::default()).collect();
        Self {
            schema,
            facts: IndexMap::new(),
            by_attr,
            next_entity: 0,
        }
    }

    /// Schema this store is keyed by
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Allocate an entity id not used by this store yet
    pub fn new_entity(&mut self) -> EntityId {
        while self.facts.contains_key(&EntityId(self.next_entity)) {
            self.next_entity += 1;
        }
        let id = EntityId(self.next_entity);
        self.next_entity += 1;
        id
    }

    /// Set `attr` of `entity` to `value`, returning the value it replaces
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ForeignAttribute`] if `attr` was not issued by
    /// this store's schema.
    pub fn insert(
        &mut self,
        entity: EntityId,
        attr: Attr,
        value: impl Into<Value>,
    ) -> Result<Option<Value>, StoreError> {
        if !self.schema.contains(attr) {
            return Err(StoreError::ForeignAttribute(attr));
        }
        Ok(self.put(entity, attr, value.into()))
    }

    /// `attr` must belong to the schema
    fn put(&mut self, entity: EntityId, attr: Attr, value: Value) -> Option<Value> {
        let previous = self.delete(entity, attr);
        trace!("insert {entity}[{attr}] = {value}");

        self.by_attr[attr.index()].add(entity, &value);
        self.facts.entry(entity).or_default().insert(attr, value);
        previous
    }

    /// Record every attribute of `fact`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ForeignAttribute`] without modifying the store if
    /// any attribute is foreign to the schema.
    pub fn insert_fact(&mut self, fact: Fact) -> Result<(), StoreError> {
        if let Some(attr) = fact.attrs.keys().find(|a| !self.schema.contains(**a)) {
            return Err(StoreError::ForeignAttribute(*attr));
        }
        for (attr, value) in fact.attrs {
            self.put(fact.entity, attr, value);
        }
        Ok(())
    }

    /// Set the reserved `Type` attribute of `entity` to the tag of `T`,
    /// returning the tag it replaces
    pub fn set_type<T: Any + ?Sized>(&mut self, entity: EntityId) -> Option<Value> {
        let attr = self.schema.type_attr();
        self.put(entity, attr, Value::Type(TypeTag::of::<T>()))
    }

    /// Remove `attr` from `entity`, returning the removed value
    pub fn delete(&mut self, entity: EntityId, attr: Attr) -> Option<Value> {
        let attrs = self.facts.get_mut(&entity)?;
        let old = attrs.swap_remove(&attr)?;
        trace!("delete {entity}[{attr}] = {old}");

        if attrs.is_empty() {
            self.facts.swap_remove(&entity);
        }
        if let Some(index) = self.by_attr.get_mut(attr.index()) {
            index.remove(entity, &old);
        }
        Some(old)
    }

    /// Remove every attribute of `entity`
    pub fn delete_entity(&mut self, entity: EntityId) -> Option<Fact> {
        let attrs = self.facts.swap_remove(&entity)?;
        for (attr, value) in &attrs {
            self.by_attr[attr.index()].remove(entity, value);
        }
        trace!("delete entity {entity} ({} attributes)", attrs.len());
        Some(Fact { entity, attrs })
    }

    /// Value of `attr` for `entity`
    #[must_use]
    pub fn get(&self, entity: EntityId, attr: Attr) -> Option<&Value> {
        self.facts.get(&entity)?.get(&attr)
    }

    /// All attributes recorded for `entity`
    #[must_use]
    pub fn fact(&self, entity: EntityId) -> Option<&IndexMap<Attr, Value>> {
        self.facts.get(&entity)
    }

    /// Entities whose `attr` equals `value`
    pub fn candidates<'a>(&'a self, attr: Attr, value: &Value) -> impl Iterator<Item = EntityId> + 'a {
        self.by_attr
            .get(attr.index())
            .and_then(|index| index.by_value.get(value))
            .into_iter()
            .flatten()
            .copied()
    }

    /// Number of entities whose `attr` equals `value`
    #[must_use]
    pub fn candidate_count(&self, attr: Attr, value: &Value) -> usize {
        self.by_attr
            .get(attr.index())
            .and_then(|index| index.by_value.get(value))
            .map_or(0, IndexSet::len)
    }

    /// Entities with any value for `attr`
    pub fn candidates_for_attr(&self, attr: Attr) -> impl Iterator<Item = EntityId> + '_ {
        self.by_attr
            .get(attr.index())
            .map(|index| &index.entities)
            .into_iter()
            .flatten()
            .copied()
    }

    /// Number of entities with any value for `attr`
    #[must_use]
    pub fn attr_count(&self, attr: Attr) -> usize {
        self.by_attr
            .get(attr.index())
            .map_or(0, |index| index.entities.len())
    }

    /// All entities with at least one attribute
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.facts.keys().copied()
    }

    /// Number of entities with at least one attribute
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Whether the store holds no facts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Rebuild every index from the primary map and compare
    #[cfg(test)]
    pub(crate) fn assert_indexes_consistent(&self) {
        let mut rebuilt: Vec<AttrIndex> = (0..self.schema.len()).map(|_| AttrIndex::default()).collect();
        for (entity, attrs) in &self.facts {
            assert!(!attrs.is_empty(), "entity {entity} kept with no attributes");
            for (attr, value) in attrs {
                rebuilt[attr.index()].add(*entity, value);
            }
        }
        for (idx, (have, want)) in self.by_attr.iter().zip(&rebuilt).enumerate() {
            let have_entities: IndexSet<_> = have.entities.iter().collect();
            let want_entities: IndexSet<_> = want.entities.iter().collect();
            assert_eq!(have_entities, want_entities, "attr #{idx} entity index drifted");
            assert_eq!(
                have.by_value.len(),
                want.by_value.len(),
                "attr #{idx} has stale value buckets"
            );
            for (value, entities) in &want.by_value {
                let bucket = have.by_value.get(value);
                assert_eq!(bucket, Some(entities), "attr #{idx} value {value} drifted");
            }
        }
    }
}
