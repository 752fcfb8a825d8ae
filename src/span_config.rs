//! Range-keyed configuration records.
//!
//! Configuration is attached to half-open key spans `[start, end)`. A
//! [`SpanConfigAccessor`] reads the records overlapping a set of spans and
//! applies batches of deletes and upserts atomically. [`ingest`] turns
//! records into facts so they can be queried with clauses.
//!
//! Text forms: a span is written `[a,e)` and an entry `[c,d):C`.

use log::{debug, trace};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

use crate::error::{AccessorError, ConstructionError, StoreError};
use crate::schema::{Attr, Schema, SchemaBuilder};
use crate::store::{Fact, FactStore};
use crate::value::{EntityId, TypeTag, Value};

/// Half-open key range `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    /// Inclusive start key
    pub start: String,
    /// Exclusive end key
    pub end: String,
}

impl Span {
    /// The span `[start, end)`
    #[must_use]
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Whether the span contains at least one key
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Whether the two spans share at least one key
    #[must_use]
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn validate(&self) -> Result<(), AccessorError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AccessorError::InvalidSpan(self.to_string()))
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end)
    }
}

/// Configuration attached to a span
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpanConfigEntry {
    /// Keys the configuration applies to
    pub span: Span,
    /// Opaque configuration payload
    pub config: String,
}

impl SpanConfigEntry {
    /// Attach `config` to `span`
    #[must_use]
    pub fn new(span: Span, config: impl Into<String>) -> Self {
        Self {
            span,
            config: config.into(),
        }
    }
}

impl fmt::Display for SpanConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.span, self.config)
    }
}

/// Parse a span written as `[start,end)`
///
/// # Errors
///
/// Returns [`AccessorError::Parse`] on malformed input.
pub fn parse_span(input: &str) -> Result<Span, AccessorError> {
    let malformed = || AccessorError::Parse {
        kind: "span",
        input: input.to_string(),
    };
    let inner = input
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(malformed)?;
    let (start, end) = inner.split_once(',').ok_or_else(malformed)?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() {
        return Err(malformed());
    }
    Ok(Span::new(start, end))
}

/// Parse an entry written as `[start,end):config`
///
/// # Errors
///
/// Returns [`AccessorError::Parse`] on malformed input.
pub fn parse_entry(input: &str) -> Result<SpanConfigEntry, AccessorError> {
    let (span, config) = input.trim().split_once("):").ok_or_else(|| AccessorError::Parse {
        kind: "span config entry",
        input: input.to_string(),
    })?;
    Ok(SpanConfigEntry::new(parse_span(&format!("{span})"))?, config.trim()))
}

/// Storage of span configuration records
pub trait SpanConfigAccessor {
    /// Every stored entry overlapping any of `spans`, ordered by start key,
    /// each reported once
    ///
    /// # Errors
    ///
    /// Returns [`AccessorError::InvalidSpan`] if a requested span is empty.
    fn get_span_config_entries_for(&self, spans: &[Span]) -> Result<Vec<SpanConfigEntry>, AccessorError>;

    /// Delete the entries stored exactly at `to_delete`, then upsert
    /// `to_upsert`. Either the whole batch applies or nothing does.
    ///
    /// # Errors
    ///
    /// Returns an [`AccessorError`] if a span is empty, a deleted span is not
    /// stored, or the result would contain overlapping entries.
    fn update_span_config_entries(
        &mut self,
        to_delete: &[Span],
        to_upsert: Vec<SpanConfigEntry>,
    ) -> Result<(), AccessorError>;
}

/// In-memory [`SpanConfigAccessor`], keyed by span start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemSpanConfigStore {
    entries: BTreeMap<String, SpanConfigEntry>,
}

impl MemSpanConfigStore {
    /// An empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, ordered by start key
    pub fn entries(&self) -> impl Iterator<Item = &SpanConfigEntry> {
        self.entries.values()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SpanConfigAccessor for MemSpanConfigStore {
    fn get_span_config_entries_for(&self, spans: &[Span]) -> Result<Vec<SpanConfigEntry>, AccessorError> {
        for span in spans {
            span.validate()?;
        }
        // Entries never overlap, so only the last entry starting before a
        // span's start can reach into it.
        let mut found: BTreeMap<&str, &SpanConfigEntry> = BTreeMap::new();
        for span in spans {
            let before = self
                .entries
                .range::<str, _>((Bound::Unbounded, Bound::Excluded(span.start.as_str())))
                .next_back()
                .map(|(_, e)| e);
            let inside = self
                .entries
                .range::<str, _>((
                    Bound::Included(span.start.as_str()),
                    Bound::Excluded(span.end.as_str()),
                ))
                .map(|(_, e)| e);
            for entry in before.into_iter().chain(inside) {
                if entry.span.overlaps(span) {
                    found.insert(entry.span.start.as_str(), entry);
                }
            }
        }
        trace!("{} spans matched {} entries", spans.len(), found.len());
        Ok(found.into_values().cloned().collect())
    }

    fn update_span_config_entries(
        &mut self,
        to_delete: &[Span],
        to_upsert: Vec<SpanConfigEntry>,
    ) -> Result<(), AccessorError> {
        for span in to_delete.iter().chain(to_upsert.iter().map(|e| &e.span)) {
            span.validate()?;
        }
        let mut batch: Vec<&Span> = to_upsert.iter().map(|e| &e.span).collect();
        batch.sort();
        for pair in batch.windows(2) {
            if pair[0].overlaps(pair[1]) {
                return Err(AccessorError::OverlappingSpans(
                    pair[0].to_string(),
                    pair[1].to_string(),
                ));
            }
        }

        let mut next = self.entries.clone();
        for span in to_delete {
            match next.get(&span.start) {
                Some(entry) if entry.span == *span => {
                    next.remove(&span.start);
                }
                _ => return Err(AccessorError::MissingSpan(span.to_string())),
            }
        }
        let upserted = to_upsert.len();
        for entry in to_upsert {
            next.insert(entry.span.start.clone(), entry);
        }

        let stored: Vec<&Span> = next.values().map(|e| &e.span).collect();
        for pair in stored.windows(2) {
            if pair[0].overlaps(pair[1]) {
                return Err(AccessorError::OverlappingSpans(
                    pair[0].to_string(),
                    pair[1].to_string(),
                ));
            }
        }

        debug!(
            "span config update: {} deleted, {upserted} upserted, {} stored",
            to_delete.len(),
            next.len()
        );
        self.entries = next;
        Ok(())
    }
}

/// Attributes span configuration entries are ingested under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanAttrs {
    /// Start key of the span
    pub start: Attr,
    /// End key of the span
    pub end: Attr,
    /// Configuration payload
    pub config: Attr,
}

impl SpanAttrs {
    const START: &'static str = "SpanStart";
    const END: &'static str = "SpanEnd";
    const CONFIG: &'static str = "SpanConfig";

    /// Declare the span attributes on a schema under construction
    #[must_use]
    pub fn declare(builder: SchemaBuilder) -> SchemaBuilder {
        builder.attr(Self::START).attr(Self::END).attr(Self::CONFIG)
    }

    /// Look the span attributes up in a schema built with [`SpanAttrs::declare`]
    ///
    /// # Errors
    ///
    /// Returns [`ConstructionError::UnknownAttribute`] if they were not declared.
    pub fn resolve(schema: &Schema) -> Result<Self, ConstructionError> {
        Ok(Self {
            start: schema.attr(Self::START)?,
            end: schema.attr(Self::END)?,
            config: schema.attr(Self::CONFIG)?,
        })
    }
}

/// Record each entry as a fresh entity typed [`SpanConfigEntry`], returning
/// the new entity ids in input order
///
/// # Errors
///
/// Returns [`StoreError::ForeignAttribute`] if `attrs` was resolved against a
/// different schema than the store's. The store is left untouched.
pub fn ingest<'e>(
    store: &mut FactStore,
    attrs: &SpanAttrs,
    entries: impl IntoIterator<Item = &'e SpanConfigEntry>,
) -> Result<Vec<EntityId>, StoreError> {
    let schema = store.schema();
    if let Some(foreign) = [attrs.start, attrs.end, attrs.config]
        .into_iter()
        .find(|a| !schema.contains(*a))
    {
        return Err(StoreError::ForeignAttribute(foreign));
    }
    let type_attr = schema.type_attr();

    let mut ids = Vec::new();
    for entry in entries {
        let id = store.new_entity();
        let fact = Fact::new(id)
            .with(attrs.start, entry.span.start.as_str())
            .with(attrs.end, entry.span.end.as_str())
            .with(attrs.config, entry.config.as_str())
            .with(type_attr, Value::Type(TypeTag::of::<SpanConfigEntry>()));
        store.insert_fact(fact)?;
        ids.push(id);
    }
    debug!("ingested {} span config entries", ids.len());
    Ok(ids)
}
