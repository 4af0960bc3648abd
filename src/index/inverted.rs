//! Versioned inverted index
//!
//! Maps property key -> term -> postings. A posting records the commit
//! version that added it and, once removed, the version that removed it, so
//! a read at snapshot `v` sees exactly the entries live at `v`. Terms are
//! kept sorted, which lets a wildcard query scan only the terms sharing the
//! pattern's literal prefix.

use super::wildcard::WildcardPattern;
use crate::graph::{EntityClass, EntityId, PropertyValue};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Posting {
    entity: EntityId,
    added: u64,
    removed: Option<u64>,
}

impl Posting {
    fn visible_at(&self, at: u64) -> bool {
        self.added <= at && self.removed.map_or(true, |removed| removed > at)
    }

    fn is_live(&self) -> bool {
        self.removed.is_none()
    }
}

/// A named index over one entity class
#[derive(Debug, Clone)]
pub struct InvertedIndex {
    name: String,
    class: EntityClass,
    /// Version that created the index
    created: u64,
    keys: HashMap<String, BTreeMap<String, Vec<Posting>>>,
    /// Live (key, term) pairs per entity, for removal without a full scan
    entries: HashMap<EntityId, Vec<(String, String)>>,
}

impl InvertedIndex {
    pub fn new(name: impl Into<String>, class: EntityClass, created: u64) -> Self {
        Self {
            name: name.into(),
            class,
            created,
            keys: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> EntityClass {
        self.class
    }

    /// Whether the index exists for a reader at `at`
    pub fn exists_at(&self, at: u64) -> bool {
        self.created <= at
    }

    /// Add an entry; returns `false` if the same entry is already live
    pub fn insert(&mut self, entity: EntityId, key: &str, value: &PropertyValue, version: u64) -> bool {
        let term = value.index_term();
        let postings = self
            .keys
            .entry(key.to_string())
            .or_default()
            .entry(term.clone())
            .or_default();
        if postings.iter().any(|p| p.entity == entity && p.is_live()) {
            return false;
        }
        postings.push(Posting {
            entity,
            added: version,
            removed: None,
        });
        self.entries
            .entry(entity)
            .or_default()
            .push((key.to_string(), term));
        true
    }

    /// Remove live entries of `entity`, optionally restricted to one key and
    /// value. Returns the number of entries removed.
    pub fn remove(
        &mut self,
        entity: EntityId,
        key: Option<&str>,
        value: Option<&PropertyValue>,
        version: u64,
    ) -> usize {
        let Some(pairs) = self.entries.get_mut(&entity) else {
            return 0;
        };
        let term = value.map(PropertyValue::index_term);
        let mut removed = 0;

        pairs.retain(|(k, t)| {
            let selected =
                key.map_or(true, |key| key == k) && term.as_deref().map_or(true, |term| term == t);
            if !selected {
                return true;
            }
            if let Some(postings) = self.keys.get_mut(k).and_then(|terms| terms.get_mut(t)) {
                for posting in postings.iter_mut().filter(|p| p.entity == entity && p.is_live()) {
                    posting.removed = Some(version);
                    removed += 1;
                }
            }
            false
        });
        if pairs.is_empty() {
            self.entries.remove(&entity);
        }
        removed
    }

    /// Entities indexed under exactly `key` = `value` at `at`
    pub fn get(&self, key: &str, value: &PropertyValue, at: u64) -> Vec<EntityId> {
        let term = value.index_term();
        self.keys
            .get(key)
            .and_then(|terms| terms.get(&term))
            .map(|postings| {
                let mut seen = HashSet::new();
                postings
                    .iter()
                    .filter(|p| p.visible_at(at) && seen.insert(p.entity))
                    .map(|p| p.entity)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entities whose term under `key` matches `pattern` at `at`, in term order
    pub fn query(&self, key: &str, pattern: &WildcardPattern, at: u64) -> Vec<EntityId> {
        let Some(terms) = self.keys.get(key) else {
            return Vec::new();
        };
        let prefix = pattern.prefix();
        let mut seen = HashSet::new();
        let mut result = Vec::new();

        for (term, postings) in terms.range(prefix.to_string()..) {
            if !term.starts_with(prefix) {
                break;
            }
            if !pattern.matches(term) {
                continue;
            }
            for posting in postings {
                if posting.visible_at(at) && seen.insert(posting.entity) {
                    result.push(posting.entity);
                }
            }
        }
        result
    }

    /// Number of live entries held for `entity`
    pub fn live_entries(&self, entity: EntityId) -> usize {
        self.entries.get(&entity).map_or(0, Vec::len)
    }

    /// Drop postings removed at or before `horizon`; returns how many
    pub fn vacuum(&mut self, horizon: u64) -> usize {
        let mut pruned = 0;
        for terms in self.keys.values_mut() {
            for postings in terms.values_mut() {
                let before = postings.len();
                postings.retain(|p| p.removed.map_or(true, |removed| removed > horizon));
                pruned += before - postings.len();
            }
            terms.retain(|_, postings| !postings.is_empty());
        }
        self.keys.retain(|_, terms| !terms.is_empty());
        pruned
    }
}
