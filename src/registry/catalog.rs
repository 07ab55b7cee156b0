//! Generic Keyed Catalog
//!
//! [`Registry`] is a name-indexed, insertion-ordered store with a category
//! index and an active/inactive flag per entry. Re-inserting a name replaces
//! the entry and moves it to the new category.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Whether an entry may be executed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Active,
    Inactive,
}

impl EntryStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// One catalog slot.
#[derive(Debug, Clone)]
pub struct Entry<T, C> {
    pub item: T,
    pub category: C,
    pub status: EntryStatus,
    pub registered_at: DateTime<Utc>,
}

/// Counts over the catalog.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// Name-indexed catalog grouped by category `C`.
#[derive(Debug, Clone)]
pub struct Registry<T, C>
where
    C: Clone + Ord + Hash + Debug + ToString,
{
    entries: IndexMap<String, Entry<T, C>>,
    categories: BTreeMap<C, BTreeSet<String>>,
}

impl<T, C> Default for Registry<T, C>
where
    C: Clone + Ord + Hash + Debug + ToString,
{
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
            categories: BTreeMap::new(),
        }
    }
}

impl<T, C> Registry<T, C>
where
    C: Clone + Ord + Hash + Debug + ToString,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `name`, returning the previous item.
    ///
    /// A new entry starts active. A replaced entry keeps its status and its
    /// insertion position.
    pub fn insert(&mut self, name: impl Into<String>, category: C, item: T) -> Option<T> {
        let name = name.into();

        if let Some(entry) = self.entries.get_mut(&name) {
            let old_category = std::mem::replace(&mut entry.category, category.clone());
            let previous = std::mem::replace(&mut entry.item, item);
            entry.registered_at = Utc::now();

            self.unindex(&old_category, &name);
            self.categories.entry(category).or_default().insert(name);
            return Some(previous);
        }

        self.categories
            .entry(category.clone())
            .or_default()
            .insert(name.clone());
        self.entries.insert(
            name,
            Entry {
                item,
                category,
                status: EntryStatus::Active,
                registered_at: Utc::now(),
            },
        );
        None
    }

    fn unindex(&mut self, category: &C, name: &str) {
        if let Some(names) = self.categories.get_mut(category) {
            names.remove(name);
            if names.is_empty() {
                self.categories.remove(category);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name).map(|entry| &entry.item)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.entries.get_mut(name).map(|entry| &mut entry.item)
    }

    pub fn entry(&self, name: &str) -> Option<&Entry<T, C>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        let entry = self.entries.shift_remove(name)?;
        self.unindex(&entry.category, name);
        Some(entry.item)
    }

    /// Names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Names in `category`, sorted.
    pub fn by_category(&self, category: &C) -> Vec<String> {
        self.categories
            .get(category)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn categories(&self) -> Vec<C> {
        self.categories.keys().cloned().collect()
    }

    /// Sets the status of `name`; returns false if it isn't registered.
    pub fn set_status(&mut self, name: &str, status: EntryStatus) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    pub fn status(&self, name: &str) -> Option<EntryStatus> {
        self.entries.get(name).map(|entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.categories.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry<T, C>)> {
        self.entries.iter()
    }

    pub fn stats(&self) -> RegistryStats {
        let active = self
            .entries
            .values()
            .filter(|entry| entry.status.is_active())
            .count();

        RegistryStats {
            total: self.entries.len(),
            active,
            inactive: self.entries.len() - active,
            by_category: self
                .categories
                .iter()
                .map(|(category, names)| (category.to_string(), names.len()))
                .collect(),
        }
    }
}
