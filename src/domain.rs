use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::DexError;

pub const MAX_ID: u16 = 1025;
pub const MIN_CACHED_ENTRIES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u16);

impl EntityId {
    pub fn new(value: u16) -> Result<Self, DexError> {
        if value == 0 {
            return Err(DexError::InvalidEntityId(value.to_string()));
        }
        Ok(Self(value))
    }

    /// Strict parse for persisted document keys: plain decimal digits only.
    pub fn from_key(key: &str) -> Result<Self, DexError> {
        if key.is_empty() || !key.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(DexError::InvalidEntityId(key.to_string()));
        }
        let value = key
            .parse::<u16>()
            .map_err(|_| DexError::InvalidEntityId(key.to_string()))?;
        Self::new(value)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    pub fn range(max_id: u16) -> impl Iterator<Item = EntityId> {
        (1..=max_id).map(EntityId)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = DexError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        Self::from_key(digits).map_err(|_| DexError::InvalidEntityId(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    #[serde(alias = "de")]
    pub localized: String,
    #[serde(alias = "en")]
    pub canonical: String,
}

impl NameRecord {
    pub fn new(localized: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            localized: localized.into(),
            canonical: canonical.into(),
        }
    }

    pub fn placeholder(id: EntityId, canonical: impl Into<String>) -> Self {
        Self::new(placeholder_name(id), canonical)
    }

    pub fn fallback(id: EntityId) -> Self {
        Self::new(format!("Entity {id}"), format!("entity-{id}"))
    }

    pub fn is_placeholder(&self) -> bool {
        match self.localized.strip_prefix('#') {
            Some(rest) => !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_digit()),
            None => false,
        }
    }
}

pub fn placeholder_name(id: EntityId) -> String {
    format!("#{:04}", id.get())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NameCache(BTreeMap<EntityId, NameRecord>);

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&NameRecord> {
        self.0.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.0.contains_key(&id)
    }

    pub fn insert(&mut self, id: EntityId, record: NameRecord) {
        self.0.insert(id, record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &NameRecord)> {
        self.0.iter().map(|(id, record)| (*id, record))
    }

    /// Applies one record under the merge rule: a placeholder never replaces a
    /// resolved record, everything else replaces what is there. Returns whether
    /// the map changed.
    pub fn merge_record(&mut self, id: EntityId, record: NameRecord) -> bool {
        if let Some(existing) = self.0.get(&id) {
            if record.is_placeholder() && !existing.is_placeholder() {
                return false;
            }
            if *existing == record {
                return false;
            }
        }
        self.0.insert(id, record);
        true
    }

    pub fn merge(&mut self, other: NameCache) -> usize {
        let mut changed = 0;
        for (id, record) in other.0 {
            if self.merge_record(id, record) {
                changed += 1;
            }
        }
        changed
    }

    /// Ids in `1..=max_id` with no record at all.
    pub fn missing_ids(&self, max_id: u16) -> Vec<EntityId> {
        EntityId::range(max_id)
            .filter(|id| !self.0.contains_key(id))
            .collect()
    }

    /// Ids in `1..=max_id` that are missing or still hold a placeholder.
    pub fn refresh_ids(&self, max_id: u16) -> Vec<EntityId> {
        EntityId::range(max_id)
            .filter(|id| self.0.get(id).is_none_or(NameRecord::is_placeholder))
            .collect()
    }

    /// Drops records outside `1..=max_id`, returning how many were removed.
    pub fn retain_range(&mut self, max_id: u16) -> usize {
        let before = self.0.len();
        self.0.retain(|id, _| id.get() <= max_id);
        before - self.0.len()
    }

    pub fn placeholder_count(&self) -> usize {
        self.0.values().filter(|record| record.is_placeholder()).count()
    }

    pub fn resolved_count(&self) -> usize {
        self.len() - self.placeholder_count()
    }
}

impl FromIterator<(EntityId, NameRecord)> for NameCache {
    fn from_iter<T: IntoIterator<Item = (EntityId, NameRecord)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnershipCache(BTreeMap<EntityId, bool>);

impl OwnershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_owned(&self, id: EntityId) -> bool {
        self.0.get(&id).copied().unwrap_or(false)
    }

    pub fn toggle(&mut self, id: EntityId) -> bool {
        let next = !self.is_owned(id);
        self.0.insert(id, next);
        next
    }

    pub fn owned_count(&self) -> usize {
        self.0.values().filter(|owned| **owned).count()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, bool)> {
        self.0.iter().map(|(id, owned)| (*id, *owned))
    }
}

impl FromIterator<(EntityId, bool)> for OwnershipCache {
    fn from_iter<T: IntoIterator<Item = (EntityId, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Serial,
    Fast,
    Ultra,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Serial => write!(f, "serial"),
            Strategy::Fast => write!(f, "fast"),
            Strategy::Ultra => write!(f, "ultra"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameQuery {
    /// Any all-digit query, even one outside the id range. Those match nothing.
    Id(u32),
    Text(String),
}

impl NameQuery {
    pub fn parse(query: &str) -> Option<Self> {
        let trimmed = query.trim().to_lowercase();
        if trimmed.is_empty() {
            return None;
        }
        let needle = trimmed.strip_prefix('#').unwrap_or(&trimmed);
        if needle.chars().all(|ch| ch.is_ascii_digit()) {
            // a bare "#" or an overflowing number becomes 0, which matches no id
            let id = needle.parse::<u32>().unwrap_or(0);
            return Some(NameQuery::Id(id));
        }
        Some(NameQuery::Text(needle.to_string()))
    }

    pub fn matches(&self, id: EntityId, record: &NameRecord) -> bool {
        match self {
            NameQuery::Id(wanted) => *wanted == u32::from(id.get()),
            NameQuery::Text(needle) => {
                record.localized.to_lowercase().contains(needle.as_str())
                    || record.canonical.to_lowercase().contains(needle.as_str())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_form() {
        let id = EntityId::new(7).unwrap();
        let record = NameRecord::placeholder(id, "squirtle");
        assert_eq!(record.localized, "#0007");
        assert!(record.is_placeholder());
        assert!(!NameRecord::new("Schiggy", "squirtle").is_placeholder());
        assert!(!NameRecord::new("#", "x").is_placeholder());
    }

    #[test]
    fn refresh_ids_include_missing_and_placeholders() {
        let mut cache = NameCache::new();
        let one = EntityId::new(1).unwrap();
        let two = EntityId::new(2).unwrap();
        cache.insert(one, NameRecord::new("Bisasam", "bulbasaur"));
        cache.insert(two, NameRecord::placeholder(two, "ivysaur"));

        let ids: Vec<u16> = cache.refresh_ids(3).into_iter().map(EntityId::get).collect();
        assert_eq!(ids, vec![2, 3]);
        let missing: Vec<u16> = cache.missing_ids(3).into_iter().map(EntityId::get).collect();
        assert_eq!(missing, vec![3]);
    }
}
