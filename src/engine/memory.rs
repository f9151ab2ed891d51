use std::sync::Arc;

use dashmap::mapref::entry::Entry as Slot;
use dashmap::DashMap;

use super::{glob_match, Entry, KvsEngine};
use crate::{Result, SwapError};

/// A concurrent, in-memory storage engine.
///
/// Nothing is persisted; the data lives as long as the last clone of the store. Each key is
/// guarded by its [`DashMap`] shard, so single commands are atomic while pipelines are not.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    map: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    /// creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// number of keys currently held
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// true if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl KvsEngine for MemoryStore {
    fn set(&self, key: String, value: String) -> Result<()> {
        self.map.insert(key, Entry::Text(value));
        Ok(())
    }

    fn get(&self, key: String) -> Result<Option<String>> {
        let entry = self.map.get(&key).map(|e| e.value().clone());
        Entry::text(&key, entry)
    }

    fn remove(&self, key: String) -> Result<bool> {
        Ok(self.map.remove(&key).is_some())
    }

    fn set_add(&self, key: String, member: String) -> Result<bool> {
        match self.map.entry(key) {
            Slot::Occupied(mut slot) => match slot.get_mut() {
                Entry::Set(members) => Ok(members.insert(member)),
                Entry::Text(_) => Err(SwapError::WrongType(slot.key().clone())),
            },
            Slot::Vacant(slot) => {
                slot.insert(Entry::Set(std::iter::once(member).collect()));
                Ok(true)
            }
        }
    }

    fn set_remove(&self, key: String, member: String) -> Result<bool> {
        match self.map.entry(key) {
            Slot::Occupied(mut slot) => {
                let (removed, emptied) = match slot.get_mut() {
                    Entry::Set(members) => (members.remove(&member), members.is_empty()),
                    Entry::Text(_) => return Err(SwapError::WrongType(slot.key().clone())),
                };
                if emptied {
                    slot.remove();
                }
                Ok(removed)
            }
            Slot::Vacant(_) => Ok(false),
        }
    }

    fn set_members(&self, key: String) -> Result<Vec<String>> {
        let entry = self.map.get(&key).map(|e| e.value().clone());
        Ok(Entry::members(&key, entry)?.into_iter().collect())
    }

    fn set_cardinality(&self, key: String) -> Result<u64> {
        match self.map.get(&key).as_deref() {
            None => Ok(0),
            Some(Entry::Set(members)) => Ok(members.len() as u64),
            Some(Entry::Text(_)) => Err(SwapError::WrongType(key)),
        }
    }

    fn set_is_member(&self, key: String, member: String) -> Result<bool> {
        match self.map.get(&key).as_deref() {
            None => Ok(false),
            Some(Entry::Set(members)) => Ok(members.contains(&member)),
            Some(Entry::Text(_)) => Err(SwapError::WrongType(key)),
        }
    }

    fn keys(&self, pattern: String) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .map
            .iter()
            .filter(|e| glob_match(&pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn compare_and_swap(
        &self,
        key: String,
        expected: Option<String>,
        value: String,
    ) -> Result<bool> {
        match self.map.entry(key) {
            Slot::Occupied(mut slot) => {
                let matches = match slot.get() {
                    Entry::Text(current) => expected.as_deref() == Some(current.as_str()),
                    Entry::Set(_) => return Err(SwapError::WrongType(slot.key().clone())),
                };
                if matches {
                    slot.insert(Entry::Text(value));
                }
                Ok(matches)
            }
            Slot::Vacant(slot) => {
                if expected.is_some() {
                    return Ok(false);
                }
                slot.insert(Entry::Text(value));
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emptied_sets_disappear() {
        let store = MemoryStore::new();
        assert!(store.set_add("s".into(), "a".into()).unwrap());
        assert!(!store.set_add("s".into(), "a".into()).unwrap());
        assert_eq!(store.set_cardinality("s".into()).unwrap(), 1);
        assert!(store.set_remove("s".into(), "a".into()).unwrap());
        assert!(store.is_empty());
        assert!(store.keys("*".into()).unwrap().is_empty());
    }

    #[test]
    fn wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.set("k".into(), "v".into()).unwrap();
        assert!(matches!(
            store.set_add("k".into(), "m".into()),
            Err(SwapError::WrongType(_))
        ));
        store.set_add("s".into(), "m".into()).unwrap();
        assert!(matches!(store.get("s".into()), Err(SwapError::WrongType(_))));
    }

    #[test]
    fn compare_and_swap_requires_the_expected_value() {
        let store = MemoryStore::new();
        assert!(store.compare_and_swap("k".into(), None, "1".into()).unwrap());
        assert!(!store.compare_and_swap("k".into(), None, "2".into()).unwrap());
        assert!(!store
            .compare_and_swap("k".into(), Some("0".into()), "2".into())
            .unwrap());
        assert!(store
            .compare_and_swap("k".into(), Some("1".into()), "2".into())
            .unwrap());
        assert_eq!(store.get("k".into()).unwrap().as_deref(), Some("2"));
    }
}
