use std::path::Path;

use sled::{Db, IVec};
use tracing::info;

use super::{glob_match, Entry, KvsEngine};
use crate::{Result, SwapError};

/// Wrapper around a [`sled::Db`].
///
/// Entries are stored as serialized JSON [`Entry`] values. Set mutations are applied with
/// sled's compare-and-swap, retried until no concurrent writer interferes.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// wraps an already opened sled database
    pub fn new(db: Db) -> Self {
        SledStore { db }
    }

    /// opens (or creates) a sled database inside `path`
    pub fn open(path: &Path) -> Result<Self> {
        info!("opening sled engine in {:?}", path);
        Ok(SledStore::new(sled::open(path)?))
    }

    fn read(&self, key: &str) -> Result<(Option<IVec>, Option<Entry>)> {
        let raw = self.db.get(key)?;
        let entry = match &raw {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };
        Ok((raw, entry))
    }

    /// Applies `f` to the entry at `key` atomically, returning what `f` reports.
    ///
    /// `f` returns the replacement entry (`None` deletes the key) and its result, or `Ok(None)`
    /// for the entry to leave the key untouched.
    fn update<T, F>(&self, key: &str, mut f: F) -> Result<T>
    where
        F: FnMut(Option<Entry>) -> Result<(Option<Option<Entry>>, T)>,
    {
        loop {
            let (raw, entry) = self.read(key)?;
            let (replacement, outcome) = f(entry)?;
            let replacement = match replacement {
                Some(replacement) => replacement,
                None => return Ok(outcome),
            };
            let new = match replacement {
                Some(entry) => Some(serde_json::to_vec(&entry)?),
                None => None,
            };
            if self.db.compare_and_swap(key, raw, new)?.is_ok() {
                self.db.flush()?;
                return Ok(outcome);
            }
        }
    }
}

impl KvsEngine for SledStore {
    fn set(&self, key: String, value: String) -> Result<()> {
        self.db
            .insert(key, serde_json::to_vec(&Entry::Text(value))?)?;
        self.db.flush()?;
        Ok(())
    }

    fn get(&self, key: String) -> Result<Option<String>> {
        let (_, entry) = self.read(&key)?;
        Entry::text(&key, entry)
    }

    fn remove(&self, key: String) -> Result<bool> {
        let removed = self.db.remove(key)?.is_some();
        self.db.flush()?;
        Ok(removed)
    }

    fn set_add(&self, key: String, member: String) -> Result<bool> {
        self.update(&key, |entry| {
            let mut members = Entry::members(&key, entry)?;
            if members.insert(member.clone()) {
                Ok((Some(Some(Entry::Set(members))), true))
            } else {
                Ok((None, false))
            }
        })
    }

    fn set_remove(&self, key: String, member: String) -> Result<bool> {
        self.update(&key, |entry| {
            let mut members = Entry::members(&key, entry)?;
            if !members.remove(&member) {
                return Ok((None, false));
            }
            if members.is_empty() {
                Ok((Some(None), true))
            } else {
                Ok((Some(Some(Entry::Set(members))), true))
            }
        })
    }

    fn set_members(&self, key: String) -> Result<Vec<String>> {
        let (_, entry) = self.read(&key)?;
        Ok(Entry::members(&key, entry)?.into_iter().collect())
    }

    fn set_cardinality(&self, key: String) -> Result<u64> {
        let (_, entry) = self.read(&key)?;
        Ok(Entry::members(&key, entry)?.len() as u64)
    }

    fn set_is_member(&self, key: String, member: String) -> Result<bool> {
        let (_, entry) = self.read(&key)?;
        Ok(Entry::members(&key, entry)?.contains(&member))
    }

    fn keys(&self, pattern: String) -> Result<Vec<String>> {
        let mut keys = vec![];
        for key in self.db.iter().keys() {
            let key = String::from_utf8(key?.to_vec())
                .map_err(|e| SwapError::Parsing(format!("non utf-8 key in sled: {}", e)))?;
            if glob_match(&pattern, &key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn compare_and_swap(
        &self,
        key: String,
        expected: Option<String>,
        value: String,
    ) -> Result<bool> {
        self.update(&key, |entry| {
            let current = Entry::text(&key, entry)?;
            if current == expected {
                Ok((Some(Some(Entry::Text(value.clone()))), true))
            } else {
                Ok((None, false))
            }
        })
    }
}
