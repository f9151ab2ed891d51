//! This module provides the key/value storage engine implementations used by the marketplace.
//!
//! Every engine implements [`KvsEngine`], the typed command interface (GET, SET, DEL, SADD,
//! SREM, SMEMBERS, SCARD, SISMEMBER, KEYS, compare-and-swap and pipelined batches). Three
//! engines are provided:
//!
//! - [`MemoryStore`], a concurrent in-memory map built on [`dashmap`]
//! - [`LogStore`], a log-structured engine that persists commands into compacting log files
//! - [`SledStore`], a wrapper around the [`sled`] embedded database
//!
//! The [`KvsClient`](crate::KvsClient) also implements the trait, forwarding every command to
//! a remote [`KvsServer`](crate::KvsServer).
//!
//! [`dashmap`]: https://docs.rs/dashmap/latest/dashmap/
//! [`sled`]: https://docs.rs/sled/latest/sled/
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::command::{Pipeline, Reply, Request};
use crate::{Result, SwapError};

/// A trait for the functionality of a key/value storage engine
pub trait KvsEngine: Clone + Send + 'static {
    /// sets a `key` and `value`
    ///
    /// If the given `key` already exists the previous `value` will be overwritten.
    fn set(&self, key: String, value: String) -> Result<()>;

    /// Gets the value associated with the given `key`
    ///
    /// Returns `None` if the given `key` does not exist.
    ///
    /// # Errors
    ///
    /// Returns `SwapError::WrongType` if the `key` holds a set.
    fn get(&self, key: String) -> Result<Option<String>>;

    /// Removes the given `key` (and associated value or set) from the store
    ///
    /// Returns `true` if the key existed.
    fn remove(&self, key: String) -> Result<bool>;

    /// Adds `member` to the set at `key`, creating the set if needed.
    ///
    /// Returns `true` if the member was not already present.
    fn set_add(&self, key: String, member: String) -> Result<bool>;

    /// Removes `member` from the set at `key`. An emptied set is deleted.
    ///
    /// Returns `true` if the member was present.
    fn set_remove(&self, key: String, member: String) -> Result<bool>;

    /// All members of the set at `key`, in lexical order. A missing key is an empty set.
    fn set_members(&self, key: String) -> Result<Vec<String>>;

    /// Number of members in the set at `key`
    fn set_cardinality(&self, key: String) -> Result<u64>;

    /// Whether `member` belongs to the set at `key`
    fn set_is_member(&self, key: String, member: String) -> Result<bool>;

    /// Every key matching the glob `pattern`, in lexical order
    fn keys(&self, pattern: String) -> Result<Vec<String>>;

    /// Sets `key` to `value` only if its current string value equals `expected`
    /// (`None` requires the key to be absent).
    ///
    /// Returns `true` if the swap happened.
    fn compare_and_swap(&self, key: String, expected: Option<String>, value: String)
        -> Result<bool>;

    /// Executes a single request against this engine
    fn execute(&self, request: Request) -> Result<Reply> {
        Ok(match request {
            Request::Ping => Reply::Text("PONG".to_string()),
            Request::Get { key } => self.get(key)?.map_or(Reply::Nil, Reply::Text),
            Request::Set { key, value } => {
                self.set(key, value)?;
                Reply::Nil
            }
            Request::Remove { key } => Reply::Bool(self.remove(key)?),
            Request::SetAdd { key, member } => Reply::Bool(self.set_add(key, member)?),
            Request::SetRemove { key, member } => Reply::Bool(self.set_remove(key, member)?),
            Request::SetMembers { key } => Reply::Members(self.set_members(key)?),
            Request::SetCard { key } => Reply::Int(self.set_cardinality(key)?),
            Request::SetIsMember { key, member } => {
                Reply::Bool(self.set_is_member(key, member)?)
            }
            Request::Keys { pattern } => Reply::Members(self.keys(pattern)?),
            Request::CompareAndSwap {
                key,
                expected,
                value,
            } => Reply::Bool(self.compare_and_swap(key, expected, value)?),
            Request::Pipeline(requests) => Reply::Batch(self.pipeline(requests)?),
        })
    }

    /// Executes a batch of requests in order, returning one reply per request.
    ///
    /// The batch fails as a whole if any command fails. Commands that ran before the failing
    /// one are not rolled back.
    fn pipeline(&self, requests: Vec<Request>) -> Result<Vec<Reply>> {
        let mut replies = Vec::with_capacity(requests.len());
        for request in requests {
            if let Request::Pipeline(_) = request {
                return Err(SwapError::Parsing(
                    "pipelines cannot be nested".to_string(),
                ));
            }
            replies.push(self.execute(request)?);
        }
        Ok(replies)
    }

    /// Executes the commands queued in a [`Pipeline`] builder
    fn exec(&self, pipeline: Pipeline) -> Result<Vec<Reply>> {
        if pipeline.is_empty() {
            return Ok(vec![]);
        }
        self.pipeline(pipeline.into_requests())
    }
}

/// A value held by an engine: either a plain string or a set of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry {
    /// a string value, written by SET
    Text(String),
    /// a set of members, written by SADD
    Set(BTreeSet<String>),
}

impl Entry {
    /// the string held by an optional entry
    pub(crate) fn text(key: &str, entry: Option<Entry>) -> Result<Option<String>> {
        match entry {
            None => Ok(None),
            Some(Entry::Text(s)) => Ok(Some(s)),
            Some(Entry::Set(_)) => Err(SwapError::WrongType(key.to_string())),
        }
    }

    /// the set held by an optional entry, a missing entry is an empty set
    pub(crate) fn members(key: &str, entry: Option<Entry>) -> Result<BTreeSet<String>> {
        match entry {
            None => Ok(BTreeSet::new()),
            Some(Entry::Set(s)) => Ok(s),
            Some(Entry::Text(_)) => Err(SwapError::WrongType(key.to_string())),
        }
    }
}

/// Matches `key` against a Redis style glob `pattern`.
///
/// Supports `*`, `?`, bracket classes such as `[abc]`, `[a-z]` and `[^a]`, and `\` escapes.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    match_from(&pattern, &key)
}

fn match_from(pattern: &[char], key: &[char]) -> bool {
    match pattern.first() {
        None => key.is_empty(),
        Some('*') => {
            // try every split point of the remaining key
            let rest = &pattern[1..];
            (0..=key.len()).any(|i| match_from(rest, &key[i..]))
        }
        Some('?') => !key.is_empty() && match_from(&pattern[1..], &key[1..]),
        Some('[') => match (key.first(), class_end(pattern)) {
            (Some(c), Some(end)) => {
                class_matches(&pattern[1..end], *c) && match_from(&pattern[end + 1..], &key[1..])
            }
            // unterminated class, treat '[' literally
            (Some(c), None) => *c == '[' && match_from(&pattern[1..], &key[1..]),
            (None, _) => false,
        },
        Some('\\') if pattern.len() > 1 => {
            key.first() == Some(&pattern[1]) && match_from(&pattern[2..], &key[1..])
        }
        Some(p) => key.first() == Some(p) && match_from(&pattern[1..], &key[1..]),
    }
}

/// index of the `]` closing the class that opens at `pattern[0]`
fn class_end(pattern: &[char]) -> Option<usize> {
    let mut i = 1;
    while i < pattern.len() {
        match pattern[i] {
            '\\' => i += 2,
            ']' if i > 1 => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn class_matches(class: &[char], c: char) -> bool {
    let (negated, class) = match class.first() {
        Some('^') => (true, &class[1..]),
        _ => (false, class),
    };
    let mut matched = false;
    let mut i = 0;
    while i < class.len() {
        if class[i] == '\\' && i + 1 < class.len() {
            matched |= class[i + 1] == c;
            i += 2;
        } else if i + 2 < class.len() && class[i + 1] == '-' {
            let (lo, hi) = if class[i] <= class[i + 2] {
                (class[i], class[i + 2])
            } else {
                (class[i + 2], class[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= class[i] == c;
            i += 1;
        }
    }
    matched != negated
}

mod kvs;
mod memory;
mod sled_store;

pub use self::kvs::LogStore;
pub use self::memory::MemoryStore;
pub use self::sled_store::SledStore;
