//! Key schema: the deterministic mapping from marketplace concepts to store keys.
//!
//! | key | holds |
//! |---|---|
//! | `listing:{listing_id}` | a serialized [`Listing`](crate::Listing) |
//! | `listings:all` | the roster, a set of every listing id |
//! | `user:{user_id}:listings` | owner index, ids the user created |
//! | `user:{user_id}:purchased` | buyer index, ids the user bought |
//! | `account:{user_id}` | a serialized [`User`](crate::User) kept by the store directory |
//! | `accounts:all` | a set of every account id |
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// the roster set of every known listing id
pub const LISTINGS_ALL: &str = "listings:all";

/// matches every primary listing record
pub const LISTING_PATTERN: &str = "listing:*";

/// matches every owner index
pub const OWNER_INDEX_PATTERN: &str = "user:*:listings";

/// matches every buyer index
pub const PURCHASED_INDEX_PATTERN: &str = "user:*:purchased";

/// the set of every account id held by the store directory
pub const ACCOUNTS_ALL: &str = "accounts:all";

const SUFFIX_LEN: usize = 9;
const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `listing:{id}`
pub fn listing_key(id: &str) -> String {
    format!("listing:{}", id)
}

/// `user:{user_id}:listings`
pub fn owner_index_key(user_id: &str) -> String {
    format!("user:{}:listings", user_id)
}

/// `user:{user_id}:purchased`
pub fn purchased_index_key(user_id: &str) -> String {
    format!("user:{}:purchased", user_id)
}

/// `account:{user_id}`
pub fn account_key(user_id: &str) -> String {
    format!("account:{}", user_id)
}

/// A listing identifier: `{creation millis}-{9 lowercase base36 chars}`.
///
/// The millisecond prefix makes ids sort lexically by creation time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(String);

impl ListingId {
    /// generates a fresh id stamped with the current time
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    /// generates a fresh id stamped with `at`
    pub fn generate_at(at: DateTime<Utc>) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..SUFFIX_LEN)
            .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
            .collect();
        ListingId(format!("{}-{}", at.timestamp_millis(), suffix))
    }

    /// the creation time encoded in the id prefix, if the id has one
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.0.split('-').next()?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// the store key of the primary record
    pub fn key(&self) -> String {
        listing_key(&self.0)
    }
}

impl fmt::Display for ListingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ListingId {
    fn from(id: &str) -> Self {
        ListingId(id.to_string())
    }
}

impl From<String> for ListingId {
    fn from(id: String) -> Self {
        ListingId(id)
    }
}
