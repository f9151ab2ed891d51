//! Index repair and the full wipe.
use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::auth::Caller;
use crate::keys::{
    listing_key, owner_index_key, purchased_index_key, LISTINGS_ALL, LISTING_PATTERN,
    OWNER_INDEX_PATTERN, PURCHASED_INDEX_PATTERN,
};
use crate::listing::Listing;
use crate::{KvsEngine, Pipeline, Reply, Request, Result, SwapError};

/// the phrase an administrator must type to wipe every listing
pub const RESET_CONFIRMATION: &str = "DELETE ALL DATA";

/// Outcome of a [`Janitor::cleanup`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    /// roster entries examined
    pub checked: u64,
    /// roster entries removed because their record was gone
    pub orphans_removed: u64,
    /// missing owner or buyer index entries added back
    pub references_fixed: u64,
}

/// Outcome of a [`Janitor::reset`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetReport {
    /// primary listing records deleted
    pub deleted_listings: u64,
    /// owner and buyer index sets deleted
    pub deleted_user_sets: u64,
}

/// Keeps the roster and the per-user indexes in agreement with the primary records.
#[derive(Debug, Clone)]
pub struct Janitor<E: KvsEngine> {
    engine: E,
}

impl<E: KvsEngine> Janitor<E> {
    /// a janitor over `engine`
    pub fn new(engine: E) -> Self {
        Janitor { engine }
    }

    /// Removes roster ids whose record is gone and re-adds missing owner and buyer index
    /// entries. Never removes an entry that points at a live record, so running it twice in a
    /// row reports nothing the second time.
    ///
    /// Records that cannot be decoded are left alone.
    #[instrument(skip(self))]
    pub fn cleanup(&self) -> Result<CleanupReport> {
        let roster = self.engine.set_members(LISTINGS_ALL.to_string())?;
        let mut report = CleanupReport {
            checked: roster.len() as u64,
            ..CleanupReport::default()
        };
        if roster.is_empty() {
            return Ok(report);
        }

        let mut fetch = Pipeline::new();
        for id in &roster {
            fetch.get(listing_key(id));
        }
        let records = self.engine.exec(fetch)?;

        let mut removals = Pipeline::new();
        let mut repairs = Pipeline::new();
        for (id, reply) in roster.iter().zip(records) {
            let raw = match reply.into_text()? {
                Some(raw) => raw,
                None => {
                    warn!(listing_id = %id, "removing orphaned roster entry");
                    removals.srem(LISTINGS_ALL, id.as_str());
                    continue;
                }
            };
            let listing = match Listing::decode(&raw) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(listing_id = %id, "leaving undecodable listing alone: {}", e);
                    continue;
                }
            };
            if !listing.owner_id.is_empty() {
                repairs.sadd(owner_index_key(&listing.owner_id), id.as_str());
            }
            if let (true, Some(buyer_id)) = (listing.sold, &listing.buyer_id) {
                repairs.sadd(purchased_index_key(buyer_id), id.as_str());
            }
        }

        report.orphans_removed = self.count_changes(removals)?;
        report.references_fixed = self.count_changes(repairs)?;
        info!(
            checked = report.checked,
            orphans_removed = report.orphans_removed,
            references_fixed = report.references_fixed,
            "cleanup complete"
        );
        Ok(report)
    }

    /// Deletes every listing record, the roster and every owner and buyer index.
    ///
    /// Accounts are untouched.
    ///
    /// # Errors
    /// `Unauthenticated` or `Forbidden` unless the caller is an administrator, then
    /// `Validation` unless `confirmation` is exactly [`RESET_CONFIRMATION`].
    #[instrument(skip(self, confirmation))]
    pub fn reset(&self, caller: &Caller, confirmation: &str) -> Result<ResetReport> {
        let admin_id = caller.require_admin()?;
        if confirmation != RESET_CONFIRMATION {
            return Err(SwapError::Validation(format!(
                "type {:?} to confirm the reset",
                RESET_CONFIRMATION
            )));
        }
        warn!(admin_id, "wiping every listing");

        // one round trip: the roster, then every key found by pattern
        let mut discover = Pipeline::new();
        discover.smembers(LISTINGS_ALL);
        for pattern in [LISTING_PATTERN, OWNER_INDEX_PATTERN, PURCHASED_INDEX_PATTERN] {
            discover.push(Request::Keys {
                pattern: pattern.to_string(),
            });
        }
        let mut replies = self.engine.exec(discover)?.into_iter();
        let mut next = || -> Result<Vec<String>> {
            replies
                .next()
                .ok_or_else(|| SwapError::StoreUnavailable("missing key discovery reply".to_string()))?
                .into_members()
        };
        let (roster, by_pattern) = (next()?, next()?);
        let (owner_sets, buyer_sets) = (next()?, next()?);

        // records reachable from the roster plus any the roster lost track of
        let mut listing_keys: BTreeSet<String> = roster.iter().map(|id| listing_key(id)).collect();
        listing_keys.extend(by_pattern);
        let user_sets = owner_sets.into_iter().chain(buyer_sets);

        let report = ResetReport {
            deleted_listings: self.delete_all(listing_keys)?,
            deleted_user_sets: self.delete_all(user_sets)?,
        };
        self.engine.remove(LISTINGS_ALL.to_string())?;

        info!(
            deleted_listings = report.deleted_listings,
            deleted_user_sets = report.deleted_user_sets,
            "reset complete"
        );
        Ok(report)
    }

    fn delete_all<I: IntoIterator<Item = String>>(&self, keys: I) -> Result<u64> {
        let mut pipe = Pipeline::new();
        for key in keys {
            pipe.del(key);
        }
        self.count_changes(pipe)
    }

    /// runs `pipe` and counts the replies that report a change
    fn count_changes(&self, pipe: Pipeline) -> Result<u64> {
        if pipe.is_empty() {
            return Ok(0);
        }
        let mut changed = 0;
        for reply in self.engine.exec(pipe)? {
            if Reply::into_bool(reply)? {
                changed += 1;
            }
        }
        Ok(changed)
    }
}
