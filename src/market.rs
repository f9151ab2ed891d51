//! The listing lifecycle: create, browse, edit, delete, purchase and view counting.
//!
//! The primary record at `listing:{id}` is authoritative. The roster and the per-user indexes
//! are derived and updated with separate commands after the primary record, so a failure
//! part way through leaves drift that [`Janitor::cleanup`](crate::Janitor::cleanup) repairs.
//!
//! Read-modify-write updates of a primary record are guarded by a compare-and-swap on the
//! stored text: a writer that lost a race re-reads the record and re-validates. Two buyers
//! racing for one listing therefore cannot both succeed; the loser sees `AlreadySold`.
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::auth::Caller;
use crate::keys::{listing_key, owner_index_key, purchased_index_key, ListingId, LISTINGS_ALL};
use crate::listing::{Listing, ListingQuery, ListingRequest};
use crate::pricing;
use crate::{KvsEngine, Pipeline, Result, SwapError};

// how many times a compare-and-swap update is retried before giving up
const MAX_SWAP_ATTEMPTS: usize = 16;

/// Entry point for every listing operation, over an injected storage engine.
#[derive(Debug, Clone)]
pub struct Marketplace<E: KvsEngine> {
    engine: E,
}

impl<E: KvsEngine> Marketplace<E> {
    /// a marketplace backed by `engine`
    pub fn new(engine: E) -> Self {
        Marketplace { engine }
    }

    /// the underlying engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Creates a listing owned by the caller.
    ///
    /// Writes the primary record, then adds the id to the roster, then to the owner index.
    ///
    /// # Errors
    /// `Unauthenticated` without a caller, `Validation` for a bad spot number or lot,
    /// `InvalidRange` when the range ends before it starts.
    #[instrument(skip(self, request))]
    pub fn create(&self, caller: &Caller, request: ListingRequest) -> Result<Listing> {
        let owner_id = caller.require_user()?;
        let new = request.validate()?;
        let quote = pricing::quote(new.from_date, new.to_date)?;
        let listing = Listing::new(ListingId::generate(), owner_id, &new, quote);
        let id = listing.listing_id.to_string();

        self.engine.set(listing_key(&id), listing.encode()?)?;
        self.engine.set_add(LISTINGS_ALL.to_string(), id.clone())?;
        self.engine.set_add(owner_index_key(owner_id), id.clone())?;

        info!(
            listing_id = %id,
            owner_id,
            lot = %listing.lot,
            days = listing.days,
            price = %listing.price,
            "listing created"
        );
        Ok(listing)
    }

    /// The listing stored under `listing_id`.
    ///
    /// # Errors
    /// `NotFound` if there is no such record, or it cannot be decoded.
    pub fn get(&self, listing_id: &str) -> Result<Listing> {
        let raw = self
            .engine
            .get(listing_key(listing_id))?
            .ok_or_else(|| not_found(listing_id))?;
        decode_or_not_found(listing_id, &raw)
    }

    /// Listings a viewer could buy: unsold, not their own, and matching `query`.
    ///
    /// Sorted by start date, then id.
    pub fn list_available(&self, viewer: &Caller, query: &ListingQuery) -> Result<Vec<Listing>> {
        let viewer_id = viewer.user_id();
        let mut listings: Vec<Listing> = self
            .all_listings()?
            .into_iter()
            .filter(|listing| listing.is_active())
            .filter(|listing| viewer_id.map_or(true, |id| !listing.is_owned_by(id)))
            .filter(|listing| query.matches(listing))
            .collect();
        listings.sort_by(|a, b| {
            a.from_date
                .cmp(&b.from_date)
                .then_with(|| a.listing_id.cmp(&b.listing_id))
        });
        Ok(listings)
    }

    /// Listings created by `user_id`, newest first.
    pub fn list_owned_by(&self, user_id: &str) -> Result<Vec<Listing>> {
        let ids = self.engine.set_members(owner_index_key(user_id))?;
        let mut listings: Vec<Listing> = self
            .fetch_many(&ids)?
            .into_iter()
            .filter(|listing| listing.is_owned_by(user_id))
            .collect();
        listings.sort_by(|a, b| b.listing_id.cmp(&a.listing_id));
        Ok(listings)
    }

    /// Listings purchased by `user_id`, newest purchase first.
    pub fn list_purchased_by(&self, user_id: &str) -> Result<Vec<Listing>> {
        let ids = self.engine.set_members(purchased_index_key(user_id))?;
        let mut listings: Vec<Listing> = self
            .fetch_many(&ids)?
            .into_iter()
            .filter(|listing| listing.is_bought_by(user_id))
            .collect();
        listings.sort_by(|a, b| {
            b.date_bought
                .cmp(&a.date_bought)
                .then_with(|| b.listing_id.cmp(&a.listing_id))
        });
        Ok(listings)
    }

    /// Moves a listing to a new date range, recomputing its days and price.
    ///
    /// # Errors
    /// `Unauthenticated`, `NotFound`, `Forbidden` for anyone but the owner, `AlreadySold` once
    /// purchased, `InvalidRange` for a reversed range.
    #[instrument(skip(self))]
    pub fn edit(
        &self,
        caller: &Caller,
        listing_id: &str,
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
    ) -> Result<Listing> {
        let caller_id = caller.require_user()?;
        let listing = self.modify(listing_id, |listing| {
            if !listing.is_owned_by(caller_id) {
                return Err(SwapError::Forbidden(format!(
                    "only the owner may edit listing {}",
                    listing_id
                )));
            }
            if listing.sold {
                return Err(SwapError::AlreadySold(listing_id.to_string()));
            }
            let quote = pricing::quote(from, to)?;
            listing.reschedule(from, to, quote);
            Ok(())
        })?;
        info!(listing_id, days = listing.days, price = %listing.price, "listing edited");
        Ok(listing)
    }

    /// Deletes a listing and its index entries. Returns the deleted record.
    ///
    /// The primary record goes first, then the roster entry, then the owner (and buyer) index
    /// entries.
    ///
    /// # Errors
    /// `Unauthenticated`, `NotFound`, `Forbidden` for anyone but the owner or an administrator.
    #[instrument(skip(self))]
    pub fn delete(&self, caller: &Caller, listing_id: &str) -> Result<Listing> {
        let caller_id = caller.require_user()?;
        let listing = self.get(listing_id)?;
        if !listing.is_owned_by(caller_id) && !caller.is_admin() {
            return Err(SwapError::Forbidden(format!(
                "only the owner may delete listing {}",
                listing_id
            )));
        }

        self.engine.remove(listing_key(listing_id))?;
        self.engine
            .set_remove(LISTINGS_ALL.to_string(), listing_id.to_string())?;
        self.engine
            .set_remove(owner_index_key(&listing.owner_id), listing_id.to_string())?;
        if let (true, Some(buyer_id)) = (listing.sold, &listing.buyer_id) {
            self.engine
                .set_remove(purchased_index_key(buyer_id), listing_id.to_string())?;
        }

        info!(listing_id, deleted_by = caller_id, "listing deleted");
        Ok(listing)
    }

    /// Purchases a listing for the caller, stamping today's date.
    ///
    /// # Errors
    /// `Unauthenticated`, `NotFound`, `AlreadySold` (including after losing a race with another
    /// buyer), `SelfPurchase` when the caller owns the listing.
    #[instrument(skip(self))]
    pub fn purchase(&self, caller: &Caller, listing_id: &str) -> Result<Listing> {
        let buyer_id = caller.require_user()?;
        let today = Utc::now().date_naive();
        let listing = self.modify(listing_id, |listing| {
            if listing.sold {
                return Err(SwapError::AlreadySold(listing_id.to_string()));
            }
            if listing.is_owned_by(buyer_id) {
                return Err(SwapError::SelfPurchase(listing_id.to_string()));
            }
            listing.mark_sold(buyer_id, today);
            Ok(())
        })?;
        self.engine
            .set_add(purchased_index_key(buyer_id), listing_id.to_string())?;

        info!(listing_id, buyer_id, price = %listing.price, "listing purchased");
        Ok(listing)
    }

    /// Adds one to the view counter of a listing.
    pub fn increment_view(&self, listing_id: &str) -> Result<Listing> {
        self.modify(listing_id, |listing| {
            listing.views += 1;
            Ok(())
        })
    }

    /// the ids in the roster, including orphans
    pub fn roster(&self) -> Result<Vec<String>> {
        self.engine.set_members(LISTINGS_ALL.to_string())
    }

    /// Every decodable listing in the roster, fetched with a single pipeline.
    pub fn all_listings(&self) -> Result<Vec<Listing>> {
        let ids = self.roster()?;
        self.fetch_many(&ids)
    }

    /// Fetches the records for `ids` in one round trip.
    ///
    /// Missing and undecodable records are skipped.
    pub fn fetch_many(&self, ids: &[String]) -> Result<Vec<Listing>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut pipe = Pipeline::new();
        for id in ids {
            pipe.get(listing_key(id));
        }
        let replies = self.engine.exec(pipe)?;
        debug!(requested = ids.len(), replies = replies.len(), "fetched listings");

        let mut listings = Vec::with_capacity(replies.len());
        for (id, reply) in ids.iter().zip(replies) {
            match reply.into_text()? {
                Some(raw) => match Listing::decode(&raw) {
                    Ok(listing) => listings.push(listing),
                    Err(e) => warn!(listing_id = %id, "skipping undecodable listing: {}", e),
                },
                None => debug!(listing_id = %id, "index points at a missing listing"),
            }
        }
        Ok(listings)
    }

    /// Applies `f` to the current record and writes it back with a compare-and-swap,
    /// retrying from a fresh read whenever another writer got there first.
    fn modify<F>(&self, listing_id: &str, mut f: F) -> Result<Listing>
    where
        F: FnMut(&mut Listing) -> Result<()>,
    {
        let key = listing_key(listing_id);
        for attempt in 1..=MAX_SWAP_ATTEMPTS {
            let raw = self
                .engine
                .get(key.clone())?
                .ok_or_else(|| not_found(listing_id))?;
            let mut listing = decode_or_not_found(listing_id, &raw)?;
            f(&mut listing)?;
            if self
                .engine
                .compare_and_swap(key.clone(), Some(raw), listing.encode()?)?
            {
                return Ok(listing);
            }
            debug!(listing_id, attempt, "listing changed underneath us, retrying");
        }
        Err(SwapError::Conflict(listing_id.to_string()))
    }
}

fn not_found(listing_id: &str) -> SwapError {
    SwapError::NotFound(format!("listing {}", listing_id))
}

fn decode_or_not_found(listing_id: &str, raw: &str) -> Result<Listing> {
    Listing::decode(raw).map_err(|e| {
        warn!(listing_id, "stored listing is undecodable: {}", e);
        not_found(listing_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use chrono::NaiveDate;

    fn request(lot: &str, from: &str, to: &str) -> ListingRequest {
        ListingRequest {
            spot_number: 7,
            lot: lot.to_string(),
            from_date: from.parse().unwrap(),
            to_date: to.parse().unwrap(),
        }
    }

    #[test]
    fn anonymous_callers_cannot_create() {
        let market = Marketplace::new(MemoryStore::new());
        let err = market
            .create(&Caller::Anonymous, request("WAC", "2024-11-04", "2024-11-08"))
            .unwrap_err();
        assert!(matches!(err, SwapError::Unauthenticated));
        assert!(market.engine().is_empty());
    }

    #[test]
    fn rejected_input_writes_nothing() {
        let market = Marketplace::new(MemoryStore::new());
        let owner = Caller::User("o".into());
        assert!(matches!(
            market.create(&owner, request("Moon", "2024-11-04", "2024-11-08")),
            Err(SwapError::Validation(_))
        ));
        assert!(matches!(
            market.create(&owner, request("WAC", "2024-11-08", "2024-11-04")),
            Err(SwapError::InvalidRange { .. })
        ));
        assert!(market.engine().is_empty());
    }

    #[test]
    fn create_writes_record_roster_and_owner_index() {
        let store = MemoryStore::new();
        let market = Marketplace::new(store.clone());
        let listing = market
            .create(&Caller::User("o".into()), request("PAC", "2024-11-10", "2024-11-12"))
            .unwrap();
        let id = listing.listing_id.to_string();

        assert!(store.get(listing_key(&id)).unwrap().is_some());
        assert!(store
            .set_is_member(LISTINGS_ALL.to_string(), id.clone())
            .unwrap());
        assert!(store.set_is_member(owner_index_key("o"), id).unwrap());
    }

    #[test]
    fn edit_of_a_sold_listing_is_refused() {
        let market = Marketplace::new(MemoryStore::new());
        let owner = Caller::User("o".into());
        let listing = market
            .create(&owner, request("PAC", "2024-11-10", "2024-11-12"))
            .unwrap();
        let id = listing.listing_id.to_string();
        market.purchase(&Caller::User("b".into()), &id).unwrap();

        let err = market
            .edit(
                &owner,
                &id,
                NaiveDate::from_ymd_opt(2024, 11, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 11, 2).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, SwapError::AlreadySold(_)));
    }

    #[test]
    fn undecodable_records_are_not_found() {
        let store = MemoryStore::new();
        store.set(listing_key("bad"), "{oops".into()).unwrap();
        let market = Marketplace::new(store);
        assert!(matches!(market.get("bad"), Err(SwapError::NotFound(_))));
        assert!(matches!(market.increment_view("bad"), Err(SwapError::NotFound(_))));
    }
}
