//! The listing record, its accepted lots, and the input accepted when creating one.
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::keys::ListingId;
use crate::pricing::{self, Quote};
use crate::{Result, SwapError};

/// The parking lots a spot can be listed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Lot {
    /// the WAC lot
    #[serde(rename = "WAC")]
    Wac,
    /// the PAC lot
    #[serde(rename = "PAC")]
    Pac,
    /// the lot by the tennis courts
    #[serde(rename = "Tennis Courts")]
    TennisCourts,
    /// the stadium lot
    Stadium,
}

impl Lot {
    /// every accepted lot
    pub const ALL: [Lot; 4] = [Lot::Wac, Lot::Pac, Lot::TennisCourts, Lot::Stadium];

    /// the display (and persisted) name of the lot
    pub fn as_str(self) -> &'static str {
        match self {
            Lot::Wac => "WAC",
            Lot::Pac => "PAC",
            Lot::TennisCourts => "Tennis Courts",
            Lot::Stadium => "Stadium",
        }
    }
}

impl fmt::Display for Lot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Lot {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Lot::ALL
            .iter()
            .copied()
            .find(|lot| lot.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let accepted: Vec<&str> = Lot::ALL.iter().map(|lot| lot.as_str()).collect();
                SwapError::Validation(format!(
                    "unsupported lot {:?}, expected one of: {}",
                    s,
                    accepted.join(", ")
                ))
            })
    }
}

/// One offer to sell a parking spot for a date range.
///
/// Field names on the wire match the documents already held in the store, including the
/// legacy `user_id` mirror of `owner_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// unique, time sortable id
    pub listing_id: ListingId,
    /// the user who listed the spot
    #[serde(default)]
    pub owner_id: String,
    /// legacy mirror of `owner_id`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// the spot number within the lot
    pub spot_number: u32,
    /// where the spot is
    pub lot: Lot,
    /// first day of the reservation
    #[serde(rename = "fromdate")]
    pub from_date: NaiveDate,
    /// last day of the reservation, inclusive
    #[serde(rename = "todate")]
    pub to_date: NaiveDate,
    /// inclusive day count of the range
    #[serde(default)]
    pub days: i64,
    /// price of the whole range
    #[serde(default)]
    pub price: Decimal,
    /// how many times the listing has been viewed
    #[serde(default)]
    pub views: u64,
    /// whether the listing has been purchased
    #[serde(default)]
    pub sold: bool,
    /// mirrors `sold` once purchased
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bought: Option<bool>,
    /// who purchased the listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer_id: Option<String>,
    /// the day the listing was purchased
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_bought: Option<NaiveDate>,
}

impl Listing {
    /// a fresh, unsold listing
    pub fn new(listing_id: ListingId, owner_id: &str, new: &NewListing, quote: Quote) -> Self {
        Listing {
            listing_id,
            owner_id: owner_id.to_string(),
            user_id: Some(owner_id.to_string()),
            spot_number: new.spot_number,
            lot: new.lot,
            from_date: new.from_date,
            to_date: new.to_date,
            days: quote.days,
            price: quote.price,
            views: 0,
            sold: false,
            bought: None,
            buyer_id: None,
            date_bought: None,
        }
    }

    /// Decodes a stored record.
    ///
    /// Accepts a JSON object, or a JSON string that itself holds an encoded object.
    pub fn decode(raw: &str) -> Result<Listing> {
        let value = match serde_json::from_str::<Value>(raw)? {
            Value::String(inner) => serde_json::from_str(&inner)?,
            value => value,
        };
        let mut listing: Listing = serde_json::from_value(value)?;
        if listing.owner_id.is_empty() {
            if let Some(user_id) = &listing.user_id {
                listing.owner_id = user_id.clone();
            }
        }
        // floats drop trailing zeros, keep prices in cents
        listing.price = pricing::round_cents(listing.price);
        listing.price.rescale(2);
        Ok(listing)
    }

    /// Encodes the record for storage
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// true while nobody has purchased the listing
    pub fn is_active(&self) -> bool {
        !self.sold
    }

    /// whether `user_id` owns this listing
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    /// whether `user_id` purchased this listing
    pub fn is_bought_by(&self, user_id: &str) -> bool {
        self.sold && self.buyer_id.as_deref() == Some(user_id)
    }

    /// moves the listing to a new date range, with its recomputed days and price
    pub fn reschedule(&mut self, from: NaiveDate, to: NaiveDate, quote: Quote) {
        self.from_date = from;
        self.to_date = to;
        self.days = quote.days;
        self.price = quote.price;
    }

    /// records the purchase by `buyer_id` on `today`
    pub fn mark_sold(&mut self, buyer_id: &str, today: NaiveDate) {
        self.sold = true;
        self.bought = Some(true);
        self.buyer_id = Some(buyer_id.to_string());
        self.date_bought = Some(today);
    }
}

/// accepts `2024-11-02` as well as a full RFC 3339 timestamp
fn lenient_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let raw = match raw.as_deref().map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };
    if let Ok(date) = NaiveDate::from_str(raw) {
        return Ok(Some(date));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| Some(ts.date_naive()))
        .map_err(serde::de::Error::custom)
}

/// A validated request to create a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    /// the spot number, always positive
    pub spot_number: u32,
    /// where the spot is
    pub lot: Lot,
    /// first day of the reservation
    pub from_date: NaiveDate,
    /// last day of the reservation, inclusive
    pub to_date: NaiveDate,
}

/// The raw input of a create request, as submitted by a form or the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingRequest {
    /// the spot number
    #[serde(alias = "spotnumber")]
    pub spot_number: i64,
    /// the lot name
    pub lot: String,
    /// first day of the reservation
    #[serde(alias = "fromdate")]
    pub from_date: NaiveDate,
    /// last day of the reservation
    #[serde(alias = "todate")]
    pub to_date: NaiveDate,
}

impl ListingRequest {
    /// Checks the spot number and lot.
    ///
    /// # Errors
    /// `SwapError::Validation` for a non positive spot number or an unsupported lot.
    pub fn validate(self) -> Result<NewListing> {
        let spot_number = u32::try_from(self.spot_number)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                SwapError::Validation(format!(
                    "spot number must be a positive integer, got {}",
                    self.spot_number
                ))
            })?;
        Ok(NewListing {
            spot_number,
            lot: self.lot.parse()?,
            from_date: self.from_date,
            to_date: self.to_date,
        })
    }
}

/// Filters applied when browsing available listings. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ListingQuery {
    /// only this lot
    pub lot: Option<Lot>,
    /// only reservations starting on or after this day
    pub starts_on_or_after: Option<NaiveDate>,
    /// only reservations ending on or before this day
    pub ends_on_or_before: Option<NaiveDate>,
    /// only listings priced at most this much
    pub max_price: Option<Decimal>,
}

impl ListingQuery {
    /// whether `listing` passes every filter
    pub fn matches(&self, listing: &Listing) -> bool {
        self.lot.map_or(true, |lot| listing.lot == lot)
            && self
                .starts_on_or_after
                .map_or(true, |day| listing.from_date >= day)
            && self
                .ends_on_or_before
                .map_or(true, |day| listing.to_date <= day)
            && self.max_price.map_or(true, |max| listing.price <= max)
    }
}
