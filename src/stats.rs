//! Aggregates over the listing inventory.
//!
//! Every aggregate starts from one bulk fetch (a single pipeline), then reduces in memory.
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::identity::User;
use crate::listing::{Listing, Lot};
use crate::pricing::round_cents;
use crate::{KvsEngine, Marketplace, Result};

/// the number of registrations considered by the activity feed
pub const RECENT_REGISTRATIONS: usize = 5;
/// default length of the activity feed
pub const DEFAULT_ACTIVITY_LIMIT: usize = 20;

/// Platform wide listing totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    /// decodable listings in the roster
    pub total_listings: u64,
    /// listings nobody has bought yet
    pub active_listings: u64,
    /// purchased listings
    pub sold_listings: u64,
    /// views across every listing
    pub total_views: u64,
    /// sum of the prices of purchased listings
    pub total_revenue: Decimal,
    /// days covered by purchased listings
    pub total_days_sold: i64,
    /// ids in the roster, orphans included
    pub roster_size: u64,
}

impl GlobalStats {
    /// reduces `listings` in one pass
    pub fn compute<'a, I>(listings: I, roster_size: u64) -> Self
    where
        I: IntoIterator<Item = &'a Listing>,
    {
        let mut stats = GlobalStats {
            roster_size,
            ..GlobalStats::default()
        };
        for listing in listings {
            stats.total_listings += 1;
            stats.total_views += listing.views;
            if listing.sold {
                stats.sold_listings += 1;
                stats.total_revenue += listing.price;
                stats.total_days_sold += listing.days;
            } else {
                stats.active_listings += 1;
            }
        }
        stats.total_revenue = round_cents(stats.total_revenue);
        stats
    }
}

/// What one user has listed and bought
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    /// whose stats these are
    pub user_id: String,
    /// listings the user created
    pub total_listings: u64,
    /// of those, still for sale
    pub active_listings: u64,
    /// of those, purchased by someone
    pub sold_listings: u64,
    /// what the user earned from sold listings
    pub total_revenue: Decimal,
    /// views across the user's listings
    pub total_views: u64,
    /// mean price of the user's listings
    pub avg_price: Decimal,
    /// the lot the user lists in most often
    pub most_popular_lot: Option<Lot>,
    /// listings the user bought
    pub total_purchases: u64,
    /// what the user paid for them
    pub total_spent: Decimal,
    /// when the account was created, if the identity provider knows the user
    pub joined_at: Option<DateTime<Utc>>,
    /// last time the account changed
    pub last_active: Option<DateTime<Utc>>,
}

impl UserStats {
    /// reduces a user's owned and purchased listings
    pub fn compute(user_id: &str, owned: &[Listing], purchased: &[Listing]) -> Self {
        let mut total_revenue = Decimal::ZERO;
        let mut price_sum = Decimal::ZERO;
        let mut sold = 0;
        let mut views = 0;
        for listing in owned {
            price_sum += listing.price;
            views += listing.views;
            if listing.sold {
                sold += 1;
                total_revenue += listing.price;
            }
        }
        let avg_price = if owned.is_empty() {
            Decimal::ZERO
        } else {
            round_cents(price_sum / Decimal::from(owned.len()))
        };

        UserStats {
            user_id: user_id.to_string(),
            total_listings: owned.len() as u64,
            active_listings: owned.len() as u64 - sold,
            sold_listings: sold,
            total_revenue: round_cents(total_revenue),
            total_views: views,
            avg_price,
            most_popular_lot: most_popular_lot(owned),
            total_purchases: purchased.len() as u64,
            total_spent: round_cents(purchased.iter().map(|l| l.price).sum()),
            joined_at: None,
            last_active: None,
        }
    }

    /// copies the account dates from the identity provider's record
    pub fn with_account(mut self, user: &User) -> Self {
        self.joined_at = Some(user.created_at);
        self.last_active = Some(user.updated_at);
        self
    }
}

/// The lot occurring most often; ties go to the lot seen first.
pub fn most_popular_lot(listings: &[Listing]) -> Option<Lot> {
    let mut counts: Vec<(Lot, usize)> = vec![];
    for listing in listings {
        match counts.iter_mut().find(|(lot, _)| *lot == listing.lot) {
            Some((_, n)) => *n += 1,
            None => counts.push((listing.lot, 1)),
        }
    }
    let mut best: Option<(Lot, usize)> = None;
    for (lot, n) in counts {
        if best.map_or(true, |(_, most)| n > most) {
            best = Some((lot, n));
        }
    }
    best.map(|(lot, _)| lot)
}

/// Listing totals plus the size of the user base
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDashboard {
    /// listing totals
    #[serde(flatten)]
    pub listings: GlobalStats,
    /// accounts known to the identity provider
    pub total_users: u64,
}

/// what happened in an [`Activity`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// an account was created
    UserRegistration,
    /// a listing was created
    ListingCreated,
    /// a listing was purchased
    ListingSold,
}

/// One line of the admin activity feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// unique per event, e.g. `sold-{listing_id}`
    pub id: String,
    /// the kind of event
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// human readable summary
    pub message: String,
    /// `Just now`, `5 minutes ago` and so on
    pub time_ago: String,
    /// price of the listing involved, zero for registrations
    pub price: Decimal,
    /// lot of the listing involved
    pub lot: Option<Lot>,
    /// spot of the listing involved
    pub spot_number: Option<u32>,
    /// when it happened
    pub at: DateTime<Utc>,
}

/// Merges registrations, listing creations and sales into one feed, most recent first.
pub fn recent_activity(
    users: &[User],
    listings: &[Listing],
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<Activity> {
    let mut feed = vec![];
    for user in users {
        feed.push(Activity {
            id: format!("user-{}", user.id),
            kind: ActivityKind::UserRegistration,
            message: format!("New user registered: {}", user.display_name()),
            time_ago: describe_age(now, user.created_at),
            price: Decimal::ZERO,
            lot: None,
            spot_number: None,
            at: user.created_at,
        });
    }
    for listing in listings {
        if let Some(created) = listing.listing_id.created_at() {
            feed.push(Activity {
                id: format!("created-{}", listing.listing_id),
                kind: ActivityKind::ListingCreated,
                message: format!(
                    "New listing created: {} Spot #{}",
                    listing.lot, listing.spot_number
                ),
                time_ago: describe_age(now, created),
                price: listing.price,
                lot: Some(listing.lot),
                spot_number: Some(listing.spot_number),
                at: created,
            });
        }
        if let (true, Some(day)) = (listing.sold, listing.date_bought) {
            let sold_at = start_of_day(day);
            feed.push(Activity {
                id: format!("sold-{}", listing.listing_id),
                kind: ActivityKind::ListingSold,
                message: format!(
                    "Listing sold: {} Spot #{} for ${:.2}",
                    listing.lot, listing.spot_number, listing.price
                ),
                time_ago: describe_age(now, sold_at),
                price: listing.price,
                lot: Some(listing.lot),
                spot_number: Some(listing.spot_number),
                at: sold_at,
            });
        }
    }
    feed.sort_by(|a, b| b.at.cmp(&a.at).then_with(|| a.id.cmp(&b.id)));
    feed.truncate(limit);
    feed
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN))
}

/// Renders the age of `then` as seen at `now`.
pub fn describe_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let minutes = (now - then).num_minutes();
    if minutes < 1 {
        return "Just now".to_string();
    }
    let (n, unit) = if minutes < 60 {
        (minutes, "minute")
    } else if minutes < Duration::days(1).num_minutes() {
        (minutes / 60, "hour")
    } else {
        (minutes / Duration::days(1).num_minutes(), "day")
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

impl<E: KvsEngine> Marketplace<E> {
    /// Platform wide totals, from one bulk fetch of the roster.
    pub fn global_stats(&self) -> Result<GlobalStats> {
        let roster = self.roster()?;
        let listings = self.fetch_many(&roster)?;
        Ok(GlobalStats::compute(&listings, roster.len() as u64))
    }

    /// What `user_id` has listed and bought.
    pub fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        let owned = self.list_owned_by(user_id)?;
        let purchased = self.list_purchased_by(user_id)?;
        Ok(UserStats::compute(user_id, &owned, &purchased))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ListingId;
    use crate::listing::NewListing;
    use crate::pricing;
    use std::str::FromStr;

    fn listing(owner: &str, lot: Lot, from: &str, to: &str) -> Listing {
        let new = NewListing {
            spot_number: 3,
            lot,
            from_date: NaiveDate::from_str(from).unwrap(),
            to_date: NaiveDate::from_str(to).unwrap(),
        };
        let quote = pricing::quote(new.from_date, new.to_date).unwrap();
        Listing::new(ListingId::generate(), owner, &new, quote)
    }

    fn sold(mut listing: Listing, buyer: &str) -> Listing {
        listing.mark_sold(buyer, NaiveDate::from_ymd_opt(2024, 11, 2).unwrap());
        listing
    }

    #[test]
    fn global_totals_on_the_reference_fixture() {
        let mut listings = vec![
            listing("a", Lot::Wac, "2024-11-04", "2024-11-08"),
            sold(listing("a", Lot::Pac, "2024-11-05", "2024-11-09"), "b"),
            sold(listing("c", Lot::Stadium, "2024-11-06", "2024-11-13"), "b"),
            listing("c", Lot::Pac, "2024-11-10", "2024-11-12"),
        ];
        // prices as stored by an older client
        listings[1].price = Decimal::from_str("18.25").unwrap();
        listings[2].price = Decimal::from_str("30.00").unwrap();

        let stats = GlobalStats::compute(&listings, 5);
        assert_eq!(stats.total_listings, 4);
        assert_eq!(stats.active_listings, 2);
        assert_eq!(stats.sold_listings, 2);
        assert_eq!(stats.total_revenue, Decimal::from_str("48.25").unwrap());
        assert_eq!(stats.total_days_sold, 5 + 8);
        assert_eq!(stats.roster_size, 5);
    }

    #[test]
    fn user_totals_and_favourite_lot() {
        let owned = vec![
            listing("u", Lot::Pac, "2024-11-10", "2024-11-12"),
            sold(listing("u", Lot::Wac, "2024-11-04", "2024-11-08"), "b"),
            listing("u", Lot::Wac, "2024-11-10", "2024-11-10"),
        ];
        let purchased = vec![sold(listing("x", Lot::Stadium, "2024-11-10", "2024-11-11"), "u")];
        let stats = UserStats::compute("u", &owned, &purchased);

        assert_eq!(stats.total_listings, 3);
        assert_eq!(stats.sold_listings, 1);
        assert_eq!(stats.active_listings, 2);
        assert_eq!(stats.total_revenue, Decimal::from_str("20.00").unwrap());
        // (12.25 + 20.00 + 5.00) / 3
        assert_eq!(stats.avg_price, Decimal::from_str("12.42").unwrap());
        assert_eq!(stats.most_popular_lot, Some(Lot::Wac));
        assert_eq!(stats.total_purchases, 1);
        assert_eq!(stats.total_spent, Decimal::from_str("8.63").unwrap());
    }

    #[test]
    fn popularity_ties_go_to_the_first_lot_seen() {
        let owned = vec![
            listing("u", Lot::Stadium, "2024-11-10", "2024-11-12"),
            listing("u", Lot::Pac, "2024-11-10", "2024-11-12"),
        ];
        assert_eq!(most_popular_lot(&owned), Some(Lot::Stadium));
        assert_eq!(most_popular_lot(&[]), None);
    }

    #[test]
    fn ages() {
        let now = Utc.with_ymd_and_hms(2024, 11, 10, 12, 0, 0).unwrap();
        assert_eq!(describe_age(now, now - Duration::seconds(30)), "Just now");
        assert_eq!(describe_age(now, now - Duration::minutes(1)), "1 minute ago");
        assert_eq!(describe_age(now, now - Duration::minutes(59)), "59 minutes ago");
        assert_eq!(describe_age(now, now - Duration::hours(1)), "1 hour ago");
        assert_eq!(describe_age(now, now - Duration::hours(23)), "23 hours ago");
        assert_eq!(describe_age(now, now - Duration::days(3)), "3 days ago");
    }

    #[test]
    fn feed_is_newest_first_and_truncated() {
        let now = Utc.with_ymd_and_hms(2024, 11, 10, 12, 0, 0).unwrap();
        let mut old = listing("u", Lot::Pac, "2024-11-10", "2024-11-12");
        old.listing_id = ListingId::generate_at(now - Duration::days(2));
        let old = sold(old, "b");
        let mut fresh = listing("u", Lot::Wac, "2024-11-10", "2024-11-12");
        fresh.listing_id = ListingId::generate_at(now - Duration::minutes(5));

        let feed = recent_activity(&[], &[old, fresh], now, 20);
        let kinds: Vec<ActivityKind> = feed.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActivityKind::ListingCreated,
                ActivityKind::ListingCreated,
                ActivityKind::ListingSold
            ]
        );
        assert_eq!(feed[0].time_ago, "5 minutes ago");
        assert_eq!(feed[2].message, "Listing sold: PAC Spot #3 for $12.25");

        assert_eq!(recent_activity(&[], &feed_listings(now), now, 1).len(), 1);
    }

    #[test]
    fn sale_messages_show_cents() {
        let now = Utc.with_ymd_and_hms(2024, 11, 10, 12, 0, 0).unwrap();
        let mut whole = sold(listing("u", Lot::Stadium, "2024-11-04", "2024-11-08"), "b");
        whole.price = Decimal::from(20);
        let feed = recent_activity(&[], &[whole], now, 20);
        let sale = feed
            .iter()
            .find(|a| a.kind == ActivityKind::ListingSold)
            .unwrap();
        assert_eq!(sale.message, "Listing sold: Stadium Spot #3 for $20.00");
    }

    fn feed_listings(now: DateTime<Utc>) -> Vec<Listing> {
        let mut l = listing("u", Lot::Wac, "2024-11-10", "2024-11-12");
        l.listing_id = ListingId::generate_at(now);
        vec![l.clone(), l]
    }
}
