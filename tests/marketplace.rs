use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use crossbeam_utils::thread;
use rust_decimal::Decimal;
use spotswap::keys::{listing_key, owner_index_key, purchased_index_key, LISTINGS_ALL};
use spotswap::{
    Caller, KvsEngine, Listing, ListingQuery, ListingRequest, Lot, Marketplace, MemoryStore,
    Result, SwapError,
};

fn date(s: &str) -> NaiveDate {
    NaiveDate::from_str(s).unwrap()
}

fn money(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn user(id: &str) -> Caller {
    Caller::User(id.to_string())
}

fn request(spot: i64, lot: &str, from: &str, to: &str) -> ListingRequest {
    ListingRequest {
        spot_number: spot,
        lot: lot.to_string(),
        from_date: date(from),
        to_date: date(to),
    }
}

fn market() -> Marketplace<MemoryStore> {
    Marketplace::new(MemoryStore::new())
}

fn ids(listings: &[Listing]) -> Vec<String> {
    listings.iter().map(|l| l.listing_id.to_string()).collect()
}

// a created listing reads back identically, unsold and unviewed
#[test]
fn create_then_get() -> Result<()> {
    let market = market();
    let created = market.create(&user("owner"), request(42, "WAC", "2024-11-04", "2024-11-08"))?;
    assert_eq!(created.days, 5);
    assert_eq!(created.price, money("20.00"));

    let fetched = market.get(created.listing_id.as_str())?;
    assert_eq!(fetched.owner_id, "owner");
    assert_eq!(fetched.spot_number, 42);
    assert_eq!(fetched.lot, Lot::Wac);
    assert_eq!(fetched.from_date, date("2024-11-04"));
    assert_eq!(fetched.to_date, date("2024-11-08"));
    assert_eq!(fetched.days, 5);
    assert_eq!(fetched.price, money("20.00"));
    assert_eq!(fetched.views, 0);
    assert!(!fetched.sold);
    assert_eq!(fetched, created);
    Ok(())
}

#[test]
fn get_of_a_missing_listing() {
    assert!(matches!(market().get("1-nothing"), Err(SwapError::NotFound(_))));
}

#[test]
fn purchase_is_one_way() -> Result<()> {
    let market = market();
    let listing = market.create(&user("seller"), request(3, "PAC", "2024-11-10", "2024-11-12"))?;
    let id = listing.listing_id.to_string();

    let bought = market.purchase(&user("buyer"), &id)?;
    assert!(bought.sold);
    assert_eq!(bought.bought, Some(true));
    assert_eq!(bought.buyer_id.as_deref(), Some("buyer"));
    assert_eq!(bought.date_bought, Some(Utc::now().date_naive()));

    let err = market.purchase(&user("latecomer"), &id).unwrap_err();
    assert!(matches!(err, SwapError::AlreadySold(_)));
    let after = market.get(&id)?;
    assert_eq!(after.buyer_id, bought.buyer_id);
    assert_eq!(after.date_bought, bought.date_bought);
    assert_eq!(ids(&market.list_purchased_by("buyer")?), vec![id]);
    assert!(market.list_purchased_by("latecomer")?.is_empty());
    Ok(())
}

#[test]
fn owners_cannot_buy_their_own_listing() -> Result<()> {
    let market = market();
    let listing = market.create(&user("seller"), request(3, "PAC", "2024-11-10", "2024-11-12"))?;
    let err = market
        .purchase(&user("seller"), listing.listing_id.as_str())
        .unwrap_err();
    assert!(matches!(err, SwapError::SelfPurchase(_)));
    assert!(!market.get(listing.listing_id.as_str())?.sold);
    Ok(())
}

#[test]
fn anonymous_purchases_are_refused() -> Result<()> {
    let market = market();
    let listing = market.create(&user("seller"), request(3, "PAC", "2024-11-10", "2024-11-12"))?;
    assert!(matches!(
        market.purchase(&Caller::Anonymous, listing.listing_id.as_str()),
        Err(SwapError::Unauthenticated)
    ));
    Ok(())
}

#[test]
fn available_listings_exclude_sold_and_own() -> Result<()> {
    let market = market();
    let mine = market.create(&user("viewer"), request(1, "WAC", "2024-11-01", "2024-11-02"))?;
    let later = market.create(&user("other"), request(2, "PAC", "2024-11-20", "2024-11-22"))?;
    let sooner = market.create(&user("other"), request(3, "Stadium", "2024-11-05", "2024-11-06"))?;
    let sold = market.create(&user("other"), request(4, "WAC", "2024-11-03", "2024-11-04"))?;
    market.purchase(&user("someone"), sold.listing_id.as_str())?;

    let available = market.list_available(&user("viewer"), &ListingQuery::default())?;
    assert_eq!(ids(&available), ids(&[sooner.clone(), later.clone()]));
    assert!(available.iter().all(|l| !l.sold && l.owner_id != "viewer"));

    // anonymous visitors see every unsold listing
    let everything = market.list_available(&Caller::Anonymous, &ListingQuery::default())?;
    assert_eq!(ids(&everything), ids(&[mine, sooner, later]));
    Ok(())
}

#[test]
fn browsing_filters() -> Result<()> {
    let market = market();
    let seller = user("seller");
    let wac = market.create(&seller, request(1, "WAC", "2024-11-04", "2024-11-08"))?;
    let pac = market.create(&seller, request(2, "PAC", "2024-11-10", "2024-11-12"))?;
    let long = market.create(&seller, request(3, "Tennis Courts", "2024-11-06", "2024-11-13"))?;
    let viewer = user("viewer");

    let by_lot = ListingQuery {
        lot: Some(Lot::Pac),
        ..ListingQuery::default()
    };
    assert_eq!(ids(&market.list_available(&viewer, &by_lot)?), ids(&[pac.clone()]));

    let by_price = ListingQuery {
        max_price: Some(money("20.00")),
        ..ListingQuery::default()
    };
    assert_eq!(
        ids(&market.list_available(&viewer, &by_price)?),
        ids(&[wac.clone(), pac.clone()])
    );

    let by_window = ListingQuery {
        starts_on_or_after: Some(date("2024-11-05")),
        ends_on_or_before: Some(date("2024-11-13")),
        ..ListingQuery::default()
    };
    assert_eq!(ids(&market.list_available(&viewer, &by_window)?), ids(&[long, pac]));
    Ok(())
}

#[test]
fn owned_listings_survive_a_stale_index() -> Result<()> {
    let market = market();
    let listing = market.create(&user("owner"), request(9, "WAC", "2024-11-04", "2024-11-05"))?;
    let engine = market.engine();
    // an index entry pointing at nothing, and one pointing at somebody else's record
    engine.set_add(owner_index_key("owner"), "1-gone".to_string())?;
    let stranger = market.create(&user("stranger"), request(8, "PAC", "2024-11-04", "2024-11-05"))?;
    engine.set_add(owner_index_key("owner"), stranger.listing_id.to_string())?;
    engine.set_add(purchased_index_key("owner"), stranger.listing_id.to_string())?;

    assert_eq!(ids(&market.list_owned_by("owner")?), ids(&[listing]));
    assert!(market.list_purchased_by("owner")?.is_empty());
    Ok(())
}

#[test]
fn edit_recomputes_days_and_price() -> Result<()> {
    let market = market();
    let owner = user("owner");
    let listing = market.create(&owner, request(5, "PAC", "2024-11-10", "2024-11-12"))?;
    let id = listing.listing_id.to_string();

    let edited = market.edit(&owner, &id, date("2024-11-04"), date("2024-11-08"))?;
    assert_eq!(edited.days, 5);
    assert_eq!(edited.price, money("20.00"));
    assert_eq!(market.get(&id)?, edited);
    assert!(market.engine().set_is_member(owner_index_key("owner"), id.clone())?);

    assert!(matches!(
        market.edit(&user("intruder"), &id, date("2024-11-01"), date("2024-11-02")),
        Err(SwapError::Forbidden(_))
    ));
    assert!(matches!(
        market.edit(&owner, &id, date("2024-11-09"), date("2024-11-02")),
        Err(SwapError::InvalidRange { .. })
    ));
    assert!(matches!(
        market.edit(&owner, "1-missing", date("2024-11-01"), date("2024-11-02")),
        Err(SwapError::NotFound(_))
    ));
    assert_eq!(market.get(&id)?, edited);
    Ok(())
}

#[test]
fn delete_removes_every_trace() -> Result<()> {
    let market = market();
    let owner = user("owner");
    let listing = market.create(&owner, request(5, "PAC", "2024-11-10", "2024-11-12"))?;
    let id = listing.listing_id.to_string();

    assert!(matches!(
        market.delete(&user("intruder"), &id),
        Err(SwapError::Forbidden(_))
    ));
    market.delete(&owner, &id)?;

    assert!(matches!(market.get(&id), Err(SwapError::NotFound(_))));
    assert!(market
        .list_available(&user("viewer"), &ListingQuery::default())?
        .is_empty());
    assert!(market.list_owned_by("owner")?.is_empty());
    assert!(market.roster()?.is_empty());
    assert!(matches!(market.delete(&owner, &id), Err(SwapError::NotFound(_))));
    Ok(())
}

#[test]
fn admins_may_delete_a_sold_listing_and_the_buyer_index_follows() -> Result<()> {
    let market = market();
    let listing = market.create(&user("owner"), request(5, "PAC", "2024-11-10", "2024-11-12"))?;
    let id = listing.listing_id.to_string();
    market.purchase(&user("buyer"), &id)?;

    market.delete(&Caller::Admin("root".to_string()), &id)?;
    assert!(!market
        .engine()
        .set_is_member(purchased_index_key("buyer"), id)?);
    Ok(())
}

#[test]
fn views_are_counted() -> Result<()> {
    let market = market();
    let listing = market.create(&user("owner"), request(5, "PAC", "2024-11-10", "2024-11-12"))?;
    let id = listing.listing_id.to_string();
    market.increment_view(&id)?;
    assert_eq!(market.increment_view(&id)?.views, 2);
    assert!(matches!(market.increment_view("1-missing"), Err(SwapError::NotFound(_))));
    Ok(())
}

#[test]
fn concurrent_views_are_never_lost() -> Result<()> {
    let market = market();
    let listing = market.create(&user("owner"), request(5, "PAC", "2024-11-10", "2024-11-12"))?;
    let id = listing.listing_id.to_string();

    thread::scope(|s| {
        for _ in 0..4 {
            let market = market.clone();
            let id = id.clone();
            s.spawn(move |_| {
                for _ in 0..5 {
                    market.increment_view(&id).unwrap();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(market.get(&id)?.views, 20);
    Ok(())
}

// exactly one of many simultaneous buyers gets the spot
#[test]
fn racing_buyers_have_one_winner() -> Result<()> {
    let market = market();
    let listing = market.create(&user("seller"), request(5, "PAC", "2024-11-10", "2024-11-12"))?;
    let id = listing.listing_id.to_string();

    let outcomes: Vec<Result<Listing>> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let market = market.clone();
                let id = id.clone();
                s.spawn(move |_| market.purchase(&user(&format!("buyer{}", i)), &id))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    let winners: Vec<&Listing> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, SwapError::AlreadySold(_))));

    let winner = winners[0].buyer_id.clone().unwrap();
    assert_eq!(market.get(&id)?.buyer_id.as_deref(), Some(winner.as_str()));
    assert_eq!(market.list_purchased_by(&winner)?.len(), 1);
    Ok(())
}

// documents written by earlier clients: prices stored as floats, owner only in user_id
#[test]
fn global_stats_over_legacy_documents() -> Result<()> {
    let store = MemoryStore::new();
    let docs = [
        ("1730000000001-aaaaaaaaa", r#"{"listing_id":"1730000000001-aaaaaaaaa","user_id":"a","spot_number":1,"lot":"WAC","fromdate":"2024-11-04","todate":"2024-11-08","days":5,"price":20.0,"views":3,"sold":false}"#),
        ("1730000000002-bbbbbbbbb", r#"{"listing_id":"1730000000002-bbbbbbbbb","owner_id":"a","spot_number":2,"lot":"PAC","fromdate":"2024-11-05","todate":"2024-11-09","days":5,"price":18.25,"views":4,"sold":true,"bought":true,"buyer_id":"b","date_bought":"2024-11-02"}"#),
        ("1730000000003-ccccccccc", r#"{"listing_id":"1730000000003-ccccccccc","owner_id":"c","spot_number":8,"lot":"Tennis Courts","fromdate":"2024-11-06","todate":"2024-11-13","days":8,"price":30.0,"views":5,"sold":true,"bought":true,"buyer_id":"d","date_bought":"2024-11-03T10:00:00.000Z"}"#),
        ("1730000000004-ddddddddd", r#"{"listing_id":"1730000000004-ddddddddd","owner_id":"c","spot_number":15,"lot":"Stadium","fromdate":"2024-11-10","todate":"2024-11-12","days":3,"price":12.25,"views":0,"sold":false}"#),
    ];
    for (id, doc) in docs.iter() {
        store.set(listing_key(id), doc.to_string())?;
        store.set_add(LISTINGS_ALL.to_string(), id.to_string())?;
    }
    // an orphan and an unreadable record are counted in the roster only
    store.set_add(LISTINGS_ALL.to_string(), "1730000000005-eeeeeeeee".to_string())?;
    store.set(listing_key("1730000000006-fffffffff"), "{broken".to_string())?;
    store.set_add(LISTINGS_ALL.to_string(), "1730000000006-fffffffff".to_string())?;

    let market = Marketplace::new(store);
    let stats = market.global_stats()?;
    assert_eq!(stats.total_listings, 4);
    assert_eq!(stats.active_listings, 2);
    assert_eq!(stats.sold_listings, 2);
    assert_eq!(stats.total_revenue, money("48.25"));
    assert_eq!(stats.total_views, 12);
    assert_eq!(stats.total_days_sold, 13);
    assert_eq!(stats.roster_size, 6);

    let a = market.user_stats("a")?;
    assert_eq!(a.total_listings, 0, "user a has no owner index yet");
    Ok(())
}

#[test]
fn user_stats_follow_the_indexes() -> Result<()> {
    let market = market();
    let seller = user("seller");
    let a = market.create(&seller, request(1, "WAC", "2024-11-04", "2024-11-08"))?;
    market.create(&seller, request(2, "WAC", "2024-11-10", "2024-11-12"))?;
    market.create(&seller, request(3, "PAC", "2024-11-10", "2024-11-10"))?;
    market.purchase(&user("buyer"), a.listing_id.as_str())?;
    market.increment_view(a.listing_id.as_str())?;

    let stats = market.user_stats("seller")?;
    assert_eq!(stats.total_listings, 3);
    assert_eq!(stats.sold_listings, 1);
    assert_eq!(stats.active_listings, 2);
    assert_eq!(stats.total_revenue, money("20.00"));
    assert_eq!(stats.total_views, 1);
    assert_eq!(stats.avg_price, money("12.42"));
    assert_eq!(stats.most_popular_lot, Some(Lot::Wac));

    let buyer = market.user_stats("buyer")?;
    assert_eq!(buyer.total_purchases, 1);
    assert_eq!(buyer.total_spent, money("20.00"));
    assert_eq!(buyer.total_listings, 0);
    Ok(())
}
