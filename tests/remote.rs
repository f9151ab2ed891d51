use std::net::{SocketAddr, TcpListener};
use std::str::FromStr;

use chrono::NaiveDate;
use crossbeam_utils::thread;
use spotswap::{
    AdminConsole, AdminPolicy, Caller, Gatekeeper, KvsClient, KvsEngine, KvsServer, ListingQuery,
    ListingRequest, Marketplace, MemoryStore, Pipeline, RayonThreadPool, Reply, Result,
    SharedQueueThreadPool, StoreDirectory, SwapError, ThreadPool,
};

/// starts a server on an ephemeral port and returns its address
fn spawn_server<P: ThreadPool + Send + 'static>(store: MemoryStore, pool: P) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || KvsServer::new(store, pool).serve_on(listener));
    addr
}

fn shared_queue_server(store: MemoryStore) -> SocketAddr {
    spawn_server(store, SharedQueueThreadPool::new(8).unwrap())
}

fn request(spot: i64) -> ListingRequest {
    ListingRequest {
        spot_number: spot,
        lot: "WAC".to_string(),
        from_date: NaiveDate::from_str("2024-11-04").unwrap(),
        to_date: NaiveDate::from_str("2024-11-08").unwrap(),
    }
}

#[test]
fn commands_travel_over_the_wire() -> Result<()> {
    let store = MemoryStore::new();
    let client = KvsClient::connect(shared_queue_server(store.clone()))?;
    client.ping()?;

    client.set("key1".to_owned(), "value1".to_owned())?;
    assert_eq!(client.get("key1".to_owned())?, Some("value1".to_owned()));
    assert_eq!(store.get("key1".to_owned())?, Some("value1".to_owned()));
    assert!(client.set_add("s".to_owned(), "m".to_owned())?);
    assert_eq!(client.set_members("s".to_owned())?, vec!["m".to_owned()]);
    assert_eq!(client.set_cardinality("s".to_owned())?, 1);
    assert_eq!(client.keys("*".to_owned())?.len(), 2);
    assert!(client.compare_and_swap("key1".to_owned(), Some("value1".to_owned()), "v2".to_owned())?);
    assert!(client.remove("key1".to_owned())?);
    assert_eq!(client.get("key1".to_owned())?, None);
    Ok(())
}

#[test]
fn a_pipeline_is_one_round_trip_in_order() -> Result<()> {
    let client = KvsClient::connect(shared_queue_server(MemoryStore::new()))?;
    let mut pipe = Pipeline::new();
    pipe.set("a", "1").get("a").sadd("s", "x").get("missing");
    assert_eq!(
        client.exec(pipe)?,
        vec![
            Reply::Nil,
            Reply::Text("1".to_owned()),
            Reply::Bool(true),
            Reply::Nil
        ]
    );
    Ok(())
}

#[test]
fn server_errors_surface_as_store_unavailable() -> Result<()> {
    let client = KvsClient::connect(shared_queue_server(MemoryStore::new()))?;
    client.set_add("s".to_owned(), "x".to_owned())?;
    assert!(matches!(
        client.get("s".to_owned()),
        Err(SwapError::StoreUnavailable(_))
    ));
    let mut pipe = Pipeline::new();
    pipe.get("ok").get("s");
    assert!(matches!(client.exec(pipe), Err(SwapError::StoreUnavailable(_))));
    // the connection is still usable afterwards
    client.ping()?;
    Ok(())
}

#[test]
fn connecting_to_nothing_is_store_unavailable() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    assert!(matches!(
        KvsClient::connect(addr),
        Err(SwapError::StoreUnavailable(_))
    ));
}

#[test]
fn the_marketplace_runs_against_a_remote_store() -> Result<()> {
    let addr = spawn_server(MemoryStore::new(), RayonThreadPool::new(4).unwrap());
    let client = KvsClient::connect(addr)?;
    let directory = StoreDirectory::new(client.clone());
    directory.register("seller", "seller@example.edu", Some("Sam"), None)?;
    directory.register("buyer", "buyer@example.edu", None, None)?;
    directory.register("boss", "Boss@Example.edu", None, None)?;
    let gate = Gatekeeper::new(
        directory.clone(),
        AdminPolicy::new(Some("boss@example.edu".to_string())),
    );

    let market = Marketplace::new(client.clone());
    let seller = gate.resolve(Some("seller"))?;
    let buyer = gate.resolve(Some("buyer"))?;
    let listing = market.create(&seller, request(7))?;
    market.create(&seller, request(8))?;

    let available = market.list_available(&buyer, &ListingQuery::default())?;
    assert_eq!(available.len(), 2);
    market.purchase(&buyer, listing.listing_id.as_str())?;

    let boss = gate.resolve(Some("boss"))?;
    assert!(boss.is_admin());
    let console = AdminConsole::new(client, directory);
    let dashboard = console.dashboard(&boss)?;
    assert_eq!(dashboard.total_users, 3);
    assert_eq!(dashboard.listings.sold_listings, 1);
    assert_eq!(dashboard.listings.active_listings, 1);
    assert_eq!(console.user_stats(&boss, "buyer")?.total_purchases, 1);
    assert!(matches!(console.dashboard(&buyer), Err(SwapError::Forbidden(_))));
    Ok(())
}

// every buyer holds its own connection, so the race happens inside the server
#[test]
fn remote_buyers_race_for_one_listing() -> Result<()> {
    let addr = shared_queue_server(MemoryStore::new());
    let market = Marketplace::new(KvsClient::connect(addr)?);
    let listing = market.create(&Caller::User("seller".into()), request(1))?;
    let id = listing.listing_id.to_string();

    let outcomes: Vec<Result<_>> = thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let id = id.clone();
                s.spawn(move |_| {
                    let market = Marketplace::new(KvsClient::connect(addr)?);
                    market.purchase(&Caller::User(format!("buyer{}", i)), &id)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .filter_map(|o| o.as_ref().err())
        .all(|e| matches!(e, SwapError::AlreadySold(_))));
    Ok(())
}
