//! The `spotswap` executable runs marketplace and admin operations against a
//! `spotswap-server`, printing each result as JSON on STDOUT.
//!
//! `spotswap [--addr IP:PORT] [--user ID] [--admin-email EMAIL] <SUBCOMMAND>`
//!
//!     --addr defaults to 127.0.0.1:4000 (env SPOTSWAP_ADDR).
//!     --user is the id of the account acting (env SPOTSWAP_USER).
//!     --admin-email names the designated superuser address (env SPOTSWAP_ADMIN_EMAIL).
//!
//! Failures print `error: <message>` on STDERR and exit with a non-zero code.
//! Run `spotswap help` for the list of subcommands.

use std::process::exit;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use clap::{crate_version, value_t, App, AppSettings, Arg, ArgMatches, SubCommand};
use rust_decimal::Decimal;
use serde::Serialize;
use spotswap::config::{DEFAULT_ADDRESS, DEFAULT_LOG_LEVEL};
use spotswap::stats::DEFAULT_ACTIVITY_LIMIT;
use spotswap::{
    AdminConsole, AdminPolicy, Gatekeeper, KvsClient, ListingQuery, ListingRequest, Lot,
    Marketplace, Result, Settings, StoreDirectory, SwapError,
};

const DEFAULT_USER_LIMIT: usize = 100;

/// [`Opt`] holds the validated global options
#[derive(Debug)]
struct Opt {
    settings: Settings,
    user: Option<String>,
    admin_email: Option<String>,
}

fn main() {
    let matches = app().get_matches();
    let opt = Settings::build(
        matches.value_of("addr").unwrap_or(DEFAULT_ADDRESS),
        matches.value_of("log-level").unwrap_or(DEFAULT_LOG_LEVEL),
    )
    .map(|settings| Opt {
        settings,
        user: matches.value_of("user").map(String::from),
        admin_email: matches.value_of("admin-email").map(String::from),
    });

    let outcome = opt.and_then(|opt| {
        opt.settings.init_logging();
        run(&opt, &matches)
    });
    if let Err(e) = outcome {
        eprintln!("error: {}", e);
        exit(1);
    }
}

fn app() -> App<'static, 'static> {
    let listing_id = || Arg::with_name("LISTING_ID").required(true).index(1);
    let user_id = || Arg::with_name("USER_ID").required(true).index(1);
    let day_arg = |name: &'static str, help: &'static str| {
        Arg::with_name(name)
            .long(name)
            .value_name("YYYY-MM-DD")
            .help(help)
    };
    let limit = || Arg::with_name("limit").long("limit").value_name("N");

    App::new("spotswap")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("buy and sell campus parking spots")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .value_name("IP_ADDR:PORT")
                .env("SPOTSWAP_ADDR")
                .help("sets the IP_ADDR:PORT of the server to connect to")
                .default_value(DEFAULT_ADDRESS),
        )
        .arg(
            Arg::with_name("user")
                .long("user")
                .value_name("USER_ID")
                .env("SPOTSWAP_USER")
                .help("the account to act as"),
        )
        .arg(
            Arg::with_name("admin-email")
                .long("admin-email")
                .value_name("EMAIL")
                .env("SPOTSWAP_ADMIN_EMAIL")
                .help("an email address that is always treated as an administrator"),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .env("SPOTSWAP_LOG")
                .default_value("warn"),
        )
        .subcommands(vec![
            SubCommand::with_name("register")
                .about("Create or refresh the account given by --user")
                .arg(Arg::with_name("email").long("email").takes_value(true).required(true))
                .arg(Arg::with_name("first").long("first").takes_value(true))
                .arg(Arg::with_name("last").long("last").takes_value(true)),
            SubCommand::with_name("create")
                .about("List a spot for sale")
                .arg(Arg::with_name("spot").long("spot").takes_value(true).required(true))
                .arg(Arg::with_name("lot").long("lot").takes_value(true).required(true))
                .arg(day_arg("from", "first day").required(true))
                .arg(day_arg("to", "last day, inclusive").required(true)),
            SubCommand::with_name("browse")
                .about("Show listings available to buy")
                .arg(Arg::with_name("lot").long("lot").takes_value(true))
                .arg(day_arg("from", "only reservations starting on or after this day"))
                .arg(day_arg("to", "only reservations ending on or before this day"))
                .arg(Arg::with_name("max-price").long("max-price").takes_value(true)),
            SubCommand::with_name("mine").about("Show the listings you created"),
            SubCommand::with_name("purchased").about("Show the listings you bought"),
            SubCommand::with_name("show")
                .about("Show one listing")
                .arg(listing_id()),
            SubCommand::with_name("edit")
                .about("Move one of your listings to new dates")
                .arg(listing_id())
                .arg(day_arg("from", "first day").required(true))
                .arg(day_arg("to", "last day, inclusive").required(true)),
            SubCommand::with_name("delete")
                .about("Delete a listing")
                .arg(listing_id()),
            SubCommand::with_name("buy")
                .about("Purchase a listing")
                .arg(listing_id()),
            SubCommand::with_name("view")
                .about("Count a view of a listing")
                .arg(listing_id()),
            SubCommand::with_name("stats").about("Platform totals (admin)"),
            SubCommand::with_name("user-stats")
                .about("Totals for one user (admin)")
                .arg(Arg::with_name("USER_ID").index(1)),
            SubCommand::with_name("activity")
                .about("Recent registrations, listings and sales (admin)")
                .arg(limit()),
            SubCommand::with_name("users")
                .about("List accounts, newest first (admin)")
                .arg(limit()),
            SubCommand::with_name("grant-admin")
                .about("Give a user the admin role (admin)")
                .arg(user_id()),
            SubCommand::with_name("revoke-admin")
                .about("Take the admin role away (admin)")
                .arg(user_id()),
            SubCommand::with_name("suspend")
                .about("Suspend an account (admin)")
                .arg(user_id()),
            SubCommand::with_name("unsuspend")
                .about("Lift a suspension (admin)")
                .arg(user_id()),
            SubCommand::with_name("delete-user")
                .about("Delete an account and all of its listings (admin)")
                .arg(user_id()),
            SubCommand::with_name("cleanup").about("Repair the listing indexes (admin)"),
            SubCommand::with_name("reset")
                .about("Delete every listing (admin)")
                .arg(
                    Arg::with_name("confirm")
                        .long("confirm")
                        .value_name("PHRASE")
                        .required(true)
                        .help("must be exactly: DELETE ALL DATA"),
                ),
        ])
}

fn run(opt: &Opt, matches: &ArgMatches) -> Result<()> {
    let client = KvsClient::connect(opt.settings.addr)?;
    let directory = StoreDirectory::new(client.clone());
    let market = Marketplace::new(client.clone());
    let console = AdminConsole::new(client, directory.clone());

    let (name, args) = match matches.subcommand() {
        (name, Some(args)) => (name, args),
        (name, None) => return Err(SwapError::Parsing(format!("unknown command {}", name))),
    };

    if name == "register" {
        let id = opt.user.as_deref().ok_or(SwapError::Unauthenticated)?;
        return print(&directory.register(
            id,
            args.value_of("email").unwrap_or_default(),
            args.value_of("first"),
            args.value_of("last"),
        )?);
    }

    let gate = Gatekeeper::new(directory, AdminPolicy::new(opt.admin_email.clone()));
    let caller = gate.resolve(opt.user.as_deref())?;

    match name {
        "create" => print(&market.create(&caller, listing_request(args)?)?),
        "browse" => print(&market.list_available(&caller, &listing_query(args)?)?),
        "mine" => print(&market.list_owned_by(caller.require_user()?)?),
        "purchased" => print(&market.list_purchased_by(caller.require_user()?)?),
        "show" => print(&market.get(required(args, "LISTING_ID")?)?),
        "edit" => print(&market.edit(
            &caller,
            required(args, "LISTING_ID")?,
            date(args, "from")?.ok_or_else(|| missing("from"))?,
            date(args, "to")?.ok_or_else(|| missing("to"))?,
        )?),
        "delete" => print(&market.delete(&caller, required(args, "LISTING_ID")?)?),
        "buy" => print(&market.purchase(&caller, required(args, "LISTING_ID")?)?),
        "view" => print(&market.increment_view(required(args, "LISTING_ID")?)?),
        "stats" => print(&console.dashboard(&caller)?),
        "user-stats" => {
            let target = match args.value_of("USER_ID") {
                Some(target) => target,
                None => caller.require_user()?,
            };
            print(&console.user_stats(&caller, target)?)
        }
        "activity" => {
            let limit = value_t!(args, "limit", usize).unwrap_or(DEFAULT_ACTIVITY_LIMIT);
            print(&console.activity(&caller, Utc::now(), limit)?)
        }
        "users" => {
            let limit = value_t!(args, "limit", usize).unwrap_or(DEFAULT_USER_LIMIT);
            print(&console.list_users(&caller, limit)?)
        }
        "grant-admin" => print(&console.set_admin(&caller, required(args, "USER_ID")?, true)?),
        "revoke-admin" => print(&console.set_admin(&caller, required(args, "USER_ID")?, false)?),
        "suspend" => print(&console.set_suspended(&caller, required(args, "USER_ID")?, true)?),
        "unsuspend" => print(&console.set_suspended(&caller, required(args, "USER_ID")?, false)?),
        "delete-user" => print(&console.delete_user(&caller, required(args, "USER_ID")?)?),
        "cleanup" => print(&console.cleanup(&caller)?),
        "reset" => print(&console.reset(&caller, required(args, "confirm")?)?),
        other => Err(SwapError::Parsing(format!("unknown command {}", other))),
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn missing(name: &str) -> SwapError {
    SwapError::Validation(format!("--{} is required", name))
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.value_of(name).ok_or_else(|| missing(name))
}

fn date(args: &ArgMatches, name: &str) -> Result<Option<NaiveDate>> {
    args.value_of(name)
        .map(|raw| {
            NaiveDate::from_str(raw).map_err(|_| {
                SwapError::Validation(format!("--{} must be a date like 2024-11-04, got {}", name, raw))
            })
        })
        .transpose()
}

fn listing_request(args: &ArgMatches) -> Result<ListingRequest> {
    let spot = required(args, "spot")?;
    Ok(ListingRequest {
        spot_number: spot.parse().map_err(|_| {
            SwapError::Validation(format!("spot number must be an integer, got {}", spot))
        })?,
        lot: required(args, "lot")?.to_string(),
        from_date: date(args, "from")?.ok_or_else(|| missing("from"))?,
        to_date: date(args, "to")?.ok_or_else(|| missing("to"))?,
    })
}

fn listing_query(args: &ArgMatches) -> Result<ListingQuery> {
    Ok(ListingQuery {
        lot: args.value_of("lot").map(Lot::from_str).transpose()?,
        starts_on_or_after: date(args, "from")?,
        ends_on_or_before: date(args, "to")?,
        max_price: args
            .value_of("max-price")
            .map(|raw| {
                Decimal::from_str(raw).map_err(|_| {
                    SwapError::Validation(format!("--max-price must be an amount, got {}", raw))
                })
            })
            .transpose()?,
    })
}
