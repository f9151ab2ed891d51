#![deny(missing_docs)]
//! A marketplace for campus parking spot reservations, built on a key/value store.
//!
//! Users list a spot for a date range, other users browse and buy those listings, and
//! administrators manage accounts and keep the store consistent. All state lives in a
//! key/value store reached through the [`KvsEngine`] trait.
//!
//! ## Layers
//! - [`KvsEngine`]: GET, SET, DEL, set commands, KEYS, compare-and-swap and pipelined batches.
//!   Implemented by [`MemoryStore`], [`LogStore`], [`SledStore`], and by [`KvsClient`], which
//!   forwards every command to a [`KvsServer`].
//! - [`keys`]: the key schema, mapping listings and per-user indexes onto store keys.
//! - [`pricing`]: day counts and prices of a reservation range.
//! - [`Marketplace`]: the listing lifecycle (create, browse, edit, delete, purchase, view) and
//!   the aggregate statistics.
//! - [`Janitor`]: the index repair job and the full wipe.
//! - [`Gatekeeper`] and [`AdminConsole`]: who is calling, and the operations reserved for
//!   administrators.
//!
//! ## Consistency
//! A listing's primary record is authoritative. The roster and the owner and buyer indexes
//! are derived from it and updated with separate commands, so they can drift after a partial
//! failure; [`Janitor::cleanup`] restores them. Updates to one primary record use
//! compare-and-swap, so two buyers racing for the same listing cannot both win.
//!
//! ## Wire protocol
//! The client and server exchange JSON encoded [`Request`]s and [`Response`]s over TCP. A
//! [`Request::Pipeline`] carries a whole batch in one round trip.
//!
//! ## Executables
//! `spotswap-server` serves a store on a thread pool. `spotswap` runs marketplace and admin
//! operations against that server and prints the results as JSON.

pub use admin::{AdminConsole, DeletedUser};
pub use auth::{AdminPolicy, Caller, Gatekeeper};
pub use cleanup::{CleanupReport, Janitor, ResetReport, RESET_CONFIRMATION};
pub use client::KvsClient;
pub use command::{Pipeline, Reply, Request, Response};
pub use config::{EngineKind, PoolKind, Settings};
pub use engine::{glob_match, Entry, KvsEngine, LogStore, MemoryStore, SledStore};
pub use error::{ErrorKind, Result, SwapError};
pub use identity::{IdentityProvider, Role, StoreDirectory, User};
pub use keys::ListingId;
pub use listing::{Listing, ListingQuery, ListingRequest, Lot, NewListing};
pub use market::Marketplace;
pub use server::KvsServer;
pub use stats::{Activity, ActivityKind, AdminDashboard, GlobalStats, UserStats};
pub use thread_pool::{NaiveThreadPool, RayonThreadPool, SharedQueueThreadPool, ThreadPool};

mod admin;
mod auth;
mod cleanup;
mod client;
mod command;
pub mod config;
mod engine;
mod error;
mod identity;
pub mod keys;
mod listing;
mod market;
pub mod pricing;
mod server;
pub mod stats;
pub mod thread_pool;
