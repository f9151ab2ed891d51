//! Operations reserved for administrators.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::auth::Caller;
use crate::cleanup::{CleanupReport, Janitor, ResetReport};
use crate::identity::{IdentityProvider, Role, User};
use crate::keys::{owner_index_key, purchased_index_key};
use crate::stats::{recent_activity, Activity, AdminDashboard, UserStats, RECENT_REGISTRATIONS};
use crate::{KvsEngine, Marketplace, Result, SwapError};

/// upper bound on the accounts counted by the dashboard
const MAX_USERS: usize = 500;

/// Outcome of [`AdminConsole::delete_user`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedUser {
    /// the removed account
    pub user_id: String,
    /// listings purged along with it
    pub deleted_listings: u64,
}

/// The admin panel: user management, repair jobs and platform statistics.
///
/// Every operation requires an administrator [`Caller`].
#[derive(Debug, Clone)]
pub struct AdminConsole<E: KvsEngine, I: IdentityProvider> {
    market: Marketplace<E>,
    janitor: Janitor<E>,
    identity: I,
}

impl<E: KvsEngine, I: IdentityProvider> AdminConsole<E, I> {
    /// a console over `engine` and `identity`
    pub fn new(engine: E, identity: I) -> Self {
        AdminConsole {
            market: Marketplace::new(engine.clone()),
            janitor: Janitor::new(engine),
            identity,
        }
    }

    /// listing totals and the number of accounts
    pub fn dashboard(&self, caller: &Caller) -> Result<AdminDashboard> {
        caller.require_admin()?;
        Ok(AdminDashboard {
            listings: self.market.global_stats()?,
            total_users: self.identity.list_users(MAX_USERS)?.len() as u64,
        })
    }

    /// up to `limit` accounts, newest first
    pub fn list_users(&self, caller: &Caller, limit: usize) -> Result<Vec<User>> {
        caller.require_admin()?;
        self.identity.list_users(limit)
    }

    /// Grants or revokes the admin role of `target`.
    #[instrument(skip(self))]
    pub fn set_admin(&self, caller: &Caller, target: &str, admin: bool) -> Result<User> {
        let admin_id = caller.require_admin()?;
        let role = if admin { Role::Admin } else { Role::User };
        let user = self.identity.set_role(target, role)?;
        info!(admin_id, target, ?role, "role changed");
        Ok(user)
    }

    /// Suspends or reinstates `target`.
    ///
    /// # Errors
    /// `Validation` when an administrator targets their own account.
    #[instrument(skip(self))]
    pub fn set_suspended(&self, caller: &Caller, target: &str, suspended: bool) -> Result<User> {
        let admin_id = caller.require_admin()?;
        if admin_id == target {
            return Err(SwapError::Validation("cannot suspend yourself".to_string()));
        }
        let user = if suspended {
            self.identity.ban(target, admin_id)?
        } else {
            self.identity.unban(target)?
        };
        info!(admin_id, target, suspended, "suspension changed");
        Ok(user)
    }

    /// Deletes `target` along with every listing they own and both of their index sets.
    ///
    /// # Errors
    /// `Validation` when an administrator targets their own account, `NotFound` for an unknown
    /// account.
    #[instrument(skip(self))]
    pub fn delete_user(&self, caller: &Caller, target: &str) -> Result<DeletedUser> {
        let admin_id = caller.require_admin()?;
        if admin_id == target {
            return Err(SwapError::Validation("cannot delete yourself".to_string()));
        }
        if self.identity.get_user(target)?.is_none() {
            return Err(SwapError::NotFound(format!("user {}", target)));
        }

        let engine = self.market.engine();
        let mut deleted_listings = 0;
        for id in engine.set_members(owner_index_key(target))? {
            // the index may point at records owned by someone else; only the record decides
            match self.market.get(&id) {
                Ok(listing) if listing.is_owned_by(target) => {}
                Ok(listing) => {
                    warn!(listing_id = %id, owner_id = %listing.owner_id, "skipping foreign index entry");
                    continue;
                }
                Err(SwapError::NotFound(_)) => {
                    warn!(listing_id = %id, "skipping stale index entry");
                    continue;
                }
                Err(e) => return Err(e),
            }
            match self.market.delete(caller, &id) {
                Ok(_) => deleted_listings += 1,
                Err(SwapError::NotFound(_)) => warn!(listing_id = %id, "skipping stale index entry"),
                Err(e) => return Err(e),
            }
        }
        engine.remove(owner_index_key(target))?;
        engine.remove(purchased_index_key(target))?;
        self.identity.delete_user(target)?;

        info!(admin_id, target, deleted_listings, "user deleted");
        Ok(DeletedUser {
            user_id: target.to_string(),
            deleted_listings,
        })
    }

    /// runs the index repair job
    pub fn cleanup(&self, caller: &Caller) -> Result<CleanupReport> {
        caller.require_admin()?;
        self.janitor.cleanup()
    }

    /// wipes every listing, see [`Janitor::reset`]
    pub fn reset(&self, caller: &Caller, confirmation: &str) -> Result<ResetReport> {
        self.janitor.reset(caller, confirmation)
    }

    /// Listing and purchase totals of `target`, with account dates when the account exists.
    pub fn user_stats(&self, caller: &Caller, target: &str) -> Result<UserStats> {
        caller.require_admin()?;
        let stats = self.market.user_stats(target)?;
        Ok(match self.identity.get_user(target)? {
            Some(user) => stats.with_account(&user),
            None => stats,
        })
    }

    /// the `limit` most recent registrations, listings and sales as seen at `now`
    pub fn activity(
        &self,
        caller: &Caller,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Activity>> {
        caller.require_admin()?;
        let users = self.identity.list_users(RECENT_REGISTRATIONS)?;
        let listings = self.market.all_listings()?;
        Ok(recent_activity(&users, &listings, now, limit))
    }
}
