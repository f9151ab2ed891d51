//! User accounts, as seen through an identity provider.
//!
//! The marketplace only reads a user's id, email, role and suspension flag, and writes role
//! and suspension changes back through [`IdentityProvider`]. [`StoreDirectory`] is a provider
//! that keeps accounts in the key/value store itself.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::keys::{account_key, ACCOUNTS_ALL};
use crate::{KvsEngine, Pipeline, Result, SwapError};

/// Role metadata attached to an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// an ordinary member
    #[default]
    User,
    /// may run the admin operations
    Admin,
}

/// A user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// identity provider id
    pub id: String,
    /// primary email address
    pub email: String,
    /// given name
    #[serde(default)]
    pub first_name: Option<String>,
    /// family name
    #[serde(default)]
    pub last_name: Option<String>,
    /// role metadata
    #[serde(default)]
    pub role: Role,
    /// suspended accounts cannot act
    #[serde(default)]
    pub suspended: bool,
    /// who suspended the account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_by: Option<String>,
    /// when the account was suspended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspended_at: Option<DateTime<Utc>>,
    /// when the account was created
    pub created_at: DateTime<Utc>,
    /// last time the account changed
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// `first last`, or `Unknown` when no name is on file
    pub fn display_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or("Unknown"),
            self.last_name.as_deref().unwrap_or("")
        );
        name.trim().to_string()
    }
}

/// The operations the marketplace needs from an identity provider.
pub trait IdentityProvider: Clone + Send + 'static {
    /// the account with `user_id`, if any
    fn get_user(&self, user_id: &str) -> Result<Option<User>>;

    /// up to `limit` accounts, newest first
    fn list_users(&self, limit: usize) -> Result<Vec<User>>;

    /// replaces the role of `user_id`
    fn set_role(&self, user_id: &str, role: Role) -> Result<User>;

    /// suspends `user_id`, recording who did it
    fn ban(&self, user_id: &str, by: &str) -> Result<User>;

    /// lifts a suspension
    fn unban(&self, user_id: &str) -> Result<User>;

    /// removes the account, returning whether it existed
    fn delete_user(&self, user_id: &str) -> Result<bool>;
}

/// An [`IdentityProvider`] keeping accounts in the key/value store under `account:{id}`.
#[derive(Debug, Clone)]
pub struct StoreDirectory<E: KvsEngine> {
    engine: E,
}

impl<E: KvsEngine> StoreDirectory<E> {
    /// a directory over `engine`
    pub fn new(engine: E) -> Self {
        StoreDirectory { engine }
    }

    /// Creates the account `id`, or refreshes the email and names of an existing one.
    #[instrument(skip(self))]
    pub fn register(
        &self,
        id: &str,
        email: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<User> {
        if id.trim().is_empty() || email.trim().is_empty() {
            return Err(SwapError::Validation(
                "an account needs an id and an email".to_string(),
            ));
        }
        let now = Utc::now();
        let user = match self.get_user(id)? {
            Some(mut user) => {
                user.email = email.to_string();
                user.first_name = first_name.map(String::from);
                user.last_name = last_name.map(String::from);
                user.updated_at = now;
                user
            }
            None => User {
                id: id.to_string(),
                email: email.to_string(),
                first_name: first_name.map(String::from),
                last_name: last_name.map(String::from),
                role: Role::User,
                suspended: false,
                suspended_by: None,
                suspended_at: None,
                created_at: now,
                updated_at: now,
            },
        };
        self.save(&user)?;
        info!(user_id = id, "registered account");
        Ok(user)
    }

    fn save(&self, user: &User) -> Result<()> {
        let mut pipe = Pipeline::new();
        pipe.set(account_key(&user.id), serde_json::to_string(user)?)
            .sadd(ACCOUNTS_ALL, user.id.as_str());
        self.engine.exec(pipe)?;
        Ok(())
    }

    fn modify<F>(&self, user_id: &str, f: F) -> Result<User>
    where
        F: FnOnce(&mut User),
    {
        let mut user = self
            .get_user(user_id)?
            .ok_or_else(|| SwapError::NotFound(format!("user {}", user_id)))?;
        f(&mut user);
        user.updated_at = Utc::now();
        self.save(&user)?;
        Ok(user)
    }
}

impl<E: KvsEngine> IdentityProvider for StoreDirectory<E> {
    fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        match self.engine.get(account_key(user_id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn list_users(&self, limit: usize) -> Result<Vec<User>> {
        let ids = self.engine.set_members(ACCOUNTS_ALL.to_string())?;
        let mut pipe = Pipeline::new();
        for id in &ids {
            pipe.get(account_key(id));
        }
        let mut users = vec![];
        for reply in self.engine.exec(pipe)? {
            if let Some(raw) = reply.into_text()? {
                users.push(serde_json::from_str::<User>(&raw)?);
            }
        }
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        users.truncate(limit);
        Ok(users)
    }

    fn set_role(&self, user_id: &str, role: Role) -> Result<User> {
        self.modify(user_id, |user| user.role = role)
    }

    fn ban(&self, user_id: &str, by: &str) -> Result<User> {
        self.modify(user_id, |user| {
            user.suspended = true;
            user.suspended_by = Some(by.to_string());
            user.suspended_at = Some(Utc::now());
        })
    }

    fn unban(&self, user_id: &str) -> Result<User> {
        self.modify(user_id, |user| {
            user.suspended = false;
            user.suspended_by = None;
            user.suspended_at = None;
        })
    }

    fn delete_user(&self, user_id: &str) -> Result<bool> {
        let mut pipe = Pipeline::new();
        pipe.del(account_key(user_id)).srem(ACCOUNTS_ALL, user_id);
        let replies = self.engine.exec(pipe)?;
        match replies.into_iter().next() {
            Some(reply) => reply.into_bool(),
            None => Ok(false),
        }
    }
}
