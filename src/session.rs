//! Signed-in user slot and storage key layout.
//!
//! Every key the crate reads or writes is computed here; call sites never
//! build keys by string concatenation.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::kv::{KvStore, StoreError};

/// Global (legacy, non-partitioned) product list
pub const GLOBAL_PRODUCTS_KEY: &str = "products";
/// Prefix of every per-user product list
pub const USER_PRODUCTS_PREFIX: &str = "products:";
pub const USER_KEY: &str = "user";
pub const AUTH_KEY: &str = "auth";
/// Local development account used when the API is unreachable
pub const CREDENTIALS_KEY: &str = "credentials";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub nome: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl User {
    pub fn new(nome: &str, email: &str) -> Self {
        Self {
            nome: nome.to_string(),
            email: normalize_email(email),
            role: None,
        }
    }

    /// Storage key of this user's product list
    pub fn products_key(&self) -> String {
        user_products_key(&self.email)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    pub token: String,
    pub user: User,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn user_products_key(email: &str) -> String {
    format!("{}{}", USER_PRODUCTS_PREFIX, normalize_email(email))
}

pub fn is_user_products_key(key: &str) -> bool {
    key.starts_with(USER_PRODUCTS_PREFIX) && key.len() > USER_PRODUCTS_PREFIX.len()
}

/// Read the signed-in user. A missing or unreadable slot means nobody is
/// signed in.
pub fn current_user(kv: &dyn KvStore) -> Option<User> {
    let raw = match kv.get(USER_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, "failed to read user slot");
            return None;
        }
    };

    match serde_json::from_str::<User>(&raw) {
        Ok(mut user) if !user.email.trim().is_empty() => {
            user.email = normalize_email(&user.email);
            Some(user)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "user slot is malformed");
            None
        }
    }
}

pub fn persisted_auth(kv: &dyn KvStore) -> Option<AuthRecord> {
    let raw = match kv.get(AUTH_KEY) {
        Ok(raw) => raw?,
        Err(e) => {
            warn!(error = %e, "failed to read auth slot");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(error = %e, "auth slot is malformed");
            None
        }
    }
}

pub fn sign_in(kv: &dyn KvStore, user: &User, token: &str) -> Result<(), StoreError> {
    let user = User {
        email: normalize_email(&user.email),
        ..user.clone()
    };
    kv.set(USER_KEY, &serde_json::to_string(&user)?)?;
    let auth = AuthRecord {
        token: token.to_string(),
        user,
    };
    kv.set(AUTH_KEY, &serde_json::to_string(&auth)?)?;
    Ok(())
}

/// Forget the signed-in user. Product lists stay in place.
pub fn sign_out(kv: &dyn KvStore) -> Result<(), StoreError> {
    kv.remove(USER_KEY)?;
    kv.remove(AUTH_KEY)
}
