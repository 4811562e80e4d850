use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::cache::EntityCache;
use crate::error::{Result, WikiError};
use crate::params::QueryParams;
use crate::request::{RequestExecutor, RequestOptions, decode};
use crate::tokens::TokenType;
use crate::types::{User, UserContribution};

pub const DEFAULT_CONTRIBUTIONS_LIMIT: u32 = 10;

/// A user addressed by name or by numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
    Name(String),
    Id(i64),
}

impl From<&str> for UserLookup {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<i64> for UserLookup {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for UserLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
    lgusername: Option<String>,
}

pub struct UserManager {
    executor: Arc<RequestExecutor>,
    cache: EntityCache<String, User>,
}

impl UserManager {
    pub fn new(executor: Arc<RequestExecutor>, cache_size: usize) -> Self {
        Self {
            executor,
            cache: EntityCache::new(cache_size),
        }
    }

    pub fn fetch(&self, lookup: impl Into<UserLookup>) -> Result<User> {
        let lookup = lookup.into();
        let key = format!("user:{lookup}");
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let mut params = QueryParams::query()
            .with("list", "users")
            .with("usprop", "groups|registration");
        match &lookup {
            UserLookup::Name(name) => params.set("ususers", name),
            UserLookup::Id(id) => params.set("usids", *id),
        }
        let response = self.executor.get(&params)?;

        let raw = response
            .pointer("/query/users/0")
            .filter(|user| user.get("missing").is_none() && user.get("invalid").is_none())
            .cloned()
            .ok_or_else(|| WikiError::NotFound("User not found".to_string()))?;
        let user: User = decode(raw, "user query response")?;
        self.cache.insert(key, user.clone());
        Ok(user)
    }

    pub fn contributions(&self, username: &str, limit: u32) -> Result<Vec<UserContribution>> {
        let response = self.executor.get(
            &QueryParams::query()
                .with("list", "usercontribs")
                .with("ucuser", username)
                .with("uclimit", limit),
        )?;
        match response.pointer("/query/usercontribs") {
            Some(contributions) => decode(contributions.clone(), "user contributions response"),
            None => Ok(Vec::new()),
        }
    }

    pub fn block(&self, username: &str, expiry: &str, reason: &str) -> Result<()> {
        self.executor.post(
            &QueryParams::new()
                .with("action", "block")
                .with("user", username)
                .with("expiry", expiry)
                .with("reason", reason)
                .with("format", "json"),
            &RequestOptions::token(TokenType::Csrf),
        )?;
        info!(user = username, expiry, "blocked user");
        Ok(())
    }

    /// Log in with bot-password credentials and return the account name.
    ///
    /// Every cached token is dropped afterwards, success or not: tokens are
    /// bound to the session and the login token is single use.
    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        let login_token = self.executor.fetch_token(TokenType::Login)?;
        let response = self.executor.post(
            &QueryParams::new()
                .with("action", "login")
                .with("lgname", username)
                .with("lgpassword", password)
                .with("lgtoken", login_token)
                .with("format", "json"),
            &RequestOptions::default(),
        );
        self.executor.tokens().clear();

        let payload: LoginResponse = decode(response?, "login response")?;
        match payload.login.result.as_deref() {
            Some("Success") => {
                let name = payload
                    .login
                    .lgusername
                    .unwrap_or_else(|| username.to_string());
                info!(user = %name, "logged in");
                Ok(name)
            }
            other => Err(WikiError::LoginFailed(
                payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }
}
