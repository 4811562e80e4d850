use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::error::{Result, WikiError};
use crate::params::QueryParams;

/// Token kinds accepted by `action=query&meta=tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Csrf,
    Login,
    Patrol,
    Rollback,
    Userrights,
    Watch,
    Edit,
}

impl TokenType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csrf => "csrf",
            Self::Login => "login",
            Self::Patrol => "patrol",
            Self::Rollback => "rollback",
            Self::Userrights => "userrights",
            Self::Watch => "watch",
            Self::Edit => "edit",
        }
    }

    /// Key under `query.tokens` carrying this token.
    pub fn response_key(self) -> String {
        format!("{}token", self.as_str())
    }

    pub(crate) fn request_params(self) -> QueryParams {
        QueryParams::query()
            .with("meta", "tokens")
            .with("type", self.as_str())
    }

    pub(crate) fn extract(self, response: &Value) -> Result<String> {
        response
            .pointer("/query/tokens")
            .and_then(|tokens| tokens.get(self.response_key()))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| WikiError::TokenResolution {
                token_type: self.as_str().to_string(),
            })
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type token memo owned by one executor.
///
/// Entries never expire. A token the server later rejects as stale stays
/// cached until [`TokenCache::clear`] is called (a successful login does this).
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<TokenType, String>>,
}

impl TokenCache {
    pub fn get(&self, token_type: TokenType) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&token_type)
            .cloned()
    }

    pub fn insert(&self, token_type: TokenType, token: String) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token_type, token);
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extract_reads_type_specific_key() {
        let response = json!({ "query": { "tokens": { "logintoken": "abc+\\" } } });
        assert_eq!(
            TokenType::Login.extract(&response).expect("token"),
            "abc+\\"
        );
    }

    #[test]
    fn extract_fails_on_missing_or_empty_key() {
        let missing = json!({ "query": { "tokens": {} } });
        let empty = json!({ "query": { "tokens": { "csrftoken": "" } } });

        for response in [missing, empty] {
            let error = TokenType::Csrf.extract(&response).expect_err("must fail");
            assert!(matches!(error, WikiError::TokenResolution { .. }));
            assert!(error.to_string().contains("Failed to fetch token"));
        }
    }

    #[test]
    fn cache_holds_one_entry_per_type() {
        let cache = TokenCache::default();
        cache.insert(TokenType::Csrf, "one".to_string());
        cache.insert(TokenType::Csrf, "two".to_string());
        cache.insert(TokenType::Watch, "w".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(TokenType::Csrf).as_deref(), Some("two"));

        cache.clear();
        assert!(cache.is_empty());
    }
}
