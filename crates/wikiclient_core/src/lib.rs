//! Blocking client core for MediaWiki and Fandom wikis: a rate-limited request
//! executor with session cookies and token caching, typed resource managers,
//! and a recent-changes poller that turns the feed into events.

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod limiter;
pub mod pages;
pub mod params;
pub mod poller;
pub mod request;
pub mod revisions;
pub mod search;
pub mod tokens;
pub mod transport;
pub mod types;
pub mod users;

#[cfg(test)]
mod testing;

pub use client::WikiClient;
pub use config::{ClientOptions, WikiConfig, load_config};
pub use error::{Result, WikiError};
pub use events::{EventBus, EventKind, EventSink, WikiEvent};
pub use params::QueryParams;
pub use request::{RequestExecutor, RequestOptions};
pub use tokens::TokenType;
