use std::sync::Arc;

use serde_json::Value;

use crate::cache::EntityCache;
use crate::error::{Result, WikiError};
use crate::pages::first_page;
use crate::params::QueryParams;
use crate::request::{RequestExecutor, decode};
use crate::types::{RecentChange, Revision};

pub const DEFAULT_RECENT_LIMIT: u32 = 10;

pub struct RevisionManager {
    executor: Arc<RequestExecutor>,
    cache: EntityCache<i64, Revision>,
}

impl RevisionManager {
    pub fn new(executor: Arc<RequestExecutor>, cache_size: usize) -> Self {
        Self {
            executor,
            cache: EntityCache::new(cache_size),
        }
    }

    /// Fetch one revision with its content. The owning page title is filled in
    /// from the enclosing page entry.
    pub fn fetch(&self, revid: i64) -> Result<Revision> {
        if let Some(cached) = self.cache.get(&revid) {
            return Ok(cached);
        }

        let response = self.executor.get(
            &QueryParams::query()
                .with("prop", "revisions")
                .with("revids", revid)
                .with("rvprop", "ids|timestamp|user|comment|content"),
        )?;
        let page = first_page(&response);
        let mut revision = page
            .and_then(|page| page.pointer("/revisions/0"))
            .map(Revision::from_api)
            .transpose()?
            .ok_or_else(|| WikiError::NotFound(format!("Revision {revid} not found")))?;
        if revision.title.is_none() {
            revision.title = page
                .and_then(|page| page.get("title"))
                .and_then(Value::as_str)
                .map(ToString::to_string);
        }

        self.cache.insert(revid, revision.clone());
        Ok(revision)
    }

    /// Newest entries of the recent-changes feed, as content-less revisions.
    pub fn recent(&self, limit: u32) -> Result<Vec<Revision>> {
        let response = self.executor.get(
            &QueryParams::query()
                .with("list", "recentchanges")
                .with("rcprop", "ids|timestamp|user|comment|title")
                .with("rclimit", limit),
        )?;
        let Some(changes) = response.pointer("/query/recentchanges") else {
            return Ok(Vec::new());
        };
        let changes: Vec<RecentChange> = decode(changes.clone(), "recent changes response")?;
        Ok(changes
            .into_iter()
            .map(|change| Revision {
                revid: change.revid,
                parentid: None,
                user: change.user,
                timestamp: change.timestamp,
                comment: Some(change.comment),
                title: Some(change.title),
                content: None,
            })
            .collect())
    }
}
