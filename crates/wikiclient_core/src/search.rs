use std::sync::Arc;

use serde::Deserialize;

use crate::error::Result;
use crate::params::QueryParams;
use crate::request::{RequestExecutor, decode};
use crate::types::{PageRef, SiteInfo};

pub const DEFAULT_SEARCH_LIMIT: u32 = 10;
pub const DEFAULT_MEMBERS_LIMIT: u32 = 50;
pub const DEFAULT_SITEINFO_PROPS: &str = "general|namespaces|statistics";

const CATEGORY_PREFIX: &str = "Category:";

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

/// Full-text search over page content.
pub struct SearchManager {
    executor: Arc<RequestExecutor>,
}

impl SearchManager {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// Titles of the best matches for `query`.
    pub fn search(&self, query: &str, limit: u32) -> Result<Vec<String>> {
        let response = self.executor.get(
            &QueryParams::query()
                .with("list", "search")
                .with("srsearch", query)
                .with("srlimit", limit),
        )?;
        let Some(hits) = response.pointer("/query/search") else {
            return Ok(Vec::new());
        };
        let hits: Vec<SearchHit> = decode(hits.clone(), "search response")?;
        Ok(hits.into_iter().map(|hit| hit.title).collect())
    }
}

pub struct CategoryManager {
    executor: Arc<RequestExecutor>,
}

impl CategoryManager {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// Members of `category`; the `Category:` prefix is optional.
    pub fn members(&self, category: &str, limit: u32) -> Result<Vec<PageRef>> {
        let response = self.executor.get(
            &QueryParams::query()
                .with("list", "categorymembers")
                .with("cmtitle", category_title(category))
                .with("cmlimit", limit),
        )?;
        match response.pointer("/query/categorymembers") {
            Some(members) => decode(members.clone(), "category members response"),
            None => Ok(Vec::new()),
        }
    }
}

fn category_title(category: &str) -> String {
    if category.starts_with(CATEGORY_PREFIX) {
        category.to_string()
    } else {
        format!("{CATEGORY_PREFIX}{category}")
    }
}

pub struct MetaManager {
    executor: Arc<RequestExecutor>,
}

impl MetaManager {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// `meta=siteinfo` for the given `siprop` sections. Sections the wiki did
    /// not return stay `None`.
    pub fn site_info(&self, props: &str) -> Result<SiteInfo> {
        let response = self.executor.get(
            &QueryParams::query()
                .with("meta", "siteinfo")
                .with("siprop", props),
        )?;
        match response.get("query") {
            Some(query) => decode(query.clone(), "siteinfo response"),
            None => Ok(SiteInfo::default()),
        }
    }
}
