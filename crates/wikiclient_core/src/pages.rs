use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::EntityCache;
use crate::error::{Result, WikiError};
use crate::events::{EventSink, WikiEvent};
use crate::params::QueryParams;
use crate::request::{RequestExecutor, RequestOptions, decode};
use crate::tokens::TokenType;
use crate::types::{PageSummary, ProtectionLevel, Revision};

pub const ARTICLES_DETAILS_PATH: &str = "/api/v1/Articles/Details";
pub const DEFAULT_ABSTRACT_LENGTH: u32 = 500;
pub const HISTORY_LIMIT: u32 = 50;

#[derive(Debug, Deserialize, Default)]
struct RawPage {
    #[serde(default)]
    pageid: i64,
    #[serde(default)]
    ns: i32,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    lastrevid: Option<i64>,
    #[serde(default)]
    revisions: Vec<Value>,
    #[serde(default)]
    categories: Vec<CategoryEntry>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    title: String,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    edit: Option<EditOutcome>,
}

/// Payload of a successful `action=edit`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EditOutcome {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub pageid: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub oldrevid: Option<i64>,
    #[serde(default)]
    pub newrevid: Option<i64>,
    #[serde(default)]
    pub nochange: Option<Value>,
}

impl EditOutcome {
    pub fn changed(&self) -> bool {
        self.nochange.is_none()
    }
}

/// First entry of `query.pages`, keyed by page id or listed as an array.
pub(crate) fn first_page(response: &Value) -> Option<&Value> {
    match response.pointer("/query/pages")? {
        Value::Object(pages) => pages.values().next(),
        Value::Array(pages) => pages.first(),
        _ => None,
    }
}

fn parse_page(response: &Value, context: &str) -> Result<Option<RawPage>> {
    first_page(response)
        .map(|page| decode(page.clone(), context))
        .transpose()
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

pub struct PageManager {
    executor: Arc<RequestExecutor>,
    sink: Arc<dyn EventSink>,
    cache: EntityCache<String, PageSummary>,
}

impl PageManager {
    pub fn new(executor: Arc<RequestExecutor>, sink: Arc<dyn EventSink>, cache_size: usize) -> Self {
        Self {
            executor,
            sink,
            cache: EntityCache::new(cache_size),
        }
    }

    /// Fetch a page summary with intro extract, wikitext and categories.
    ///
    /// Redirects are followed and the summary carries the resolved title.
    /// When the wiki returns no extract the Fandom article-details endpoint is
    /// tried for an abstract; failures there are ignored. A network fetch
    /// publishes `pageFetched`; cache hits do not.
    pub fn fetch(&self, title: &str) -> Result<PageSummary> {
        let key = format!("page:{title}");
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let response = self.executor.get(
            &QueryParams::query()
                .with("prop", "extracts|revisions|categories")
                .with("exintro", true)
                .with("explaintext", true)
                .with("rvprop", "content")
                .with("cllimit", "max")
                .with("redirects", true)
                .with("titles", title),
        )?;
        let page = parse_page(&response, "page query response")?
            .ok_or_else(|| WikiError::NotFound("No page data".to_string()))?;

        let redirect_target = response
            .pointer("/query/redirects")
            .and_then(Value::as_array)
            .and_then(|redirects| redirects.last())
            .and_then(|redirect| redirect.get("to"))
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let resolved_title = redirect_target
            .or(page.title)
            .unwrap_or_else(|| title.to_string());

        let extract = match non_empty(page.extract.as_deref()) {
            Some(extract) => Some(extract),
            None => self.fetch_abstract(&resolved_title),
        };

        let revisions = page
            .revisions
            .iter()
            .map(Revision::from_api)
            .collect::<Result<Vec<_>>>()?;
        let summary = PageSummary {
            pageid: page.pageid,
            ns: page.ns,
            title: resolved_title,
            extract,
            content: revisions.first().and_then(|revision| revision.content.clone()),
            revisions,
            categories: page
                .categories
                .into_iter()
                .map(|category| category.title)
                .collect(),
        };

        self.sink.publish(WikiEvent::PageFetched(summary.clone()));
        self.cache.insert(key, summary.clone());
        Ok(summary)
    }

    fn fetch_abstract(&self, title: &str) -> Option<String> {
        let details = self.executor.get_with(
            &QueryParams::new()
                .with("titles", title)
                .with("abstract", DEFAULT_ABSTRACT_LENGTH),
            &RequestOptions::api_path(ARTICLES_DETAILS_PATH),
        );
        match details {
            Ok(details) => {
                let items = details.get("items")?.as_object()?;
                non_empty(items.values().next()?.get("abstract")?.as_str())
            }
            Err(error) => {
                debug!(title, error = %error, "article details fallback failed");
                None
            }
        }
    }

    pub fn edit(&self, title: &str, text: &str, summary: Option<&str>) -> Result<EditOutcome> {
        let response = self.executor.post(
            &QueryParams::new()
                .with("action", "edit")
                .with("title", title)
                .with("text", text)
                .with("format", "json")
                .with("summary", summary),
            &RequestOptions::token(TokenType::Csrf),
        )?;
        self.invalidate(title);
        edit_outcome(response, title)
    }

    /// Delete a page. Returns `false` when the page was already gone.
    pub fn delete(&self, title: &str, reason: Option<&str>) -> Result<bool> {
        let response = self.executor.post(
            &QueryParams::new()
                .with("action", "delete")
                .with("title", title)
                .with("format", "json")
                .with("reason", reason),
            &RequestOptions::token(TokenType::Csrf),
        );
        self.invalidate(title);
        match response {
            Ok(_) => {
                info!(title, "deleted page");
                Ok(true)
            }
            Err(error) if error.api_code() == Some("missingtitle") => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Apply `level` to both edit and move rights.
    pub fn protect(
        &self,
        title: &str,
        level: ProtectionLevel,
        expiry: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let level = level.as_str();
        self.executor.post(
            &QueryParams::new()
                .with("action", "protect")
                .with("title", title)
                .with("protections", format!("edit={level}|move={level}"))
                .with("expiry", expiry)
                .with("format", "json")
                .with("reason", reason),
            &RequestOptions::token(TokenType::Csrf),
        )?;
        Ok(())
    }

    /// Up to the 50 newest revisions of `title`, newest first.
    pub fn history(&self, title: &str) -> Result<Vec<Revision>> {
        let response = self.executor.get(
            &QueryParams::query()
                .with("prop", "revisions")
                .with("titles", title)
                .with("rvprop", "ids|timestamp|user|content")
                .with("rvlimit", HISTORY_LIMIT),
        )?;
        let Some(page) = parse_page(&response, "page history response")? else {
            return Ok(Vec::new());
        };
        page.revisions.iter().map(Revision::from_api).collect()
    }

    /// Undo every revision after `revid`. Returns `false` without editing when
    /// `revid` is already the latest revision.
    pub fn revert_to(&self, title: &str, revid: i64, summary: Option<&str>) -> Result<bool> {
        let response = self.executor.get(
            &QueryParams::query()
                .with("prop", "info")
                .with("titles", title),
        )?;
        let current = parse_page(&response, "page info response")?
            .and_then(|page| page.lastrevid)
            .ok_or_else(|| WikiError::NotFound(format!("Page {title} not found")))?;
        if current == revid {
            return Ok(false);
        }

        let response = self.executor.post(
            &QueryParams::new()
                .with("action", "edit")
                .with("title", title)
                .with("undo", current)
                .with("undoafter", revid)
                .with("format", "json")
                .with("summary", summary),
            &RequestOptions::token(TokenType::Csrf),
        )?;
        self.invalidate(title);
        edit_outcome(response, title)?;
        Ok(true)
    }

    fn invalidate(&self, title: &str) {
        self.cache.invalidate(&format!("page:{title}"));
    }
}

fn edit_outcome(response: Value, title: &str) -> Result<EditOutcome> {
    let payload: EditResponse = decode(response, "edit response")?;
    let edit = payload
        .edit
        .ok_or_else(|| WikiError::UnexpectedResponse("missing edit payload".to_string()))?;
    if edit.result.as_deref() != Some("Success") {
        return Err(WikiError::UnexpectedResponse(format!(
            "edit of {title} returned {}",
            edit.result.as_deref().unwrap_or("unknown")
        )));
    }
    Ok(edit)
}
