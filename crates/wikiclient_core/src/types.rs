use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Result, WikiError};

pub const NS_MAIN: i32 = 0;
pub const NS_TALK: i32 = 1;
pub const NS_USER: i32 = 2;
pub const NS_USER_TALK: i32 = 3;
pub const NS_PROJECT: i32 = 4;
pub const NS_FILE: i32 = 6;
pub const NS_MEDIAWIKI: i32 = 8;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_HELP: i32 = 12;
pub const NS_CATEGORY: i32 = 14;
pub const NS_MESSAGE_WALL: i32 = 1200;
pub const NS_THREAD: i32 = 1201;

/// `type` of a recent-changes entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecentChangeType {
    Edit,
    New,
    Log,
    External,
    Categorize,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Log sub-kinds reported in `logtype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    Block,
    Protect,
    Rights,
    Delete,
    Upload,
    Move,
    Import,
    Patrol,
    Merge,
    Suppress,
    Tag,
    ManageTags,
    ContentModel,
    NewUsers,
}

impl LogType {
    pub fn parse(value: &str) -> Option<Self> {
        let parsed = match value {
            "block" => Self::Block,
            "protect" => Self::Protect,
            "rights" => Self::Rights,
            "delete" => Self::Delete,
            "upload" => Self::Upload,
            "move" => Self::Move,
            "import" => Self::Import,
            "patrol" => Self::Patrol,
            "merge" => Self::Merge,
            "suppress" => Self::Suppress,
            "tag" => Self::Tag,
            "managetags" => Self::ManageTags,
            "contentmodel" => Self::ContentModel,
            "newusers" => Self::NewUsers,
            _ => return None,
        };
        Some(parsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionLevel {
    Sysop,
    Autoconfirmed,
    None,
}

impl ProtectionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sysop => "sysop",
            Self::Autoconfirmed => "autoconfirmed",
            Self::None => "all",
        }
    }
}

/// One entry of `list=recentchanges`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecentChange {
    #[serde(rename = "type", default)]
    pub kind: RecentChangeType,
    #[serde(default)]
    pub ns: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pageid: i64,
    #[serde(default)]
    pub revid: i64,
    #[serde(default)]
    pub old_revid: i64,
    #[serde(default)]
    pub rcid: i64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub userid: Option<i64>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default, deserialize_with = "api_flag")]
    pub bot: bool,
    #[serde(default, deserialize_with = "api_flag")]
    pub new: bool,
    #[serde(default, deserialize_with = "api_flag")]
    pub minor: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logaction: Option<String>,
}

/// Boolean flag in either wire form: `true`/`false` under formatversion 2, or
/// a key that is present (usually as `""`) under formatversion 1.
fn api_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Null => false,
        _ => true,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileUploadEvent {
    pub title: String,
    pub user: String,
    pub timestamp: String,
    pub comment: String,
    /// Not resolved by the poller; always empty.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserBlockEvent {
    pub user: String,
    pub by: String,
    pub timestamp: String,
    /// Not resolved by the poller; always empty.
    pub expiry: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    #[serde(default)]
    pub revid: i64,
    #[serde(default)]
    pub parentid: Option<i64>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl Revision {
    /// Build from a raw `revisions[]` entry, reading content from the legacy
    /// `*` key, a top-level `content`, or the `slots.main` slot.
    pub(crate) fn from_api(raw: &Value) -> Result<Self> {
        let mut revision: Revision = serde_json::from_value(raw.clone())
            .map_err(|error| WikiError::decode("revision entry", error))?;
        revision.content = revision_content(raw);
        Ok(revision)
    }
}

pub(crate) fn revision_content(raw: &Value) -> Option<String> {
    if let Some(content) = raw
        .get("*")
        .or_else(|| raw.get("content"))
        .and_then(Value::as_str)
    {
        return Some(content.to_string());
    }
    let slots = raw.get("slots")?;
    let main = slots.get("main").or_else(|| slots.get("Main"))?;
    main.get("*")
        .or_else(|| main.get("content"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageSummary {
    pub pageid: i64,
    pub ns: i32,
    pub title: String,
    pub extract: Option<String>,
    pub content: Option<String>,
    pub revisions: Vec<Revision>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    #[serde(default)]
    pub pageid: i64,
    #[serde(default)]
    pub ns: i32,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "userid", default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub registration: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContribution {
    #[serde(default)]
    pub userid: i64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pageid: i64,
    #[serde(default)]
    pub revid: i64,
    #[serde(default)]
    pub parentid: i64,
    #[serde(default)]
    pub ns: i32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub size: i64,
}

/// `meta=siteinfo` payload. Sections are kept as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<Value>,
}

impl SiteInfo {
    pub fn sitename(&self) -> Option<&str> {
        self.general.as_ref()?.get("sitename")?.as_str()
    }
}
