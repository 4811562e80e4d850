use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::debug;

use crate::types::{FileUploadEvent, PageSummary, RecentChange, UserBlockEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PageUpdate,
    PageCreate,
    FileUpload,
    UserBlock,
    PageFetched,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PageUpdate => "pageUpdate",
            Self::PageCreate => "pageCreate",
            Self::FileUpload => "fileUpload",
            Self::UserBlock => "userBlock",
            Self::PageFetched => "pageFetched",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum WikiEvent {
    PageUpdate(RecentChange),
    PageCreate(RecentChange),
    FileUpload(FileUploadEvent),
    UserBlock(UserBlockEvent),
    PageFetched(PageSummary),
}

impl WikiEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PageUpdate(_) => EventKind::PageUpdate,
            Self::PageCreate(_) => EventKind::PageCreate,
            Self::FileUpload(_) => EventKind::FileUpload,
            Self::UserBlock(_) => EventKind::UserBlock,
            Self::PageFetched(_) => EventKind::PageFetched,
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        match self {
            Self::PageUpdate(change) | Self::PageCreate(change) => Some(&change.timestamp),
            Self::FileUpload(event) => Some(&event.timestamp),
            Self::UserBlock(event) => Some(&event.timestamp),
            Self::PageFetched(_) => None,
        }
    }
}

/// Destination for events produced by the poller and the page manager.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: WikiEvent);
}

impl EventSink for Sender<WikiEvent> {
    fn publish(&self, event: WikiEvent) {
        if self.send(event).is_err() {
            debug!("event receiver dropped; discarding event");
        }
    }
}

type Handler = Arc<dyn Fn(&WikiEvent) + Send + Sync>;

/// In-process publish/subscribe keyed by [`EventKind`].
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<(Option<EventKind>, Handler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: impl Fn(&WikiEvent) + Send + Sync + 'static) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Some(kind), Arc::new(handler)));
    }

    pub fn subscribe_all(&self, handler: impl Fn(&WikiEvent) + Send + Sync + 'static) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((None, Arc::new(handler)));
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver to every matching handler; returns how many were called.
    pub fn emit(&self, event: &WikiEvent) -> usize {
        let kind = event.kind();
        // Handlers run without the lock held so they may subscribe further.
        let matching = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(filter, _)| filter.is_none_or(|wanted| wanted == kind))
            .map(|(_, handler)| Arc::clone(handler))
            .collect::<Vec<_>>();
        for handler in &matching {
            handler(event);
        }
        matching.len()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: WikiEvent) {
        self.emit(&event);
    }
}
