use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, WikiError};
use crate::events::{EventSink, WikiEvent};
use crate::params::QueryParams;
use crate::request::{RequestExecutor, decode};
use crate::types::{FileUploadEvent, LogType, RecentChange, RecentChangeType, UserBlockEvent};

pub const RECENT_CHANGES_LIMIT: u32 = 50;
const RECENT_CHANGES_PROPS: &str = "title|ids|timestamp|user|userid|comment|flags|loginfo";

type ErrorHook = Arc<dyn Fn(&WikiError) + Send + Sync>;

/// Polls `list=recentchanges` and publishes newly seen entries as
/// [`WikiEvent`]s.
///
/// The first successful cycle only records the newest timestamp as the
/// cursor, so history is never replayed. Later cycles publish entries strictly
/// newer than the cursor and then advance it. Feed entries are sorted
/// newest-first locally; the `rcend` bound sent upstream only narrows the
/// window.
///
/// An entry whose timestamp equals the cursor is treated as already seen. Two
/// changes sharing one timestamp across a cycle boundary can therefore lose
/// the later one.
///
/// Cycle errors are logged, passed to the optional error hook, and otherwise
/// swallowed: a failed cycle leaves the cursor untouched and never stops the
/// timer.
///
/// Events are published after the cycle lock is released and the cursor has
/// been advanced, so a sink may call back into the poller.
pub struct ChangePoller {
    inner: Arc<PollerInner>,
    handle: Mutex<Option<PollHandle>>,
}

struct PollerInner {
    executor: Arc<RequestExecutor>,
    sink: Arc<dyn EventSink>,
    cursor: Mutex<Option<String>>,
    /// Held while a cycle fetches and advances the cursor, so a timer tick and
    /// a manual poll never overlap. Not held while publishing.
    cycle: Mutex<()>,
    on_error: RwLock<Option<ErrorHook>>,
}

struct PollHandle {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl ChangePoller {
    pub fn new(executor: Arc<RequestExecutor>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                executor,
                sink,
                cursor: Mutex::new(None),
                cycle: Mutex::new(()),
                on_error: RwLock::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Observe errors swallowed by poll cycles.
    pub fn on_error(&self, hook: impl Fn(&WikiError) + Send + Sync + 'static) {
        *self
            .inner
            .on_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Newest change timestamp already delivered, if any cycle has succeeded.
    pub fn cursor(&self) -> Option<String> {
        self.inner.cursor()
    }

    /// Resume from a known timestamp instead of bootstrapping.
    pub fn set_cursor(&self, cursor: Option<String>) {
        let _cycle = self.inner.cycle.lock().unwrap_or_else(PoisonError::into_inner);
        *self
            .inner
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = cursor;
    }

    pub fn is_polling(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Arm the timer. Returns `false` without doing anything when already
    /// polling.
    pub fn start_polling(&self, interval: Duration) -> Result<bool> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return Ok(false);
        }

        let (stop, stop_signal) = mpsc::channel::<()>();
        let inner = Arc::clone(&self.inner);
        let thread = thread::Builder::new()
            .name("wiki-change-poller".to_string())
            .spawn(move || {
                loop {
                    match stop_signal.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            inner.poll();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("change poller thread exiting");
            })
            .map_err(|source| WikiError::Io {
                context: "failed to start change poller".to_string(),
                source,
            })?;

        info!(interval_ms = interval.as_millis() as u64, "started recent changes polling");
        *handle = Some(PollHandle { stop, thread });
        Ok(true)
    }

    /// Cancel future ticks. A cycle already running finishes first. Returns
    /// `false` when the poller was idle.
    pub fn stop_polling(&self) -> bool {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(PollHandle { stop, thread }) = handle else {
            return false;
        };
        drop(stop);
        // Joining from the poller thread itself (a sink calling stop) would
        // deadlock.
        if thread.thread().id() != thread::current().id() && thread.join().is_err() {
            warn!("change poller thread panicked");
        }
        info!("stopped recent changes polling");
        true
    }

    /// Run one cycle now, swallowing any error. Returns the number of events
    /// published.
    pub fn poll(&self) -> usize {
        self.inner.poll()
    }

    /// Run one cycle now and surface its error instead of swallowing it.
    pub fn try_poll(&self) -> Result<usize> {
        self.inner.run_cycle()
    }
}

impl Drop for ChangePoller {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

impl PollerInner {
    fn cursor(&self) -> Option<String> {
        self.cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn poll(&self) -> usize {
        match self.run_cycle() {
            Ok(emitted) => emitted,
            Err(error) => {
                warn!(error = %error, "recent changes poll failed");
                let hook = self
                    .on_error
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(hook) = hook {
                    hook(&error);
                }
                0
            }
        }
    }

    fn run_cycle(&self) -> Result<usize> {
        let events = self.collect_events()?;
        let emitted = events.len();
        for event in events {
            self.sink.publish(event);
        }
        Ok(emitted)
    }

    /// Fetch the feed and advance the cursor, returning the events still to
    /// be published.
    fn collect_events(&self) -> Result<Vec<WikiEvent>> {
        let _cycle = self.cycle.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = self.cursor();

        let params = QueryParams::query()
            .with("list", "recentchanges")
            .with("rcprop", RECENT_CHANGES_PROPS)
            .with("rclimit", RECENT_CHANGES_LIMIT)
            .with("rcend", cursor.clone());
        let response = self.executor.get(&params)?;
        let mut changes: Vec<RecentChange> = match response.pointer("/query/recentchanges") {
            Some(Value::Null) | None => Vec::new(),
            Some(feed) => decode(feed.clone(), "recentchanges feed")?,
        };
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        changes.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        let newest = changes[0].timestamp.clone();

        let Some(last_seen) = cursor else {
            debug!(cursor = %newest, "seeded recent changes cursor");
            self.store_cursor(newest);
            return Ok(Vec::new());
        };

        let events = changes
            .into_iter()
            .filter(|change| change.timestamp > last_seen)
            .filter_map(classify)
            .collect();

        if newest > last_seen {
            self.store_cursor(newest);
        }
        Ok(events)
    }

    fn store_cursor(&self, timestamp: String) {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = Some(timestamp);
    }
}

/// Map one feed entry to its event. Entries other than edits, page creations,
/// uploads and blocks yield `None`.
pub fn classify(change: RecentChange) -> Option<WikiEvent> {
    match change.kind {
        RecentChangeType::Edit => Some(WikiEvent::PageUpdate(change)),
        RecentChangeType::New => Some(WikiEvent::PageCreate(change)),
        RecentChangeType::Log => match change.logtype.as_deref().and_then(LogType::parse) {
            Some(LogType::Upload) => Some(WikiEvent::FileUpload(FileUploadEvent {
                title: change.title,
                user: change.user,
                timestamp: change.timestamp,
                comment: change.comment,
                url: String::new(),
            })),
            Some(LogType::Block) => Some(WikiEvent::UserBlock(UserBlockEvent {
                user: change
                    .title
                    .strip_prefix("User:")
                    .unwrap_or(&change.title)
                    .to_string(),
                by: change.user,
                timestamp: change.timestamp,
                expiry: String::new(),
                reason: change.comment,
            })),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{Receiver, channel};
    use std::time::Instant;

    use serde_json::json;

    use super::*;
    use crate::config::ClientOptions;
    use crate::events::{EventBus, EventKind};
    use crate::testing::{MockTransport, Reply, executor, executor_with, options};

    fn feed(entries: Value) -> Reply {
        Reply::json(json!({ "query": { "recentchanges": entries } }))
    }

    fn poller() -> (ChangePoller, Arc<MockTransport>, Receiver<WikiEvent>) {
        let (executor, transport, _) = executor();
        let (sender, receiver) = channel();
        (ChangePoller::new(executor, Arc::new(sender)), transport, receiver)
    }

    #[test]
    fn first_cycle_seeds_cursor_without_emitting() {
        let (poller, transport, events) = poller();
        transport.push(feed(json!([
            { "type": "edit", "title": "A", "timestamp": "2023-01-01T00:00:02Z" },
            { "type": "edit", "title": "B", "timestamp": "2023-01-01T00:00:01Z" }
        ])));

        assert_eq!(poller.poll(), 0);

        assert_eq!(poller.cursor().as_deref(), Some("2023-01-01T00:00:02Z"));
        assert!(events.try_recv().is_err());
        let request = &transport.requests()[0];
        assert_eq!(MockTransport::query_value(request, "rcend"), None);
        assert_eq!(
            MockTransport::query_value(request, "list").as_deref(),
            Some("recentchanges")
        );
        assert_eq!(
            MockTransport::query_value(request, "rclimit").as_deref(),
            Some("50")
        );
        assert_eq!(
            MockTransport::query_value(request, "rcprop").as_deref(),
            Some("title|ids|timestamp|user|userid|comment|flags|loginfo")
        );
    }

    #[test]
    fn later_cycle_emits_only_entries_newer_than_cursor() {
        let (poller, transport, events) = poller();
        transport
            .push(feed(json!([
                { "type": "edit", "title": "Page 1", "timestamp": "2023-01-01T00:00:02Z" },
                { "type": "edit", "title": "Page 1", "timestamp": "2023-01-01T00:00:01Z" }
            ])))
            .push(feed(json!([
                { "type": "edit", "title": "Page 1", "timestamp": "2023-01-01T00:00:03Z" },
                { "type": "edit", "title": "Page 1", "timestamp": "2023-01-01T00:00:02Z" }
            ])));

        poller.poll();
        assert_eq!(poller.poll(), 1);

        let emitted = events.try_iter().collect::<Vec<_>>();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].kind(), EventKind::PageUpdate);
        assert_eq!(emitted[0].timestamp(), Some("2023-01-01T00:00:03Z"));
        assert_eq!(poller.cursor().as_deref(), Some("2023-01-01T00:00:03Z"));
        assert_eq!(
            MockTransport::query_value(&transport.requests()[1], "rcend").as_deref(),
            Some("2023-01-01T00:00:02Z")
        );
    }

    #[test]
    fn classifies_creations_uploads_and_blocks() {
        let (poller, transport, events) = poller();
        poller.set_cursor(Some("2023-01-01T00:00:00Z".to_string()));
        transport.push(feed(json!([
            { "timestamp": "2023-01-01T00:00:01Z", "type": "new", "title": "New Page" },
            {
                "timestamp": "2023-01-01T00:00:01Z",
                "type": "log",
                "logtype": "upload",
                "title": "File:Image.png",
                "user": "User1",
                "comment": "Upload"
            },
            {
                "timestamp": "2023-01-01T00:00:01Z",
                "type": "log",
                "logtype": "block",
                "title": "User:BadUser",
                "user": "Admin",
                "comment": "Block"
            },
            { "timestamp": "2023-01-01T00:00:01Z", "type": "log", "logtype": "delete", "title": "Gone" },
            { "timestamp": "2023-01-01T00:00:01Z", "type": "categorize", "title": "Category:X" }
        ])));

        assert_eq!(poller.poll(), 3);

        let emitted = events.try_iter().collect::<Vec<_>>();
        assert_eq!(emitted.len(), 3);
        match &emitted[0] {
            WikiEvent::PageCreate(change) => assert_eq!(change.title, "New Page"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(
            emitted[1],
            WikiEvent::FileUpload(FileUploadEvent {
                title: "File:Image.png".to_string(),
                user: "User1".to_string(),
                timestamp: "2023-01-01T00:00:01Z".to_string(),
                comment: "Upload".to_string(),
                url: String::new(),
            })
        );
        assert_eq!(
            emitted[2],
            WikiEvent::UserBlock(UserBlockEvent {
                user: "BadUser".to_string(),
                by: "Admin".to_string(),
                timestamp: "2023-01-01T00:00:01Z".to_string(),
                expiry: String::new(),
                reason: "Block".to_string(),
            })
        );
    }

    #[test]
    fn failed_fetch_leaves_cursor_and_reports_to_hook() {
        let (executor, transport, _) = executor_with(ClientOptions {
            max_retries: 0,
            ..options()
        });
        let (sender, events) = channel();
        let poller = ChangePoller::new(executor, Arc::new(sender));
        poller.set_cursor(Some("T1".to_string()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&failures);
        poller.on_error(move |error| seen.lock().expect("failures").push(error.to_string()));
        transport.push(Reply::network("Network error"));

        assert_eq!(poller.poll(), 0);

        assert_eq!(poller.cursor().as_deref(), Some("T1"));
        assert!(events.try_recv().is_err());
        let failures = failures.lock().expect("failures");
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("Network error"));
    }

    #[test]
    fn try_poll_surfaces_cycle_errors() {
        let (poller, transport, _) = poller();
        transport.push(Reply::json(
            json!({ "error": { "code": "readapidenied", "info": "no read" } }),
        ));

        let error = poller.try_poll().expect_err("must fail");

        assert_eq!(error.api_code(), Some("readapidenied"));
        assert_eq!(poller.cursor(), None);
    }

    #[test]
    fn malformed_feed_does_not_move_cursor() {
        let (poller, transport, _) = poller();
        poller.set_cursor(Some("T1".to_string()));
        transport.push(feed(json!("not a list")));

        assert_eq!(poller.poll(), 0);
        assert_eq!(poller.cursor().as_deref(), Some("T1"));
    }

    #[test]
    fn empty_response_changes_nothing() {
        let (poller, transport, events) = poller();
        transport.push(Reply::json(json!({}))).push(feed(json!([])));

        assert_eq!(poller.poll(), 0);
        assert_eq!(poller.poll(), 0);

        assert_eq!(poller.cursor(), None);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn oldest_first_feed_is_sorted_before_advancing_cursor() {
        let (poller, transport, events) = poller();
        poller.set_cursor(Some("2023-01-01T00:00:01Z".to_string()));
        transport.push(feed(json!([
            { "type": "edit", "title": "A", "timestamp": "2023-01-01T00:00:01Z" },
            { "type": "edit", "title": "B", "timestamp": "2023-01-01T00:00:02Z" },
            { "type": "new", "title": "C", "timestamp": "2023-01-01T00:00:03Z" }
        ])));

        assert_eq!(poller.poll(), 2);

        let titles = events
            .try_iter()
            .map(|event| match event {
                WikiEvent::PageUpdate(change) | WikiEvent::PageCreate(change) => change.title,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["C", "B"]);
        assert_eq!(poller.cursor().as_deref(), Some("2023-01-01T00:00:03Z"));
    }

    #[test]
    fn entry_at_cursor_timestamp_is_treated_as_seen() {
        let (poller, transport, events) = poller();
        poller.set_cursor(Some("2023-01-01T00:00:05Z".to_string()));
        transport.push(feed(json!([
            { "type": "edit", "title": "Late arrival", "timestamp": "2023-01-01T00:00:05Z" }
        ])));

        assert_eq!(poller.poll(), 0);
        assert!(events.try_recv().is_err());
        assert_eq!(poller.cursor().as_deref(), Some("2023-01-01T00:00:05Z"));
    }

    #[test]
    fn legacy_empty_string_flags_decode_as_set() {
        let (poller, transport, events) = poller();
        poller.set_cursor(Some("2023-01-01T00:00:00Z".to_string()));
        transport.push(feed(json!([
            { "type": "edit", "title": "A", "timestamp": "2023-01-01T00:00:02Z", "minor": "", "bot": "" },
            { "type": "new", "title": "B", "timestamp": "2023-01-01T00:00:01Z", "new": "" }
        ])));

        assert_eq!(poller.try_poll().expect("cycle"), 2);

        let emitted = events.try_iter().collect::<Vec<_>>();
        match &emitted[0] {
            WikiEvent::PageUpdate(change) => assert!(change.minor && change.bot && !change.new),
            other => panic!("unexpected event: {other:?}"),
        }
        match &emitted[1] {
            WikiEvent::PageCreate(change) => assert!(change.new && !change.minor),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(poller.cursor().as_deref(), Some("2023-01-01T00:00:02Z"));
        assert_eq!(
            MockTransport::query_value(&transport.requests()[0], "formatversion").as_deref(),
            Some("2")
        );
    }

    #[test]
    fn handler_may_call_back_into_the_poller() {
        let (executor, transport, _) = executor();
        let bus = Arc::new(EventBus::new());
        let poller = Arc::new(ChangePoller::new(executor, bus.clone()));
        poller.set_cursor(Some("2023-01-01T00:00:00Z".to_string()));
        let handle = Arc::downgrade(&poller);
        bus.subscribe(EventKind::PageUpdate, move |_| {
            if let Some(poller) = handle.upgrade() {
                poller.set_cursor(Some("2023-01-01T00:00:09Z".to_string()));
            }
        });
        transport.push(feed(json!([
            { "type": "edit", "title": "A", "timestamp": "2023-01-01T00:00:01Z" }
        ])));

        let (done, finished) = channel();
        let worker = Arc::clone(&poller);
        thread::spawn(move || {
            let _ = done.send(worker.poll());
        });

        let emitted = finished
            .recv_timeout(Duration::from_secs(5))
            .expect("cycle finished without deadlock");
        assert_eq!(emitted, 1);
        assert_eq!(poller.cursor().as_deref(), Some("2023-01-01T00:00:09Z"));
    }

    #[test]
    fn start_is_idempotent_and_stop_cancels_ticks() {
        let (poller, transport, _) = poller();
        transport.always(feed(json!([])));

        assert!(poller.start_polling(Duration::from_millis(10)).expect("start"));
        assert!(!poller.start_polling(Duration::from_millis(10)).expect("restart"));
        assert!(poller.is_polling());

        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.request_count() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(transport.request_count() >= 1);

        assert!(poller.stop_polling());
        let after_stop = transport.request_count();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(transport.request_count(), after_stop);
        assert!(!poller.is_polling());
        assert!(!poller.stop_polling());
    }

    #[test]
    fn classify_drops_uninteresting_entries() {
        let external = RecentChange {
            kind: RecentChangeType::External,
            ..RecentChange::default()
        };
        let protect = RecentChange {
            kind: RecentChangeType::Log,
            logtype: Some("protect".to_string()),
            ..RecentChange::default()
        };
        let untyped_log = RecentChange {
            kind: RecentChangeType::Log,
            ..RecentChange::default()
        };

        assert_eq!(classify(external), None);
        assert_eq!(classify(protect), None);
        assert_eq!(classify(untyped_log), None);
    }
}
