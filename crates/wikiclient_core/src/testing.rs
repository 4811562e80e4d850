//! Scripted transport and manual clock shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::clock::Clock;
use crate::config::ClientOptions;
use crate::request::RequestExecutor;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

pub(crate) struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn advance(&self, duration: Duration) {
        *self.offset.lock().expect("clock offset") += duration;
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("clock sleeps").clone()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        *self.offset.lock().expect("clock offset")
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().expect("clock offset")
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.sleeps.lock().expect("clock sleeps").push(duration);
    }
}

#[derive(Clone)]
pub(crate) enum Reply {
    Response(HttpResponse),
    Failure(String),
}

impl Reply {
    pub(crate) fn json(body: Value) -> Self {
        Self::Response(HttpResponse {
            status: 200,
            status_text: "OK".to_string(),
            set_cookies: Vec::new(),
            body: body.to_string().into_bytes(),
        })
    }

    pub(crate) fn json_with_cookie(body: Value, cookie: &str) -> Self {
        Self::Response(HttpResponse {
            status: 200,
            status_text: "OK".to_string(),
            set_cookies: vec![cookie.to_string()],
            body: body.to_string().into_bytes(),
        })
    }

    pub(crate) fn status(status: u16, status_text: &str) -> Self {
        Self::Response(HttpResponse {
            status,
            status_text: status_text.to_string(),
            set_cookies: Vec::new(),
            body: Vec::new(),
        })
    }

    pub(crate) fn network(message: &str) -> Self {
        Self::Failure(message.to_string())
    }
}

#[derive(Default)]
pub(crate) struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, reply: Reply) -> &Self {
        self.replies.lock().expect("replies").push_back(reply);
        self
    }

    /// Reply served once the scripted queue is drained.
    pub(crate) fn always(&self, reply: Reply) -> &Self {
        *self.fallback.lock().expect("fallback") = Some(reply);
        self
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().expect("requests").len()
    }

    pub(crate) fn query_value(request: &HttpRequest, key: &str) -> Option<String> {
        request
            .url
            .query_pairs()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }
}

impl HttpTransport for MockTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().expect("requests").push(request.clone());
        let next = self.replies.lock().expect("replies").pop_front();
        let reply = match next {
            Some(reply) => reply,
            None => self
                .fallback
                .lock()
                .expect("fallback")
                .clone()
                .unwrap_or_else(|| Reply::network("no scripted reply")),
        };
        match reply {
            Reply::Response(response) => Ok(response),
            Reply::Failure(message) => Err(TransportError::new(message)),
        }
    }
}

pub(crate) fn options() -> ClientOptions {
    ClientOptions {
        host: "https://test.fandom.com".to_string(),
        ..ClientOptions::default()
    }
}

pub(crate) fn executor_with(
    options: ClientOptions,
) -> (Arc<RequestExecutor>, Arc<MockTransport>, Arc<ManualClock>) {
    let transport = Arc::new(MockTransport::new());
    let clock = Arc::new(ManualClock::new());
    let executor = RequestExecutor::with_parts(&options, transport.clone(), clock.clone())
        .expect("executor");
    (Arc::new(executor), transport, clock)
}

pub(crate) fn executor() -> (Arc<RequestExecutor>, Arc<MockTransport>, Arc<ManualClock>) {
    executor_with(options())
}
