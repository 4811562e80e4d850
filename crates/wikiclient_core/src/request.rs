use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ClientOptions;
use crate::error::{Result, WikiError};
use crate::limiter::RateLimiter;
use crate::params::QueryParams;
use crate::tokens::{TokenCache, TokenType};
use crate::transport::{HttpMethod, HttpRequest, HttpTransport, ReqwestTransport};

/// Per-call overrides for [`RequestExecutor::get_with`] and
/// [`RequestExecutor::post`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub api_path: Option<String>,
    /// POST only: resolve this token first and send it as `token`.
    pub token_type: Option<TokenType>,
}

impl RequestOptions {
    pub fn api_path(path: impl Into<String>) -> Self {
        Self {
            api_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn token(token_type: TokenType) -> Self {
        Self {
            token_type: Some(token_type),
            ..Self::default()
        }
    }
}

/// Cookies accumulated from `set-cookie` headers.
///
/// Append-only for the executor's lifetime: a cookie set twice is sent twice,
/// and nothing expires. Only the leading `name=value` pair of each header is
/// kept; attributes such as `Path` are not echoed back.
#[derive(Debug, Default)]
struct SessionCookies {
    entries: Mutex<Vec<String>>,
}

impl SessionCookies {
    fn record(&self, raw: &str) {
        let pair = raw.split(';').next().unwrap_or_default().trim();
        if pair.is_empty() {
            return;
        }
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pair.to_string());
    }

    fn header(&self) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() {
            None
        } else {
            Some(entries.join("; "))
        }
    }
}

/// Turns logical API calls into rate-limited, retried, cookie-carrying HTTP
/// exchanges against one wiki.
///
/// Every physical attempt takes one rate-limiter token. Transport failures and
/// non-2xx statuses share one retry budget with `retry_delay * 2^attempt`
/// backoff; an `{"error": {...}}` body is returned as [`WikiError::Api`] on
/// the first attempt.
///
/// Requests issued concurrently from several threads are not serialized end
/// to end; callers that need ordering must wait for each call to return.
pub struct RequestExecutor {
    base_url: Url,
    api_path: String,
    user_agent: Option<String>,
    max_retries: u32,
    retry_delay: Duration,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    cookies: SessionCookies,
    tokens: TokenCache,
    request_count: AtomicUsize,
}

impl RequestExecutor {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let transport = ReqwestTransport::new(options.timeout())?;
        Self::with_parts(options, Arc::new(transport), Arc::new(SystemClock))
    }

    pub fn with_parts(
        options: &ClientOptions,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        options.validate()?;
        let base_url = Url::parse(&options.host).map_err(|error| WikiError::InvalidUrl {
            url: options.host.clone(),
            reason: error.to_string(),
        })?;
        let limiter = RateLimiter::new(
            options.rate_capacity,
            options.rate_refill_per_second,
            clock.clone(),
        )?;

        Ok(Self {
            base_url,
            api_path: options.api_path.clone(),
            user_agent: options.user_agent.clone(),
            max_retries: options.max_retries,
            retry_delay: Duration::from_millis(options.retry_delay_ms),
            transport,
            clock,
            limiter,
            cookies: SessionCookies::default(),
            tokens: TokenCache::default(),
            request_count: AtomicUsize::new(0),
        })
    }

    pub fn get(&self, params: &QueryParams) -> Result<Value> {
        self.get_with(params, &RequestOptions::default())
    }

    pub fn get_with(&self, params: &QueryParams, options: &RequestOptions) -> Result<Value> {
        let url = self.build_url(params, options.api_path.as_deref())?;
        self.execute(HttpMethod::Get, url, None)
    }

    pub fn post(&self, params: &QueryParams, options: &RequestOptions) -> Result<Value> {
        let url = self.endpoint(options.api_path.as_deref())?;
        let mut form = Vec::new();
        if let Some(token_type) = options.token_type {
            form.push(("token".to_string(), self.fetch_token(token_type)?));
        }
        form.extend(params.to_pairs());
        self.execute(HttpMethod::Post, url, Some(form))
    }

    /// Resolve a token, fetching it once per type and caching it afterwards.
    pub fn fetch_token(&self, token_type: TokenType) -> Result<String> {
        if let Some(token) = self.tokens.get(token_type) {
            return Ok(token);
        }
        let response = self.get(&token_type.request_params())?;
        let token = token_type.extract(&response)?;
        debug!(token_type = %token_type, "cached MediaWiki token");
        self.tokens.insert(token_type, token.clone());
        Ok(token)
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Value of the `Cookie` header the next request will carry.
    pub fn cookie_header(&self) -> Option<String> {
        self.cookies.header()
    }

    /// Physical HTTP attempts made so far, retries included.
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn build_url(&self, params: &QueryParams, api_path: Option<&str>) -> Result<Url> {
        let mut url = self.endpoint(api_path)?;
        let pairs = params.to_pairs();
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &pairs {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn endpoint(&self, api_path: Option<&str>) -> Result<Url> {
        let path = api_path.unwrap_or(&self.api_path);
        self.base_url
            .join(path)
            .map_err(|error| WikiError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                reason: error.to_string(),
            })
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(2);
        if let Some(user_agent) = &self.user_agent {
            headers.push(("User-Agent".to_string(), user_agent.clone()));
        }
        if let Some(cookie) = self.cookies.header() {
            headers.push(("Cookie".to_string(), cookie));
        }
        headers
    }

    fn execute(
        &self,
        method: HttpMethod,
        url: Url,
        form: Option<Vec<(String, String)>>,
    ) -> Result<Value> {
        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire(1)?;
            let request = HttpRequest {
                method,
                url: url.clone(),
                headers: self.headers(),
                form: form.clone(),
            };
            self.request_count.fetch_add(1, Ordering::Relaxed);
            debug!(method = method.as_str(), url = %url, attempt, "sending MediaWiki API request");

            match self.transport.send(&request) {
                Ok(response) => {
                    for cookie in &response.set_cookies {
                        self.cookies.record(cookie);
                    }
                    if !response.is_success() {
                        if attempt < self.max_retries {
                            warn!(
                                status = response.status,
                                attempt,
                                "MediaWiki API returned HTTP error, retrying"
                            );
                            self.wait_before_retry(attempt);
                            attempt += 1;
                            continue;
                        }
                        return Err(WikiError::HttpStatus {
                            status: response.status,
                            status_text: response.status_text,
                        });
                    }
                    return decode_payload(&response.body);
                }
                Err(error) => {
                    if attempt < self.max_retries {
                        warn!(error = %error, attempt, "MediaWiki API transport failure, retrying");
                        self.wait_before_retry(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(WikiError::Transport(error));
                }
            }
        }
    }

    fn wait_before_retry(&self, attempt: u32) {
        let factor = 2u32.saturating_pow(attempt);
        self.clock.sleep(self.retry_delay.saturating_mul(factor));
    }
}

fn decode_payload(body: &[u8]) -> Result<Value> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|error| WikiError::decode("MediaWiki API JSON response", error))?;
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        return Err(WikiError::Api {
            code: code.to_string(),
            info: info.to_string(),
        });
    }
    Ok(payload)
}

/// Deserialize a decoded API payload into a typed response shape.
pub(crate) fn decode<T: DeserializeOwned>(payload: Value, context: &str) -> Result<T> {
    serde_json::from_value(payload).map_err(|error| WikiError::decode(context, error))
}
