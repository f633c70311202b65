//! News API client with response caching and rate-limit backoff.
//!
//! Rate limiting is an expected operating condition on free news tiers, so
//! it logs at WARN, sets a long backoff window during which every call
//! short-circuits to empty, and raises a consume-once flag the notification
//! agent turns into a single user-visible note.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct NewsArticle {
    pub title: String,
    pub description: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub source_name: String,
}

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("News API rate limited")]
    RateLimited,

    #[error("News API error: {0}")]
    Api(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Wire-level fetch, split out so tests can script responses and count calls.
#[async_trait]
pub trait NewsTransport: Send + Sync {
    async fn fetch(
        &self,
        query: &str,
        from_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<NewsArticle>, NewsError>;
}

/// NewsAPI.org transport (`GET /v2/everything`).
pub struct NewsApiTransport {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl NewsApiTransport {
    pub fn new(api_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct WireNewsResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<WireArticle>,
}

#[derive(Deserialize)]
struct WireArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    url: String,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    #[serde(default)]
    source: WireSource,
}

#[derive(Deserialize, Default)]
struct WireSource {
    #[serde(default)]
    name: String,
}

const NEWS_API_RATE_LIMITED_CODE: &str = "rateLimited";

#[async_trait]
impl NewsTransport for NewsApiTransport {
    async fn fetch(
        &self,
        query: &str,
        from_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<NewsArticle>, NewsError> {
        let mut req = self
            .http
            .get(format!("{}/v2/everything", self.api_url))
            .header("X-Api-Key", &self.api_key)
            .query(&[("q", query), ("sortBy", "publishedAt"), ("language", "en")]);
        if let Some(from) = from_date {
            req = req.query(&[("from", from.format("%Y-%m-%d").to_string())]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| NewsError::Transport(e.to_string()))?;
        let parsed: WireNewsResponse = resp
            .json()
            .await
            .map_err(|e| NewsError::Transport(e.to_string()))?;

        if parsed.status != "ok" {
            if parsed.code.as_deref() == Some(NEWS_API_RATE_LIMITED_CODE) {
                return Err(NewsError::RateLimited);
            }
            return Err(NewsError::Api(
                parsed.message.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Ok(parsed
            .articles
            .into_iter()
            .map(|a| NewsArticle {
                title: a.title.unwrap_or_default(),
                description: a.description.unwrap_or_default(),
                url: a.url,
                published_at: a
                    .published_at
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now),
                source_name: a.source.name,
            })
            .collect())
    }
}

/// Caching, rate-limit-aware news client.
pub struct NewsClient {
    transport: Box<dyn NewsTransport>,
    cache: Mutex<HashMap<String, (DateTime<Utc>, Vec<NewsArticle>)>>,
    rate_limited_until: Mutex<Option<DateTime<Utc>>>,
    rate_limit_notification_pending: AtomicBool,
    cache_ttl_secs: i64,
    backoff_secs: i64,
}

impl NewsClient {
    pub fn new(transport: Box<dyn NewsTransport>, cache_ttl_secs: i64, backoff_secs: i64) -> Self {
        Self {
            transport,
            cache: Mutex::new(HashMap::new()),
            rate_limited_until: Mutex::new(None),
            rate_limit_notification_pending: AtomicBool::new(false),
            cache_ttl_secs,
            backoff_secs,
        }
    }

    /// Search for articles matching any of `terms`. Returns an empty list on
    /// any failure — callers treat no news as a normal outcome.
    pub async fn search(
        &self,
        terms: &[String],
        from_date: Option<DateTime<Utc>>,
    ) -> Vec<NewsArticle> {
        if self.in_backoff() {
            debug!("news: in rate-limit backoff, skipping API call");
            return Vec::new();
        }

        let query = terms.join(" OR ");
        let cache_key = self.make_cache_key(&query, from_date);
        if let Some(cached) = self.cache_get(&cache_key) {
            debug!(query, "news: cache hit");
            return cached;
        }

        match self.transport.fetch(&query, from_date).await {
            Ok(articles) => {
                self.cache_put(cache_key, articles.clone());
                articles
            }
            Err(NewsError::RateLimited) => {
                let until = Utc::now() + Duration::seconds(self.backoff_secs);
                *self.rate_limited_until.lock().unwrap_or_else(|p| p.into_inner()) = Some(until);
                self.rate_limit_notification_pending
                    .store(true, Ordering::SeqCst);
                warn!(until = %until, "news API rate limited; backing off");
                Vec::new()
            }
            Err(e) => {
                error!("news API error: {e}");
                Vec::new()
            }
        }
    }

    /// True once per rate-limit event; the notification layer turns this
    /// into a single user-visible note.
    pub fn consume_rate_limit_notification(&self) -> bool {
        self.rate_limit_notification_pending
            .swap(false, Ordering::SeqCst)
    }

    fn in_backoff(&self) -> bool {
        let mut until = self
            .rate_limited_until
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match *until {
            Some(t) if t > Utc::now() => true,
            Some(_) => {
                *until = None;
                false
            }
            None => false,
        }
    }

    /// Cache key: normalized query + from-date at day granularity, so the
    /// same query repeated within a day hits cache.
    fn make_cache_key(&self, query: &str, from_date: Option<DateTime<Utc>>) -> String {
        let day = from_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "none".to_string());
        format!("{}|{day}", query.trim().to_lowercase())
    }

    fn cache_get(&self, key: &str) -> Option<Vec<NewsArticle>> {
        let cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        let (stored_at, articles) = cache.get(key)?;
        let age = (Utc::now() - *stored_at).num_seconds();
        (age < self.cache_ttl_secs).then(|| articles.clone())
    }

    fn cache_put(&self, key: String, articles: Vec<NewsArticle>) {
        self.cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, (Utc::now(), articles));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedTransport {
        calls: AtomicUsize,
        rate_limited: bool,
    }

    impl ScriptedTransport {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                rate_limited: false,
            }
        }

        fn rate_limited() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                rate_limited: true,
            }
        }
    }

    #[async_trait]
    impl NewsTransport for ScriptedTransport {
        async fn fetch(
            &self,
            _query: &str,
            _from_date: Option<DateTime<Utc>>,
        ) -> Result<Vec<NewsArticle>, NewsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limited {
                return Err(NewsError::RateLimited);
            }
            Ok(vec![NewsArticle {
                title: "SpaceX Launches Starship".into(),
                description: "A test article.".into(),
                url: "https://example.com/spacex".into(),
                published_at: Utc::now(),
                source_name: "Test News".into(),
            }])
        }
    }

    #[async_trait]
    impl NewsTransport for std::sync::Arc<ScriptedTransport> {
        async fn fetch(
            &self,
            query: &str,
            from_date: Option<DateTime<Utc>>,
        ) -> Result<Vec<NewsArticle>, NewsError> {
            self.as_ref().fetch(query, from_date).await
        }
    }

    fn client(transport: ScriptedTransport) -> (NewsClient, std::sync::Arc<ScriptedTransport>) {
        let transport = std::sync::Arc::new(transport);
        (
            NewsClient::new(Box::new(std::sync::Arc::clone(&transport)), 3600, 43_200),
            transport,
        )
    }

    #[tokio::test]
    async fn cache_hit_skips_api_call() {
        let (client, calls) = client(ScriptedTransport::ok());
        let terms = vec!["spacex".to_string(), "rocket".to_string()];

        let first = client.search(&terms, None).await;
        let second = client.search(&terms, None).await;

        assert_eq!(first.len(), 1);
        assert_eq!(first.len(), second.len());
        assert_eq!(calls.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_from_date_day_misses_cache() {
        let (client, calls) = client(ScriptedTransport::ok());
        let terms = vec!["spacex".to_string()];
        let day1 = DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let day1_later = DateTime::parse_from_rfc3339("2026-03-01T22:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let day2 = DateTime::parse_from_rfc3339("2026-03-02T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        client.search(&terms, Some(day1)).await;
        client.search(&terms, Some(day1_later)).await;
        assert_eq!(calls.calls.load(Ordering::SeqCst), 1, "same day hits cache");

        client.search(&terms, Some(day2)).await;
        assert_eq!(calls.calls.load(Ordering::SeqCst), 2, "new day misses cache");
    }

    #[tokio::test]
    async fn rate_limit_sets_backoff_and_short_circuits() {
        let (client, calls) = client(ScriptedTransport::rate_limited());
        let terms = vec!["spacex".to_string()];

        let results = client.search(&terms, None).await;
        assert!(results.is_empty());
        assert_eq!(calls.calls.load(Ordering::SeqCst), 1);

        // A different query during backoff never reaches the API.
        let other = client.search(&["nasa".to_string()], None).await;
        assert!(other.is_empty());
        assert_eq!(calls.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_backoff_clears() {
        let (client, calls) = client(ScriptedTransport::ok());
        *client.rate_limited_until.lock().unwrap() = Some(Utc::now() - Duration::seconds(1));

        let results = client.search(&["spacex".to_string()], None).await;
        assert_eq!(results.len(), 1);
        assert_eq!(calls.calls.load(Ordering::SeqCst), 1);
        assert!(client.rate_limited_until.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn rate_limit_notification_fires_once() {
        let (client, _) = client(ScriptedTransport::rate_limited());
        assert!(!client.consume_rate_limit_notification());

        client.search(&["spacex".to_string()], None).await;

        assert!(client.consume_rate_limit_notification());
        assert!(!client.consume_rate_limit_notification());
    }
}
