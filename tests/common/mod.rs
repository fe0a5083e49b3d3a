//! Shared helpers for integration tests: an in-process catalog that speaks
//! the upstream JSON shapes and counts every request it receives.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use labelmeta::helpers::catalog::{CatalogClient, CatalogConfig};
use labelmeta::helpers::http_client::{HttpClient, HttpClientError, HttpResponse};
use labelmeta::helpers::reconciler::Reconciler;
use labelmeta::helpers::request_queue::{QueueConfig, RequestQueue};

/// What the mock answers for one request
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(Value),
    Status(u16),
    RateLimited(Option<u64>),
    TransportError,
}

/// Catalog double. Searches are routed by their `q` parameter, everything
/// else by URL path. A route answers with its replies in order and keeps
/// repeating the last one; unknown routes get an empty search result or 404.
#[derive(Debug, Default)]
pub struct MockCatalog {
    routes: Mutex<HashMap<String, Vec<Reply>>>,
    requests: Mutex<Vec<String>>,
    token_requests: AtomicU32,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer artist searches for exactly `query`
    pub fn search(self, query: &str, replies: Vec<Reply>) -> Self {
        self.routes.lock().unwrap().insert(format!("search:{}", query), replies);
        self
    }

    /// Answer requests for a URL path such as `/v1/playlists/pl1/tracks`
    pub fn path(self, path: &str, replies: Vec<Reply>) -> Self {
        self.routes.lock().unwrap().insert(path.to_string(), replies);
        self
    }

    /// Route keys of all GET requests received, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn search_count(&self, query: &str) -> usize {
        let key = format!("search:{}", query);
        self.requests().iter().filter(|k| **k == key).count()
    }

    pub fn token_requests(&self) -> u32 {
        self.token_requests.load(Ordering::SeqCst)
    }

    fn route_key(url: &str) -> String {
        let parsed = url::Url::parse(url).unwrap();
        if parsed.path().ends_with("/search") {
            let query = parsed
                .query_pairs()
                .find(|(k, _)| k == "q")
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default();
            format!("search:{}", query)
        } else {
            parsed.path().to_string()
        }
    }
}

#[async_trait]
impl HttpClient for MockCatalog {
    async fn get_with_headers(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, HttpClientError> {
        assert!(
            headers.iter().any(|(name, value)| *name == "Authorization" && value.starts_with("Bearer ")),
            "catalog request without bearer token"
        );

        let key = Self::route_key(url);
        self.requests.lock().unwrap().push(key.clone());

        let reply = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&key) {
                Some(replies) if replies.len() > 1 => Some(replies.remove(0)),
                Some(replies) => replies.first().cloned(),
                None => None,
            }
        };

        match reply {
            Some(Reply::Ok(body)) => Ok(HttpResponse::new(200, &body.to_string())),
            Some(Reply::Status(status)) => Ok(HttpResponse::new(status, "")),
            Some(Reply::RateLimited(retry_after)) => Ok(HttpResponse {
                status: 429,
                retry_after,
                body: String::new(),
            }),
            Some(Reply::TransportError) => Err(HttpClientError::RequestError("connection reset".to_string())),
            None if key.starts_with("search:") => Ok(HttpResponse::new(200, &search_body(&[]).to_string())),
            None => Ok(HttpResponse::new(404, "")),
        }
    }

    async fn post_form_with_headers(
        &self,
        _url: &str,
        form: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, HttpClientError> {
        assert!(form.contains(&("grant_type", "client_credentials")));
        assert!(headers.iter().any(|(name, value)| *name == "Authorization" && value.starts_with("Basic ")));

        self.token_requests.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::new(
            200,
            r#"{"access_token":"test-token","token_type":"Bearer","expires_in":3600}"#,
        ))
    }
}

/// Upstream artist object
pub fn artist(id: &str, name: &str, popularity: u8, with_image: bool) -> Value {
    let images = if with_image {
        json!([{ "url": format!("https://img.test/{}.jpg", id), "width": 640, "height": 640 }])
    } else {
        json!([])
    };
    json!({
        "id": id,
        "name": name,
        "popularity": popularity,
        "images": images,
        "genres": ["house"],
        "external_urls": { "spotify": format!("https://open.spotify.com/artist/{}", id) }
    })
}

/// Upstream artist search response
pub fn search_body(artists: &[Value]) -> Value {
    json!({ "artists": { "items": artists, "next": null } })
}

pub fn search_reply(artists: &[Value]) -> Reply {
    Reply::Ok(search_body(artists))
}

/// Upstream playlist track page
pub fn playlist_page(tracks: &[(&str, &str, &str)], next: Option<&str>) -> Value {
    let items: Vec<Value> = tracks
        .iter()
        .map(|(id, name, artist)| {
            json!({ "track": {
                "id": id,
                "name": name,
                "duration_ms": 240000,
                "artists": [{ "id": null, "name": artist }],
                "album": { "id": "al1", "name": "Album", "images": [], "release_date": "2024-01-01" }
            }})
        })
        .collect();
    json!({ "items": items, "next": next })
}

pub fn queue_config(max_calls_per_window: u32, window: Duration) -> QueueConfig {
    QueueConfig {
        max_calls_per_window,
        window,
        inter_task_delay: Duration::ZERO,
        max_retries: 3,
        task_timeout: None,
    }
}

pub fn catalog_client(mock: Arc<MockCatalog>, queue: QueueConfig) -> CatalogClient {
    let mut config = CatalogConfig::new("test-id", "test-secret");
    config.api_base = "https://api.catalog.test/v1".to_string();
    config.token_url = "https://accounts.catalog.test/api/token".to_string();
    CatalogClient::new(config, mock, RequestQueue::new(queue)).unwrap()
}

pub fn reconciler(mock: Arc<MockCatalog>) -> Reconciler {
    Reconciler::new(catalog_client(mock, queue_config(100, Duration::from_secs(30))))
}
