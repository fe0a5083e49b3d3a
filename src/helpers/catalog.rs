// Catalog client for the upstream music catalog (Spotify Web API)
// Uses the client credentials flow; every data call goes through the
// TTL cache and then the rate-limited request queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use base64::Engine;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::get_service_config;
use crate::data::{AlbumRef, ArtistCandidate, ImageRef, Track, TrackArtist};
use crate::helpers::http_client::HttpClient;
use crate::helpers::request_queue::{QueueError, QueueStats, RequestQueue, TaskOutcome};
use crate::helpers::ttlcache::{make_key, TtlCache};

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Tokens are refreshed this long before upstream expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Page size for playlist track listing (upstream maximum)
const PLAYLIST_PAGE_SIZE: u32 = 100;

// Catalog API error types. Not-found is never an error.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<QueueError<CatalogError>> for CatalogError {
    fn from(error: QueueError<CatalogError>) -> Self {
        match error {
            QueueError::Operation(e) => e,
            QueueError::RetriesExhausted { attempts } => {
                CatalogError::Transport(format!("Still rate limited after {} attempts", attempts))
            }
            QueueError::TimedOut(limit) => CatalogError::Transport(format!("Request timed out after {:?}", limit)),
            QueueError::Closed => CatalogError::Transport("Request queue is not running".to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// Catalog configuration structure
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub token_url: String,
    /// Optional market (country code) passed to search and lookups
    pub market: Option<String>,
    /// Number of candidates requested per search
    pub search_limit: u32,
    pub cache_ttl: Duration,
    /// Maximum number of playlist pages followed
    pub playlist_page_cap: usize,
    pub http_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            market: None,
            search_limit: 10,
            cache_ttl: Duration::from_secs(3600),
            playlist_page_cap: 10,
            http_timeout_secs: 10,
        }
    }
}

impl CatalogConfig {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        CatalogConfig {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            ..CatalogConfig::default()
        }
    }

    /// Read the `catalog` service section of the application config
    pub fn from_json(config: &serde_json::Value) -> Self {
        let defaults = CatalogConfig::default();
        let Some(catalog) = get_service_config(config, "catalog") else {
            debug!("No catalog configuration found, using defaults");
            return defaults;
        };

        let get_str = |name: &str| catalog.get(name).and_then(|v| v.as_str()).map(|s| s.trim().to_string());
        let get_u64 = |name: &str| catalog.get(name).and_then(|v| v.as_u64());

        CatalogConfig {
            client_id: get_str("client_id").unwrap_or_default(),
            client_secret: get_str("client_secret").unwrap_or_default(),
            api_base: get_str("api_base")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            token_url: get_str("token_url").unwrap_or(defaults.token_url),
            market: get_str("market").filter(|m| !m.is_empty()),
            search_limit: get_u64("search_limit")
                .map(|v| v.clamp(1, 50) as u32)
                .unwrap_or(defaults.search_limit),
            cache_ttl: get_u64("cache_ttl_secs")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            playlist_page_cap: get_u64("playlist_page_cap")
                .map(|v| v.max(1) as usize)
                .unwrap_or(defaults.playlist_page_cap),
            http_timeout_secs: get_u64("http_timeout_secs").unwrap_or(defaults.http_timeout_secs),
        }
    }

    /// Missing credentials are the one failure that stops the subsystem
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(CatalogError::Config("Catalog client_id and client_secret are required".to_string()));
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(CatalogError::Config(format!(
                "Invalid API base URL: '{}' - must start with http:// or https://",
                self.api_base
            )));
        }
        Ok(())
    }
}

// Upstream response shapes. Narrowed to crate types at this boundary.

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    url: String,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    id: String,
    name: String,
    #[serde(default)]
    popularity: Option<u32>,
    #[serde(default)]
    images: Vec<ApiImage>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    external_urls: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrackArtist {
    id: Option<String>,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiAlbum {
    id: Option<String>,
    name: String,
    #[serde(default)]
    images: Vec<ApiImage>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    id: Option<String>,
    name: String,
    #[serde(default)]
    duration_ms: u32,
    #[serde(default)]
    artists: Vec<ApiTrackArtist>,
    album: Option<ApiAlbum>,
    #[serde(default)]
    external_urls: HashMap<String, String>,
    preview_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArtistSearchResponse {
    artists: Paging<ApiArtist>,
}

#[derive(Debug, Deserialize)]
struct TrackSearchResponse {
    tracks: Paging<ApiTrack>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    /// Null for removed tracks
    track: Option<ApiTrack>,
}

impl From<ApiImage> for ImageRef {
    fn from(image: ApiImage) -> Self {
        ImageRef {
            url: image.url,
            width: image.width,
            height: image.height,
        }
    }
}

impl From<ApiArtist> for ArtistCandidate {
    fn from(artist: ApiArtist) -> Self {
        ArtistCandidate {
            id: artist.id,
            name: artist.name,
            popularity: artist.popularity.unwrap_or(0).min(100) as u8,
            images: artist.images.into_iter().map(ImageRef::from).collect(),
            genres: artist.genres.into_iter().collect(),
            external_links: artist.external_urls.into_iter().collect(),
        }
    }
}

impl From<ApiTrack> for Track {
    fn from(track: ApiTrack) -> Self {
        Track {
            id: track.id,
            name: track.name,
            duration_ms: track.duration_ms,
            artists: track
                .artists
                .into_iter()
                .map(|a| TrackArtist { id: a.id, name: a.name })
                .collect(),
            album: track.album.map(|album| AlbumRef {
                id: album.id,
                name: album.name,
                images: album.images.into_iter().map(ImageRef::from).collect(),
                release_date: album.release_date,
            }),
            external_links: track.external_urls.into_iter().collect(),
            preview_url: track.preview_url,
        }
    }
}

/// Extract an entity id from a catalog share URL or URI.
///
/// The id is the path segment following the `kind` segment, e.g.
/// `https://open.spotify.com/track/<id>?si=...` with kind `track`.
/// `spotify:<kind>:<id>` URIs are accepted too. Returns `None` when the
/// pattern does not match. No network access.
pub fn extract_id_from_url(url: &str, kind: &str) -> Option<String> {
    let url = url.trim();
    let kind = kind.trim();
    if url.is_empty() || kind.is_empty() {
        return None;
    }

    let candidate = if let Some(rest) = url.strip_prefix("spotify:") {
        let mut parts = rest.split(':');
        match (parts.next(), parts.next()) {
            (Some(k), Some(id)) if k == kind => Some(id.to_string()),
            _ => None,
        }
    } else {
        let parsed = url::Url::parse(url).or_else(|_| url::Url::parse(&format!("https://{}", url))).ok()?;
        let segments: Vec<&str> = parsed.path_segments()?.collect();
        segments
            .iter()
            .position(|segment| *segment == kind)
            .and_then(|index| segments.get(index + 1))
            .map(|id| id.to_string())
    };

    candidate.filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric()))
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

struct CatalogInner {
    config: CatalogConfig,
    http: Arc<dyn HttpClient>,
    queue: RequestQueue,
    token: Mutex<Option<AccessToken>>,
    artist_searches: TtlCache<Vec<ArtistCandidate>>,
    track_searches: TtlCache<Vec<Track>>,
    artists: TtlCache<Option<ArtistCandidate>>,
    tracks: TtlCache<Option<Track>>,
    playlists: TtlCache<Vec<Track>>,
}

impl CatalogInner {
    /// Return a valid bearer token, requesting a new one if absent or expired
    async fn authenticate(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if let Some(current) = token.as_ref() {
            if Instant::now() < current.expires_at {
                return Ok(current.value.clone());
            }
            info!("Catalog access token expired, refreshing");
        }

        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.config.client_id, self.config.client_secret));
        let authorization = format!("Basic {}", credentials);

        let response = self
            .http
            .post_form_with_headers(
                &self.config.token_url,
                &[("grant_type", "client_credentials")],
                &[("Authorization", authorization.as_str())],
            )
            .await
            .map_err(|e| {
                error!("Failed to request catalog access token: {}", e);
                CatalogError::Auth(format!("Token request failed: {}", e))
            })?;

        if !response.is_success() {
            error!("Token endpoint returned HTTP {}", response.status);
            return Err(CatalogError::Auth(format!("Token endpoint returned HTTP {}", response.status)));
        }

        let parsed: TokenResponse = response
            .json()
            .map_err(|e| CatalogError::Auth(format!("Invalid token response: {}", e)))?;

        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *token = Some(AccessToken {
            value: parsed.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        info!("Obtained catalog access token, valid for {:?}", lifetime);
        Ok(parsed.access_token)
    }

    /// One authenticated GET, mapped to a queue outcome.
    ///
    /// 400/404 mean "not found" and yield `Success(None)`. A rejected token is
    /// dropped and the call retried once with a fresh one.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> TaskOutcome<Option<T>, CatalogError> {
        for attempt in 0..2 {
            let token = match self.authenticate().await {
                Ok(token) => token,
                Err(e) => return TaskOutcome::Failure(e),
            };
            let authorization = format!("Bearer {}", token);

            let response = match self
                .http
                .get_with_headers(url, &[("Authorization", authorization.as_str()), ("Accept", "application/json")])
                .await
            {
                Ok(response) => response,
                Err(e) => return TaskOutcome::Failure(CatalogError::Transport(e.to_string())),
            };

            match response.status {
                200..=299 => {
                    return match response.json::<T>() {
                        Ok(value) => TaskOutcome::Success(Some(value)),
                        Err(e) => TaskOutcome::Failure(CatalogError::Malformed(e.to_string())),
                    };
                }
                400 | 404 => {
                    debug!("Catalog returned HTTP {} for {}, treating as not found", response.status, url);
                    return TaskOutcome::Success(None);
                }
                401 if attempt == 0 => {
                    warn!("Catalog rejected access token, requesting a new one");
                    self.token.lock().await.take();
                }
                401 | 403 => {
                    return TaskOutcome::Failure(CatalogError::Auth(format!(
                        "Catalog rejected credentials (HTTP {})",
                        response.status
                    )));
                }
                429 => {
                    return TaskOutcome::RateLimited {
                        retry_after: response.retry_after.map(Duration::from_secs),
                    };
                }
                status => {
                    let body: String = response.body.chars().take(200).collect();
                    return TaskOutcome::Failure(CatalogError::Transport(format!("HTTP {}: {}", status, body)));
                }
            }
        }

        TaskOutcome::Failure(CatalogError::Auth("Catalog rejected a freshly issued token".to_string()))
    }
}

/// Client for the upstream music catalog.
///
/// Lookups return `Ok(None)` or an empty list when upstream has nothing;
/// errors are reserved for transport and authentication failures. Cloning
/// is cheap and shares caches, token and request queue.
#[derive(Clone)]
pub struct CatalogClient {
    inner: Arc<CatalogInner>,
}

impl CatalogClient {
    /// Create a catalog client. Fails only on invalid configuration.
    pub fn new(config: CatalogConfig, http: Arc<dyn HttpClient>, queue: RequestQueue) -> Result<Self> {
        config.validate()?;
        let ttl = config.cache_ttl;

        info!("Catalog client initialized for {}", config.api_base);
        Ok(CatalogClient {
            inner: Arc::new(CatalogInner {
                config,
                http,
                queue,
                token: Mutex::new(None),
                artist_searches: TtlCache::with_default_ttl("catalog::search_artists", ttl),
                track_searches: TtlCache::with_default_ttl("catalog::search_tracks", ttl),
                artists: TtlCache::with_default_ttl("catalog::artist", ttl),
                tracks: TtlCache::with_default_ttl("catalog::track", ttl),
                playlists: TtlCache::with_default_ttl("catalog::playlist", ttl),
            }),
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.inner.config
    }

    /// Obtain or refresh the bearer token. Idempotent while the token is valid.
    pub async fn authenticate(&self) -> Result<String> {
        self.inner.authenticate().await
    }

    /// Send a GET through the request queue
    async fn queued_get<T>(&self, url: String) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let inner = self.inner.clone();
        self.inner
            .queue
            .enqueue(move || {
                let inner = inner.clone();
                let url = url.clone();
                async move { inner.get_json::<T>(&url).await }
            })
            .await
            .map_err(CatalogError::from)
    }

    fn market_param(&self) -> String {
        match &self.inner.config.market {
            Some(market) => format!("&market={}", urlencoding::encode(market)),
            None => String::new(),
        }
    }

    /// Search upstream artists by name, in upstream relevance order
    pub async fn search_artists(&self, name: &str) -> Result<Vec<ArtistCandidate>> {
        let query = name.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let key = make_key("search_artists", &[query]);
        let ttl = self.inner.config.cache_ttl;
        self.inner
            .artist_searches
            .get_or_insert_with(&key, ttl, || async {
                let url = format!(
                    "{}/search?q={}&type=artist&limit={}{}",
                    self.inner.config.api_base,
                    urlencoding::encode(query),
                    self.inner.config.search_limit,
                    self.market_param()
                );
                debug!("Searching catalog artists for '{}'", query);
                let response: Option<ArtistSearchResponse> = self.queued_get(url).await?;
                Ok::<_, CatalogError>(
                    response
                        .map(|r| r.artists.items.into_iter().map(ArtistCandidate::from).collect())
                        .unwrap_or_default(),
                )
            })
            .await
    }

    /// Search upstream tracks, in upstream relevance order
    pub async fn search_tracks(&self, query: &str) -> Result<Vec<Track>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let key = make_key("search_tracks", &[query]);
        let ttl = self.inner.config.cache_ttl;
        self.inner
            .track_searches
            .get_or_insert_with(&key, ttl, || async {
                let url = format!(
                    "{}/search?q={}&type=track&limit={}{}",
                    self.inner.config.api_base,
                    urlencoding::encode(query),
                    self.inner.config.search_limit,
                    self.market_param()
                );
                let response: Option<TrackSearchResponse> = self.queued_get(url).await?;
                Ok::<_, CatalogError>(
                    response
                        .map(|r| r.tracks.items.into_iter().map(Track::from).collect())
                        .unwrap_or_default(),
                )
            })
            .await
    }

    /// Look up a single artist by upstream id
    pub async fn get_artist_by_id(&self, id: &str) -> Result<Option<ArtistCandidate>> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }

        let key = make_key("artist", &[id]);
        let ttl = self.inner.config.cache_ttl;
        self.inner
            .artists
            .get_or_insert_with(&key, ttl, || async {
                let url = format!("{}/artists/{}", self.inner.config.api_base, urlencoding::encode(id));
                let artist: Option<ApiArtist> = self.queued_get(url).await?;
                Ok::<_, CatalogError>(artist.map(ArtistCandidate::from))
            })
            .await
    }

    /// Look up a single track by upstream id
    pub async fn get_track_by_id(&self, id: &str) -> Result<Option<Track>> {
        let id = id.trim();
        if id.is_empty() {
            return Ok(None);
        }

        let key = make_key("track", &[id]);
        let ttl = self.inner.config.cache_ttl;
        self.inner
            .tracks
            .get_or_insert_with(&key, ttl, || async {
                let mut url = format!("{}/tracks/{}", self.inner.config.api_base, urlencoding::encode(id));
                if let Some(market) = &self.inner.config.market {
                    url.push_str(&format!("?market={}", urlencoding::encode(market)));
                }
                let track: Option<ApiTrack> = self.queued_get(url).await?;
                Ok::<_, CatalogError>(track.map(Track::from))
            })
            .await
    }

    /// All tracks of a playlist, following upstream paging up to the page cap.
    /// An unknown playlist yields an empty list; a page that disappears
    /// halfway is a transport error, so a truncated list is never cached.
    pub async fn get_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<Track>> {
        let playlist_id = playlist_id.trim();
        if playlist_id.is_empty() {
            return Ok(Vec::new());
        }

        let key = make_key("playlist_tracks", &[playlist_id]);
        let ttl = self.inner.config.cache_ttl;
        self.inner
            .playlists
            .get_or_insert_with(&key, ttl, || async {
                let mut tracks = Vec::new();
                let mut next = Some(format!(
                    "{}/playlists/{}/tracks?limit={}{}",
                    self.inner.config.api_base,
                    urlencoding::encode(playlist_id),
                    PLAYLIST_PAGE_SIZE,
                    self.market_param()
                ));
                let mut pages = 0;

                while let Some(url) = next.take() {
                    if pages >= self.inner.config.playlist_page_cap {
                        warn!(
                            "Playlist {} has more than {} pages, stopping at {} tracks",
                            playlist_id,
                            self.inner.config.playlist_page_cap,
                            tracks.len()
                        );
                        break;
                    }
                    pages += 1;

                    let Some(page) = self.queued_get::<Paging<PlaylistItem>>(url).await? else {
                        if pages > 1 {
                            return Err(CatalogError::Transport(format!(
                                "playlist {} page {} vanished while paging",
                                playlist_id, pages
                            )));
                        }
                        debug!("Playlist {} not found", playlist_id);
                        break;
                    };
                    tracks.extend(page.items.into_iter().filter_map(|item| item.track).map(Track::from));
                    next = page.next;
                }

                debug!("Loaded {} tracks from playlist {} in {} pages", tracks.len(), playlist_id, pages);
                Ok::<_, CatalogError>(tracks)
            })
            .await
    }

    /// See [`extract_id_from_url`]
    pub fn extract_id_from_url(url: &str, kind: &str) -> Option<String> {
        extract_id_from_url(url, kind)
    }

    /// Drop every cached upstream result, e.g. after a local catalog write
    pub fn invalidate(&self) {
        self.inner.artist_searches.clear();
        self.inner.track_searches.clear();
        self.inner.artists.clear();
        self.inner.tracks.clear();
        self.inner.playlists.clear();
        info!("Catalog cache cleared");
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }
}
