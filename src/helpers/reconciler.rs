use std::collections::HashMap;
use std::time::Duration;
use futures::future::join_all;
use log::{debug, info, warn};

use crate::data::{ArtistCandidate, ArtistQuery, Resolution, ResolvedArtist};
use crate::helpers::artistsplitter::{clean_name, clean_track_title, contains_multiple_artists, normalize_for_comparison};
use crate::helpers::catalog::{CatalogClient, CatalogError};
use crate::helpers::ttlcache::{make_key, TtlCache};

/// Order candidates for a wanted name.
///
/// Exact case-insensitive name matches come first, then matches after
/// normalization (diacritics, punctuation), then everything else. Within a
/// tier, higher popularity wins; remaining ties keep upstream order.
pub fn rank_candidates(name: &str, mut candidates: Vec<ArtistCandidate>) -> Vec<ArtistCandidate> {
    let wanted = name.trim().to_lowercase();
    let wanted_normalized = normalize_for_comparison(name);

    candidates.sort_by_key(|candidate| {
        let tier = if candidate.name.trim().to_lowercase() == wanted {
            0
        } else if normalize_for_comparison(&candidate.name) == wanted_normalized {
            1
        } else {
            2
        };
        (tier, std::cmp::Reverse(candidate.popularity))
    });
    candidates
}

fn first_with_image(ranked: &[ArtistCandidate]) -> Option<&ArtistCandidate> {
    ranked.iter().find(|candidate| candidate.has_image())
}

/// Key shared by the resolution cache and batch deduplication.
///
/// Case-insensitive only, like the catalog's search keys: punctuation is
/// part of an artist's identity ("AC/DC", "!!!").
fn resolution_key(primary_name: &str, track_title: Option<&str>) -> String {
    make_key("resolution", &[primary_name, track_title.unwrap_or_default()])
}

/// Resolves local artist credits to upstream catalog artists.
///
/// The fallback chain per credit:
/// 1. clean the credit to its primary artist name
/// 2. search that name; the best-ranked candidate with an image wins
/// 3. otherwise, with a track title, search "<name> <cleaned title>" the same way
/// 4. otherwise the best candidate without image, or not found
///
/// Upstream failures are contained per credit and reported as
/// [`Resolution::NotFound`]; they are logged, not cached.
pub struct Reconciler {
    catalog: CatalogClient,
    cache: TtlCache<Resolution>,
}

impl Reconciler {
    /// Create a reconciler caching resolutions as long as the catalog caches responses
    pub fn new(catalog: CatalogClient) -> Self {
        let ttl = catalog.config().cache_ttl;
        Self::with_ttl(catalog, ttl)
    }

    pub fn with_ttl(catalog: CatalogClient, ttl: Duration) -> Self {
        Reconciler {
            catalog,
            cache: TtlCache::with_default_ttl("reconciler", ttl),
        }
    }

    pub fn catalog(&self) -> &CatalogClient {
        &self.catalog
    }

    /// Resolve one credit string, optionally helped by a track title
    pub async fn reconcile_artist(&self, credit: &str, track_title: Option<&str>) -> ResolvedArtist {
        let primary_name = clean_name(credit);
        if primary_name.is_empty() {
            debug!("Empty artist credit, nothing to reconcile");
            return ResolvedArtist::not_found(credit, &primary_name);
        }
        if contains_multiple_artists(credit) {
            debug!("Credit '{}' names several artists, reconciling '{}'", credit, primary_name);
        }

        let title = track_title.map(clean_track_title).filter(|t| !t.is_empty());
        let key = resolution_key(&primary_name, title.as_deref());

        let resolution = match self.cache.get(&key) {
            Some(resolution) => resolution,
            None => match self.resolve(&primary_name, title.as_deref()).await {
                Ok(resolution) => {
                    self.cache.set_default(&key, resolution.clone());
                    resolution
                }
                Err(e) => {
                    warn!("Could not reconcile artist '{}' ('{}'): {}", credit, primary_name, e);
                    Resolution::NotFound
                }
            },
        };

        debug!("Reconciled '{}': {}", credit, resolution);
        ResolvedArtist {
            credit: credit.to_string(),
            primary_name,
            resolution,
        }
    }

    pub async fn reconcile_query(&self, query: &ArtistQuery) -> ResolvedArtist {
        self.reconcile_artist(&query.name, query.track_title.as_deref()).await
    }

    /// Resolve many credits concurrently.
    ///
    /// Credits that clean to the same name and title, ignoring case, are
    /// resolved once. The result has one entry per input, in input order,
    /// each bound to its own credit string. A failing credit never affects
    /// the others.
    pub async fn reconcile_artists(&self, queries: &[ArtistQuery]) -> Vec<ResolvedArtist> {
        let mut distinct: Vec<&ArtistQuery> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        let slots: Vec<usize> = queries
            .iter()
            .map(|query| {
                let title = query.track_title.as_deref().map(clean_track_title);
                let key = resolution_key(&clean_name(&query.name), title.as_deref());
                *seen.entry(key).or_insert_with(|| {
                    distinct.push(query);
                    distinct.len() - 1
                })
            })
            .collect();

        info!("Reconciling {} artist credits ({} distinct)", queries.len(), distinct.len());
        let resolved = join_all(distinct.iter().map(|query| self.reconcile_query(query))).await;

        queries
            .iter()
            .zip(slots)
            .map(|(query, slot)| ResolvedArtist {
                credit: query.name.clone(),
                primary_name: resolved[slot].primary_name.clone(),
                resolution: resolved[slot].resolution.clone(),
            })
            .collect()
    }

    /// Forget all resolutions and cached catalog responses
    pub fn invalidate(&self) {
        self.cache.clear();
        self.catalog.invalidate();
    }

    async fn resolve(&self, primary_name: &str, track_title: Option<&str>) -> Result<Resolution, CatalogError> {
        let primary = rank_candidates(primary_name, self.catalog.search_artists(primary_name).await?);
        if let Some(found) = first_with_image(&primary) {
            return Ok(Resolution::FoundWithImage(found.clone()));
        }

        let Some(title) = track_title else {
            return Ok(primary.into_iter().next().map_or(Resolution::NotFound, Resolution::FoundNoImage));
        };

        debug!("No candidate with image for '{}', searching with track '{}'", primary_name, title);
        let query = format!("{} {}", primary_name, title);
        let assisted = rank_candidates(primary_name, self.catalog.search_artists(&query).await?);
        if let Some(found) = first_with_image(&assisted) {
            return Ok(Resolution::FoundWithImage(found.clone()));
        }

        Ok(primary
            .into_iter()
            .chain(assisted)
            .next()
            .map_or(Resolution::NotFound, Resolution::FoundNoImage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::helpers::catalog::CatalogConfig;
    use crate::helpers::http_client::testing::ScriptedHttp;
    use crate::helpers::http_client::HttpResponse;
    use crate::helpers::request_queue::{QueueConfig, RequestQueue};

    fn artist_json(id: &str, name: &str, popularity: u8, image: bool) -> String {
        let images = if image {
            format!(r#"[{{"url":"http://img/{}.jpg","width":640,"height":640}}]"#, id)
        } else {
            "[]".to_string()
        };
        format!(
            r#"{{"id":"{}","name":"{}","popularity":{},"images":{},"genres":[],"external_urls":{{}}}}"#,
            id, name, popularity, images
        )
    }

    fn search_response(artists: &[String]) -> HttpResponse {
        HttpResponse::new(200, &format!(r#"{{"artists":{{"items":[{}],"next":null}}}}"#, artists.join(",")))
    }

    fn reconciler(http: Arc<ScriptedHttp>) -> Reconciler {
        let queue = RequestQueue::new(QueueConfig {
            inter_task_delay: Duration::ZERO,
            task_timeout: None,
            ..QueueConfig::default()
        });
        let catalog = CatalogClient::new(CatalogConfig::new("id", "secret"), http, queue).unwrap();
        Reconciler::new(catalog)
    }

    #[test]
    fn test_rank_prefers_exact_match_then_popularity() {
        let ranked = rank_candidates(
            "Nora En Pure",
            vec![
                ArtistCandidate::new("1", "Nora", 90),
                ArtistCandidate::new("2", "nora en pure", 40),
                ArtistCandidate::new("3", "Nora En Puré", 70),
                ArtistCandidate::new("4", "Nora Pure", 95),
            ],
        );
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4", "1"]);
    }

    #[test]
    fn test_rank_ties_keep_upstream_order() {
        let ranked = rank_candidates(
            "X",
            vec![ArtistCandidate::new("a", "Y", 50), ArtistCandidate::new("b", "Z", 50)],
        );
        assert_eq!(ranked[0].id, "a");
        assert_eq!(ranked[1].id, "b");
    }

    #[tokio::test]
    async fn test_found_with_image() {
        let http = Arc::new(ScriptedHttp::default().route(
            "q=Nora%20En%20Pure&",
            vec![search_response(&[
                artist_json("low", "Nora En Pure", 10, false),
                artist_json("nep", "Nora En Pure", 80, true),
            ])],
        ));
        let resolved = reconciler(http).reconcile_artist("Nora En Pure", None).await;

        match &resolved.resolution {
            Resolution::FoundWithImage(c) => assert_eq!(c.id, "nep"),
            other => panic!("unexpected resolution: {:?}", other),
        }
        assert_eq!(resolved.image_url(), Some("http://img/nep.jpg"));
    }

    #[tokio::test]
    async fn test_found_without_image() {
        let http = Arc::new(ScriptedHttp::default().route(
            "q=Obscure%20Act&",
            vec![search_response(&[artist_json("oa", "Obscure Act", 3, false)])],
        ));
        let resolved = reconciler(http).reconcile_artist("Obscure Act", None).await;

        assert!(matches!(&resolved.resolution, Resolution::FoundNoImage(c) if c.id == "oa"));
        assert_eq!(resolved.image_url_or("/cover.jpg"), "/cover.jpg");
    }

    #[tokio::test]
    async fn test_not_found_after_every_step() {
        let http = Arc::new(ScriptedHttp::default().route("type=artist", vec![search_response(&[])]));
        let resolved = reconciler(http.clone()).reconcile_artist("Nobody", Some("Silence (Original Mix)")).await;

        assert_eq!(resolved.resolution, Resolution::NotFound);
        let gets = http.gets();
        assert_eq!(gets.len(), 2);
        assert!(gets[1].contains("q=Nobody%20Silence&"));
    }

    #[tokio::test]
    async fn test_track_assisted_search_finds_image() {
        let http = Arc::new(
            ScriptedHttp::default()
                .route("q=Twin&", vec![search_response(&[artist_json("t0", "Twin", 60, false)])])
                .route("q=Twin%20Lights&", vec![search_response(&[artist_json("t1", "Twin", 20, true)])]),
        );
        let resolved = reconciler(http).reconcile_artist("Twin & Other", Some("Lights - Someone Remix")).await;

        assert_eq!(resolved.primary_name, "Twin");
        assert!(matches!(&resolved.resolution, Resolution::FoundWithImage(c) if c.id == "t1"));
    }

    #[tokio::test]
    async fn test_track_search_without_image_keeps_primary_candidate() {
        let http = Arc::new(
            ScriptedHttp::default()
                .route("q=Twin&", vec![search_response(&[artist_json("t0", "Twin", 60, false)])])
                .route("q=Twin%20Lights&", vec![search_response(&[artist_json("t1", "Twin", 20, false)])]),
        );
        let resolved = reconciler(http).reconcile_artist("Twin", Some("Lights")).await;

        assert!(matches!(&resolved.resolution, Resolution::FoundNoImage(c) if c.id == "t0"));
    }

    #[tokio::test]
    async fn test_transport_error_becomes_not_found_and_is_not_cached() {
        let http = Arc::new(ScriptedHttp::default().route(
            "q=Flaky&",
            vec![
                HttpResponse::new(500, "upstream down"),
                search_response(&[artist_json("f", "Flaky", 50, true)]),
            ],
        ));
        let reconciler = reconciler(http);

        let first = reconciler.reconcile_artist("Flaky", None).await;
        assert_eq!(first.resolution, Resolution::NotFound);

        let second = reconciler.reconcile_artist("Flaky", None).await;
        assert!(matches!(second.resolution, Resolution::FoundWithImage(_)));
    }

    #[tokio::test]
    async fn test_batch_dedups_and_keeps_input_order() {
        let http = Arc::new(ScriptedHttp::default().route(
            "q=Nora%20En%20Pure&",
            vec![search_response(&[artist_json("nep", "Nora En Pure", 80, true)])],
        ));
        let reconciler = reconciler(http.clone());

        let results = reconciler
            .reconcile_artists(&[
                ArtistQuery::new("Nora En Pure feat. Someone"),
                ArtistQuery::new("Unknown Person"),
                ArtistQuery::new("nora en pure"),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].credit, "Nora En Pure feat. Someone");
        assert_eq!(results[2].credit, "nora en pure");
        assert!(matches!(results[0].resolution, Resolution::FoundWithImage(_)));
        assert_eq!(results[1].resolution, Resolution::NotFound);
        assert_eq!(results[0].resolution, results[2].resolution);
        // One search per distinct artist
        assert_eq!(http.gets().len(), 2);
    }

    #[tokio::test]
    async fn test_punctuation_names_are_kept_apart() {
        let http = Arc::new(
            ScriptedHttp::default()
                .route("q=%21%21%21&", vec![search_response(&[artist_json("chk", "!!!", 50, true)])])
                .route("q=%2B%2F-&", vec![search_response(&[artist_json("pm", "+/-", 30, true)])])
                .route("q=AC%2FDC&", vec![search_response(&[artist_json("acdc", "AC/DC", 90, true)])])
                .route("q=ACDC&", vec![search_response(&[artist_json("tribute", "ACDC", 5, false)])]),
        );
        let reconciler = reconciler(http.clone());

        let chk = reconciler.reconcile_artist("!!!", None).await;
        let pm = reconciler.reconcile_artist("+/-", None).await;
        assert!(matches!(&chk.resolution, Resolution::FoundWithImage(c) if c.id == "chk"));
        assert!(matches!(&pm.resolution, Resolution::FoundWithImage(c) if c.id == "pm"));

        let results = reconciler
            .reconcile_artists(&[
                ArtistQuery::new("AC/DC"),
                ArtistQuery::new("ACDC"),
                ArtistQuery::new("!!!"),
                ArtistQuery::new("+/-"),
            ])
            .await;
        let ids: Vec<Option<&str>> = results
            .iter()
            .map(|r| r.resolution.candidate().map(|c| c.id.as_str()))
            .collect();
        assert_eq!(ids, vec![Some("acdc"), Some("tribute"), Some("chk"), Some("pm")]);
        // The single calls already cached "!!!" and "+/-"
        assert_eq!(http.gets().len(), 4);
    }

    #[tokio::test]
    async fn test_invalidate_refetches() {
        let http = Arc::new(ScriptedHttp::default().route(
            "q=Nora%20En%20Pure&",
            vec![search_response(&[artist_json("nep", "Nora En Pure", 80, true)])],
        ));
        let reconciler = reconciler(http.clone());

        reconciler.reconcile_artist("Nora En Pure", None).await;
        reconciler.reconcile_artist("Nora En Pure", None).await;
        assert_eq!(http.gets().len(), 1);

        reconciler.invalidate();
        reconciler.reconcile_artist("Nora En Pure", None).await;
        assert_eq!(http.gets().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_credit_is_not_found_without_network() {
        let http = Arc::new(ScriptedHttp::default());
        let resolved = reconciler(http.clone()).reconcile_artist("  ", Some("Tears")).await;
        assert_eq!(resolved.resolution, Resolution::NotFound);
        assert!(http.gets().is_empty());
        assert_eq!(http.token_requests(), 0);
    }
}
