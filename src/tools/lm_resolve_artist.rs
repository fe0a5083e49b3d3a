use std::path::PathBuf;
use clap::Parser;
use log::{error, info};

use labelmeta::config::AppConfig;
use labelmeta::helpers::catalog::{extract_id_from_url, CatalogClient};
use labelmeta::helpers::http_client::new_http_client;
use labelmeta::helpers::reconciler::Reconciler;
use labelmeta::helpers::request_queue::RequestQueue;
use labelmeta::logging::initialize_logging_with_level_override;
use labelmeta::ArtistQuery;

/// Resolve artist credits against the upstream catalog and print the results as JSON
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Track title used for the track-assisted search (applies to every credit)
    #[clap(short, long)]
    track: Option<String>,

    /// Resolve the artists of every track on a playlist (share URL, URI or id)
    #[clap(short, long)]
    playlist: Option<String>,

    /// Pretty-print the JSON output
    #[clap(long)]
    pretty: bool,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// Artist credits, e.g. "Nora En Pure feat. Someone"
    credits: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    run(Args::parse()).await
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(e.into());
        }
    };
    initialize_logging_with_level_override(&config.logging, args.debug)?;

    let http = new_http_client(config.catalog.http_timeout_secs);
    let queue = RequestQueue::new(config.queue.clone());
    let catalog = CatalogClient::new(config.catalog.clone(), http, queue)?;
    let reconciler = Reconciler::new(catalog.clone());

    let mut queries: Vec<ArtistQuery> = args
        .credits
        .iter()
        .map(|credit| ArtistQuery {
            name: credit.clone(),
            track_title: args.track.clone(),
        })
        .collect();

    if let Some(playlist) = &args.playlist {
        let playlist_id = extract_id_from_url(playlist, "playlist").unwrap_or_else(|| playlist.trim().to_string());
        info!("Loading playlist {}", playlist_id);
        match catalog.get_playlist_tracks(&playlist_id).await {
            Ok(tracks) => {
                info!("Playlist {} has {} tracks", playlist_id, tracks.len());
                queries.extend(tracks.iter().map(|track| ArtistQuery::with_track(&track.artist_credit(), &track.name)));
            }
            Err(e) => {
                error!("Failed to load playlist {}: {}", playlist_id, e);
                return Err(e.into());
            }
        }
    }

    if queries.is_empty() {
        eprintln!("Nothing to resolve: pass artist credits and/or --playlist");
        return Ok(());
    }

    let results = reconciler.reconcile_artists(&queries).await;
    let output = if args.pretty {
        serde_json::to_string_pretty(&results)?
    } else {
        serde_json::to_string(&results)?
    };
    println!("{}", output);

    let stats = catalog.queue_stats();
    info!(
        "Done: {} upstream calls, {} rate limited, {} failed",
        stats.executed, stats.rate_limited, stats.failed
    );

    Ok(())
}
