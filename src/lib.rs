/// Catalog artist and track types
pub mod data;

/// Cache, request queue, catalog client and reconciler
pub mod helpers;

/// Configuration file handling
pub mod config;

/// Logger setup
pub mod logging;

pub use data::{ArtistCandidate, ArtistQuery, Resolution, ResolvedArtist, Track};
pub use helpers::{CatalogClient, CatalogConfig, CatalogError, QueueConfig, Reconciler, RequestQueue};
