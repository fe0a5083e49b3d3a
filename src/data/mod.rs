// Data structures for the catalog metadata core

pub mod artist;
pub mod track;

pub use artist::{ArtistCandidate, ArtistQuery, ImageRef, Resolution, ResolvedArtist};
pub use track::{AlbumRef, Track, TrackArtist};
