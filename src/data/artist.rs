use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use serde::{Serialize, Deserialize};

/// An image reference as returned by the upstream catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// An upstream artist record returned by a search or lookup.
///
/// Candidates are transient: they are produced per catalog call and handed
/// straight to the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistCandidate {
    /// Upstream artist id
    pub id: String,
    /// Artist name as spelled upstream
    pub name: String,
    /// Upstream popularity, 0-100
    pub popularity: u8,
    /// Images, largest first
    pub images: Vec<ImageRef>,
    pub genres: BTreeSet<String>,
    /// External links keyed by platform (e.g. "spotify")
    pub external_links: BTreeMap<String, String>,
}

impl ArtistCandidate {
    /// Create a candidate without images, genres or links
    pub fn new(id: &str, name: &str, popularity: u8) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            popularity: popularity.min(100),
            images: Vec::new(),
            genres: BTreeSet::new(),
            external_links: BTreeMap::new(),
        }
    }

    /// Add an image (builder style)
    pub fn with_image(mut self, url: &str) -> Self {
        self.images.push(ImageRef {
            url: url.to_string(),
            width: None,
            height: None,
        });
        self
    }

    pub fn has_image(&self) -> bool {
        !self.images.is_empty()
    }

    /// The first (largest) image, if any
    pub fn primary_image(&self) -> Option<&ImageRef> {
        self.images.first()
    }
}

/// What a credit string is looking for: the local artist credit plus an
/// optional track title used for the track-assisted search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtistQuery {
    pub name: String,
    #[serde(default)]
    pub track_title: Option<String>,
}

impl ArtistQuery {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            track_title: None,
        }
    }

    pub fn with_track(name: &str, track_title: &str) -> Self {
        Self {
            name: name.to_string(),
            track_title: Some(track_title.to_string()),
        }
    }
}

/// Outcome of a single reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "artist", rename_all = "snake_case")]
pub enum Resolution {
    /// A candidate was found and it has at least one image
    FoundWithImage(ArtistCandidate),
    /// A candidate was found but upstream has no image for it
    FoundNoImage(ArtistCandidate),
    /// Nothing usable upstream, or the upstream call failed
    NotFound,
}

impl Resolution {
    pub fn candidate(&self) -> Option<&ArtistCandidate> {
        match self {
            Resolution::FoundWithImage(c) | Resolution::FoundNoImage(c) => Some(c),
            Resolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Resolution::NotFound)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::FoundWithImage(c) => write!(f, "found '{}' ({}) with image", c.name, c.id),
            Resolution::FoundNoImage(c) => write!(f, "found '{}' ({}) without image", c.name, c.id),
            Resolution::NotFound => write!(f, "not found"),
        }
    }
}

/// A resolution bound to the original local credit string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedArtist {
    /// The credit string exactly as the caller passed it
    pub credit: String,
    /// The cleaned name that was searched for
    pub primary_name: String,
    pub resolution: Resolution,
}

impl ResolvedArtist {
    pub fn not_found(credit: &str, primary_name: &str) -> Self {
        Self {
            credit: credit.to_string(),
            primary_name: primary_name.to_string(),
            resolution: Resolution::NotFound,
        }
    }

    /// URL of the upstream image, only for `FoundWithImage`
    pub fn image_url(&self) -> Option<&str> {
        match &self.resolution {
            Resolution::FoundWithImage(c) => c.primary_image().map(|i| i.url.as_str()),
            _ => None,
        }
    }

    /// Upstream image URL, or the caller's fallback artwork (release cover,
    /// placeholder) when upstream has none
    pub fn image_url_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.image_url().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_url_only_for_found_with_image() {
        let with = ResolvedArtist {
            credit: "A".to_string(),
            primary_name: "A".to_string(),
            resolution: Resolution::FoundWithImage(ArtistCandidate::new("1", "A", 10).with_image("http://img/a.jpg")),
        };
        assert_eq!(with.image_url(), Some("http://img/a.jpg"));

        let without = ResolvedArtist {
            credit: "A".to_string(),
            primary_name: "A".to_string(),
            resolution: Resolution::FoundNoImage(ArtistCandidate::new("1", "A", 10)),
        };
        assert_eq!(without.image_url(), None);
        assert_eq!(without.image_url_or("/default.png"), "/default.png");

        let missing = ResolvedArtist::not_found("A feat. B", "A");
        assert!(!missing.resolution.is_found());
        assert_eq!(missing.image_url_or("/cover.jpg"), "/cover.jpg");
    }

    #[test]
    fn test_popularity_is_clamped() {
        let c = ArtistCandidate::new("x", "X", 250);
        assert_eq!(c.popularity, 100);
    }

    #[test]
    fn test_resolution_serialization() {
        let json = serde_json::to_value(Resolution::NotFound).unwrap();
        assert_eq!(json["status"], "not_found");

        let json = serde_json::to_value(Resolution::FoundNoImage(ArtistCandidate::new("id1", "Name", 5))).unwrap();
        assert_eq!(json["status"], "found_no_image");
        assert_eq!(json["artist"]["id"], "id1");
    }
}
