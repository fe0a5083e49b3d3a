/// Artist credit and track title cleaning
///
/// Local credits often name several artists ("Artist A, Artist B",
/// "Artist A feat. Artist B", "DJ X vs DJ Y"). Upstream searches work best
/// with the primary artist alone, so this module splits credits on the usual
/// separators and strips mix suffixes from track titles.

use deunicode::deunicode;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    /// `,` and `&` anywhere; `feat`/`featuring`/`ft`/`vs` as whole words in any
    /// case, optionally with a trailing dot; collaboration `x` only in lower case
    /// so single-letter names like "DJ X" survive.
    static ref CREDIT_SEPARATOR: Regex =
        Regex::new(r",|&|\s+\(?(?:(?i:feat|featuring|ft|vs)\.?|x)\s+").expect("valid credit separator pattern");

    static ref BRACKETED_MIX_SUFFIX: Regex =
        Regex::new(r"(?i)\s*[\(\[][^\(\)\[\]]*\b(?:original mix|remix)\s*[\)\]]\s*$").expect("valid mix suffix pattern");

    static ref DASHED_MIX_SUFFIX: Regex =
        Regex::new(r"(?i)\s+[-–]\s+[^-–]*\b(?:original mix|remix)\s*$").expect("valid mix suffix pattern");

    static ref BARE_MIX_SUFFIX: Regex =
        Regex::new(r"(?i)\s+(?:original mix|remix)\s*$").expect("valid mix suffix pattern");
}

/// Split a credit string into its individual artist names
///
/// # Examples
/// ```
/// use labelmeta::helpers::artistsplitter::split_credit;
///
/// let artists = split_credit("Artist A feat. Artist B & Artist C");
/// assert_eq!(artists, vec!["Artist A", "Artist B", "Artist C"]);
/// ```
pub fn split_credit(credit: &str) -> Vec<String> {
    let result: Vec<String> = CREDIT_SEPARATOR
        .split(credit)
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect();

    debug!("Split credit '{}' into: {:?}", credit, result);
    result
}

/// Check if a credit names more than one artist
pub fn contains_multiple_artists(credit: &str) -> bool {
    split_credit(credit).len() > 1
}

/// The primary artist of a credit: the first non-empty segment, trimmed.
///
/// Idempotent, since the returned segment contains no separator.
///
/// # Examples
/// ```
/// use labelmeta::helpers::artistsplitter::clean_name;
///
/// assert_eq!(clean_name("Artist A, Artist B"), "Artist A");
/// assert_eq!(clean_name("DJ X vs DJ Y"), "DJ X");
/// ```
pub fn clean_name(credit: &str) -> String {
    split_credit(credit)
        .into_iter()
        .next()
        .unwrap_or_else(|| credit.trim().to_string())
}

/// Strip trailing "Original Mix" / "Remix" decorations from a track title.
///
/// Handles "Tears - Original Mix", "Tears (Original Mix)",
/// "Tears (Someone Remix)" and "Tears Remix". A title that would become
/// empty is returned trimmed but otherwise unchanged.
pub fn clean_track_title(title: &str) -> String {
    let mut cleaned = title.trim().to_string();

    loop {
        let before = cleaned.len();
        for pattern in [&*BRACKETED_MIX_SUFFIX, &*DASHED_MIX_SUFFIX, &*BARE_MIX_SUFFIX] {
            let stripped = pattern.replace(&cleaned, "").trim().to_string();
            cleaned = stripped;
        }
        if cleaned.len() == before {
            break;
        }
    }

    if cleaned.is_empty() {
        return title.trim().to_string();
    }

    if cleaned != title.trim() {
        debug!("Cleaned track title '{}' to '{}'", title, cleaned);
    }
    cleaned
}

/// Normalize an artist name for comparison
///
/// Transliterates to ASCII, drops punctuation, lowercases and collapses
/// whitespace, so "Beyoncé" and "beyonce" compare equal.
pub fn normalize_for_comparison(name: &str) -> String {
    let ascii_name = deunicode(name);

    let mut normalized = String::new();
    for c in ascii_name.chars() {
        if c.is_alphanumeric() || c.is_whitespace() {
            normalized.push(c.to_ascii_lowercase());
        }
    }

    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_name_separators() {
        assert_eq!(clean_name("Artist A, Artist B"), "Artist A");
        assert_eq!(clean_name("Artist A feat. Artist B"), "Artist A");
        assert_eq!(clean_name("Artist A Feat Artist B"), "Artist A");
        assert_eq!(clean_name("Artist A ft. Artist B"), "Artist A");
        assert_eq!(clean_name("Artist A featuring Artist B"), "Artist A");
        assert_eq!(clean_name("Artist A (feat. Artist B)"), "Artist A");
        assert_eq!(clean_name("Simon & Garfunkel"), "Simon");
        assert_eq!(clean_name("DJ X vs DJ Y"), "DJ X");
        assert_eq!(clean_name("DJ X VS. DJ Y"), "DJ X");
        assert_eq!(clean_name("Artist A x Artist B"), "Artist A");
    }

    #[test]
    fn test_clean_name_keeps_words_containing_markers() {
        assert_eq!(clean_name("Matrix"), "Matrix");
        assert_eq!(clean_name("Feather Falls"), "Feather Falls");
        assert_eq!(clean_name("Vsauce"), "Vsauce");
        assert_eq!(clean_name("Malcolm X"), "Malcolm X");
        assert_eq!(clean_name("  Nora En Pure  "), "Nora En Pure");
    }

    #[test]
    fn test_clean_name_is_idempotent() {
        for credit in [
            "Artist A, Artist B",
            "Artist A feat. Artist B",
            "DJ X vs DJ Y",
            ", Leading Comma",
            "Nora En Pure",
            "",
        ] {
            let once = clean_name(credit);
            assert_eq!(clean_name(&once), once, "not idempotent for '{}'", credit);
        }
    }

    #[test]
    fn test_clean_name_skips_empty_segments() {
        assert_eq!(clean_name(", Leading Comma"), "Leading Comma");
        assert_eq!(clean_name(""), "");
    }

    #[test]
    fn test_split_credit() {
        assert_eq!(split_credit("A, B & C feat. D"), vec!["A", "B", "C", "D"]);
        assert_eq!(split_credit("Single"), vec!["Single"]);
        assert!(split_credit("  ").is_empty());
        assert!(contains_multiple_artists("A & B"));
        assert!(!contains_multiple_artists("Nora En Pure"));
    }

    #[test]
    fn test_clean_track_title() {
        assert_eq!(clean_track_title("Tears - Original Mix"), "Tears");
        assert_eq!(clean_track_title("Tears (Original Mix)"), "Tears");
        assert_eq!(clean_track_title("Tears [original mix]"), "Tears");
        assert_eq!(clean_track_title("Tears (Someone Remix)"), "Tears");
        assert_eq!(clean_track_title("Tears - Someone Remix"), "Tears");
        assert_eq!(clean_track_title("Tears Remix"), "Tears");
        assert_eq!(clean_track_title("Tears"), "Tears");
        assert_eq!(clean_track_title("Remix"), "Remix");
        assert_eq!(clean_track_title("Tears (Extended)"), "Tears (Extended)");
    }

    #[test]
    fn test_normalize_for_comparison() {
        assert_eq!(normalize_for_comparison("Beyoncé"), "beyonce");
        assert_eq!(normalize_for_comparison("  AC/DC  "), "acdc");
        assert_eq!(normalize_for_comparison("Nora   En Pure"), "nora en pure");
    }
}
