//! Shared text normalization and comparison utilities
//!
//! Pure functions used by the match engine and the file index. Everything in
//! here is deterministic, allocation-only, and safe to call concurrently.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Bracketed or free-standing suffixes that carry no identity information.
/// Compared case-insensitively against bracket contents and trailing tokens.
static NOISE_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)[\(\[\{]\s*(official\s+(music\s+)?video|official\s+audio|music\s+video|lyric\s+video|lyrics|visualizer|audio|video|live|hd|hq|4k|(\d{4}\s+)?remaster(ed)?(\s+\d{4})?|feat\.?[^\)\]\}]*|ft\.?[^\)\]\}]*)\s*[\)\]\}]",
    )
    .unwrap()
});

/// Any remaining bracketed run, stripped after the known tags above.
static BRACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}").unwrap());

/// Free-standing noise words that appear outside brackets.
static BARE_NOISE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(vevo|official\s+audio|official\s+video)\b").unwrap());

/// Unbracketed version suffixes: " - Remastered 2011", " - Live", etc.
static DASH_NOISE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s+-\s+((\d{4}\s+)?remaster(ed)?(\s+\d{4})?|official\s+(music\s+)?video|official\s+audio|lyric\s+video|live|radio\s+edit|single\s+(version|edit))\s*$",
    )
    .unwrap()
});

/// Platform suffixes commonly glued onto channel-derived artist names.
static ARTIST_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\b(vevo|official|music|topic)\b\s*$").unwrap());

/// Fold common Latin diacritics to their ASCII base character.
fn fold_diacritics(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' => 'a',
            'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' => 'A',
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' => 'e',
            'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ė' => 'E',
            'ì' | 'í' | 'î' | 'ï' | 'ī' => 'i',
            'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' => 'I',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' => 'o',
            'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' => 'O',
            'ù' | 'ú' | 'û' | 'ü' | 'ū' => 'u',
            'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            'ñ' => 'n',
            'Ñ' => 'N',
            'ý' | 'ÿ' => 'y',
            'ß' => 's',
            other => other,
        })
        .collect()
}

/// Normalize a title or artist string for comparison.
///
/// - Lowercase and fold diacritics
/// - Strip well-known noise tags ("(official music video)", "[hd]", "vevo", ...)
/// - Strip remaining bracketed runs (version info)
/// - Drop ASCII punctuation, keeping letters, digits, and spaces
/// - Collapse whitespace
pub fn normalize(input: &str) -> String {
    let folded = fold_diacritics(input).to_lowercase();
    let stripped = DASH_NOISE_RE.replace_all(&folded, " ");
    let stripped = NOISE_TAG_RE.replace_all(&stripped, " ");
    let stripped = BRACKET_RE.replace_all(&stripped, " ");
    let stripped = BARE_NOISE_RE.replace_all(&stripped, " ");

    stripped
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Calculate Levenshtein distance between two strings.
///
/// Two-row rolling computation: O(|a|·|b|) time, O(min(|a|,|b|)) extra memory.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    // Keep the rows sized by the shorter string
    let (longer, shorter) = if a_chars.len() >= b_chars.len() {
        (&a_chars, &b_chars)
    } else {
        (&b_chars, &a_chars)
    };

    if shorter.is_empty() {
        return longer.len();
    }

    let mut prev_row: Vec<usize> = (0..=shorter.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; shorter.len() + 1];

    for (i, lc) in longer.iter().enumerate() {
        curr_row[0] = i + 1;
        for (j, sc) in shorter.iter().enumerate() {
            let cost = if lc == sc { 0 } else { 1 };
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }
        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[shorter.len()]
}

/// Similarity between two already-normalized strings (0.0 to 1.0),
/// based on Levenshtein distance over the longer length.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    let distance = levenshtein_distance(a, b);
    1.0 - (distance as f64 / max_len as f64)
}

/// Token-set Jaccard similarity over whitespace tokens.
fn token_jaccard(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = a.split_whitespace().collect();
    let tokens_b: HashSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    intersection as f64 / union as f64
}

/// Similarity between two track titles.
///
/// Normalizes both sides and reports the larger of edit-distance similarity
/// and token-set overlap, so re-ordered titles still score high.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let na = normalize(a);
    let nb = normalize(b);
    string_similarity(&na, &nb).max(token_jaccard(&na, &nb))
}

/// Similarity between two artist names.
///
/// Strips platform suffixes ("VEVO", "Official", "Music") before comparing.
/// A contains-match in either direction scores at least 0.8 to tolerate
/// channel names like "QueenVEVO" vs "Queen".
pub fn artist_similarity(a: &str, b: &str) -> f64 {
    let na = normalize(&ARTIST_SUFFIX_RE.replace_all(a, ""));
    let nb = normalize(&ARTIST_SUFFIX_RE.replace_all(b, ""));

    let base = string_similarity(&na, &nb).max(token_jaccard(&na, &nb));

    if !na.is_empty() && !nb.is_empty() && (na.contains(&nb) || nb.contains(&na)) {
        return base.max(0.8);
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_noise_tags() {
        assert_eq!(
            normalize("Bohemian Rhapsody (Official Music Video) [HD]"),
            "bohemian rhapsody"
        );
        assert_eq!(normalize("Hello (Remastered 2011)"), "hello");
        assert_eq!(normalize("Take On Me [4K]"), "take on me");
    }

    #[test]
    fn test_normalize_strips_punctuation_and_diacritics() {
        assert_eq!(normalize("Beyoncé - Déjà Vu"), "beyonce deja vu");
        assert_eq!(normalize("  Spaced   Out  "), "spaced out");
        assert_eq!(normalize("AC/DC: T.N.T."), "ac dc t n t");
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("(Official Video)"), "");
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("saturday", "sunday"), 3);
        assert_eq!(levenshtein_distance("", "hello"), 5);
        assert_eq!(levenshtein_distance("hello", ""), 5);
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_string_similarity() {
        assert!((string_similarity("hello", "hello") - 1.0).abs() < 1e-9);
        assert!((string_similarity("hello", "hallo") - 0.8).abs() < 1e-9);
        assert_eq!(string_similarity("", ""), 1.0);
        assert_eq!(string_similarity("abc", ""), 0.0);
    }

    #[test]
    fn test_title_similarity_tolerates_versions() {
        let sim = title_similarity(
            "Bohemian Rhapsody (Official Music Video)",
            "Bohemian Rhapsody - Remastered 2011",
        );
        assert!(sim > 0.8, "got {sim}");
    }

    #[test]
    fn test_title_similarity_token_reorder() {
        let sim = title_similarity("Down Let You Never Gonna", "Never Gonna Let You Down");
        assert!(sim > 0.9, "got {sim}");
    }

    #[test]
    fn test_artist_similarity_vevo_suffix() {
        assert!(artist_similarity("QueenVEVO", "Queen") >= 0.8);
        assert!(artist_similarity("Rick Astley Official", "Rick Astley") > 0.9);
    }

    #[test]
    fn test_artist_similarity_contains() {
        assert!(artist_similarity("Queen feat. David Bowie", "Queen") >= 0.8);
        assert!(artist_similarity("Metallica", "Megadeth") < 0.5);
    }
}
