//! Output naming: template expansion, filename sanitization, conflict resolution
//!
//! Finalized files land under the configured output directory. Playlist items
//! get a fixed "NN - Artist - Title" shape; everything else goes through the
//! user's naming template, where `/` denotes a subdirectory.

use std::path::{Path, PathBuf};

/// Longest allowed path component after sanitization.
const MAX_COMPONENT_LEN: usize = 200;

/// Tags available for `{token}` expansion in a naming template.
#[derive(Debug, Clone, Default)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub year: Option<i32>,
    pub track: u32,
    pub genre: String,
    pub thumbnail_url: Option<String>,
    pub duration_secs: f64,
}

/// Sanitize a single path component.
///
/// Replaces filesystem-reserved characters and control characters with `_`,
/// collapses runs of replacements, trims trailing dots and whitespace, and
/// caps the component length.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '/' | '\\' | ':' | '"' | '*' | '?' | '<' | '>' | '|' => out.push('_'),
            c if c.is_control() => out.push('_'),
            c => out.push(c),
        }
    }

    // Collapse runs of replacement characters left by adjacent bad chars
    let mut collapsed = String::with_capacity(out.len());
    let mut last_was_sep = false;
    for c in out.chars() {
        if c == '_' {
            if !last_was_sep {
                collapsed.push(c);
            }
            last_was_sep = true;
        } else {
            collapsed.push(c);
            last_was_sep = false;
        }
    }

    let trimmed = collapsed
        .trim()
        .trim_end_matches(['.', ' '])
        .to_string();

    if trimmed.chars().count() > MAX_COMPONENT_LEN {
        trimmed.chars().take(MAX_COMPONENT_LEN).collect()
    } else {
        trimmed
    }
}

/// Expand a naming template against track metadata.
///
/// Recognized tokens: `{artist}`, `{title}`, `{album}`, `{year}`, `{track}`,
/// `{genre}`. Forward slashes in the template separate directories; each
/// expanded component is sanitized independently.
pub fn apply_template(template: &str, meta: &TrackMetadata) -> PathBuf {
    let year = meta.year.map(|y| y.to_string()).unwrap_or_default();
    let track = if meta.track > 0 {
        format!("{:02}", meta.track)
    } else {
        String::new()
    };

    // Token values are sanitized before substitution so a slash inside an
    // artist name cannot introduce a directory level; slashes written in
    // the template itself do.
    let expanded = template
        .replace("{artist}", &sanitize_file_name(&meta.artist))
        .replace("{title}", &sanitize_file_name(&meta.title))
        .replace("{album}", &sanitize_file_name(&meta.album))
        .replace("{year}", &year)
        .replace("{track}", &track)
        .replace("{genre}", &sanitize_file_name(&meta.genre));

    let mut path = PathBuf::new();
    for component in expanded.split('/') {
        let clean = sanitize_file_name(component);
        if !clean.is_empty() {
            path.push(clean);
        }
    }

    if path.as_os_str().is_empty() {
        // Template expanded to nothing usable; fall back to the title
        path.push(sanitize_file_name(&meta.title));
    }

    path
}

/// Build the full output path for a non-playlist item.
pub fn generate_file_path(
    meta: &TrackMetadata,
    template: &str,
    output_dir: &Path,
    extension: &str,
) -> PathBuf {
    let mut relative = apply_template(template, meta);
    let file_name = format!(
        "{}{}",
        relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| sanitize_file_name(&meta.title)),
        extension
    );
    relative.set_file_name(file_name);
    output_dir.join(relative)
}

/// Build the output path for a playlist item: "NN - Artist - Title.ext".
pub fn generate_playlist_file_path(
    meta: &TrackMetadata,
    output_dir: &Path,
    extension: &str,
) -> PathBuf {
    let stem = if meta.artist.is_empty() {
        format!("{:02} - {}", meta.track, meta.title)
    } else {
        format!("{:02} - {} - {}", meta.track, meta.artist, meta.title)
    };
    output_dir.join(format!("{}{}", sanitize_file_name(&stem), extension))
}

/// If `path` already exists, append " (2)", " (3)", ... to the stem until a
/// free name is found.
pub fn resolve_conflict(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    for n in 2.. {
        let candidate = parent.join(format!("{} ({}){}", stem, n, ext));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_reserved_chars() {
        let input = r#"AC/DC: "Back\In\Black" <Live> | HD? * Special*"#;
        let out = sanitize_file_name(input);
        assert!(
            out.chars()
                .all(|c| c.is_ascii_alphanumeric()
                    || matches!(c, ' ' | '_' | '(' | ')' | '-' | '[' | ']')),
            "unexpected chars in {out:?}"
        );
        assert!(!out.contains("__"), "separators not collapsed: {out:?}");
    }

    #[test]
    fn test_sanitize_trims_trailing_dots() {
        assert_eq!(sanitize_file_name("ends with dots..."), "ends with dots");
        assert_eq!(sanitize_file_name("  padded  "), "padded");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_file_name(&long).chars().count(), 200);
    }

    #[test]
    fn test_apply_template_simple() {
        let meta = TrackMetadata {
            title: "Never Gonna Give You Up".into(),
            artist: "Rick Astley".into(),
            ..Default::default()
        };
        let path = apply_template("{artist} - {title}", &meta);
        assert_eq!(
            path,
            PathBuf::from("Rick Astley - Never Gonna Give You Up")
        );
    }

    #[test]
    fn test_apply_template_directories() {
        let meta = TrackMetadata {
            title: "Time".into(),
            artist: "Pink Floyd".into(),
            album: "The Dark Side of the Moon".into(),
            year: Some(1973),
            track: 4,
            ..Default::default()
        };
        let path = apply_template("{year}/{artist}/{album}/{track} - {title}", &meta);
        assert_eq!(
            path,
            PathBuf::from("1973/Pink Floyd/The Dark Side of the Moon/04 - Time")
        );
    }

    #[test]
    fn test_generate_file_path() {
        let meta = TrackMetadata {
            title: "Thunderstruck".into(),
            artist: "AC/DC".into(),
            ..Default::default()
        };
        let path = generate_file_path(&meta, "{artist} - {title}", Path::new("/music"), ".mkv");
        assert_eq!(path, PathBuf::from("/music/AC_DC - Thunderstruck.mkv"));
    }

    #[test]
    fn test_generate_playlist_file_path() {
        let meta = TrackMetadata {
            title: "Breathe".into(),
            artist: "Pink Floyd".into(),
            track: 2,
            ..Default::default()
        };
        let path = generate_playlist_file_path(&meta, Path::new("/music/Chill"), ".mkv");
        assert_eq!(
            path,
            PathBuf::from("/music/Chill/02 - Pink Floyd - Breathe.mkv")
        );
    }

    #[test]
    fn test_resolve_conflict_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mkv");
        assert_eq!(resolve_conflict(&path), path);

        std::fs::write(&path, b"x").unwrap();
        assert_eq!(resolve_conflict(&path), dir.path().join("song (2).mkv"));

        std::fs::write(dir.path().join("song (2).mkv"), b"x").unwrap();
        assert_eq!(resolve_conflict(&path), dir.path().join("song (3).mkv"));
    }
}
