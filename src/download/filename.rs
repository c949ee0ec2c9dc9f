//! File name helpers for download requests and the filesystem sink.

use std::path::{Component, Path, PathBuf};

use url::Url;

use super::constants::{DEFAULT_FILE_NAME, PENDING_SUFFIX};

/// Sanitizes a file name by replacing characters that are invalid on common filesystems.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            // Also handle null and control characters
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Sanitizes a relative subdirectory, keeping nested segments but dropping traversal.
///
/// `"Movies/2024"` stays as is; `"../etc"` becomes `"etc"`; an empty result maps to `""`
/// (the sink root).
pub(crate) fn sanitize_subdirectory(subdirectory: &str) -> PathBuf {
    subdirectory
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(sanitize_filename)
        .collect()
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Default file name for a URL: its last path segment, percent-decoded.
pub(crate) fn default_filename_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return DEFAULT_FILE_NAME.to_string();
    };
    if let Some(mut segments) = parsed.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
        return sanitize_filename(&decoded);
    }
    DEFAULT_FILE_NAME.to_string()
}

/// Path of the pending (not yet finalized) file for a final path.
pub(crate) fn pending_path(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(PENDING_SUFFIX);
    final_path.with_file_name(name)
}

/// Resolves a final path in `dir` that collides with neither a finished file,
/// a pending file, nor a path `is_reserved` reports as taken.
///
/// Appends `_1`, `_2`, ... before the extension on conflict.
pub(crate) fn resolve_unique_path(
    dir: &Path,
    filename: &str,
    is_reserved: impl Fn(&Path) -> bool,
) -> PathBuf {
    let filename = sanitize_filename(filename);
    let is_free =
        |path: &Path| !path.exists() && !pending_path(path).exists() && !is_reserved(path);

    let base_path = dir.join(&filename);
    if is_free(&base_path) {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if is_free(&candidate) {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.mkv"), "file_name.mkv");
        assert_eq!(sanitize_filename("file\\name.mkv"), "file_name.mkv");
        assert_eq!(sanitize_filename("file:name.mkv"), "file_name.mkv");
        assert_eq!(sanitize_filename("file<name>.mkv"), "file_name_.mkv");
        assert_eq!(sanitize_filename("file|name.mkv"), "file_name.mkv");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("   "), "_");
    }

    #[test]
    fn test_sanitize_filename_preserves_valid_chars() {
        assert_eq!(sanitize_filename("Movie (2024).mkv"), "Movie (2024).mkv");
        assert_eq!(sanitize_filename("日本語.mp4"), "日本語.mp4");
    }

    #[test]
    fn test_sanitize_subdirectory_keeps_nesting_and_drops_traversal() {
        assert_eq!(sanitize_subdirectory("Movies/2024"), PathBuf::from("Movies/2024"));
        assert_eq!(sanitize_subdirectory("../../etc"), PathBuf::from("etc"));
        assert_eq!(sanitize_subdirectory("/abs/./path/"), PathBuf::from("abs/path"));
        assert_eq!(sanitize_subdirectory(""), PathBuf::new());
    }

    #[test]
    fn test_default_filename_from_url_uses_decoded_last_segment() {
        assert_eq!(
            default_filename_from_url("https://cdn.example.com/files/My%20Movie.mkv?token=abc"),
            "My Movie.mkv"
        );
    }

    #[test]
    fn test_default_filename_from_url_falls_back() {
        assert_eq!(default_filename_from_url("https://example.com/"), "download");
        assert_eq!(default_filename_from_url("not a url"), "download");
    }

    #[test]
    fn test_pending_path_appends_suffix() {
        assert_eq!(
            pending_path(Path::new("/tmp/Downloads/movie.mkv")),
            PathBuf::from("/tmp/Downloads/movie.mkv.part")
        );
    }

    #[test]
    fn test_resolve_unique_path_no_conflict() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            resolve_unique_path(dir.path(), "movie.mkv", |_| false),
            dir.path().join("movie.mkv")
        );
    }

    #[test]
    fn test_resolve_unique_path_skips_finished_and_pending_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("movie.mkv"), b"done").unwrap();
        std::fs::write(dir.path().join("movie_1.mkv.part"), b"partial").unwrap();

        assert_eq!(
            resolve_unique_path(dir.path(), "movie.mkv", |_| false),
            dir.path().join("movie_2.mkv")
        );
    }

    #[test]
    fn test_resolve_unique_path_skips_reserved_paths() {
        let dir = TempDir::new().unwrap();
        let reserved = dir.path().join("movie.mkv");

        assert_eq!(
            resolve_unique_path(dir.path(), "movie.mkv", |path| path == reserved.as_path()),
            dir.path().join("movie_1.mkv")
        );
    }

    #[test]
    fn test_resolve_unique_path_without_extension() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README"), b"x").unwrap();
        assert_eq!(
            resolve_unique_path(dir.path(), "README", |_| false),
            dir.path().join("README_1")
        );
    }

    #[test]
    fn test_resolve_unique_path_protects_against_traversal() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_unique_path(dir.path(), "../../etc/passwd", |_| false);
        assert!(resolved.starts_with(dir.path()));
        assert_eq!(resolved.parent().unwrap(), dir.path());
    }
}
