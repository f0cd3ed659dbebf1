//! Folder naming for download destinations.

use std::path::{Path, PathBuf};

use url::Url;

const MAX_SEGMENT_CHARS: usize = 100;
const FALLBACK_SEGMENT: &str = "download";
const UNKNOWN_DOMAIN: &str = "unknown";

/// Makes a single path segment safe for any filesystem.
///
/// Separators become `_`, whitespace runs collapse, anything outside
/// alphanumerics, `-`, `_` and `.` becomes `_`, and the result is capped at
/// 100 chars. Never returns an empty string.
pub fn sanitize_segment(name: &str) -> String {
    let collapsed = name
        .trim()
        .replace(['/', '\\'], "_")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let replaced: String = collapsed
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut segment = replaced.trim_matches('_').to_string();
    if segment.chars().count() > MAX_SEGMENT_CHARS {
        segment = segment
            .chars()
            .take(MAX_SEGMENT_CHARS)
            .collect::<String>()
            .trim_end_matches('_')
            .to_string();
    }

    if segment.is_empty() {
        FALLBACK_SEGMENT.to_string()
    } else {
        segment
    }
}

/// Domain and resource folders for a source URL.
///
/// The domain is the second-to-last hostname label (`www.example.com` →
/// `example`), or the whole hostname when it has no dot, or `unknown`. The
/// resource is the last non-empty path segment, if any.
pub fn derive_subfolders(url: &str) -> (Option<String>, Option<String>) {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return (Some(sanitize_segment(UNKNOWN_DOMAIN)), None),
    };

    let host = parsed.host_str().filter(|h| !h.is_empty()).unwrap_or(UNKNOWN_DOMAIN);
    let labels: Vec<&str> = host.split('.').collect();
    let domain = if labels.len() > 1 {
        labels[labels.len() - 2]
    } else {
        labels[0]
    };

    let resource = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(sanitize_segment);

    (Some(sanitize_segment(domain)), resource)
}

/// Lays out destinations beneath a storage root.
#[derive(Debug, Clone)]
pub struct FolderLayout {
    root: PathBuf,
}

impl FolderLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The base folder for a job: `root/<title or id>`.
    pub fn base_folder(&self, title_or_id: &str) -> PathBuf {
        self.root.join(sanitize_segment(title_or_id))
    }

    /// `root/<title or id>/<domain>/<resource>`, with the last two only
    /// when derivable from `first_url`.
    pub fn destination(&self, title_or_id: &str, first_url: &str) -> PathBuf {
        let mut path = self.base_folder(title_or_id);
        let (domain, resource) = derive_subfolders(first_url);
        if let Some(domain) = domain {
            path.push(domain);
        }
        if let Some(resource) = resource {
            path.push(resource);
        }
        path
    }
}
