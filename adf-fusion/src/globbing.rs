//! Expansion of scan paths: local globs, S3 prefix listings, and plain
//! paths. Results are deduplicated and lexicographically ordered so
//! multi-file scans are deterministic.

use std::collections::BTreeSet;

use adf_core::{Error, RemoteOptions, Result};
use adf_remote::{RangeClient, RemoteUrl};

/// Glob metacharacters recognized in scan paths (`**` is `*` twice over).
pub fn has_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

/// Expand one or more patterns. The `bool` reports whether any input was a
/// pattern: pattern scans prepend `_file_name` even when one file matches.
pub fn expand(patterns: &[String], remote: &RemoteOptions) -> Result<(Vec<String>, bool)> {
    let mut out = BTreeSet::new();
    let mut any_pattern = false;

    for pattern in patterns {
        if !has_glob(pattern) {
            out.insert(pattern.clone());
            continue;
        }
        any_pattern = true;

        if pattern.starts_with("http://") || pattern.starts_with("https://") {
            return Err(Error::Internal(format!(
                "cannot glob over http(s), no listing semantics: {pattern}"
            )));
        }

        if adf_remote::is_remote_path(pattern) {
            for url in expand_remote(pattern, remote)? {
                out.insert(url);
            }
        } else {
            for path in expand_local(pattern)? {
                out.insert(path);
            }
        }
    }

    if out.is_empty() {
        return Err(Error::NoMatchingFiles(patterns.join(", ")));
    }
    Ok((out.into_iter().collect(), any_pattern))
}

fn expand_local(pattern: &str) -> Result<Vec<String>> {
    let entries = glob::glob(pattern)
        .map_err(|e| Error::Internal(format!("bad glob pattern '{pattern}': {e}")))?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::Io(format!("{pattern}: {e}")))?;
        if path.is_file() {
            out.push(path.to_string_lossy().into_owned());
        }
    }
    Ok(out)
}

/// S3/GS listing: list the literal key prefix, then filter against the
/// full pattern.
fn expand_remote(pattern: &str, remote: &RemoteOptions) -> Result<Vec<String>> {
    let url = RemoteUrl::parse(pattern)?;
    let scheme_prefix = &pattern[..pattern.len() - url.key.len()];

    let literal_prefix: String = url
        .key
        .chars()
        .take_while(|c| !matches!(c, '*' | '?' | '['))
        .collect();

    let matcher = glob::Pattern::new(&url.key)
        .map_err(|e| Error::Internal(format!("bad glob pattern '{pattern}': {e}")))?;

    let mut client = RangeClient::new(url.clone(), remote.clone())?;
    let keys = client.list_prefix(&literal_prefix)?;

    Ok(keys
        .into_iter()
        .filter(|k| matcher.matches(k))
        .map(|k| format!("{scheme_prefix}{k}"))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_patterns() {
        assert!(has_glob("data/*.h5ad"));
        assert!(has_glob("data/f?.h5ad"));
        assert!(has_glob("data/**/x.h5ad"));
        assert!(!has_glob("data/file.h5ad"));
    }

    #[test]
    fn single_path_passes_through() {
        let (files, was_pattern) =
            expand(&["/no/such/file.h5ad".to_string()], &RemoteOptions::default()).unwrap();
        assert_eq!(files, vec!["/no/such/file.h5ad"]);
        assert!(!was_pattern);
    }

    #[test]
    fn local_glob_is_sorted_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.h5ad", "a.h5ad", "c.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let pattern = dir.path().join("*.h5ad").to_string_lossy().into_owned();
        let (files, was_pattern) = expand(
            &[pattern.clone(), pattern],
            &RemoteOptions::default(),
        )
        .unwrap();
        assert!(was_pattern);
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.h5ad"));
        assert!(files[1].ends_with("b.h5ad"));
    }

    #[test]
    fn empty_glob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = dir.path().join("*.h5ad").to_string_lossy().into_owned();
        let err = expand(&[pattern], &RemoteOptions::default()).unwrap_err();
        assert!(matches!(err, Error::NoMatchingFiles(_)));
    }

    #[test]
    fn http_glob_is_rejected() {
        let err = expand(
            &["https://example.org/*.h5ad".to_string()],
            &RemoteOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
