//! Slash-separated store paths
//!
//! A path such as `rides/r-42/status` addresses a node in the document tree.
//! The first two segments name the *document* (`rides/r-42`); change events
//! are always reported at document granularity.

use crate::{Error, Result};

/// Number of leading segments that identify a document
pub const DOCUMENT_DEPTH: usize = 2;

const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// Split a path into validated segments.
///
/// Leading and trailing slashes are ignored. The empty path addresses the root.
pub fn segments(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                Err(Error::InvalidPath(format!("empty segment in {:?}", path)))
            } else if segment.contains(FORBIDDEN) {
                Err(Error::InvalidPath(format!(
                    "segment {:?} in {:?} contains a forbidden character",
                    segment, path
                )))
            } else {
                Ok(segment)
            }
        })
        .collect()
}

/// Join a parent path and a child key
pub fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Leading segments that bound the change-event scope of a write
pub fn document_scope<'a, 'b>(segments: &'b [&'a str]) -> &'b [&'a str] {
    &segments[..segments.len().min(DOCUMENT_DEPTH)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments() {
        assert_eq!(segments("rides/r1/status").unwrap(), vec!["rides", "r1", "status"]);
        assert_eq!(segments("/risk_score/u1/").unwrap(), vec!["risk_score", "u1"]);
        assert!(segments("").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_segments() {
        assert!(segments("rides//status").is_err());
        assert!(segments("rides/r.1").is_err());
        assert!(segments("users/$uid").is_err());
    }

    #[test]
    fn test_join() {
        assert_eq!(join("user_flags/u1", "k1"), "user_flags/u1/k1");
        assert_eq!(join("", "rides"), "rides");
        assert_eq!(join("rides/", "/r1"), "rides/r1");
    }

    #[test]
    fn test_document_scope() {
        let segs = ["ride_otps", "r1", "attempts"];
        assert_eq!(document_scope(&segs), &["ride_otps", "r1"]);
        let segs = ["rides"];
        assert_eq!(document_scope(&segs), &["rides"]);
    }
}
