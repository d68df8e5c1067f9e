//! Watched path patterns
//!
//! `rides/{rideId}` watches every ride document and captures `rideId`.
//! Literal segments past the document (`ride_otps/{rideId}/attempts`) select
//! a field inside it; such a pattern fires only when that field changed.

use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use store_core::path::{self as store_path, DOCUMENT_DEPTH};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Parsed path pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    document: Vec<Segment>,
    field: Vec<String>,
}

impl PathPattern {
    /// Parse a pattern such as `users/{uid}/deviceIds`
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.trim_matches('/').split('/').collect();
        if parts.len() < DOCUMENT_DEPTH || parts.iter().any(|p| p.is_empty()) {
            return Err(Error::InvalidPattern(format!(
                "{:?} must name at least a collection and a document",
                raw
            )));
        }

        let mut document = Vec::with_capacity(DOCUMENT_DEPTH);
        for part in &parts[..DOCUMENT_DEPTH] {
            document.push(Self::parse_segment(raw, part)?);
        }

        let mut field = Vec::new();
        for part in &parts[DOCUMENT_DEPTH..] {
            match Self::parse_segment(raw, part)? {
                Segment::Literal(name) => field.push(name),
                Segment::Param(_) => {
                    return Err(Error::InvalidPattern(format!(
                        "{:?}: captures are only allowed in the document part",
                        raw
                    )))
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            document,
            field,
        })
    }

    fn parse_segment(raw: &str, part: &str) -> Result<Segment> {
        if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            if name.is_empty() {
                return Err(Error::InvalidPattern(format!("{:?}: empty capture", raw)));
            }
            return Ok(Segment::Param(name.to_string()));
        }
        store_path::segments(part)
            .map_err(|e| Error::InvalidPattern(format!("{:?}: {}", raw, e)))?;
        Ok(Segment::Literal(part.to_string()))
    }

    /// Pattern text as registered
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a document path, returning the captured parameters
    pub fn match_document(&self, document_path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = document_path.trim_matches('/').split('/').collect();
        if parts.len() != self.document.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.document.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }

    /// Narrow a document value to the watched field
    pub fn select<'a>(&self, document: Option<&'a Value>) -> Option<&'a Value> {
        self.field
            .iter()
            .try_fold(document?, |value, key| value.get(key.as_str()))
            .filter(|value| !value.is_null())
    }

    /// Full path of the watched node inside `document_path`
    pub fn resolve(&self, document_path: &str) -> String {
        self.field
            .iter()
            .fold(document_path.to_string(), |path, key| store_path::join(&path, key))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
