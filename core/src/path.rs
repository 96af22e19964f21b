//! Document/collection path validation (SPEC_FULL.md §9 supplement).
//!
//! Not a new feature: the bulk writer's per-path collision and ordering
//! invariants (§3 Batch, §4.6.2) only make sense against a canonical,
//! validated path, and §4.4's query descriptor assumes the same thing.

use crate::error::Error;

/// A validated document path: an even number of non-empty segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

/// A validated collection path: an odd number of non-empty segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectionPath(String);

impl DocumentPath {
    pub fn parse(path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        let segments = validate_segments(&path)?;
        if segments.len() % 2 != 0 {
            return Err(Error::invalid_argument(format!(
                "document path must have an even number of segments: {path}"
            )));
        }
        Ok(DocumentPath(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CollectionPath {
    pub fn parse(path: impl Into<String>) -> Result<Self, Error> {
        let path = path.into();
        let segments = validate_segments(&path)?;
        if segments.len() % 2 != 1 {
            return Err(Error::invalid_argument(format!(
                "collection path must have an odd number of segments: {path}"
            )));
        }
        Ok(CollectionPath(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_segments(path: &str) -> Result<Vec<&str>, Error> {
    if path.is_empty() {
        return Err(Error::invalid_argument("path must not be empty"));
    }
    let segments: Vec<&str> = path.split('/').collect();
    for segment in &segments {
        if segment.is_empty() {
            return Err(Error::invalid_argument(format!(
                "path segments must not be empty: {path}"
            )));
        }
        if *segment == "." || *segment == ".." {
            return Err(Error::invalid_argument(format!(
                "path segment must not be '.' or '..': {path}"
            )));
        }
    }
    Ok(segments)
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
