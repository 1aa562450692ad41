//! Spaces request and response structures

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A file to upload: body bytes plus the client-side filename
#[derive(Debug, Clone)]
pub struct FileUpload {
    /// Body bytes (cheap to clone)
    pub data: Bytes,
    /// Filename as provided by the caller, e.g. "photo.png"
    pub filename: String,
    /// Content type sent with the PUT (default: application/octet-stream)
    pub content_type: Option<String>,
}

impl FileUpload {
    /// Create a new upload from bytes and a filename
    pub fn new(data: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            filename: filename.into(),
            content_type: None,
        }
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Filename without its extension
    pub fn stem(&self) -> &str {
        match self.filename.rfind('.') {
            Some(pos) if pos > 0 => &self.filename[..pos],
            _ => &self.filename,
        }
    }

    /// Extension, if the filename has one
    pub fn ext(&self) -> Option<&str> {
        match self.filename.rfind('.') {
            Some(pos) if pos > 0 && pos + 1 < self.filename.len() => {
                Some(&self.filename[pos + 1..])
            }
            _ => None,
        }
    }
}

/// Object metadata from a `ListBucketResult` `Contents` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceObject {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp (optional)
    pub last_modified: Option<String>,
    /// ETag (optional)
    pub etag: Option<String>,
}

impl SpaceObject {
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            size,
            last_modified: None,
            etag: None,
        }
    }
}

/// One page of a bucket listing (`ListBucketResult` document)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBucketPage {
    /// Bucket name as reported by the server
    pub name: Option<String>,
    /// Prefix used in the request
    pub prefix: Option<String>,
    /// Marker the page started at
    pub marker: Option<String>,
    /// Max keys requested
    pub max_keys: Option<i32>,
    /// Whether more pages follow
    pub is_truncated: bool,
    /// Marker to resume from, when the server provides one
    pub next_marker: Option<String>,
    /// Objects in this page
    pub contents: Vec<SpaceObject>,
}

impl ListBucketPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker for the next page, or `None` when the listing is complete.
    ///
    /// `requested` is the marker the page was fetched with. S3-compatible
    /// stores only emit `NextMarker` when a delimiter is in play; otherwise
    /// the last key of the page is the marker. A page that claims truncation
    /// but carries no marker at all ends the walk, and a marker equal to the
    /// one the page was requested with ends it too - not every store echoes
    /// `<Marker>` back, so the caller's own marker is the authoritative
    /// comparison and a misbehaving server cannot loop the pagination
    /// forever.
    pub fn advance_marker(&self, requested: Option<&str>) -> Option<String> {
        if !self.is_truncated {
            return None;
        }

        let next = self
            .next_marker
            .clone()
            .or_else(|| self.contents.last().map(|obj| obj.key.clone()))?;

        if requested == Some(next.as_str()) || self.marker.as_deref() == Some(next.as_str()) {
            return None;
        }
        Some(next)
    }

    /// Extract the object keys of this page
    pub fn keys(&self) -> Vec<String> {
        self.contents.iter().map(|obj| obj.key.clone()).collect()
    }
}
