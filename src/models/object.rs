//! Addressing and payload types for files kept in the bucket.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::{fmt, io};

/// Byte stream of an object body as handed out by a backend.
pub type ObjectStream = BoxStream<'static, io::Result<Bytes>>;

/// Canned ACL applied on every write.
pub const PUBLIC_READ_ACL: &str = "public-read";

/// How a `(directory, file name)` pair maps onto bucket and key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyLayout {
    /// Fixed bucket, directory becomes a key prefix: `directory/file`.
    #[default]
    Prefix,
    /// Directory appended to the bucket name: bucket `bucket/directory`, key `file`.
    ///
    /// Only meaningful against path-style endpoints that treat the extra
    /// segment as part of the key.
    LegacyBucketPath,
}

/// Bucket + key pair addressing one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Resolve `file_name` inside `directory` under the given layout.
    ///
    /// The directory is not validated; only surrounding `/` are trimmed.
    pub fn resolve(
        layout: KeyLayout,
        bucket: &str,
        directory: Option<&str>,
        file_name: &str,
    ) -> Self {
        let directory = directory
            .map(|d| d.trim_matches('/'))
            .filter(|d| !d.is_empty());

        match (layout, directory) {
            (_, None) => Self::new(bucket, file_name),
            (KeyLayout::Prefix, Some(dir)) => Self::new(bucket, format!("{}/{}", dir, file_name)),
            (KeyLayout::LegacyBucketPath, Some(dir)) => {
                Self::new(format!("{}/{}", bucket, dir), file_name)
            }
        }
    }

    /// Last `/`-delimited segment of the key; empty for keys ending in `/`.
    pub fn file_name(&self) -> &str {
        file_name_of(&self.key)
    }

    /// Bucket and key as sent on the wire. A `bucket/dir` bucket name is
    /// folded into the key, so both layouts address the same object.
    pub fn canonical(&self) -> (String, String) {
        match self.bucket.split_once('/') {
            Some((bucket, rest)) => {
                let rest = rest.trim_matches('/');
                if rest.is_empty() {
                    (bucket.to_string(), self.key.clone())
                } else {
                    (bucket.to_string(), format!("{}/{}", rest, self.key))
                }
            }
            None => (self.bucket.clone(), self.key.clone()),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Derive a file name from a listed key.
pub fn file_name_of(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Listing prefix for a directory: `dir/`, or the whole bucket when empty.
pub fn directory_prefix(directory: &str) -> String {
    let trimmed = directory.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// An object opened for reading.
pub struct StoredFile {
    pub body: ObjectStream,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl fmt::Debug for StoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredFile")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// One file found while reading a directory.
#[derive(Debug)]
pub struct DirectoryEntry {
    pub file_name: String,
    pub file: StoredFile,
}
