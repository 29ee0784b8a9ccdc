//! Object-storage capability.
//!
//! Pipelines and the service only see [`ObjectStorage`]; the filesystem
//! backend is what the binary wires, the in-memory one backs tests.

mod fs;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use fs::FsStorage;
pub use memory::MemoryStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque upload/download/delete capability keyed by object key.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` and returns the collision-free key it was stored under.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Public address of an object, for collaborators that hand out links.
    fn url_for(&self, key: &str) -> String;
}

/// Builds a unique object key that still ends in the original basename.
pub(crate) fn object_key(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("object");
    format!("{}-{}", uuid::Uuid::new_v4().simple(), base)
}

/// Content type sent along with uploads, by file extension.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "json" => "application/json",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}

/// Lowercase extension with its leading dot (`.xlsx`), or `None` when the
/// basename has no extension.
pub fn file_extension(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            Some(format!(".{}", ext.to_ascii_lowercase()))
        }
        _ => None,
    }
}
