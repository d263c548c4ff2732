//!
//! Thin wrapper around [ObjectStore] which roots every key underneath a configured prefix
//!
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::ObjectStore;
use tracing::log::*;
use url::Url;

use std::sync::Arc;
use std::time::Duration;

use crate::{ArchiveError, ArchiveResult};

/// Keyed blob storage.
///
/// Keys handed to and returned from a [BlobStore] are always relative to its root, so the same
/// partition layout works in a bucket prefix, a temporary directory or memory.
#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
    root: Path,
    signer: Option<Arc<dyn Signer>>,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("store", &self.store.to_string())
            .field("root", &self.root)
            .field("signing", &self.signer.is_some())
            .finish()
    }
}

impl BlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, root: Path) -> Self {
        Self {
            store,
            root,
            signer: None,
        }
    }

    /// Unrooted in-memory store, mostly useful for tests
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), Path::default())
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Build a store from a URL such as `s3://bucket/prefix`, `file:///tmp/reports` or
    /// `memory:///`.
    ///
    /// S3 credentials and region are picked up from the environment.
    pub fn from_url(url: &Url) -> ArchiveResult<Self> {
        match url.scheme() {
            "s3" | "s3a" => {
                let s3 = Arc::new(
                    AmazonS3Builder::from_env()
                        .with_url(url.as_str())
                        .build()
                        .map_err(|e| ArchiveError::Config(format!("{url}: {e}")))?,
                );
                let root = Path::from_url_path(url.path())
                    .map_err(|e| ArchiveError::Config(format!("{url}: {e}")))?;
                Ok(Self::new(s3.clone(), root).with_signer(s3))
            }
            "file" => {
                let dir = url
                    .to_file_path()
                    .map_err(|_| ArchiveError::Config(format!("{url} is not a local path")))?;
                std::fs::create_dir_all(&dir)
                    .map_err(|e| ArchiveError::Config(format!("{}: {e}", dir.display())))?;
                let local = LocalFileSystem::new_with_prefix(&dir)
                    .map_err(|e| ArchiveError::Config(format!("{}: {e}", dir.display())))?;
                Ok(Self::new(Arc::new(local), Path::default()))
            }
            "memory" => {
                let root = Path::from_url_path(url.path())
                    .map_err(|e| ArchiveError::Config(format!("{url}: {e}")))?;
                Ok(Self::new(Arc::new(InMemory::new()), root))
            }
            scheme => Err(ArchiveError::Config(format!(
                "unsupported storage scheme `{scheme}` in {url}"
            ))),
        }
    }

    /// Absolute location of a relative key
    pub fn location(&self, relative: &str) -> object_store::Result<Path> {
        let relative = relative.trim_start_matches('/');
        let full = if self.root.as_ref().is_empty() {
            relative.to_string()
        } else {
            format!("{}/{relative}", self.root)
        };
        Path::parse(full).map_err(|source| object_store::Error::InvalidPath { source })
    }

    /// Key of `location` relative to the root, [None] if it lies outside the root
    pub fn relative(&self, location: &Path) -> Option<String> {
        location.prefix_match(&self.root).map(|parts| {
            parts
                .map(|part| part.as_ref().to_string())
                .collect::<Vec<_>>()
                .join("/")
        })
    }

    pub async fn put(&self, relative: &str, body: Bytes) -> object_store::Result<()> {
        let location = self.location(relative)?;
        debug!("Writing {} bytes to {location}", body.len());
        self.store.put(&location, body.into()).await?;
        Ok(())
    }

    pub async fn get(&self, relative: &str) -> object_store::Result<Bytes> {
        let location = self.location(relative)?;
        self.store.get(&location).await?.bytes().await
    }

    pub async fn delete(&self, relative: &str) -> object_store::Result<()> {
        let location = self.location(relative)?;
        debug!("Deleting {location}");
        self.store.delete(&location).await
    }

    /// Every relative key underneath `prefix`, sorted
    pub async fn list(&self, prefix: &str) -> object_store::Result<Vec<String>> {
        let prefix = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.location(prefix)?
        };

        let mut keys = vec![];
        let mut listing = self.store.list(Some(&prefix));
        while let Some(meta) = listing.next().await {
            let meta = meta?;
            if let Some(key) = self.relative(&meta.location) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// A presigned GET URL for `relative`, [None] when the backing store can't sign
    pub async fn signed_url(
        &self,
        relative: &str,
        expires_in: Duration,
    ) -> object_store::Result<Option<Url>> {
        let Some(signer) = &self.signer else {
            return Ok(None);
        };
        let location = self.location(relative)?;
        let url = signer
            .signed_url(http::Method::GET, &location, expires_in)
            .await?;
        Ok(Some(url))
    }
}
