//! Content-addressable artifact storage.
//!
//! Blobs are addressed by the tuple `(context, component, area, item, path,
//! filename)`. [`FsBlobStore`] maps that tuple onto a directory tree.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{ExportError, Result};

/// Component name under which this crate stores its artifacts.
pub const EXPORT_COMPONENT: &str = "local_quizattemptexport";
/// Area holding exported attempt PDFs.
pub const EXPORT_AREA: &str = "export";
/// Area holding exported attempt attachments.
pub const ATTACHMENT_AREA: &str = "attemptattachments";

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobAddress {
    pub context_id: i64,
    pub component: String,
    pub area: String,
    pub item_id: i64,
    /// Always starts and ends with `/`.
    pub path: String,
    pub filename: String,
}

impl BlobAddress {
    pub fn new(
        context_id: i64,
        component: impl Into<String>,
        area: impl Into<String>,
        item_id: i64,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            context_id,
            component: component.into(),
            area: area.into(),
            item_id,
            path: "/".to_string(),
            filename: filename.into(),
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        let trimmed = path.trim_matches('/');
        self.path = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", trimmed)
        };
        self
    }

    /// Parses the addressing tuple out of a `.../pluginfile.php/{ctx}/{component}/{area}/.../{item}/{file}` URL.
    ///
    /// Query strings are ignored and the filename is percent-decoded. Returns
    /// `None` for anything that is not a well-formed pluginfile reference.
    pub fn from_pluginfile_url(src: &str) -> Option<Self> {
        let (_, rest) = src.split_once("pluginfile.php/")?;
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        let mut parts: Vec<&str> = rest.split('/').filter(|part| !part.is_empty()).collect();
        if parts.len() < 5 {
            return None;
        }

        let context_id = parts[0].parse().ok()?;
        let component = parts[1].to_string();
        let area = parts[2].to_string();
        let filename = urlencoding::decode(parts.pop()?).ok()?.into_owned();
        let item_id = parts.pop()?.parse().ok()?;

        Some(Self::new(context_id, component, area, item_id, filename))
    }

    fn relative_path(&self) -> Result<PathBuf> {
        let mut path = PathBuf::from(self.context_id.to_string());
        for segment in [self.component.as_str(), self.area.as_str()] {
            push_segment(&mut path, segment)?;
        }
        path.push(self.item_id.to_string());
        for segment in self.path.split('/').filter(|s| !s.is_empty()) {
            push_segment(&mut path, segment)?;
        }
        push_segment(&mut path, &self.filename)?;
        Ok(path)
    }
}

fn push_segment(path: &mut PathBuf, segment: &str) -> Result<()> {
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {
            path.push(segment);
            Ok(())
        }
        _ => Err(ExportError::Store(format!(
            "invalid blob path segment `{}`",
            segment
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    pub address: BlobAddress,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl StoredBlob {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Opaque artifact storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, address: &BlobAddress) -> Result<Option<StoredBlob>>;

    /// Stores `bytes`, replacing any blob at the same address.
    async fn put(&self, address: &BlobAddress, bytes: &[u8]) -> Result<StoredBlob>;

    async fn exists(&self, address: &BlobAddress) -> Result<bool>;

    /// All blobs of one area item, oldest first.
    async fn list_area(
        &self,
        context_id: i64,
        component: &str,
        area: &str,
        item_id: i64,
    ) -> Result<Vec<StoredBlob>>;

    /// First non-empty blob of an area item, if any.
    async fn first_in_area(
        &self,
        context_id: i64,
        component: &str,
        area: &str,
        item_id: i64,
    ) -> Result<Option<StoredBlob>> {
        Ok(self
            .list_area(context_id, component, area, item_id)
            .await?
            .into_iter()
            .find(|blob| !blob.is_empty()))
    }
}

/// Blob store laid out as `{root}/{ctx}/{component}/{area}/{item}{path}{filename}`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn read(&self, address: BlobAddress, path: &Path) -> Result<StoredBlob> {
        let bytes = tokio::fs::read(path).await?;
        let created_at = tokio::fs::metadata(path)
            .await?
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let mime_type = mime_guess::from_path(&address.filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(StoredBlob {
            content_hash: content_hash(&bytes),
            address,
            bytes,
            mime_type,
            created_at,
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, address: &BlobAddress) -> Result<Option<StoredBlob>> {
        let path = self.root.join(address.relative_path()?);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(self.read(address.clone(), &path).await?))
    }

    async fn put(&self, address: &BlobAddress, bytes: &[u8]) -> Result<StoredBlob> {
        let path = self.root.join(address.relative_path()?);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Stored blob");
        self.read(address.clone(), &path).await
    }

    async fn exists(&self, address: &BlobAddress) -> Result<bool> {
        let path = self.root.join(address.relative_path()?);
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn list_area(
        &self,
        context_id: i64,
        component: &str,
        area: &str,
        item_id: i64,
    ) -> Result<Vec<StoredBlob>> {
        let item_root = BlobAddress::new(context_id, component, area, item_id, "x")
            .relative_path()?
            .parent()
            .map(|parent| self.root.join(parent))
            .unwrap_or_else(|| self.root.clone());
        if !tokio::fs::try_exists(&item_root).await? {
            return Ok(Vec::new());
        }

        let mut blobs = Vec::new();
        let mut pending = vec![(item_root, "/".to_string())];
        while let Some((dir, logical)) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().await?.is_dir() {
                    pending.push((entry.path(), format!("{}{}/", logical, name)));
                    continue;
                }
                let address = BlobAddress::new(context_id, component, area, item_id, name)
                    .with_path(&logical);
                blobs.push(self.read(address, &entry.path()).await?);
            }
        }

        blobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.address.filename.cmp(&b.address.filename))
        });
        Ok(blobs)
    }
}
