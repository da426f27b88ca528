//! Filesystem-backed enumerator and copier.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{CollaboratorError, ItemCopier, SourceEnumerator, WorkItem};
use crate::state::SourceDescriptor;

/// Lists regular files under `<root>/<category>/<qualifier>`.
///
/// `item_id` is the path relative to that directory (with `/` separators)
/// and `source_id` is its first component. Files sitting directly in the
/// directory use the qualifier as their source.
pub struct FsSourceEnumerator {
    root: PathBuf,
}

impl FsSourceEnumerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn source_dir(&self, descriptor: &SourceDescriptor) -> Result<PathBuf, CollaboratorError> {
        for part in [&descriptor.category, &descriptor.qualifier] {
            let escapes = Path::new(part)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
            if escapes {
                return Err(CollaboratorError::Permanent(format!(
                    "source path component '{}' must be relative and not contain '..'",
                    part
                )));
            }
        }
        Ok(self
            .root
            .join(&descriptor.category)
            .join(&descriptor.qualifier))
    }
}

#[async_trait]
impl SourceEnumerator for FsSourceEnumerator {
    async fn list(
        &self,
        descriptor: &SourceDescriptor,
    ) -> Result<Vec<WorkItem>, CollaboratorError> {
        let base = self.source_dir(descriptor)?;
        if !tokio::fs::try_exists(&base).await.map_err(io_error)? {
            return Err(CollaboratorError::Permanent(format!(
                "source directory not found: {}",
                base.display()
            )));
        }

        let mut items = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_error)?;
            while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
                let file_type = entry.file_type().await.map_err(io_error)?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    items.push(Self::work_item(&base, &path, &descriptor.qualifier).await?);
                }
            }
        }

        items.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        debug!("Enumerated {} items under {}", items.len(), base.display());
        Ok(items)
    }
}

impl FsSourceEnumerator {
    async fn work_item(
        base: &Path,
        path: &Path,
        qualifier: &str,
    ) -> Result<WorkItem, CollaboratorError> {
        let relative = path.strip_prefix(base).map_err(|e| {
            CollaboratorError::Permanent(format!("{} outside source: {}", path.display(), e))
        })?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        let source_id = if parts.len() > 1 {
            parts[0].clone()
        } else {
            qualifier.to_string()
        };

        Ok(WorkItem {
            item_id: parts.join("/"),
            item_ref: path.display().to_string(),
            content_hash: hash_file(path).await?,
            source_id,
        })
    }
}

async fn hash_file(path: &Path) -> Result<String, CollaboratorError> {
    let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await.map_err(io_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn io_error(e: std::io::Error) -> CollaboratorError {
    match e.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            CollaboratorError::Permanent(e.to_string())
        }
        _ => CollaboratorError::Transient(e.to_string()),
    }
}

/// Copies items into `<staging>/<item_id>`.
pub struct FsItemCopier {
    staging: PathBuf,
}

impl FsItemCopier {
    pub fn new(staging: impl Into<PathBuf>) -> Self {
        Self {
            staging: staging.into(),
        }
    }

    pub fn staged_path(&self, item: &WorkItem) -> PathBuf {
        self.staging.join(&item.item_id)
    }
}

#[async_trait]
impl ItemCopier for FsItemCopier {
    async fn copy(&self, item: &WorkItem) -> Result<(), CollaboratorError> {
        let dest = self.staged_path(item);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let bytes = tokio::fs::copy(&item.item_ref, &dest)
            .await
            .map_err(io_error)?;
        debug!("Copied {} ({} bytes) to {}", item.item_id, bytes, dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_enumerate_nested_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "blobs/incoming/reports/q1.txt", "hello world");
        write(temp.path(), "blobs/incoming/reports/deep/q2.txt", "two");
        write(temp.path(), "blobs/incoming/readme.md", "top");
        write(temp.path(), "blobs/other/skip.txt", "not ours");

        let enumerator = FsSourceEnumerator::new(temp.path());
        let items = enumerator
            .list(&SourceDescriptor::new("blobs", "incoming"))
            .await
            .unwrap();

        let ids: Vec<_> = items.iter().map(|i| i.item_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["readme.md", "reports/deep/q2.txt", "reports/q1.txt"]
        );
        assert_eq!(items[0].source_id, "incoming");
        assert_eq!(items[1].source_id, "reports");
        assert_eq!(
            items[2].content_hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_enumerate_missing_dir_is_permanent() {
        let temp = TempDir::new().unwrap();
        let enumerator = FsSourceEnumerator::new(temp.path());
        let err = enumerator
            .list(&SourceDescriptor::new("blobs", "nope"))
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_enumerate_rejects_parent_traversal() {
        let temp = TempDir::new().unwrap();
        let enumerator = FsSourceEnumerator::new(temp.path());
        let err = enumerator
            .list(&SourceDescriptor::new("blobs", "../etc"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_copy_into_staging() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/a/b.txt", "payload");
        let copier = FsItemCopier::new(temp.path().join("staging"));
        let item = WorkItem {
            item_id: "a/b.txt".to_string(),
            item_ref: temp.path().join("src/a/b.txt").display().to_string(),
            content_hash: String::new(),
            source_id: "a".to_string(),
        };

        copier.copy(&item).await.unwrap();
        let copied = std::fs::read_to_string(copier.staged_path(&item)).unwrap();
        assert_eq!(copied, "payload");
    }

    #[tokio::test]
    async fn test_copy_missing_source_is_permanent() {
        let temp = TempDir::new().unwrap();
        let copier = FsItemCopier::new(temp.path());
        let item = WorkItem {
            item_id: "gone.txt".to_string(),
            item_ref: temp.path().join("gone.txt").display().to_string(),
            content_hash: String::new(),
            source_id: String::new(),
        };
        assert!(matches!(
            copier.copy(&item).await,
            Err(CollaboratorError::Permanent(_))
        ));
    }
}
