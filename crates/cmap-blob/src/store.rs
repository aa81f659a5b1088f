use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use cmap_cache::CacheService;
use cmap_store::BlobRef;
use cmap_types::{InternalId, ObjectType};

use crate::digest::{blob_digest, BlobDigest};
use crate::error::{BlobError, BlobResult};

/// Owner of one blob file: an attribute value position of an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobTarget {
    pub obj_type: ObjectType,
    pub internal_id: InternalId,
    pub attribute: String,
    pub sort_order: i32,
}

impl BlobTarget {
    pub fn new(
        obj_type: ObjectType,
        internal_id: InternalId,
        attribute: impl Into<String>,
        sort_order: i32,
    ) -> Self {
        Self {
            obj_type,
            internal_id,
            attribute: attribute.into(),
            sort_order,
        }
    }

    fn file_name(&self, digest: &BlobDigest) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            digest.prefix(),
            self.obj_type,
            self.internal_id,
            self.attribute,
            self.sort_order
        )
    }
}

/// Content-addressed blob files under a base directory.
pub struct BlobStore {
    base: PathBuf,
    cache: Arc<CacheService>,
    pending: Mutex<Vec<BlobRef>>,
}

impl BlobStore {
    /// A store rooted at `base`, sharing the file cache of `cache`.
    pub fn new(base: impl Into<PathBuf>, cache: Arc<CacheService>) -> Self {
        Self {
            base: base.into(),
            cache,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Root directory of all blob files.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Absolute path of a stored blob.
    pub fn path(&self, blob: &BlobRef) -> BlobResult<PathBuf> {
        let relative = Path::new(&blob.path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BlobError::InvalidPath(blob.path.clone()));
        }
        Ok(self.base.join(relative))
    }

    /// Store bytes for a target, reusing an existing file with the same
    /// digest and length when there is one.
    pub fn write(&self, data: &[u8], target: &BlobTarget) -> BlobResult<BlobRef> {
        let digest = BlobDigest::of(data);
        let (a, b) = digest.fan_out();
        let relative_dir = Path::new(a).join(b);
        let dir = self.base.join(&relative_dir);
        let name = target.file_name(&digest);
        let path = dir.join(&name);

        fs::create_dir_all(&dir).map_err(BlobError::io(&dir))?;

        if path.exists() {
            debug!(path = %path.display(), "blob already present");
        } else if let Some(existing) = self.find_reusable(&dir, &digest)? {
            if let Err(e) = fs::hard_link(&existing, &path) {
                debug!(error = %e, from = %existing.display(), "hard link failed, copying");
                fs::copy(&existing, &path).map_err(BlobError::io(&path))?;
            }
            debug!(path = %path.display(), "blob deduplicated");
        } else {
            fs::write(&path, data).map_err(BlobError::io(&path))?;
            debug!(path = %path.display(), length = digest.length(), "blob written");
        }
        self.cache.put_file(&dir, &digest.prefix(), path);

        Ok(BlobRef {
            digest: digest.hex().to_string(),
            length: digest.length(),
            path: relative_dir.join(name).to_string_lossy().into_owned(),
        })
    }

    /// Find any file in `dir` holding content with this digest and length.
    fn find_reusable(&self, dir: &Path, digest: &BlobDigest) -> BlobResult<Option<PathBuf>> {
        let prefix = digest.prefix();
        if let Some(cached) = self.cache.file(dir, &prefix) {
            if cached.exists() {
                return Ok(Some(cached));
            }
            self.cache.invalidate_file(dir, &prefix);
        }

        let wanted = format!("{prefix}.");
        for entry in fs::read_dir(dir).map_err(BlobError::io(dir))? {
            let entry = entry.map_err(BlobError::io(dir))?;
            if entry.file_name().to_string_lossy().starts_with(&wanted) {
                let found = entry.path();
                self.cache.put_file(dir, &prefix, found.clone());
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Read and verify a blob.
    pub fn read(&self, blob: &BlobRef) -> BlobResult<Vec<u8>> {
        let path = self.path(blob)?;
        let data = fs::read(&path).map_err(BlobError::io(&path))?;
        if data.len() as u64 != blob.length {
            return Err(BlobError::LengthMismatch {
                path,
                expected: blob.length,
                actual: data.len() as u64,
            });
        }
        let actual = blob_digest(&data);
        if actual != blob.digest {
            return Err(BlobError::DigestMismatch {
                path,
                expected: blob.digest.clone(),
                actual,
            });
        }
        Ok(data)
    }

    /// Mark a blob for removal once the current write commits.
    pub fn schedule_removal(&self, blob: BlobRef) -> BlobResult<()> {
        self.pending.lock().map_err(|_| BlobError::Poisoned)?.push(blob);
        Ok(())
    }

    /// Number of removals waiting for the next commit.
    pub fn pending_removals(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Forget scheduled removals after a failed write.
    pub fn discard_removals(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    /// Remove every scheduled blob. Best effort: failures are logged and
    /// skipped. Returns the number of files removed.
    pub fn commit_removals(&self) -> usize {
        let pending = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => {
                warn!("pending blob removals lost to poisoned lock");
                return 0;
            }
        };

        let mut removed = 0;
        for blob in pending {
            let path = match self.path(&blob) {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "skipping blob removal");
                    continue;
                }
            };
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "blob removal failed");
                    continue;
                }
            }
            if let Some(dir) = path.parent() {
                let prefix = format!("{}.{}", blob.digest, blob.length);
                if self.cache.file(dir, &prefix).as_deref() == Some(path.as_path()) {
                    self.cache.invalidate_file(dir, &prefix);
                }
            }
        }
        if removed > 0 {
            debug!(removed, "blob removals committed");
        }
        removed
    }
}
