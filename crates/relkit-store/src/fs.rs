//! Filesystem-backed object store.
//!
//! A bucket is a directory: object bodies live under `<root>/<bucket>/objects/<key>`
//! and per-object attributes (content type, public flag) in a JSON sidecar under
//! `<root>/<bucket>/attrs/<key>.json`. Writes are atomic via `NamedTempFile`
//! and a rename in the destination directory.

use crate::objects::{ByteStream, ListPage, ObjectHead, ObjectStore};
use crate::{StoreError, CONTENT_TYPE_OCTET_STREAM};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use relkit_schema::{BucketName, ObjectKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use walkdir::WalkDir;

const DEFAULT_PAGE_SIZE: usize = 1000;
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    bucket: BucketName,
    page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectAttrs {
    content_type: String,
    #[serde(default)]
    public: bool,
}

impl Default for ObjectAttrs {
    fn default() -> Self {
        Self {
            content_type: CONTENT_TYPE_OCTET_STREAM.to_owned(),
            public: false,
        }
    }
}

/// Fsync a directory so a preceding rename into it is durable.
fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    fs::File::open(dir)?.sync_all()
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.contains('\\')
        || key
            .split('/')
            .any(|seg| seg.is_empty() || seg.starts_with('.'));
    if bad {
        return Err(StoreError::InvalidKey(key.to_owned()));
    }
    Ok(())
}

fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidKey(dest.display().to_string()))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

fn read_attrs(path: &Path) -> Result<ObjectAttrs, StoreError> {
    match fs::read(path) {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(ObjectAttrs::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_attrs(path: &Path, attrs: &ObjectAttrs) -> Result<(), StoreError> {
    write_atomic(path, &serde_json::to_vec(attrs)?)
}

/// Body of an open file as a chunked stream.
pub fn file_byte_stream(file: tokio::fs::File) -> ByteStream {
    stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, StoreError>(None);
        }
        buf.truncate(n);
        Ok(Some((buf, file)))
    })
    .boxed()
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<BucketName>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(self.bucket.as_str())
    }

    fn objects_dir(&self) -> PathBuf {
        self.bucket_dir().join("objects")
    }

    fn attrs_dir(&self) -> PathBuf {
        self.bucket_dir().join("attrs")
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.objects_dir().join(key))
    }

    fn attrs_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.attrs_dir().join(format!("{key}.json")))
    }

    fn not_found(&self, key: &str) -> StoreError {
        StoreError::not_found(&self.bucket, key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn bucket(&self) -> &BucketName {
        &self.bucket
    }

    async fn list(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let dir = self.objects_dir();
        let prefix = prefix.to_owned();
        let token = continuation_token.map(str::to_owned);
        let page_size = self.page_size;

        blocking(move || {
            if !dir.exists() {
                return Ok(ListPage::default());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&dir).min_depth(1) {
                let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&dir) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if validate_key(&key).is_err() || !key.starts_with(&prefix) {
                    continue;
                }
                if token.as_deref().is_some_and(|t| key.as_str() <= t) {
                    continue;
                }
                keys.push(key);
            }
            keys.sort();

            let is_truncated = keys.len() > page_size;
            keys.truncate(page_size);
            let next_continuation_token = if is_truncated {
                keys.last().cloned()
            } else {
                None
            };
            Ok(ListPage {
                keys: keys.into_iter().map(ObjectKey::new).collect(),
                is_truncated,
                next_continuation_token,
            })
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        let attrs_path = self.attrs_path(key)?;
        let content_type = content_type.to_owned();
        blocking(move || {
            write_atomic(&path, &data)?;
            let mut attrs = read_attrs(&attrs_path)?;
            attrs.content_type = content_type;
            write_attrs(&attrs_path, &attrs)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        let attrs_path = self.attrs_path(key)?;
        for p in [path, attrs_path] {
            match tokio::fs::remove_file(&p).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        let path = self.object_path(key)?;
        let attrs_path = self.attrs_path(key)?;
        blocking(move || {
            let mut file = match fs::File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            let size = file.metadata()?.len();
            let mut hasher = blake3::Hasher::new();
            std::io::copy(&mut file, &mut hasher)?;
            let attrs = read_attrs(&attrs_path)?;
            Ok(Some(ObjectHead {
                size,
                checksum: Some(format!("blake3:{}", hasher.finalize().to_hex())),
                content_type: Some(attrs.content_type),
            }))
        })
        .await
    }

    async fn set_public_read(&self, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        let attrs_path = self.attrs_path(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(self.not_found(key));
        }
        blocking(move || {
            let mut attrs = read_attrs(&attrs_path)?;
            attrs.public = true;
            write_attrs(&attrs_path, &attrs)
        })
        .await
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream, StoreError> {
        let path = self.object_path(key)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.not_found(key)),
            Err(e) => return Err(e.into()),
        };
        Ok(file_byte_stream(file))
    }

    async fn put_stream(
        &self,
        key: &str,
        mut body: ByteStream,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let path = self.object_path(key)?;
        let attrs_path = self.attrs_path(key)?;
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| StoreError::InvalidKey(key.to_owned()))?;

        tokio::fs::create_dir_all(&dir).await?;
        let staged_in = dir.clone();
        let tmp = blocking(move || Ok(NamedTempFile::new_in(&staged_in)?)).await?;
        let (file, tmp_path) = tmp.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let content_type = content_type.to_owned();
        blocking(move || {
            tmp_path.persist(&path).map_err(|e| StoreError::Io(e.error))?;
            fsync_dir(&dir)?;
            let mut attrs = read_attrs(&attrs_path)?;
            attrs.content_type = content_type;
            write_attrs(&attrs_path, &attrs)
        })
        .await
    }
}
