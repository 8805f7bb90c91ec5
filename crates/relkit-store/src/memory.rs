//! In-memory object store with call counters and fault injection.
//!
//! Used by tests across the workspace and by dry runs that need a scratch
//! bucket. Faults are armed per operation and consumed one per call.

use crate::objects::{content_checksum, ByteStream, ListPage, ObjectHead, ObjectStore};
use crate::StoreError;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use relkit_schema::{BucketName, ObjectKey};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    content_type: String,
    public: bool,
}

#[derive(Debug, Default)]
struct Faults {
    transient_puts: usize,
    transient_stream_puts: usize,
    transient_gets: usize,
    truncated_stream_puts: usize,
    short_get_streams: usize,
}

pub struct MemoryObjectStore {
    bucket: BucketName,
    page_size: usize,
    objects: Mutex<BTreeMap<String, Entry>>,
    faults: Mutex<Faults>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<BucketName>) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: DEFAULT_PAGE_SIZE,
            objects: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Store an object without counting it as a call.
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        lock(&self.objects).insert(
            key.to_owned(),
            Entry {
                data,
                content_type: crate::CONTENT_TYPE_OCTET_STREAM.to_owned(),
                public: false,
            },
        );
    }

    pub fn contents(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).map(|e| e.data.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        lock(&self.objects).get(key).map(|e| e.content_type.clone())
    }

    pub fn is_public(&self, key: &str) -> bool {
        lock(&self.objects).get(key).is_some_and(|e| e.public)
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Number of calls made to one port operation, e.g. `"put"` or `"delete"`.
    pub fn calls(&self, op: &str) -> usize {
        lock(&self.calls).get(op).copied().unwrap_or(0)
    }

    /// The next `n` `put` calls fail with a transient error.
    pub fn fail_next_puts(&self, n: usize) {
        lock(&self.faults).transient_puts = n;
    }

    /// The next `n` `put_stream` calls fail with a transient error after draining the body.
    pub fn fail_next_stream_puts(&self, n: usize) {
        lock(&self.faults).transient_stream_puts = n;
    }

    /// The next `n` `get`/`get_stream` calls fail with a transient error.
    pub fn fail_next_gets(&self, n: usize) {
        lock(&self.faults).transient_gets = n;
    }

    /// The next `n` `put_stream` calls silently drop the last byte.
    pub fn truncate_next_stream_puts(&self, n: usize) {
        lock(&self.faults).truncated_stream_puts = n;
    }

    /// The next `n` `get_stream` bodies end one byte early without an error.
    pub fn shorten_next_get_streams(&self, n: usize) {
        lock(&self.faults).short_get_streams = n;
    }

    fn record(&self, op: &'static str) {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> &mut usize) -> bool {
        let mut faults = lock(&self.faults);
        let counter = pick(&mut faults);
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    fn store(&self, key: &str, data: Vec<u8>, content_type: &str) {
        let mut objects = lock(&self.objects);
        let public = objects.get(key).is_some_and(|e| e.public);
        objects.insert(
            key.to_owned(),
            Entry {
                data,
                content_type: content_type.to_owned(),
                public,
            },
        );
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &BucketName {
        &self.bucket
    }

    async fn list(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        self.record("list");
        let objects = lock(&self.objects);
        let mut matching = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation_token.map_or(true, |t| k.as_str() > t));
        let keys: Vec<ObjectKey> = matching
            .by_ref()
            .take(self.page_size)
            .map(|k| ObjectKey::new(k.clone()))
            .collect();
        let is_truncated = matching.next().is_some();
        let next_continuation_token = if is_truncated {
            keys.last().map(|k| k.to_string())
        } else {
            None
        };
        Ok(ListPage {
            keys,
            is_truncated,
            next_continuation_token,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.record("get");
        if self.take_fault(|f| &mut f.transient_gets) {
            return Err(StoreError::Transient(format!("injected read timeout on {key}")));
        }
        self.contents(key)
            .ok_or_else(|| StoreError::not_found(&self.bucket, key))
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        self.record("put");
        if self.take_fault(|f| &mut f.transient_puts) {
            return Err(StoreError::Transient(format!("injected write timeout on {key}")));
        }
        self.store(key, data, content_type);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.record("delete");
        lock(&self.objects).remove(key);
        Ok(())
    }

    async fn delete_batch(&self, keys: &[ObjectKey]) -> Result<(), StoreError> {
        self.record("delete_batch");
        let mut objects = lock(&self.objects);
        for key in keys {
            objects.remove(key.as_str());
        }
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        self.record("head");
        Ok(lock(&self.objects).get(key).map(|e| ObjectHead {
            size: e.data.len() as u64,
            checksum: Some(content_checksum(&e.data)),
            content_type: Some(e.content_type.clone()),
        }))
    }

    async fn set_public_read(&self, key: &str) -> Result<(), StoreError> {
        self.record("set_public_read");
        match lock(&self.objects).get_mut(key) {
            Some(e) => {
                e.public = true;
                Ok(())
            }
            None => Err(StoreError::not_found(&self.bucket, key)),
        }
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream, StoreError> {
        self.record("get_stream");
        if self.take_fault(|f| &mut f.transient_gets) {
            return Err(StoreError::Transient(format!("injected read timeout on {key}")));
        }
        let mut data = self
            .contents(key)
            .ok_or_else(|| StoreError::not_found(&self.bucket, key))?;
        if self.take_fault(|f| &mut f.short_get_streams) {
            data.pop();
        }
        let chunks: Vec<Result<Vec<u8>, StoreError>> =
            data.chunks(4096).map(|c| Ok(c.to_vec())).collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn put_stream(
        &self,
        key: &str,
        body: ByteStream,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.record("put_stream");
        let chunks: Vec<Vec<u8>> = body.try_collect().await?;
        if self.take_fault(|f| &mut f.transient_stream_puts) {
            return Err(StoreError::Transient(format!(
                "injected incomplete upload of {key}"
            )));
        }
        let mut data = chunks.concat();
        if self.take_fault(|f| &mut f.truncated_stream_puts) {
            data.pop();
        }
        self.store(key, data, content_type);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_head_roundtrip() {
        let store = MemoryObjectStore::new("b");
        store.put("k", b"hello".to_vec(), "text/plain").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"hello");
        let head = store.head("k").await.unwrap().unwrap();
        assert_eq!(head.size, 5);
        assert_eq!(head.checksum.unwrap(), content_checksum(b"hello"));
        assert_eq!(head.content_type.as_deref(), Some("text/plain"));
        assert!(store.head("absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_absent_is_not_found() {
        let store = MemoryObjectStore::new("b");
        assert!(store.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_faults_are_consumed_once() {
        let store = MemoryObjectStore::new("b");
        store.fail_next_puts(1);
        assert!(store
            .put("k", vec![1], "x")
            .await
            .unwrap_err()
            .is_transient());
        store.put("k", vec![1], "x").await.unwrap();
        assert_eq!(store.calls("put"), 2);
    }

    #[tokio::test]
    async fn public_flag_survives_overwrite() {
        let store = MemoryObjectStore::new("b");
        store.insert("k", vec![1]);
        store.set_public_read("k").await.unwrap();
        store.put("k", vec![2], "x").await.unwrap();
        assert!(store.is_public("k"));
        assert!(store.set_public_read("absent").await.is_err());
    }

    #[tokio::test]
    async fn truncating_stream_put_drops_last_byte() {
        let store = MemoryObjectStore::new("b");
        store.insert("src", vec![1, 2, 3]);
        store.truncate_next_stream_puts(1);
        let body = store.get_stream("src").await.unwrap();
        store.put_stream("dst", body, "x").await.unwrap();
        assert_eq!(store.contents("dst").unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn shortened_get_stream_ends_cleanly() {
        let store = MemoryObjectStore::new("b");
        store.insert("src", vec![1, 2, 3]);
        store.shorten_next_get_streams(1);
        let short: Vec<Vec<u8>> = store
            .get_stream("src")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(short.concat(), vec![1, 2]);
        let full: Vec<Vec<u8>> = store
            .get_stream("src")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(full.concat(), vec![1, 2, 3]);
    }
}
