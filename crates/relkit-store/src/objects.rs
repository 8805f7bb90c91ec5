use crate::StoreError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use relkit_schema::{BucketName, ObjectKey};

pub const CONTENT_TYPE_YAML: &str = "text/yaml";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// Chunks of an object body.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, StoreError>>;

/// One page of a prefix listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<ObjectKey>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub size: u64,
    /// Strong content hash (`blake3:<hex>`) when the backend can provide one.
    pub checksum: Option<String>,
    pub content_type: Option<String>,
}

/// Checksum format shared by every backend, so heads compare across stores.
pub fn content_checksum(data: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(data).to_hex())
}

/// A bucket of a key/value blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &BucketName;

    /// One page of keys under `prefix`, starting after `continuation_token`.
    async fn list(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    /// Whole object body; `StoreError::NotFound` when absent.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn delete_batch(&self, keys: &[ObjectKey]) -> Result<(), StoreError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Size and checksum, `None` when absent.
    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError>;

    /// Grant anonymous read access to one object.
    async fn set_public_read(&self, key: &str) -> Result<(), StoreError>;

    async fn get_stream(&self, key: &str) -> Result<ByteStream, StoreError> {
        let data = self.get(key).await?;
        Ok(stream::once(async move { Ok::<_, StoreError>(data) }).boxed())
    }

    async fn put_stream(
        &self,
        key: &str,
        body: ByteStream,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let chunks: Vec<Vec<u8>> = body.try_collect().await?;
        self.put(key, chunks.concat(), content_type).await
    }
}

/// Every page under `prefix`, following continuation tokens until the listing ends.
pub fn list_pages<'a>(
    store: &'a dyn ObjectStore,
    prefix: &'a str,
) -> BoxStream<'a, Result<ListPage, StoreError>> {
    stream::try_unfold(Some(None::<String>), move |state| async move {
        let Some(token) = state else {
            return Ok::<_, StoreError>(None);
        };
        let page = store.list(prefix, token.as_deref()).await?;
        let next = match (page.is_truncated, &page.next_continuation_token) {
            (true, Some(t)) => Some(Some(t.clone())),
            _ => None,
        };
        Ok(Some((page, next)))
    })
    .boxed()
}

/// Every key under `prefix`, lazily paginated.
pub fn list_keys<'a>(
    store: &'a dyn ObjectStore,
    prefix: &'a str,
) -> BoxStream<'a, Result<ObjectKey, StoreError>> {
    list_pages(store, prefix)
        .map_ok(|page| stream::iter(page.keys.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryObjectStore;

    #[test]
    fn checksum_is_prefixed_blake3() {
        let c = content_checksum(b"abc");
        assert!(c.starts_with("blake3:"));
        assert_eq!(c.len(), "blake3:".len() + 64);
    }

    #[tokio::test]
    async fn list_keys_follows_continuation_tokens() {
        let store = MemoryObjectStore::new("b").with_page_size(2);
        for i in 0..5 {
            store.insert(&format!("objects/{i}"), b"x".to_vec());
        }
        store.insert("meta/other", b"y".to_vec());

        let keys: Vec<ObjectKey> = list_keys(&store, "objects/").try_collect().await.unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(store.calls("list"), 3);

        let pages: Vec<ListPage> = list_pages(&store, "objects/").try_collect().await.unwrap();
        assert_eq!(pages.len(), 3);
        assert!(!pages[2].is_truncated);
    }

    #[tokio::test]
    async fn default_stream_impls_roundtrip() {
        let store = MemoryObjectStore::new("b");
        let body = stream::iter(vec![Ok(b"ab".to_vec()), Ok(b"cd".to_vec())]).boxed();
        store
            .put_stream("k", body, CONTENT_TYPE_OCTET_STREAM)
            .await
            .unwrap();
        let chunks: Vec<Vec<u8>> = store.get_stream("k").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"abcd");
    }

    #[tokio::test]
    async fn default_delete_batch_deletes_each_key() {
        let store = MemoryObjectStore::new("b");
        store.insert("a", vec![1]);
        store.insert("b", vec![2]);
        store
            .delete_batch(&[ObjectKey::new("a"), ObjectKey::new("b")])
            .await
            .unwrap();
        assert!(store.keys().is_empty());
    }
}
