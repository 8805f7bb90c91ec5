use crate::http::HttpObjectStore;
use crate::RemoteError;
use relkit_schema::BucketLocation;
use relkit_store::{FsObjectStore, ObjectStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// HTTP endpoint of a bucket server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Connect timeout and longest silence while reading a response.
    /// Whole transfers are not bounded.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Open the bucket at `location`.
///
/// `file:///srv/buckets` stores the bucket under `/srv/buckets/<bucket_name>`;
/// `http(s)://host/base` talks to a bucket server.
pub fn connect(location: &BucketLocation) -> Result<Arc<dyn ObjectStore>, RemoteError> {
    let endpoint = location.endpoint.trim();
    if let Some(path) = endpoint.strip_prefix("file://") {
        if path.is_empty() {
            return Err(RemoteError::UnsupportedEndpoint(endpoint.to_owned()));
        }
        tracing::debug!("bucket {} on filesystem at {path}", location.bucket_name);
        return Ok(Arc::new(FsObjectStore::new(
            PathBuf::from(path),
            location.bucket_name.clone(),
        )));
    }
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        let mut config = RemoteConfig::new(endpoint);
        if let Some(token) = &location.auth_token {
            config = config.with_token(token);
        }
        tracing::debug!("bucket {} served by {}", location.bucket_name, config.url);
        return Ok(Arc::new(HttpObjectStore::new(
            config,
            location.bucket_name.clone(),
        )?));
    }
    Err(RemoteError::UnsupportedEndpoint(endpoint.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relkit_schema::BucketName;

    fn location(endpoint: &str) -> BucketLocation {
        BucketLocation {
            bucket_name: BucketName::new("builds"),
            endpoint: endpoint.to_owned(),
            auth_token: None,
        }
    }

    #[test]
    fn config_strips_trailing_slash() {
        let config = RemoteConfig::new("https://example.com/");
        assert_eq!(config.url, "https://example.com");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn config_defaults_timeout_on_read() {
        let config: RemoteConfig =
            serde_json::from_str(r#"{"url":"https://store.example.com","auth_token":"t"}"#)
                .unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("t"));
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[tokio::test]
    async fn file_endpoint_opens_filesystem_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = connect(&location(&format!("file://{}", dir.path().display()))).unwrap();
        assert_eq!(store.bucket(), &BucketName::new("builds"));
        store.put("k", b"v".to_vec(), "text/plain").await.unwrap();
        assert!(dir.path().join("builds/objects/k").exists());
    }

    #[test]
    fn http_endpoint_opens_http_bucket() {
        let store = connect(&location("http://127.0.0.1:9/base/")).unwrap();
        assert_eq!(store.bucket().as_str(), "builds");
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        for endpoint in ["s3://builds", "file://", "/plain/path"] {
            assert!(matches!(
                connect(&location(endpoint)),
                Err(RemoteError::UnsupportedEndpoint(_))
            ));
        }
    }
}
