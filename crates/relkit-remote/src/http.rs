use crate::{RemoteConfig, RemoteError, PROTOCOL_VERSION};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use relkit_schema::{BucketName, ObjectKey};
use relkit_store::{ByteStream, ListPage, ObjectHead, ObjectStore, StoreError};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

const CHECKSUM_HEADER: &str = "x-relkit-checksum";
const ACL_HEADER: &str = "x-relkit-acl";

/// Object store served over HTTP.
///
/// Expects a small REST API per bucket:
/// - `GET    /<bucket>?list-type=2&prefix=..&continuation-token=..`: one JSON list page
/// - `GET    /<bucket>/<key>`: object body
/// - `PUT    /<bucket>/<key>`: upload object body
/// - `HEAD   /<bucket>/<key>`: size in `Content-Length`, checksum in `X-Relkit-Checksum`
/// - `DELETE /<bucket>/<key>`: delete, 404 tolerated
/// - `POST   /<bucket>?delete`: batch delete, JSON `{"keys": [..]}`
/// - `PUT    /<bucket>/<key>?acl` with `X-Relkit-Acl: public-read`: grant anonymous read
pub struct HttpObjectStore {
    config: RemoteConfig,
    bucket: BucketName,
    bucket_url: Url,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    keys: Vec<ObjectKey>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    keys: &'a [ObjectKey],
}

fn transport_error(e: &reqwest::Error) -> StoreError {
    if e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

/// `reqwest::Body` wants a `Sync` stream.
struct SyncStream(Mutex<ByteStream>);

impl Stream for SyncStream {
    type Item = Result<Vec<u8>, StoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .0
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .poll_next_unpin(cx)
    }
}

impl HttpObjectStore {
    pub fn new(config: RemoteConfig, bucket: impl Into<BucketName>) -> Result<Self, RemoteError> {
        let bucket = bucket.into();
        let mut bucket_url = Url::parse(&config.url)
            .map_err(|e| RemoteError::UnsupportedEndpoint(format!("{}: {e}", config.url)))?;
        bucket_url
            .path_segments_mut()
            .map_err(|()| RemoteError::UnsupportedEndpoint(config.url.clone()))?
            .pop_if_empty()
            .push(bucket.as_str());

        // idle time is bounded, whole transfers are not
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .user_agent(format!("relkit/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(Self {
            config,
            bucket,
            bucket_url,
            client,
        })
    }

    fn bucket_url(&self) -> Url {
        self.bucket_url.clone()
    }

    /// Bucket URL with one percent-encoded path segment per key segment.
    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        if key
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(StoreError::InvalidKey(key.to_owned()));
        }
        let mut url = self.bucket_url();
        url.path_segments_mut()
            .map_err(|()| StoreError::InvalidKey(key.to_owned()))?
            .extend(key.split('/'));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header("X-Relkit-Protocol", PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        req
    }

    async fn send(&self, req: RequestBuilder, key: &str) -> Result<Response, StoreError> {
        let resp = req.send().await.map_err(|e| transport_error(&e))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::not_found(&self.bucket, key));
        }
        let msg = format!("HTTP {status} for {}/{key}", self.bucket);
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            Err(StoreError::Transient(msg))
        } else {
            Err(StoreError::Backend(msg))
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    fn bucket(&self) -> &BucketName {
        &self.bucket
    }

    async fn list(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let url = self.bucket_url();
        tracing::debug!("GET {url} prefix={prefix}");
        let mut query = vec![("list-type", "2"), ("prefix", prefix)];
        if let Some(token) = continuation_token {
            query.push(("continuation-token", token));
        }
        let req = self.request(Method::GET, url).query(&query);
        let resp = self.send(req, prefix).await?;
        let body = resp.bytes().await.map_err(|e| transport_error(&e))?;
        let page: ListResponse = serde_json::from_slice(&body)?;
        Ok(ListPage {
            keys: page.keys,
            is_truncated: page.is_truncated,
            next_continuation_token: page.next_continuation_token,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.object_url(key)?;
        tracing::debug!("GET {url}");
        let resp = self.send(self.request(Method::GET, url), key).await?;
        let body = resp.bytes().await.map_err(|e| transport_error(&e))?;
        Ok(body.to_vec())
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        tracing::debug!("PUT {url} ({} bytes)", data.len());
        let req = self
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, content_type)
            .body(data);
        self.send(req, key).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        tracing::debug!("DELETE {url}");
        match self.send(self.request(Method::DELETE, url), key).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn delete_batch(&self, keys: &[ObjectKey]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let url = self.bucket_url();
        tracing::debug!("POST {url}?delete ({} keys)", keys.len());
        let body = serde_json::to_vec(&DeleteRequest { keys })?;
        let req = self
            .request(Method::POST, url)
            .query(&[("delete", "")])
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.send(req, "?delete").await?;
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        let url = self.object_url(key)?;
        tracing::debug!("HEAD {url}");
        let resp = match self.send(self.request(Method::HEAD, url.clone()), key).await {
            Ok(resp) => resp,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let headers = resp.headers();
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let size = header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| StoreError::Backend(format!("HEAD {url}: missing Content-Length")))?;
        Ok(Some(ObjectHead {
            size,
            checksum: header(CHECKSUM_HEADER),
            content_type: header(CONTENT_TYPE.as_str()),
        }))
    }

    async fn set_public_read(&self, key: &str) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        tracing::debug!("PUT {url}?acl public-read");
        let req = self
            .request(Method::PUT, url)
            .query(&[("acl", "")])
            .header(ACL_HEADER, "public-read");
        self.send(req, key).await?;
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream, StoreError> {
        let url = self.object_url(key)?;
        tracing::debug!("GET {url} (streaming)");
        let resp = self.send(self.request(Method::GET, url), key).await?;
        Ok(resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| transport_error(&e)))
            .boxed())
    }

    async fn put_stream(
        &self,
        key: &str,
        body: ByteStream,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let url = self.object_url(key)?;
        tracing::debug!("PUT {url} (streaming)");
        let req = self
            .request(Method::PUT, url)
            .header(CONTENT_TYPE, content_type)
            .body(reqwest::Body::wrap_stream(SyncStream(Mutex::new(body))));
        self.send(req, key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use relkit_store::content_checksum;
    use std::collections::{BTreeMap, HashMap};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
    }

    #[derive(Default)]
    struct ServerState {
        objects: BTreeMap<String, Vec<u8>>,
        public: Vec<String>,
        requests: Vec<CapturedRequest>,
    }

    /// Minimal bucket server: one bucket, HTTP/1.1, one request per connection.
    struct MockServer {
        addr: String,
        state: Arc<Mutex<ServerState>>,
        _handle: std::thread::JoinHandle<()>,
    }

    fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
        query
            .split('&')
            .filter_map(|kv| kv.split_once('=').or(Some((kv, ""))))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    fn decode(s: &str) -> String {
        let bytes = s.as_bytes();
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'%' if i + 2 < bytes.len() => {
                    let hex = &s[i + 1..i + 3];
                    out.push(u8::from_str_radix(hex, 16).unwrap());
                    i += 3;
                }
                b'+' => {
                    out.push(b' ');
                    i += 1;
                }
                b => {
                    out.push(b);
                    i += 1;
                }
            }
        }
        String::from_utf8(out).unwrap()
    }

    fn read_body(reader: &mut BufReader<TcpStream>, headers: &HashMap<String, String>) -> Vec<u8> {
        if let Some(len) = headers.get("content-length") {
            let mut body = vec![0u8; len.parse().unwrap_or(0)];
            let _ = reader.read_exact(&mut body);
            return body;
        }
        let chunked = headers
            .get("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        let mut body = Vec::new();
        if !chunked {
            return body;
        }
        loop {
            let mut size_line = String::new();
            if reader.read_line(&mut size_line).is_err() {
                break;
            }
            let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
            let mut chunk = vec![0u8; size + 2];
            if reader.read_exact(&mut chunk).is_err() {
                break;
            }
            if size == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..size]);
        }
        body
    }

    fn respond(stream: &mut TcpStream, status: &str, headers: &[(&str, String)], body: &[u8]) {
        let mut head = format!("HTTP/1.1 {status}\r\nConnection: close\r\n");
        for (k, v) in headers {
            head.push_str(&format!("{k}: {v}\r\n"));
        }
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-length")) {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");
        let _ = stream.write_all(head.as_bytes());
        let _ = stream.write_all(body);
        let _ = stream.flush();
    }

    fn handle(mut stream: TcpStream, state: &Mutex<ServerState>, page_size: usize) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).is_err() {
            return;
        }
        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
        if parts.len() < 2 {
            return;
        }
        let method = parts[0].to_owned();
        let target = parts[1].to_owned();
        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                break;
            }
            if let Some((k, v)) = line.trim().split_once(": ") {
                headers.insert(k.to_lowercase(), v.to_owned());
            }
        }
        let body = read_body(&mut reader, &headers);

        let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
        let mut segments = path.trim_start_matches('/').splitn(2, '/');
        let _bucket = segments.next().unwrap_or_default();
        let key = segments.next().map(decode);

        let mut state = state.lock().unwrap();
        state.requests.push(CapturedRequest {
            method: method.clone(),
            path: target.clone(),
            headers,
        });

        match (method.as_str(), key) {
            ("GET", None) => {
                let prefix = query_param(query, "prefix").map(decode).unwrap_or_default();
                let token = query_param(query, "continuation-token").map(decode);
                let mut keys: Vec<&String> = state
                    .objects
                    .keys()
                    .filter(|k| k.starts_with(&prefix))
                    .filter(|k| token.as_ref().map_or(true, |t| k.as_str() > t.as_str()))
                    .collect();
                let is_truncated = keys.len() > page_size;
                keys.truncate(page_size);
                let next = if is_truncated { keys.last().cloned() } else { None };
                let json = serde_json::json!({
                    "keys": keys,
                    "is_truncated": is_truncated,
                    "next_continuation_token": next,
                });
                respond(&mut stream, "200 OK", &[], json.to_string().as_bytes());
            }
            ("POST", None) => {
                let req: serde_json::Value = serde_json::from_slice(&body).unwrap();
                for key in req["keys"].as_array().unwrap() {
                    state.objects.remove(key.as_str().unwrap());
                }
                respond(&mut stream, "200 OK", &[], b"");
            }
            ("PUT", Some(key)) if query == "acl=" => {
                if state.objects.contains_key(&key) {
                    state.public.push(key);
                    respond(&mut stream, "200 OK", &[], b"");
                } else {
                    respond(&mut stream, "404 Not Found", &[], b"");
                }
            }
            ("PUT", Some(key)) => {
                state.objects.insert(key, body);
                respond(&mut stream, "200 OK", &[], b"");
            }
            ("GET", Some(key)) => match state.objects.get(&key) {
                Some(data) => {
                    let data = data.clone();
                    respond(&mut stream, "200 OK", &[], &data);
                }
                None => respond(&mut stream, "404 Not Found", &[], b""),
            },
            ("HEAD", Some(key)) => match state.objects.get(&key) {
                Some(data) => {
                    let headers = [
                        ("Content-Length", data.len().to_string()),
                        ("X-Relkit-Checksum", content_checksum(data)),
                        ("Content-Type", "application/octet-stream".to_owned()),
                    ];
                    respond(&mut stream, "200 OK", &headers, b"");
                }
                None => respond(&mut stream, "404 Not Found", &[], b""),
            },
            ("DELETE", Some(key)) => {
                if state.objects.remove(&key).is_some() {
                    respond(&mut stream, "200 OK", &[], b"");
                } else {
                    respond(&mut stream, "404 Not Found", &[], b"");
                }
            }
            _ => respond(&mut stream, "405 Method Not Allowed", &[], b""),
        }
    }

    impl MockServer {
        fn start(page_size: usize) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let state = Arc::new(Mutex::new(ServerState::default()));
            let server_state = Arc::clone(&state);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { break };
                    let state = Arc::clone(&server_state);
                    std::thread::spawn(move || handle(stream, &state, page_size));
                }
            });
            MockServer {
                addr,
                state,
                _handle: handle,
            }
        }

        fn requests(&self) -> Vec<CapturedRequest> {
            self.state.lock().unwrap().requests.clone()
        }

        fn object(&self, key: &str) -> Option<Vec<u8>> {
            self.state.lock().unwrap().objects.get(key).cloned()
        }
    }

    fn backend(server: &MockServer) -> HttpObjectStore {
        HttpObjectStore::new(RemoteConfig::new(&server.addr), "builds").unwrap()
    }

    #[tokio::test]
    async fn put_get_and_head() {
        let server = MockServer::start(1000);
        let store = backend(&server);
        store
            .put("objects/img.raw", b"image bytes".to_vec(), "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(store.get("objects/img.raw").await.unwrap(), b"image bytes");

        let head = store.head("objects/img.raw").await.unwrap().unwrap();
        assert_eq!(head.size, 11);
        assert_eq!(head.checksum, Some(content_checksum(b"image bytes")));
        assert!(store.head("objects/absent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let server = MockServer::start(1000);
        let store = backend(&server);
        assert!(store.get("nope").await.unwrap_err().is_not_found());
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn listing_follows_continuation_tokens() {
        let server = MockServer::start(2);
        let store = backend(&server);
        for i in 0..5 {
            store.put(&format!("objects/{i}"), vec![1], "x").await.unwrap();
        }
        store.put("meta/m", vec![1], "x").await.unwrap();

        let keys: Vec<ObjectKey> = relkit_store::list_keys(&store, "objects/")
            .try_collect()
            .await
            .unwrap();
        assert_eq!(keys.len(), 5);
        let lists = server
            .requests()
            .into_iter()
            .filter(|r| r.method == "GET" && r.path.contains("list-type=2"))
            .count();
        assert_eq!(lists, 3);
    }

    #[tokio::test]
    async fn batch_delete_and_public_read() {
        let server = MockServer::start(1000);
        let store = backend(&server);
        for key in ["a", "b", "c"] {
            store.put(key, vec![1], "x").await.unwrap();
        }
        store
            .delete_batch(&[ObjectKey::new("a"), ObjectKey::new("b")])
            .await
            .unwrap();
        assert!(server.object("a").is_none());
        assert!(server.object("c").is_some());

        store.set_public_read("c").await.unwrap();
        assert_eq!(server.state.lock().unwrap().public, vec!["c".to_owned()]);
        assert!(store.set_public_read("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn streaming_roundtrip() {
        let server = MockServer::start(1000);
        let store = backend(&server);
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();
        let body = futures::stream::iter(
            data.chunks(8192)
                .map(|c| Ok(c.to_vec()))
                .collect::<Vec<_>>(),
        )
        .boxed();
        store.put_stream("big", body, "application/octet-stream").await.unwrap();
        assert_eq!(server.object("big").unwrap(), data);

        let chunks: Vec<Vec<u8>> = store.get_stream("big").await.unwrap().try_collect().await.unwrap();
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn auth_and_protocol_headers_are_sent() {
        let server = MockServer::start(1000);
        let store = HttpObjectStore::new(
            RemoteConfig::new(&server.addr).with_token("secret"),
            "builds",
        )
        .unwrap();
        store.put("k", vec![1], "text/yaml").await.unwrap();

        let reqs = server.requests();
        let put = reqs.iter().find(|r| r.method == "PUT").unwrap();
        assert_eq!(put.path, "/builds/k");
        assert_eq!(put.headers.get("authorization").unwrap(), "Bearer secret");
        assert_eq!(put.headers.get("x-relkit-protocol").unwrap(), "1");
        assert_eq!(put.headers.get("content-type").unwrap(), "text/yaml");
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let store = HttpObjectStore::new(RemoteConfig::new(&addr), "builds").unwrap();
        assert!(store.get("k").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn keys_are_percent_encoded_per_segment() {
        let server = MockServer::start(1000);
        let store = backend(&server);
        let key = "objects/gardenlinux 318.9/a#b?c%d.raw";
        store.put(key, b"odd".to_vec(), "text/plain").await.unwrap();
        assert_eq!(server.object(key).unwrap(), b"odd");
        assert_eq!(store.get(key).await.unwrap(), b"odd");

        let reqs = server.requests();
        let put = reqs.iter().find(|r| r.method == "PUT").unwrap();
        assert_eq!(put.path, "/builds/objects/gardenlinux%20318.9/a%23b%3Fc%25d.raw");
    }

    #[tokio::test]
    async fn dot_segments_are_rejected() {
        let server = MockServer::start(1000);
        let store = backend(&server);
        for key in ["../escape", "a/./b", "a//b", "dir/"] {
            assert!(
                matches!(store.get(key).await, Err(StoreError::InvalidKey(_))),
                "{key}"
            );
        }
        assert!(server.requests().is_empty());
    }

    /// Serves one GET whose body arrives in `chunks` pieces, `gap` apart.
    fn trickle_server(chunks: usize, gap: std::time::Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        std::thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else { return };
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                    break;
                }
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: {}\r\n\r\n",
                chunks * 2
            );
            let _ = stream.write_all(head.as_bytes());
            for _ in 0..chunks {
                std::thread::sleep(gap);
                let _ = stream.write_all(b"ab");
                let _ = stream.flush();
            }
        });
        addr
    }

    #[tokio::test]
    async fn slow_transfer_outlives_the_timeout() {
        let addr = trickle_server(3, Duration::from_millis(600));
        let store =
            HttpObjectStore::new(RemoteConfig::new(&addr).with_timeout_secs(1), "builds").unwrap();
        let body: Vec<Vec<u8>> = store
            .get_stream("objects/big.raw")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(body.concat(), b"ababab");
    }

    #[tokio::test]
    async fn stalled_transfer_is_transient() {
        let addr = trickle_server(1, Duration::from_secs(3));
        let store =
            HttpObjectStore::new(RemoteConfig::new(&addr).with_timeout_secs(1), "builds").unwrap();
        assert!(store.get("objects/big.raw").await.unwrap_err().is_transient());
    }
}
