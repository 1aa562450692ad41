//! Spaces client: sign, send, reshape
//!
//! Every operation is one signed HTTP round trip. There is deliberately no
//! retry or backoff layer here: a non-2xx reply surfaces as
//! `SpacesError::ErrorResponse` with the upstream status code, and callers
//! decide what to do with it.

use crate::config::SpacesConfig;
use crate::spaces::signer::RequestSigner;
use crate::spaces::types::{FileUpload, ListBucketPage, SpaceObject};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::time::Duration;
use thiserror::Error;

/// Spaces client errors
#[derive(Error, Debug)]
pub enum SpacesError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Spaces error: {status} - {message}")]
    ErrorResponse { status: StatusCode, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl From<quick_xml::Error> for SpacesError {
    fn from(err: quick_xml::Error) -> Self {
        SpacesError::XmlParse(format!("XML parse error: {}", err))
    }
}

impl From<hyper_util::client::legacy::Error> for SpacesError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        SpacesError::InvalidResponse(format!("Client error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SpacesError>;

/// DigitalOcean Spaces client
///
/// Clone is cheap - the underlying HTTP client uses Arc internally, so
/// clones share the same connection pool.
#[derive(Clone)]
pub struct SpacesClient {
    /// Hyper HTTP client with a shared connection pool
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    /// SigV4 signer (with daily signing key cache)
    signer: RequestSigner,
    /// Space endpoint, no trailing slash
    endpoint: String,
    /// Request timeout
    timeout: Duration,
}

impl SpacesClient {
    /// Create a new client from a configuration
    pub fn new(config: SpacesConfig) -> Self {
        let insecure_tls = std::env::var("DOSPACES_INSECURE_TLS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            tracing::warn!("INSECURE TLS MODE ENABLED: Certificate verification is disabled!");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .expect("Failed to build TLS connector")
        } else {
            TlsConnector::new().expect("Failed to build TLS connector")
        };

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(32)
            .set_host(true)
            .build(https);

        let signer = RequestSigner::new(
            config.access_key,
            config.secret_key,
            Some(config.region),
            config.security_token,
        );

        Self {
            client,
            signer,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint this client talks to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sign and send a single request, collecting the whole response body.
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Result<(StatusCode, Bytes)> {
        let signed_headers = self.signer.sign(method.as_str(), url, headers, &body);

        let mut req = Request::builder().method(method).uri(url);
        for (key, value) in signed_headers.iter() {
            req = req.header(key, value);
        }
        let request = req.body(Full::new(body))?;

        let round_trip = async {
            let response = self.client.request(request).await?;
            let status = response.status();
            let body_bytes = response
                .collect()
                .await
                .map_err(|e| SpacesError::InvalidResponse(format!("Body error: {}", e)))?
                .to_bytes();
            Ok::<_, SpacesError>((status, body_bytes))
        };

        match tokio::time::timeout(self.timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(SpacesError::Timeout(self.timeout)),
        }
    }

    /// Encode an object key, preserving forward slashes.
    /// Returns Cow::Borrowed when no encoding is needed (common case).
    fn encode_key(key: &str) -> Cow<str> {
        let needs_encoding = key
            .bytes()
            .any(|b| !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/'));

        if !needs_encoding {
            return Cow::Borrowed(key);
        }
        Cow::Owned(RequestSigner::uri_encode(key, false))
    }

    /// Build the full URL for an object key
    fn build_object_url(&self, key: &str) -> String {
        let key = key.trim_start_matches('/');
        let encoded_key = Self::encode_key(key);
        let mut url = String::with_capacity(self.endpoint.len() + 1 + encoded_key.len());
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(&encoded_key);
        url
    }

    /// Build the destination URL for an upload: endpoint, path, then the
    /// override name or the file's own stem, keeping the file's extension.
    fn build_upload_url(&self, path: &str, file: &FileUpload, name: Option<&str>) -> String {
        let path = path.trim_matches('/');
        let mut key = String::with_capacity(path.len() + file.filename.len() + 2);
        if !path.is_empty() {
            key.push_str(path);
            key.push('/');
        }
        key.push_str(name.unwrap_or_else(|| file.stem()));
        if let Some(ext) = file.ext() {
            key.push('.');
            key.push_str(ext);
        }
        self.build_object_url(&key)
    }

    /// Build the bucket listing URL. Parameters are emitted in alphabetical
    /// order (marker, max-keys, prefix) so they are already canonical for
    /// the signer.
    fn build_list_url(
        &self,
        prefix: Option<&str>,
        marker: Option<&str>,
        max_keys: Option<i32>,
    ) -> String {
        let mut url = String::with_capacity(self.endpoint.len() + 128);
        url.push_str(&self.endpoint);
        url.push_str("/?");

        let mut first = true;
        let mut push_sep = |url: &mut String| {
            if !first {
                url.push('&');
            }
            first = false;
        };

        if let Some(m) = marker {
            push_sep(&mut url);
            url.push_str("marker=");
            url.push_str(&RequestSigner::uri_encode(m, true));
        }
        if let Some(n) = max_keys {
            push_sep(&mut url);
            url.push_str("max-keys=");
            let _ = write!(url, "{}", n);
        }
        if let Some(p) = prefix {
            push_sep(&mut url);
            url.push_str("prefix=");
            url.push_str(&RequestSigner::uri_encode(p, true));
        }

        url
    }

    /// Upload a file and return its public URL.
    ///
    /// The object is stored under `path/<name or file stem>.<ext>` with a
    /// `x-amz-acl: public-read` grant, so the returned URL is immediately
    /// fetchable. `name` overrides the file's own stem; the extension always
    /// comes from the filename.
    pub async fn upload(
        &self,
        path: &str,
        file: &FileUpload,
        name: Option<&str>,
    ) -> Result<String> {
        let url = self.build_upload_url(path, file, name);
        tracing::debug!(url = %url, size = file.data.len(), "uploading object");

        let mut headers = BTreeMap::new();
        headers.insert(
            "content-type".to_string(),
            file.content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        );
        headers.insert("content-length".to_string(), file.data.len().to_string());
        headers.insert("x-amz-acl".to_string(), "public-read".to_string());

        let (status, body_bytes) = self
            .send(Method::PUT, &url, headers, file.data.clone())
            .await?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body_bytes).to_string();
            return Err(SpacesError::ErrorResponse { status, message });
        }

        Ok(url)
    }

    /// Download an object, returning the whole body as Bytes
    pub async fn download(&self, key: &str) -> Result<Bytes> {
        let url = self.build_object_url(key);
        tracing::debug!(url = %url, "downloading object");

        let (status, body_bytes) = self
            .send(Method::GET, &url, BTreeMap::new(), Bytes::new())
            .await?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body_bytes).to_string();
            return Err(SpacesError::ErrorResponse { status, message });
        }

        Ok(body_bytes)
    }

    /// Delete an object
    pub async fn delete(&self, key: &str) -> Result<()> {
        let url = self.build_object_url(key);
        tracing::debug!(url = %url, "deleting object");

        let (status, body_bytes) = self
            .send(Method::DELETE, &url, BTreeMap::new(), Bytes::new())
            .await?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body_bytes).to_string();
            return Err(SpacesError::ErrorResponse { status, message });
        }

        Ok(())
    }

    /// Check whether an object exists (HEAD request)
    ///
    /// A 404 means "no"; any other failure status is an error, not a "no",
    /// so auth problems don't masquerade as missing objects.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let url = self.build_object_url(key);
        tracing::debug!(url = %url, "checking object existence");

        let (status, _) = self
            .send(Method::HEAD, &url, BTreeMap::new(), Bytes::new())
            .await?;

        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::NOT_FOUND {
            Ok(false)
        } else {
            Err(SpacesError::ErrorResponse {
                status,
                message: String::new(),
            })
        }
    }

    /// Fetch one page of the bucket listing
    pub async fn list_page(
        &self,
        prefix: Option<&str>,
        marker: Option<&str>,
        max_keys: Option<i32>,
    ) -> Result<ListBucketPage> {
        let url = self.build_list_url(prefix, marker, max_keys);
        tracing::debug!(url = %url, "listing bucket page");

        let (status, body_bytes) = self
            .send(Method::GET, &url, BTreeMap::new(), Bytes::new())
            .await?;

        if !status.is_success() {
            let message = String::from_utf8_lossy(&body_bytes).to_string();
            return Err(SpacesError::ErrorResponse { status, message });
        }

        parse_list_bucket_result(&body_bytes)
    }

    /// List every object key in the bucket, following `NextMarker` until the
    /// listing is no longer truncated.
    ///
    /// Pages are parsed and their keys accumulated; the walk ends when the
    /// marker stops advancing (see `ListBucketPage::advance_marker`).
    pub async fn list_all_keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self.list_page(prefix, marker.as_deref(), None).await?;
            let next = page.advance_marker(marker.as_deref());
            keys.extend(page.contents.into_iter().map(|obj| obj.key));

            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }
}

/// Parse a `ListBucketResult` XML document into a page.
///
/// Byte-slice tag matching keeps this allocation-light: tag names are never
/// turned into Strings, and text payloads are moved out with
/// `std::mem::take`.
fn parse_list_bucket_result(xml_data: &[u8]) -> Result<ListBucketPage> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut page = ListBucketPage::new();
    let mut current_object: Option<SpaceObject> = None;
    let mut in_owner = false;
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"Contents" => {
                    current_object = Some(SpaceObject::new(String::new(), 0));
                }
                // Owner carries DisplayName/ID text we must not confuse
                // with top-level fields
                b"Owner" => {
                    in_owner = true;
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Key" => {
                        if let Some(ref mut obj) = current_object {
                            obj.key = std::mem::take(&mut current_text);
                        }
                    }
                    b"Size" => {
                        if let Some(ref mut obj) = current_object {
                            obj.size = current_text.parse().unwrap_or(0);
                        }
                    }
                    b"LastModified" => {
                        if let Some(ref mut obj) = current_object {
                            obj.last_modified = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"ETag" => {
                        if let Some(ref mut obj) = current_object {
                            obj.etag = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Contents" => {
                        if let Some(obj) = current_object.take() {
                            page.contents.push(obj);
                        }
                    }
                    b"Owner" => {
                        in_owner = false;
                    }
                    b"Name" if !in_owner && current_object.is_none() => {
                        page.name = Some(std::mem::take(&mut current_text));
                    }
                    b"Prefix" if current_object.is_none() => {
                        if !current_text.is_empty() {
                            page.prefix = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Marker" => {
                        if !current_text.is_empty() {
                            page.marker = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"NextMarker" => {
                        page.next_marker = Some(std::mem::take(&mut current_text));
                    }
                    b"IsTruncated" => {
                        page.is_truncated = current_text == "true";
                    }
                    b"MaxKeys" => {
                        page.max_keys = current_text.parse().ok();
                    }
                    _ => {}
                }

                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SpacesError::XmlParse(format!("XML parse error: {}", e)));
            }
            _ => {}
        }
    }

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> SpacesClient {
        SpacesClient::new(SpacesConfig::new(
            "https://my-space.nyc3.digitaloceanspaces.com",
            "access",
            "secret",
        ))
    }

    #[test]
    fn test_build_object_url() {
        let client = test_client();
        assert_eq!(
            client.build_object_url("dir/file.txt"),
            "https://my-space.nyc3.digitaloceanspaces.com/dir/file.txt"
        );
        // Leading slash is not doubled
        assert_eq!(
            client.build_object_url("/dir/file.txt"),
            "https://my-space.nyc3.digitaloceanspaces.com/dir/file.txt"
        );
        // Spaces get percent-encoded
        assert_eq!(
            client.build_object_url("dir/my file.txt"),
            "https://my-space.nyc3.digitaloceanspaces.com/dir/my%20file.txt"
        );
    }

    #[test]
    fn test_encode_key_borrows_when_clean() {
        assert!(matches!(
            SpacesClient::encode_key("path/to/file.txt"),
            Cow::Borrowed(_)
        ));
        assert!(matches!(
            SpacesClient::encode_key("path/with space.txt"),
            Cow::Owned(_)
        ));
    }

    #[test]
    fn test_build_upload_url() {
        let client = test_client();
        let file = FileUpload::new(bytes::Bytes::from_static(b"png"), "photo.png");

        // Default: file stem + extension
        assert_eq!(
            client.build_upload_url("avatars", &file, None),
            "https://my-space.nyc3.digitaloceanspaces.com/avatars/photo.png"
        );
        // Name override keeps the extension
        assert_eq!(
            client.build_upload_url("avatars", &file, Some("user-42")),
            "https://my-space.nyc3.digitaloceanspaces.com/avatars/user-42.png"
        );
        // Path slashes are normalized
        assert_eq!(
            client.build_upload_url("/avatars/", &file, None),
            "https://my-space.nyc3.digitaloceanspaces.com/avatars/photo.png"
        );
        // Empty path uploads to the bucket root
        assert_eq!(
            client.build_upload_url("", &file, None),
            "https://my-space.nyc3.digitaloceanspaces.com/photo.png"
        );

        let plain = FileUpload::new(bytes::Bytes::from_static(b"x"), "LICENSE");
        assert_eq!(
            client.build_upload_url("docs", &plain, None),
            "https://my-space.nyc3.digitaloceanspaces.com/docs/LICENSE"
        );
    }

    #[test]
    fn test_build_list_url() {
        let client = test_client();
        assert_eq!(
            client.build_list_url(None, None, None),
            "https://my-space.nyc3.digitaloceanspaces.com/?"
        );
        assert_eq!(
            client.build_list_url(Some("uploads/"), Some("uploads/a b.txt"), Some(100)),
            "https://my-space.nyc3.digitaloceanspaces.com/?marker=uploads%2Fa%20b.txt&max-keys=100&prefix=uploads%2F"
        );
    }

    #[test]
    fn test_parse_list_bucket_result() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>my-space</Name>
  <Prefix>uploads/</Prefix>
  <Marker></Marker>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>uploads/a.png</Key>
    <LastModified>2020-05-15T10:00:00.000Z</LastModified>
    <ETag>&quot;abc123&quot;</ETag>
    <Size>1024</Size>
    <Owner>
      <ID>12345</ID>
      <DisplayName>owner</DisplayName>
    </Owner>
  </Contents>
  <Contents>
    <Key>uploads/b &amp; c.png</Key>
    <Size>2048</Size>
  </Contents>
</ListBucketResult>"#;

        let page = parse_list_bucket_result(xml).unwrap();
        assert_eq!(page.name, Some("my-space".to_string()));
        assert_eq!(page.prefix, Some("uploads/".to_string()));
        assert_eq!(page.marker, None);
        assert_eq!(page.max_keys, Some(1000));
        assert!(!page.is_truncated);
        assert_eq!(page.contents.len(), 2);

        assert_eq!(page.contents[0].key, "uploads/a.png");
        assert_eq!(page.contents[0].size, 1024);
        assert_eq!(page.contents[0].etag, Some("\"abc123\"".to_string()));
        assert_eq!(
            page.contents[0].last_modified,
            Some("2020-05-15T10:00:00.000Z".to_string())
        );

        // XML entities are unescaped
        assert_eq!(page.contents[1].key, "uploads/b & c.png");

        assert_eq!(page.keys(), vec!["uploads/a.png", "uploads/b & c.png"]);
        assert_eq!(page.advance_marker(None), None);
    }

    #[test]
    fn test_parse_truncated_page_with_next_marker() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>my-space</Name>
  <Marker>uploads/a.png</Marker>
  <IsTruncated>true</IsTruncated>
  <NextMarker>uploads/m.png</NextMarker>
  <Contents><Key>uploads/b.png</Key><Size>1</Size></Contents>
  <Contents><Key>uploads/m.png</Key><Size>2</Size></Contents>
</ListBucketResult>"#;

        let page = parse_list_bucket_result(xml).unwrap();
        assert!(page.is_truncated);
        assert_eq!(page.marker, Some("uploads/a.png".to_string()));
        assert_eq!(
            page.advance_marker(Some("uploads/a.png")),
            Some("uploads/m.png".to_string())
        );
    }

    #[test]
    fn test_parse_truncated_page_without_next_marker() {
        // Stores omit NextMarker without a delimiter; the last key resumes
        let xml = br#"<ListBucketResult>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>a.png</Key><Size>1</Size></Contents>
  <Contents><Key>z.png</Key><Size>2</Size></Contents>
</ListBucketResult>"#;

        let page = parse_list_bucket_result(xml).unwrap();
        assert_eq!(page.advance_marker(None), Some("z.png".to_string()));
    }

    #[test]
    fn test_parse_malformed_xml() {
        let xml = b"<ListBucketResult><Contents><Key>a</Contents>";
        assert!(matches!(
            parse_list_bucket_result(xml),
            Err(SpacesError::XmlParse(_))
        ));
    }

    #[test]
    fn test_client_is_clone() {
        let client = test_client();
        let clone = client.clone();
        assert_eq!(clone.endpoint(), "https://my-space.nyc3.digitaloceanspaces.com");
    }
}
