//! AWS Signature Version 4 signing for Spaces requests
//!
//! DigitalOcean Spaces authenticates with the same SigV4 scheme as S3, so the
//! signer speaks plain SigV4 with the service fixed to "s3". Supports an
//! optional STS security token, which participates in the signed headers as
//! `x-amz-security-token`.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

/// Hex lookup table for percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Pre-computed SHA256 hash of an empty payload (GET/DELETE/HEAD bodies)
const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// SigV4 request signer for Spaces
pub struct RequestSigner {
    access_key: String,
    region: String,
    service: String,
    security_token: Option<String>,
    /// Pre-computed "AWS4" + secret_key bytes, the root of the key derivation
    aws4_key: Vec<u8>,
    /// Cached signing key per day: (date_stamp, derived_key).
    /// The derived key only changes daily, so caching skips 4 HMAC
    /// operations per request.
    cached_signing_key: Mutex<Option<(String, [u8; 32])>>,
}

impl Clone for RequestSigner {
    fn clone(&self) -> Self {
        Self {
            access_key: self.access_key.clone(),
            region: self.region.clone(),
            service: self.service.clone(),
            security_token: self.security_token.clone(),
            aws4_key: self.aws4_key.clone(),
            // Each clone gets its own cache (populated on first use)
            cached_signing_key: Mutex::new(None),
        }
    }
}

impl RequestSigner {
    /// Create a new signer
    pub fn new(
        access_key: String,
        secret_key: String,
        region: Option<String>,
        security_token: Option<String>,
    ) -> Self {
        let region = region.unwrap_or_else(|| "us-east-1".to_string());
        let aws4_key = format!("AWS4{}", secret_key).into_bytes();
        Self {
            access_key,
            region,
            service: "s3".to_string(),
            security_token,
            aws4_key,
            cached_signing_key: Mutex::new(None),
        }
    }

    /// Sign a request, returning the full header map to send
    ///
    /// Adds `host`, `x-amz-date`, `x-amz-content-sha256`, `authorization`,
    /// and `x-amz-security-token` when a token is configured. Empty payloads
    /// use a pre-computed hash constant.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        headers: BTreeMap<String, String>,
        payload: &[u8],
    ) -> BTreeMap<String, String> {
        if payload.is_empty() {
            self.sign_with_hash(method, url, headers, EMPTY_SHA256)
        } else {
            let hash = hex::encode(Sha256::digest(payload));
            self.sign_with_hash(method, url, headers, &hash)
        }
    }

    fn sign_with_hash(
        &self,
        method: &str,
        url: &str,
        mut headers: BTreeMap<String, String>,
        payload_hash: &str,
    ) -> BTreeMap<String, String> {
        let (host, path, query) = Self::split_url(url);

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();

        // Required headers, lowercase for canonical form
        headers.insert("host".to_string(), host.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        if let Some(ref token) = self.security_token {
            headers.insert("x-amz-security-token".to_string(), token.clone());
        }

        let canonical_query = Self::canonical_query_string(query);
        let canonical_headers = Self::canonical_headers(&headers);
        let signed_headers = Self::signed_headers(&headers);

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope =
            format!("{}/{}/{}/aws4_request", date_stamp, self.region, self.service);
        let canonical_request_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&date_stamp, &string_to_sign);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );
        headers.insert("authorization".to_string(), authorization);

        headers
    }

    /// Split a URL into (host, path, query) slices without heap allocation.
    ///
    /// Strips default ports (:443 for https, :80 for http) from the host so
    /// the `host` header matches what the server expects.
    fn split_url(url: &str) -> (&str, &str, &str) {
        let after_scheme = if let Some(rest) = url.strip_prefix("https://") {
            rest
        } else if let Some(rest) = url.strip_prefix("http://") {
            rest
        } else {
            url
        };

        let (authority, path_and_query) = match after_scheme.find('/') {
            Some(pos) => (&after_scheme[..pos], &after_scheme[pos..]),
            None => (after_scheme, "/"),
        };

        let (path, query) = match path_and_query.find('?') {
            Some(pos) => (&path_and_query[..pos], &path_and_query[pos + 1..]),
            None => (path_and_query, ""),
        };

        let host = if url.starts_with("https") {
            authority.strip_suffix(":443").unwrap_or(authority)
        } else {
            authority.strip_suffix(":80").unwrap_or(authority)
        };

        (host, path, query)
    }

    /// Canonical query string: parameters sorted by name, `param` normalized
    /// to `param=`. The client builds its own URLs with values already
    /// percent-encoded, so no decode pass is needed here.
    fn canonical_query_string(query: &str) -> String {
        if query.is_empty() {
            return String::new();
        }

        let mut params: Vec<(&str, &str)> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.find('=') {
                Some(pos) => (&pair[..pos], &pair[pos + 1..]),
                None => (pair, ""),
            })
            .collect();

        params.sort_unstable();

        let mut result = String::with_capacity(query.len() + params.len());
        for (i, (k, v)) in params.iter().enumerate() {
            if i > 0 {
                result.push('&');
            }
            result.push_str(k);
            result.push('=');
            result.push_str(v);
        }
        result
    }

    /// Canonical headers block - keys are already lowercase from our insertions
    fn canonical_headers(headers: &BTreeMap<String, String>) -> String {
        let mut result = String::with_capacity(headers.len() * 64);
        for (k, v) in headers {
            result.push_str(k);
            result.push(':');
            result.push_str(v.trim());
            result.push('\n');
        }
        result
    }

    /// Signed headers list - keys are already lowercase and sorted by BTreeMap
    fn signed_headers(headers: &BTreeMap<String, String>) -> String {
        let mut result = String::with_capacity(headers.len() * 20);
        let mut first = true;
        for k in headers.keys() {
            if !first {
                result.push(';');
            }
            result.push_str(k);
            first = false;
        }
        result
    }

    /// Calculate the signature with the daily signing key cache
    fn calculate_signature(&self, date_stamp: &str, string_to_sign: &str) -> String {
        let signing_key = {
            let mut cache = self.cached_signing_key.lock().unwrap();
            match *cache {
                Some((ref cached_date, ref cached_key)) if cached_date == date_stamp => *cached_key,
                _ => {
                    let key = self.derive_signing_key(date_stamp);
                    *cache = Some((date_stamp.to_string(), key));
                    key
                }
            }
        };

        let signature = Self::hmac_sha256(&signing_key, string_to_sign.as_bytes());
        hex::encode(signature)
    }

    /// Derive signing key from date stamp (4 chained HMAC operations)
    fn derive_signing_key(&self, date_stamp: &str) -> [u8; 32] {
        let k_date = Self::hmac_sha256(&self.aws4_key, date_stamp.as_bytes());
        let k_region = Self::hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = Self::hmac_sha256(&k_region, self.service.as_bytes());
        Self::hmac_sha256(&k_service, b"aws4_request")
    }

    /// HMAC-SHA256 returning a fixed-size array
    fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(msg);
        let result = mac.finalize().into_bytes();
        let mut output = [0u8; 32];
        output.copy_from_slice(&result);
        output
    }

    /// Percent-encode a string (RFC 3986) using the hex lookup table
    pub(crate) fn uri_encode(s: &str, encode_slash: bool) -> String {
        let mut result = String::with_capacity(s.len() + 16);
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    result.push(byte as char);
                }
                b'/' if !encode_slash => {
                    result.push('/');
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_encode_object_keys() {
        // Keys keep their slashes, query values don't
        assert_eq!(
            RequestSigner::uri_encode("uploads/my photo.png", false),
            "uploads/my%20photo.png"
        );
        assert_eq!(
            RequestSigner::uri_encode("uploads/my photo.png", true),
            "uploads%2Fmy%20photo.png"
        );
        // Non-ASCII is percent-encoded byte-wise, upper hex
        assert_eq!(RequestSigner::uri_encode("café", true), "caf%C3%A9");
    }

    #[test]
    fn test_canonical_query_for_listing_params() {
        assert_eq!(RequestSigner::canonical_query_string(""), "");
        // The listing params the client emits are already canonical
        assert_eq!(
            RequestSigner::canonical_query_string("marker=a&max-keys=100&prefix=uploads%2F"),
            "marker=a&max-keys=100&prefix=uploads%2F"
        );
        // Unsorted input gets sorted, valueless params become `param=`
        assert_eq!(
            RequestSigner::canonical_query_string("prefix=a&marker"),
            "marker=&prefix=a"
        );
    }

    #[test]
    fn test_split_url() {
        let (host, path, query) =
            RequestSigner::split_url("https://my-space.nyc3.digitaloceanspaces.com/dir/file.png");
        assert_eq!(host, "my-space.nyc3.digitaloceanspaces.com");
        assert_eq!(path, "/dir/file.png");
        assert_eq!(query, "");

        let (host, path, query) =
            RequestSigner::split_url("https://example.com:443/?marker=abc&max-keys=100");
        assert_eq!(host, "example.com");
        assert_eq!(path, "/");
        assert_eq!(query, "marker=abc&max-keys=100");

        let (host, path, _) = RequestSigner::split_url("http://localhost:9000");
        assert_eq!(host, "localhost:9000");
        assert_eq!(path, "/");
    }

    #[test]
    fn test_sign_adds_required_headers() {
        let signer = RequestSigner::new(
            "DOACCESSKEYEXAMPLE".to_string(),
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
            Some("nyc3".to_string()),
            None,
        );

        let headers = signer.sign(
            "GET",
            "https://my-space.nyc3.digitaloceanspaces.com/file.txt",
            BTreeMap::new(),
            b"",
        );

        assert_eq!(
            headers.get("host").map(String::as_str),
            Some("my-space.nyc3.digitaloceanspaces.com")
        );
        assert_eq!(
            headers.get("x-amz-content-sha256").map(String::as_str),
            Some(EMPTY_SHA256)
        );
        assert!(headers.contains_key("x-amz-date"));
        assert!(!headers.contains_key("x-amz-security-token"));

        let authorization = headers.get("authorization").unwrap();
        assert!(authorization.starts_with("AWS4-HMAC-SHA256 Credential=DOACCESSKEYEXAMPLE/"));
        assert!(authorization.contains("/nyc3/s3/aws4_request"));
    }

    #[test]
    fn test_sign_includes_security_token() {
        let signer = RequestSigner::new(
            "access".to_string(),
            "secret".to_string(),
            Some("ams3".to_string()),
            Some("session-token".to_string()),
        );

        let headers = signer.sign(
            "PUT",
            "https://my-space.ams3.digitaloceanspaces.com/file.txt",
            BTreeMap::new(),
            b"body",
        );

        assert_eq!(
            headers.get("x-amz-security-token").map(String::as_str),
            Some("session-token")
        );
        // The token must be part of the signed header list
        let authorization = headers.get("authorization").unwrap();
        assert!(authorization.contains("x-amz-security-token"));
    }

    #[test]
    fn test_cached_key_matches_cold_derivation() {
        let signer = RequestSigner::new("access".to_string(), "secret".to_string(), None, None);

        // Cached second call must produce the same signature as the first,
        // and a fresh clone (cold cache) must agree with both
        let sig1 = signer.calculate_signature("20260815", "string-to-sign");
        let sig2 = signer.calculate_signature("20260815", "string-to-sign");
        let sig_cold = signer.clone().calculate_signature("20260815", "string-to-sign");
        assert_eq!(sig1, sig2);
        assert_eq!(sig1, sig_cold);

        // A new date must re-derive, not reuse the stale key
        let sig_next_day = signer.calculate_signature("20260816", "string-to-sign");
        assert_ne!(sig1, sig_next_day);
    }

    #[test]
    fn test_empty_payload_hash_matches_computed() {
        // The constant baked into empty-body GET/DELETE/HEAD signing must be
        // the real SHA256 of zero bytes
        assert_eq!(EMPTY_SHA256, hex::encode(Sha256::digest(b"")));

        let signer = RequestSigner::new("access".to_string(), "secret".to_string(), None, None);
        let empty = signer.sign("DELETE", "https://s.example.com/k", BTreeMap::new(), b"");
        let hashed = signer.sign("DELETE", "https://s.example.com/k", BTreeMap::new(), b"body");
        assert_eq!(
            empty.get("x-amz-content-sha256").map(String::as_str),
            Some(EMPTY_SHA256)
        );
        assert_ne!(
            hashed.get("x-amz-content-sha256"),
            empty.get("x-amz-content-sha256")
        );
    }
}
