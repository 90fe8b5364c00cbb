//! AWS Signature Version 4 request signing.
//!
//! Used by the S3 storage adapter and the SQS publish adapter to talk to
//! AWS-compatible HTTP APIs with static credentials. Only header-based
//! signing with a precomputed payload hash is supported, which is all the
//! collector needs.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hex SHA-256 of an empty payload.
pub const EMPTY_PAYLOAD_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Returns the lowercase hex SHA-256 of a request payload.
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// A SigV4 signer bound to one credential, region and service.
#[derive(Clone, Debug)]
pub struct SigV4 {
    access_key: String,
    secret_key: String,
    region: String,
    service: &'static str,
}

impl SigV4 {
    /// Creates a signer.
    pub fn new(access_key: String, secret_key: String, region: String, service: &'static str) -> Self {
        Self {
            access_key,
            secret_key,
            region,
            service,
        }
    }

    /// Signs one request.
    ///
    /// `extra_headers` are headers the caller will also set on the request
    /// and wants covered by the signature (e.g. `content-type` or
    /// `x-amz-content-sha256`). Returns the `x-amz-date` and `authorization`
    /// headers to add to the request.
    pub fn sign(
        &self,
        method: &str,
        url: &Url,
        extra_headers: &[(&str, &str)],
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let datestamp = now.format("%Y%m%d").to_string();

        let host = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_owned(),
        };

        // Canonical headers, sorted by lowercase name.
        let mut headers: Vec<(String, String)> = extra_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_owned()))
            .collect();
        headers.push(("host".to_owned(), host));
        headers.push(("x-amz-date".to_owned(), amz_date.clone()));
        headers.sort();

        let canonical_headers: String = headers
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers = headers
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{method}\n{uri}\n{query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
            uri = canonical_uri(url),
            query = canonical_query(url),
        );

        let scope = format!(
            "{datestamp}/{region}/{service}/aws4_request",
            region = self.region,
            service = self.service
        );

        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{hash}",
            hash = hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let mut key = hmac(
            format!("AWS4{}", self.secret_key).as_bytes(),
            datestamp.as_bytes(),
        );
        for component in [self.region.as_bytes(), self.service.as_bytes(), b"aws4_request"] {
            key = hmac(&key, component);
        }
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={access_key}/{scope}, \
             SignedHeaders={signed_headers}, Signature={signature}",
            access_key = self.access_key
        );

        vec![
            ("x-amz-date".to_owned(), amz_date),
            ("authorization".to_owned(), authorization),
        ]
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn canonical_uri(url: &Url) -> String {
    let path = url.path();
    if path.is_empty() {
        "/".to_owned()
    } else {
        path.to_owned()
    }
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| (uri_encode(&key), uri_encode(&value)))
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encodes with the unreserved character set SigV4 requires.
fn uri_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{other:02X}"));
            }
        }
    }
    encoded
}
