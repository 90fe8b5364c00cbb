//! Extraction of crash annotations and dumps from the HTTP POST payload.
//!
//! Breakpad clients submit crashes as `multipart/form-data`, optionally
//! gzip-compressed. Text fields become annotations, file parts become dumps.
//! Newer clients submit all annotations as a single JSON object in a field
//! named `extra`.
//!
//! Everything in the payload is attacker-controlled, so names and values are
//! sanitised here and every dropped or clipped piece of data is recorded as a
//! collector note on the crash report.

use std::collections::BTreeMap;
use std::io::Read;

use axum::http::{header, HeaderMap};
use bytes::Bytes;
use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::Regex;

use intake_config::BreakpadConfig;
use intake_statsd::metric;

use crate::constants::EXTRA_FIELD;
use crate::report::{Annotations, Dump, PayloadKind};
use crate::statsd::{CollectorCounters, CollectorHistograms};

/// Annotation names must stay within this alphabet.
static ANNOTATION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid regex"));

/// Dump names must stay within this alphabet.
static DUMP_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid regex"));

/// Dump names longer than this are rejected.
const MAX_DUMP_NAME_LEN: usize = 30;

/// Dump names the processing pipeline knows about. Anything else is accepted
/// but noted.
const KNOWN_DUMP_NAMES: &[&str] = &[
    "upload_file_minidump",
    "upload_file_minidump_browser",
    "upload_file_minidump_content",
    "upload_file_minidump_flash1",
    "upload_file_minidump_flash2",
    "memory_report",
];

/// Why a submission could not be parsed.
///
/// Every variant maps onto a stable reason token returned to the client in
/// the `X-Collector-Reason` header.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The request carried no `Content-Length` header.
    #[error("missing content length")]
    NoContentLength,

    /// The content type is not `multipart/form-data`.
    #[error("unsupported content type")]
    BadContentType,

    /// The content type carries no usable boundary, or the body does not
    /// match the declared boundary.
    #[error("invalid multipart boundary")]
    BadBoundary,

    /// The request claimed gzip encoding but the body did not decompress.
    #[error("invalid gzip payload")]
    BadGzip,

    /// The payload contained no usable annotations.
    #[error("no annotations in payload")]
    NoAnnotations,

    /// The payload exceeds the configured size cap.
    #[error("payload too large")]
    TooLarge,

    /// The multipart body was malformed past the boundary.
    #[error("malformed multipart body: {0}")]
    InvalidMultipart(#[source] multer::Error),
}

impl PayloadError {
    /// The reason token reported to the client.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NoContentLength => "no_content_length",
            Self::BadContentType => "bad_content_type",
            Self::BadBoundary | Self::InvalidMultipart(_) => "bad_boundary",
            Self::BadGzip => "bad_gzip",
            Self::NoAnnotations => "no_annotations",
            Self::TooLarge => "too_large",
        }
    }

    fn from_multer(error: multer::Error) -> Self {
        match error {
            multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. } => {
                Self::TooLarge
            }
            other => Self::InvalidMultipart(other),
        }
    }
}

/// The sanitised content of a crash submission, before throttling and id
/// assignment.
#[derive(Debug, Default)]
pub struct ParsedPayload {
    /// Sanitised annotations.
    pub annotations: Annotations,
    /// Sanitised dumps by dump name.
    pub dumps: BTreeMap<String, Dump>,
    /// Shape the annotations arrived in.
    pub kind: PayloadKind,
    /// Whether the body was gzip-compressed.
    pub compressed: bool,
    /// Sanitisation actions, in order.
    pub notes: Vec<String>,
}

/// Parses and sanitises a crash submission body.
pub async fn extract_payload(
    headers: &HeaderMap,
    body: Bytes,
    config: &BreakpadConfig,
) -> Result<ParsedPayload, PayloadError> {
    let content_length: usize = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .ok_or(PayloadError::NoContentLength)?;

    if content_length == 0 {
        return Err(PayloadError::NoAnnotations);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or(PayloadError::BadContentType)?;

    if !content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/form-data")
    {
        return Err(PayloadError::BadContentType);
    }

    let boundary = multer::parse_boundary(content_type).map_err(|_| PayloadError::BadBoundary)?;

    let compressed = is_gzipped(headers);
    let body = if compressed {
        metric!(counter(CollectorCounters::GzippedCrash) += 1);
        metric!(
            histogram(CollectorHistograms::CrashSize) = body.len() as u64,
            payload = "compressed",
        );

        let body = decompress(&body, config.max_crash_size).inspect_err(|_| {
            metric!(counter(CollectorCounters::BadGzippedCrash) += 1);
        })?;
        body
    } else {
        metric!(
            histogram(CollectorHistograms::CrashSize) = body.len() as u64,
            payload = "uncompressed",
        );
        body
    };

    if body.len() > config.max_crash_size {
        return Err(PayloadError::TooLarge);
    }

    let mut payload = ParsedPayload {
        compressed,
        ..Default::default()
    };

    let stream = futures::stream::once(async move { Ok::<Bytes, std::convert::Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(PayloadError::from_multer)?
    {
        let name = field.name().unwrap_or_default().to_owned();
        let filename = field.file_name().map(str::to_owned);
        let is_binary = filename.is_some()
            || field
                .content_type()
                .is_some_and(|mime| mime.essence_str() == "application/octet-stream");

        let data = field.bytes().await.map_err(PayloadError::from_multer)?;

        if is_binary {
            collect_dump(&mut payload, &name, filename, data);
        } else {
            collect_annotation(&mut payload, &name, data, config);
        }
    }

    if payload.annotations.is_empty() {
        return Err(PayloadError::NoAnnotations);
    }

    Ok(payload)
}

fn is_gzipped(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .map(str::to_ascii_lowercase)
        .is_some_and(|encoding| {
            encoding
                .split(',')
                .map(str::trim)
                .any(|token| token == "gzip" || token == "x-gzip")
        })
}

fn decompress(body: &[u8], max_size: usize) -> Result<Bytes, PayloadError> {
    let mut decoded = Vec::new();
    let mut decoder = GzDecoder::new(body).take(max_size as u64 + 1);

    decoder
        .read_to_end(&mut decoded)
        .map_err(|_| PayloadError::BadGzip)?;

    if decoded.len() > max_size {
        return Err(PayloadError::TooLarge);
    }

    Ok(Bytes::from(decoded))
}

fn collect_dump(payload: &mut ParsedPayload, name: &str, filename: Option<String>, data: Bytes) {
    if name.len() > MAX_DUMP_NAME_LEN || !DUMP_NAME_RE.is_match(name) {
        let safe_name: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .take(MAX_DUMP_NAME_LEN)
            .collect();
        payload.notes.push(format!("bad_dump_name:{safe_name}"));
        return;
    }

    if !KNOWN_DUMP_NAMES.contains(&name) {
        payload.notes.push(format!("unknown_dump:{name}"));
    }

    payload
        .dumps
        .insert(name.to_owned(), Dump::new(data, filename));
}

fn collect_annotation(
    payload: &mut ParsedPayload,
    name: &str,
    data: Bytes,
    config: &BreakpadConfig,
) {
    // Checksums of a re-submitted raw crash are recomputed, never trusted.
    if name == "dump_checksums" {
        return;
    }

    if !ANNOTATION_NAME_RE.is_match(name) {
        let safe_name: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || ".-_".contains(*c))
            .take(64)
            .collect();
        payload.notes.push(format!("dropped_annotation:{safe_name}"));
        return;
    }

    let value = sanitize_value(payload, name, &data, config.max_annotation_size);

    if name == EXTRA_FIELD {
        match serde_json::from_str::<serde_json::Value>(&value) {
            Ok(serde_json::Value::Object(object)) => {
                payload.kind = PayloadKind::Json;
                for (key, value) in object {
                    if !ANNOTATION_NAME_RE.is_match(&key) {
                        payload.notes.push(format!("dropped_annotation:{key}"));
                        continue;
                    }
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    payload.annotations.insert(key, value);
                }
                return;
            }
            _ => payload.notes.push("malformed_extra".to_owned()),
        }
    }

    payload.annotations.insert(name.to_owned(), value);
}

/// Strips NUL bytes, replaces invalid UTF-8 and clips overlong values.
fn sanitize_value(
    payload: &mut ParsedPayload,
    name: &str,
    data: &[u8],
    max_size: usize,
) -> String {
    let stripped: Vec<u8> = if data.contains(&0) {
        payload.notes.push(format!("nul_stripped:{name}"));
        data.iter().copied().filter(|byte| *byte != 0).collect()
    } else {
        data.to_vec()
    };

    let mut value = String::from_utf8_lossy(&stripped).into_owned();

    if value.len() > max_size {
        let mut end = max_size;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
        payload.notes.push(format!("truncated:{name}"));
    }

    value
}
