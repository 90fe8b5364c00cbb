//! The in-memory crash report aggregate passed through the pipeline.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::crash_id::CrashId;
use crate::throttler::Verdict;

/// Crash annotations: textual key/value metadata attached to a crash.
///
/// Kept sorted so the serialised raw-crash object has deterministic key
/// order.
pub type Annotations = BTreeMap<String, String>;

/// A single uploaded dump: the raw minidump bytes or an auxiliary memory
/// report.
#[derive(Clone, Debug)]
pub struct Dump {
    /// The raw bytes as uploaded.
    pub data: Bytes,
    /// The client-side filename from the multipart part, if any.
    pub filename: Option<String>,
    /// Lowercase hex SHA-256 of `data`.
    pub checksum: String,
}

impl Dump {
    /// Creates a dump, computing its checksum.
    pub fn new(data: Bytes, filename: Option<String>) -> Self {
        let checksum = hex::encode(Sha256::digest(&data));
        Self {
            data,
            filename,
            checksum,
        }
    }
}

/// Whether annotations came from form fields or a JSON `extra` field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PayloadKind {
    /// Annotations were individual `multipart/form-data` text fields.
    #[default]
    Multipart,
    /// Annotations came from a single JSON-valued field named `extra`.
    Json,
}

impl PayloadKind {
    /// The value recorded in the `payload` annotation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Multipart => "multipart",
            Self::Json => "json",
        }
    }
}

/// A crash report on its way from the submit endpoint to storage.
///
/// The report is owned exclusively by the submit handler until it is
/// enqueued; from then on it is owned by one crash mover worker until it is
/// saved or dropped.
#[derive(Clone, Debug)]
pub struct CrashReport {
    /// The assigned crash identifier.
    pub id: CrashId,
    /// Annotations, including the ones added by the collector.
    pub annotations: Annotations,
    /// Uploaded dumps by dump name.
    pub dumps: BTreeMap<String, Dump>,
    /// When the collector received the submission.
    pub received_at: DateTime<Utc>,
    /// Shape of the submitted payload.
    pub payload_kind: PayloadKind,
    /// Whether the payload arrived gzip-compressed.
    pub payload_compressed: bool,
    /// Collector actions taken on this crash, in order.
    pub notes: Vec<String>,
    /// The throttle verdict that routed this crash.
    pub verdict: Verdict,
}

impl CrashReport {
    /// Populates the collector-added annotations.
    ///
    /// Called exactly once by the submit handler, after the id is assigned.
    pub fn augment_annotations(&mut self, type_tag: &str) {
        let minidump_checksum = self
            .dumps
            .get("upload_file_minidump")
            .map(|dump| dump.checksum.clone())
            .unwrap_or_default();

        self.annotations
            .insert("uuid".to_owned(), self.id.as_str().to_owned());
        self.annotations.insert(
            "submitted_timestamp".to_owned(),
            self.received_at
                .to_rfc3339_opts(SecondsFormat::Micros, false),
        );
        self.annotations
            .insert("type_tag".to_owned(), type_tag.to_owned());
        self.annotations
            .insert("payload".to_owned(), self.payload_kind.as_str().to_owned());
        self.annotations.insert(
            "payload_compressed".to_owned(),
            if self.payload_compressed { "1" } else { "0" }.to_owned(),
        );
        self.annotations
            .insert("MinidumpSha256Hash".to_owned(), minidump_checksum);
    }

    /// Renders the raw-crash object stored under `v2/raw_crash/`.
    ///
    /// String annotations are stored as-is; `timestamp` is a float of epoch
    /// seconds, `dump_checksums` maps dump name to SHA-256, and
    /// `collector_notes` is the ordered note list. Keys are sorted
    /// lexicographically by construction.
    pub fn raw_crash(&self) -> Value {
        let mut object = serde_json::Map::new();

        for (key, value) in &self.annotations {
            object.insert(key.clone(), Value::String(value.clone()));
        }

        let timestamp = self.received_at.timestamp_micros() as f64 / 1_000_000.0;
        object.insert("timestamp".to_owned(), json!(timestamp));

        let checksums: BTreeMap<&str, &str> = self
            .dumps
            .iter()
            .map(|(name, dump)| (name.as_str(), dump.checksum.as_str()))
            .collect();
        object.insert("dump_checksums".to_owned(), json!(checksums));

        object.insert("collector_notes".to_owned(), json!(self.notes));

        Value::Object(object)
    }

    /// Renders the dump-names object stored under `v1/dump_names/`.
    ///
    /// Maps each dump name to the filename the client uploaded it under, or
    /// `null` when the part had none.
    pub fn dump_names(&self) -> Value {
        let names: BTreeMap<&str, Option<&str>> = self
            .dumps
            .iter()
            .map(|(name, dump)| (name.as_str(), dump.filename.as_deref()))
            .collect();
        json!(names)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn report() -> CrashReport {
        let received_at = Utc.with_ymd_and_hms(2026, 8, 2, 12, 30, 45).unwrap();
        let mut dumps = BTreeMap::new();
        dumps.insert(
            "upload_file_minidump".to_owned(),
            Dump::new(Bytes::from_static(b"ABC"), Some("x.dmp".to_owned())),
        );

        let mut report = CrashReport {
            id: CrashId::generate(received_at, Verdict::Accept),
            annotations: Annotations::from([
                ("ProductName".to_owned(), "Firefox".to_owned()),
                ("Version".to_owned(), "1".to_owned()),
            ]),
            dumps,
            received_at,
            payload_kind: PayloadKind::Multipart,
            payload_compressed: false,
            notes: vec!["truncated:Comments".to_owned()],
            verdict: Verdict::Accept,
        };
        report.augment_annotations("bp");
        report
    }

    #[test]
    fn test_augmented_annotations_complete() {
        let report = report();

        assert_eq!(report.annotations["uuid"], report.id.as_str());
        assert_eq!(report.annotations["type_tag"], "bp");
        assert_eq!(report.annotations["payload"], "multipart");
        assert_eq!(report.annotations["payload_compressed"], "0");
        assert_eq!(
            report.annotations["submitted_timestamp"],
            "2026-08-02T12:30:45.000000+00:00"
        );
        // SHA-256 of b"ABC".
        assert_eq!(
            report.annotations["MinidumpSha256Hash"],
            "b5d4045c3f466fa91fe2cc6abe79232a1a57cdf104f7a26e716e0a1e2789df78"
        );
    }

    #[test]
    fn test_minidump_hash_empty_without_dump() {
        let mut report = report();
        report.dumps.clear();
        report.augment_annotations("bp");
        assert_eq!(report.annotations["MinidumpSha256Hash"], "");
    }

    #[test]
    fn test_raw_crash_object() {
        let report = report();
        let raw_crash = report.raw_crash();

        for key in [
            "uuid",
            "submitted_timestamp",
            "timestamp",
            "type_tag",
            "dump_checksums",
            "MinidumpSha256Hash",
            "payload",
            "payload_compressed",
            "collector_notes",
        ] {
            assert!(raw_crash.get(key).is_some(), "missing key {key}");
        }

        assert_eq!(
            raw_crash["dump_checksums"]["upload_file_minidump"],
            "b5d4045c3f466fa91fe2cc6abe79232a1a57cdf104f7a26e716e0a1e2789df78"
        );
        assert!(raw_crash["timestamp"].is_f64());
        assert_eq!(raw_crash["collector_notes"][0], "truncated:Comments");
    }

    #[test]
    fn test_dump_names_object() {
        let mut report = report();
        report.dumps.insert(
            "memory_report".to_owned(),
            Dump::new(Bytes::from_static(b"zzzz"), None),
        );

        let names = report.dump_names();
        assert_eq!(names["upload_file_minidump"], "x.dmp");
        assert_eq!(names["memory_report"], Value::Null);
    }

    #[test]
    fn test_dump_checksum() {
        let dump = Dump::new(Bytes::from_static(b"ABC"), None);
        assert_eq!(
            dump.checksum,
            "b5d4045c3f466fa91fe2cc6abe79232a1a57cdf104f7a26e716e0a1e2789df78"
        );
    }
}
