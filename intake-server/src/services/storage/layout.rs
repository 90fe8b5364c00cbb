//! The canonical object layout shared by every storage backend.
//!
//! ```text
//! <BUCKET>
//!     v2/
//!         raw_crash/
//!             <ENTROPY>/
//!                 <YYYYMMDD>/
//!                     <CRASHID>
//!     v1/
//!         dump_names/
//!             <CRASHID>
//!         <DUMPNAME>/
//!             <CRASHID>
//! ```
//!
//! `ENTROPY` is the first three characters of the crash id and spreads keys
//! for stores that shard on key prefix. The primary minidump is stored under
//! the dump name `dump` regardless of the field name it was uploaded as.

use bytes::Bytes;

use crate::constants::PRIMARY_DUMP_NAME;
use crate::crash_id::CrashId;
use crate::report::CrashReport;

/// Key of the raw annotations object.
pub fn raw_crash_key(id: &CrashId) -> String {
    format!(
        "v2/raw_crash/{entropy}/{date}/{id}",
        entropy = id.entropy(),
        date = id.date_key(),
    )
}

/// Key of the dump-names index object.
pub fn dump_names_key(id: &CrashId) -> String {
    format!("v1/dump_names/{id}")
}

/// Key of a single dump object.
///
/// The dump uploaded under the configured dump field is rewritten to the
/// name the processing pipeline expects.
pub fn dump_key(id: &CrashId, dump_name: &str, dump_field: &str) -> String {
    let name = if dump_name == dump_field {
        PRIMARY_DUMP_NAME
    } else {
        dump_name
    };
    format!("v1/{name}/{id}")
}

/// Renders every object for one crash as `(key, body)` pairs.
///
/// Dumps come first and the raw annotations object last, so a partially
/// failed save never leaves annotations pointing at missing dumps.
pub fn crash_objects(report: &CrashReport, dump_field: &str) -> Vec<(String, Bytes)> {
    let mut objects = Vec::with_capacity(report.dumps.len() + 2);

    for (name, dump) in &report.dumps {
        objects.push((dump_key(&report.id, name, dump_field), dump.data.clone()));
    }

    objects.push((
        dump_names_key(&report.id),
        serialize_json(&report.dump_names()),
    ));
    objects.push((raw_crash_key(&report.id), serialize_json(&report.raw_crash())));

    objects
}

fn serialize_json(value: &serde_json::Value) -> Bytes {
    // Serialising a value that came from serde_json cannot fail.
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use crate::report::{Dump, PayloadKind};
    use crate::throttler::Verdict;

    use super::*;

    fn report() -> CrashReport {
        let received_at = chrono::Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap();
        let id = CrashId::adopt(
            "de1bb258-cbbf-4589-a673-34f802608020",
            received_at,
            Verdict::Accept,
        )
        .expect("valid crash id");

        let mut dumps = BTreeMap::new();
        dumps.insert(
            "upload_file_minidump".to_owned(),
            Dump::new(Bytes::from_static(b"ABC"), Some("x.dmp".to_owned())),
        );
        dumps.insert(
            "upload_file_minidump_browser".to_owned(),
            Dump::new(Bytes::from_static(b"DEF"), None),
        );

        let mut report = CrashReport {
            id,
            annotations: BTreeMap::from([("ProductName".to_owned(), "Firefox".to_owned())]),
            dumps,
            received_at,
            payload_kind: PayloadKind::Multipart,
            payload_compressed: false,
            notes: Vec::new(),
            verdict: Verdict::Accept,
        };
        report.augment_annotations("bp");
        report
    }

    #[test]
    fn test_raw_crash_key() {
        let report = report();
        assert_eq!(
            raw_crash_key(&report.id),
            format!("v2/raw_crash/de1/20260802/{}", report.id)
        );
    }

    #[test]
    fn test_dump_keys() {
        let report = report();
        let id = &report.id;

        assert_eq!(
            dump_key(id, "upload_file_minidump", "upload_file_minidump"),
            format!("v1/dump/{id}")
        );
        assert_eq!(
            dump_key(id, "upload_file_minidump_browser", "upload_file_minidump"),
            format!("v1/upload_file_minidump_browser/{id}")
        );
        assert_eq!(dump_names_key(id), format!("v1/dump_names/{id}"));
    }

    #[test]
    fn test_crash_objects_order_and_content() {
        let report = report();
        let objects = crash_objects(&report, "upload_file_minidump");

        assert_eq!(objects.len(), 4);
        // Dumps first, raw crash last.
        assert!(objects[0].0.starts_with("v1/"));
        assert_eq!(objects[2].0, dump_names_key(&report.id));
        assert_eq!(objects[3].0, raw_crash_key(&report.id));

        let dump_names: serde_json::Value = serde_json::from_slice(&objects[2].1).unwrap();
        assert_eq!(
            dump_names,
            serde_json::json!({
                "upload_file_minidump": "x.dmp",
                "upload_file_minidump_browser": null,
            })
        );

        let raw_crash: serde_json::Value = serde_json::from_slice(&objects[3].1).unwrap();
        assert_eq!(raw_crash["uuid"], report.id.as_str());
    }

    #[test]
    fn test_raw_crash_keys_sorted() {
        let report = report();
        let body = serde_json::to_string(&report.raw_crash()).unwrap();

        // serde_json maps iterate in key order; spot-check the rendering.
        let uuid_pos = body.find("\"uuid\"").unwrap();
        let product_pos = body.find("\"ProductName\"").unwrap();
        let minidump_pos = body.find("\"MinidumpSha256Hash\"").unwrap();
        assert!(minidump_pos < product_pos);
        assert!(product_pos < uuid_pos);
    }
}
