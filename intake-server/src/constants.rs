/// The server header returned on all responses.
pub const SERVER: &str = concat!("intake/", env!("CARGO_PKG_VERSION"));

/// The dump name the processing pipeline expects for the primary minidump.
///
/// Objects for this dump are stored under `v1/dump/<crash id>` instead of the
/// field name the Breakpad client submits it under.
pub const PRIMARY_DUMP_NAME: &str = "dump";

/// The annotation field that short-circuits the throttler.
///
/// Crash reports submitted through about:crashes carry `Throttleable=0` and
/// are always accepted.
pub const THROTTLEABLE_FIELD: &str = "Throttleable";

/// Multipart field carrying annotations as a single JSON object.
pub const EXTRA_FIELD: &str = "extra";

/// Response header carrying the reason a submission was rejected.
pub const REASON_HEADER: &str = "x-collector-reason";

/// Response body for discarded submissions.
///
/// A body-only rejection with status 200 stops Breakpad clients from
/// retrying; they treat any non-2xx status as a retry signal.
pub const DISCARDED_BODY: &str = "Discarded=1\n";
