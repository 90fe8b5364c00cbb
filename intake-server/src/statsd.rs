use intake_statsd::{CounterMetric, GaugeMetric, HistogramMetric, TimerMetric};

/// Counter metrics used by the collector.
pub enum CollectorCounters {
    /// Number of requests handled by the HTTP server.
    ///
    /// This metric is tagged with:
    /// - `route`: the matched route pattern.
    /// - `method`: the HTTP method.
    Requests,
    /// Number of responses, by status code.
    ///
    /// This metric is tagged with:
    /// - `status_code`: the response status.
    /// - `route`: the matched route pattern.
    /// - `method`: the HTTP method.
    ResponsesStatusCodes,
    /// The server started up.
    ServerStarting,
    /// A crash report made it past payload parsing.
    IncomingCrash,
    /// A crash report arrived gzip-compressed.
    GzippedCrash,
    /// A crash report claimed gzip encoding but did not decompress.
    BadGzippedCrash,
    /// A submission was rejected by the payload parser.
    ///
    /// This metric is tagged with:
    /// - `reason`: the parser failure reason.
    MalformedCrash,
    /// Throttle verdicts, by verdict and matching rule.
    ///
    /// This metric is tagged with:
    /// - `verdict`: accept, defer, reject or fakeaccept.
    /// - `rule`: the rule that decided.
    Throttle,
    /// A crash report carried `Throttleable=0` and bypassed the rules.
    Throttleable0,
    /// The submit handler timed out waiting for a hand-off queue slot.
    QueueIsFull,
    /// A crash report was saved and, if accepted, published.
    SaveCrash,
    /// A save or publish attempt failed and will be retried.
    ///
    /// This metric is tagged with:
    /// - `state`: save or publish.
    MoverRetry,
    /// A crash report was dropped because storage kept failing.
    SaveCrashDropped,
    /// A saved crash report could not be published; a reaper reconciles
    /// unpublished saves later.
    PublishCrashDropped,
    /// A crash mover worker panicked while handling a crash.
    MoverPanic,
    /// Hits on the health endpoints.
    ///
    /// This metric is tagged with:
    /// - `endpoint`: lbheartbeat, heartbeat, version or broken.
    Health,
}

impl CounterMetric for CollectorCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::ResponsesStatusCodes => "responses.status_codes",
            Self::ServerStarting => "server.starting",
            Self::IncomingCrash => "incoming_crash",
            Self::GzippedCrash => "gzipped_crash",
            Self::BadGzippedCrash => "bad_gzipped_crash",
            Self::MalformedCrash => "malformed_crash",
            Self::Throttle => "throttle",
            Self::Throttleable0 => "throttleable_0",
            Self::QueueIsFull => "queue.is_full",
            Self::SaveCrash => "crashmover.save_crash.count",
            Self::MoverRetry => "crashmover.retry.count",
            Self::SaveCrashDropped => "crashmover.save_crash_dropped.count",
            Self::PublishCrashDropped => "crashmover.publish_crash_dropped.count",
            Self::MoverPanic => "crashmover.panic.count",
            Self::Health => "health",
        }
    }
}

/// Timer metrics used by the collector.
pub enum CollectorTimers {
    /// Total time spent handling a request.
    ///
    /// This metric is tagged with:
    /// - `route`: the matched route pattern.
    /// - `method`: the HTTP method.
    RequestsDuration,
    /// Time spent saving one crash to storage, including retries.
    CrashSave,
    /// Time spent publishing one crash id, including retries.
    CrashPublish,
    /// Time from receiving a crash from the client to it being fully handled.
    CrashHandling,
}

impl TimerMetric for CollectorTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::RequestsDuration => "requests.duration",
            Self::CrashSave => "crashmover.crash_save.time",
            Self::CrashPublish => "crashmover.crash_publish.time",
            Self::CrashHandling => "crashmover.crash_handling.time",
        }
    }
}

/// Gauge metrics used by the collector.
pub enum CollectorGauges {
    /// Crash reports sitting in the hand-off queue or being moved.
    ///
    /// This is a direct measure of the health of this process. A number
    /// that keeps going up means impending doom.
    WorkQueueSize,
}

impl GaugeMetric for CollectorGauges {
    fn name(&self) -> &'static str {
        match self {
            Self::WorkQueueSize => "crashmover.work_queue_size",
        }
    }
}

/// Histogram metrics used by the collector.
pub enum CollectorHistograms {
    /// Size of the incoming crash payload in bytes.
    ///
    /// This metric is tagged with:
    /// - `payload`: compressed or uncompressed.
    CrashSize,
}

impl HistogramMetric for CollectorHistograms {
    fn name(&self) -> &'static str {
        match self {
            Self::CrashSize => "crash_size",
        }
    }
}
