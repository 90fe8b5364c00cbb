//! Statsd metrics for the intake crash collector.
//!
//! Metric names are typed: each kind of metric (counter, timer, gauge,
//! histogram) gets its own trait, and the collector defines one enum per
//! kind with the full list of names it emits. That keeps names greppable in
//! one place and makes it impossible to, say, feed a duration into a
//! counter.
//!
//! The client is configured once at startup with [`configure_statsd`] and
//! never swapped afterwards. Until then — and in tests — every metric call
//! is a no-op.
//!
//! ```
//! use intake_statsd::{metric, CounterMetric};
//!
//! struct AcceptedCrashes;
//!
//! impl CounterMetric for AcceptedCrashes {
//!     fn name(&self) -> &'static str {
//!         "accepted_crashes"
//!     }
//! }
//!
//! metric!(counter(AcceptedCrashes) += 1, product = "Firefox");
//! ```

use std::collections::BTreeMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use cadence::prelude::*;
use cadence::{
    BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient, UdpMetricSink,
};
use once_cell::sync::OnceCell;

use intake_log::ErrorChain;

/// Metrics queued for sending beyond this are dropped rather than blocking
/// the crash pipeline.
const MAX_QUEUED_METRICS: usize = 100_000;

/// The process-wide client. Written once by [`configure_statsd`].
static CLIENT: OnceCell<MetricsClient> = OnceCell::new();

/// Tags attached to a single metric, as `(name, value)` pairs.
pub type Tags<'a> = &'a [(&'a str, &'a str)];

/// A statsd client with a set of default tags.
///
/// Default tags (`host_id` in production) are appended to every metric after
/// the call-site tags.
#[derive(Debug)]
pub struct MetricsClient {
    statsd: StatsdClient,
    default_tags: BTreeMap<String, String>,
}

impl MetricsClient {
    /// Wraps a cadence client with default tags.
    pub fn new(statsd: StatsdClient, default_tags: BTreeMap<String, String>) -> Self {
        Self {
            statsd,
            default_tags,
        }
    }

    /// Increments a counter.
    pub fn count(&self, name: &'static str, value: i64, tags: Tags) {
        self.send(self.statsd.count_with_tags(name, value), tags);
    }

    /// Sets a gauge to its current value.
    pub fn gauge(&self, name: &'static str, value: u64, tags: Tags) {
        self.send(self.statsd.gauge_with_tags(name, value), tags);
    }

    /// Records one sample of a distribution.
    pub fn histogram(&self, name: &'static str, value: u64, tags: Tags) {
        self.send(self.statsd.histogram_with_tags(name, value), tags);
    }

    /// Records a timing.
    pub fn time(&self, name: &'static str, value: Duration, tags: Tags) {
        self.send(self.statsd.time_with_tags(name, value), tags);
    }

    fn send<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>, tags: Tags<'a>)
    where
        T: Metric + From<String>,
    {
        for (name, value) in tags {
            metric = metric.with_tag(name, value);
        }
        for (name, value) in &self.default_tags {
            metric = metric.with_tag(name, value);
        }

        if let Err(error) = metric.try_send() {
            intake_log::error!("dropping metric: {}", ErrorChain(&error));
        }
    }
}

/// Invokes a callback with the configured client, or does nothing.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    match CLIENT.get() {
        Some(client) => f(client),
        None => R::default(),
    }
}

/// Points the metrics system at a statsd server.
///
/// Failures are logged and leave metrics disabled; a collector that cannot
/// reach statsd still collects crashes.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    default_tags: BTreeMap<String, String>,
    buffering: bool,
) {
    let addrs: Vec<_> = host
        .to_socket_addrs()
        .map(|addrs| addrs.collect())
        .unwrap_or_default();

    if let Some(addr) = addrs.first() {
        intake_log::info!("reporting metrics to statsd at {addr}");
    }

    let statsd = match build_statsd_client(prefix, &addrs, buffering) {
        Ok(statsd) => statsd,
        Err(error) => {
            intake_log::error!("failed to set up statsd, metrics are disabled: {error}");
            return;
        }
    };

    if CLIENT.set(MetricsClient::new(statsd, default_tags)).is_err() {
        intake_log::warn!("statsd is already configured, ignoring");
    }
}

fn build_statsd_client(
    prefix: &str,
    addrs: &[SocketAddr],
    buffering: bool,
) -> io::Result<StatsdClient> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    if buffering {
        let sink = BufferedUdpMetricSink::from(addrs, socket).map_err(io::Error::other)?;
        let sink = QueuingMetricSink::with_capacity(sink, MAX_QUEUED_METRICS);
        Ok(StatsdClient::from_sink(prefix, sink))
    } else {
        let sink = UdpMetricSink::from(addrs, socket).map_err(io::Error::other)?;
        Ok(StatsdClient::from_sink(prefix, sink))
    }
}

/// A typed counter name.
pub trait CounterMetric {
    /// The name sent to statsd.
    fn name(&self) -> &'static str;
}

/// A typed timer name. Values are durations.
pub trait TimerMetric {
    /// The name sent to statsd.
    fn name(&self) -> &'static str;
}

/// A typed gauge name. The server keeps the latest value.
pub trait GaugeMetric {
    /// The name sent to statsd.
    fn name(&self) -> &'static str;
}

/// A typed histogram name. The server computes the distribution.
pub trait HistogramMetric {
    /// The name sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric through the configured client.
///
/// Tags follow the value as `name = value` pairs:
///
/// ```ignore
/// metric!(counter(Counters::Throttle) += 1, verdict = "accept", rule = rule);
/// metric!(timer(Timers::CrashSave) = start.elapsed());
/// metric!(gauge(Gauges::QueueSize) = queue_len as u64);
/// ```
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            client.count(
                $crate::CounterMetric::name(&$id),
                $value,
                &[$((stringify!($k), $v)),*],
            )
        })
    };

    (gauge($id:expr) = $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            client.gauge(
                $crate::GaugeMetric::name(&$id),
                $value,
                &[$((stringify!($k), $v)),*],
            )
        })
    };

    (histogram($id:expr) = $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            client.histogram(
                $crate::HistogramMetric::name(&$id),
                $value,
                &[$((stringify!($k), $v)),*],
            )
        })
    };

    (timer($id:expr) = $value:expr $(, $k:ident = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            client.time(
                $crate::TimerMetric::name(&$id),
                $value,
                &[$((stringify!($k), $v)),*],
            )
        })
    };
}

#[cfg(test)]
mod tests {
    use cadence::SpyMetricSink;

    use super::*;

    enum TestCounters {
        Accepted,
    }

    impl CounterMetric for TestCounters {
        fn name(&self) -> &'static str {
            match self {
                Self::Accepted => "accepted",
            }
        }
    }

    #[test]
    fn test_macro_is_noop_without_client() {
        // No client is configured in tests; none of these may panic.
        metric!(counter(TestCounters::Accepted) += 1);
        metric!(counter(TestCounters::Accepted) += 1, rule = "accept_everything");
    }

    #[test]
    fn test_count_renders_name_and_value() {
        let (rx, sink) = SpyMetricSink::new();
        let client = MetricsClient::new(StatsdClient::from_sink("test", sink), BTreeMap::new());

        client.count("accepted", 1, &[]);

        let sent = String::from_utf8(rx.try_recv().unwrap()).unwrap();
        assert_eq!(sent, "test.accepted:1|c");
    }

    #[test]
    fn test_default_tags_follow_call_tags() {
        let (rx, sink) = SpyMetricSink::new();
        let client = MetricsClient::new(
            StatsdClient::from_sink("test", sink),
            BTreeMap::from([("host_id".to_owned(), "collector-1".to_owned())]),
        );

        client.count("accepted", 1, &[("rule", "has_email")]);

        let sent = String::from_utf8(rx.try_recv().unwrap()).unwrap();
        assert!(sent.starts_with("test.accepted:1|c"), "unexpected: {sent}");
        assert!(sent.contains("rule:has_email"), "unexpected: {sent}");
        assert!(sent.contains("host_id:collector-1"), "unexpected: {sent}");
    }

    #[test]
    fn test_timer_sends_milliseconds() {
        let (rx, sink) = SpyMetricSink::new();
        let client = MetricsClient::new(StatsdClient::from_sink("test", sink), BTreeMap::new());

        client.time("crash_save", Duration::from_millis(250), &[]);

        let sent = String::from_utf8(rx.try_recv().unwrap()).unwrap();
        assert_eq!(sent, "test.crash_save:250|ms");
    }
}
