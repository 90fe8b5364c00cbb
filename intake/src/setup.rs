use std::collections::BTreeMap;

use intake_config::Config;

/// Logs basic information about the collector at startup.
pub fn dump_spawn_infos(config: &Config) {
    intake_log::info!(
        "launching intake collector {version}",
        version = env!("CARGO_PKG_VERSION")
    );
    intake_log::info!("  host id: {}", config.host_id());
    dump_config(config);

    if config.local_dev_env() {
        intake_log::info!("intake is running! http://{}/", config.listen_addr());
    }
}

/// Logs the resolved runtime configuration. Secrets stay out of the logs.
pub fn dump_config(config: &Config) {
    let mover = config.crashmover();
    let breakpad = config.breakpad();

    intake_log::info!("  listen address: {}", config.listen_addr());
    intake_log::info!("  crashmover workers: {}", mover.concurrent_crashmovers);
    intake_log::info!("  crashmover queue capacity: {}", mover.queue_capacity());
    intake_log::info!("  crashstorage: {}", mover.crashstorage.class);
    intake_log::info!("  crashpublish: {}", mover.crashpublish.class);
    intake_log::info!("  throttler rules: {}", breakpad.throttler_rules);
    intake_log::info!("  max crash size: {}", breakpad.max_crash_size);
    intake_log::info!(
        "  shutdown timeout: {}s",
        mover.shutdown_timeout.as_secs()
    );
}

/// Configures the statsd metrics client.
pub fn init_metrics(config: &Config) {
    let metrics = config.metrics();

    let mut default_tags = BTreeMap::new();
    if !config.host_id().is_empty() {
        default_tags.insert("host_id".to_owned(), config.host_id().to_owned());
    }

    intake_statsd::configure_statsd(
        &metrics.statsd_namespace,
        (metrics.statsd_host.as_str(), metrics.statsd_port),
        default_tags,
        true,
    );
}
