use std::time::Duration;

use tokio::sync::watch;

/// How the process has been asked to stop.
///
/// `timeout` bounds the queue drain. `None` means stop now: crashes still
/// queued are reported as lost rather than waited for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Shutdown {
    /// Time budget for draining open work before the process exits.
    pub timeout: Option<Duration>,
}

/// Owns the signal listener and hands out shutdown subscriptions.
///
/// The signal policy is shaped by how the collector is deployed:
///
/// - SIGTERM is what the orchestrator sends to rotate a replica. Accepted
///   crashes are in memory only, so this starts a graceful drain with the
///   configured deadline.
/// - SIGINT is an operator at a terminal; it stops immediately.
/// - Any signal arriving while a drain is already running upgrades it to an
///   immediate stop, so a stuck drain can always be cut short by hand.
pub struct Controller {
    rx: watch::Receiver<Option<Shutdown>>,
}

impl Controller {
    /// Spawns the signal listener.
    ///
    /// `drain_timeout` is attached to every graceful shutdown request.
    pub fn start(drain_timeout: Duration) -> Self {
        let (tx, rx) = watch::channel(None);
        tokio::spawn(listen_for_signals(tx, drain_timeout));
        Self { rx }
    }

    /// Creates a controller driven by the returned sender instead of
    /// process signals. This is the seam tests and embedders use.
    pub fn manual() -> (watch::Sender<Option<Shutdown>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    /// Returns a handle that resolves once shutdown is requested.
    pub fn subscribe(&self) -> ShutdownHandle {
        ShutdownHandle(self.rx.clone())
    }
}

/// A subscription to the shutdown request.
pub struct ShutdownHandle(watch::Receiver<Option<Shutdown>>);

impl ShutdownHandle {
    /// Waits for a shutdown request.
    ///
    /// Resolves immediately if one was issued before this call. Cancellation
    /// safe, so it can sit in a `select!` arm.
    pub async fn notified(&mut self) -> Shutdown {
        loop {
            if let Some(shutdown) = *self.0.borrow_and_update() {
                return shutdown;
            }

            if self.0.changed().await.is_err() {
                // The listener is gone; nothing will ever ask for a drain,
                // so treat it as an immediate stop.
                return Shutdown { timeout: None };
            }
        }
    }

    /// Whether shutdown has been requested, without waiting.
    pub fn requested(&self) -> bool {
        self.0.borrow().is_some()
    }
}

#[cfg(unix)]
async fn listen_for_signals(tx: watch::Sender<Option<Shutdown>>, drain_timeout: Duration) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut int) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            intake_log::error!("failed to install signal handlers, signals will be ignored");
            return;
        }
    };

    let mut draining = false;
    loop {
        let timeout = tokio::select! {
            Some(()) = term.recv() => (!draining).then_some(drain_timeout),
            Some(()) = int.recv() => None,
            else => return,
        };

        match timeout {
            Some(timeout) => intake_log::info!(
                "SIGTERM received, draining for up to {}s",
                timeout.as_secs()
            ),
            None if draining => intake_log::info!("second signal received, stopping now"),
            None => intake_log::info!("SIGINT received, stopping now"),
        }

        draining = true;
        if tx.send(Some(Shutdown { timeout })).is_err() {
            return;
        }
    }
}

#[cfg(not(unix))]
async fn listen_for_signals(tx: watch::Sender<Option<Shutdown>>, _drain_timeout: Duration) {
    // No SIGTERM outside unix; ctrl-c stops the collector immediately.
    while tokio::signal::ctrl_c().await.is_ok() {
        intake_log::info!("ctrl-c received, stopping now");
        if tx.send(Some(Shutdown { timeout: None })).is_err() {
            return;
        }
    }
}
