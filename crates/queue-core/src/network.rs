//! Optional network connectivity collaborator. The processor treats this
//! as an external service: it reads `is_connected` synchronously during
//! filtering and reacts to `false → true` transitions by re-ticking.

use tokio::sync::watch;

/// Source of `is_connected` plus a subscription channel. Implementations
/// back `watch()` with whatever platform reachability API they have;
/// `is_connected()` must be a cheap, synchronous read of the same state.
pub trait NetworkMonitor: Send + Sync {
    fn is_connected(&self) -> bool;

    /// A `watch` receiver mirroring connectivity changes. The processor
    /// holds this open for the lifetime of its subscription and drops it on
    /// `stop()`.
    fn watch(&self) -> watch::Receiver<bool>;
}

/// The default when no monitor is configured: always connected, no
/// subscription ever fires: the fallback for when no monitor is wired up
/// at all.
pub struct AlwaysOnline {
    tx: watch::Sender<bool>,
}

impl Default for AlwaysOnline {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }
}

impl NetworkMonitor for AlwaysOnline {
    fn is_connected(&self) -> bool {
        true
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// A monitor whose connectivity state can be flipped by a producer, for
/// wiring up a real platform reachability callback or for tests that need
/// to simulate connectivity edges. Construction takes the initial state.
pub struct WatchNetworkMonitor {
    tx: watch::Sender<bool>,
}

impl WatchNetworkMonitor {
    pub fn new(initially_connected: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_connected);
        Self { tx }
    }

    /// Report a new connectivity state. A no-op if it matches the current
    /// state (the `watch` channel itself dedupes changed() wakeups only on
    /// exact equality, so setting the same value again does not wake
    /// subscribers).
    pub fn set_connected(&self, connected: bool) {
        self.tx.send_if_modified(|v| {
            let changed = *v != connected;
            *v = connected;
            changed
        });
    }
}

impl NetworkMonitor for WatchNetworkMonitor {
    fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_online_reports_connected() {
        let m = AlwaysOnline::default();
        assert!(m.is_connected());
    }

    #[tokio::test]
    async fn watch_monitor_reflects_latest_state() {
        let m = WatchNetworkMonitor::new(false);
        assert!(!m.is_connected());
        let mut rx = m.watch();
        m.set_connected(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(m.is_connected());
    }

    #[test]
    fn setting_same_state_does_not_mark_modified() {
        let m = WatchNetworkMonitor::new(true);
        let rx = m.watch();
        m.set_connected(true);
        assert!(!rx.has_changed().unwrap());
    }
}
