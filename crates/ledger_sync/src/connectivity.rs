//! Network reachability, the single source of truth for online/offline
//!
//! Nothing else in the crate probes the network. Components either sample
//! [`ConnectivityMonitor::is_online`] or react to edges.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Platform reachability signal sampled by [`ConnectivityMonitor::spawn_probe`]
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Aborts the wrapped task when dropped
pub struct TaskGuard(JoinHandle<()>);

impl TaskGuard {
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self(handle)
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Tracks online/offline transitions
#[derive(Clone)]
pub struct ConnectivityMonitor {
    sender: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Feed a reachability sample. Returns true when it was an edge.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("Connectivity restored");
            } else {
                tracing::warn!("Connectivity lost, switching to offline mode");
            }
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Invoke `callback` on every online/offline edge, at most once per edge.
    ///
    /// Must be called inside a tokio runtime. Dropping the guard stops delivery.
    pub fn on_transition<F>(&self, callback: F) -> TaskGuard
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let mut receiver = self.subscribe();
        let mut last = *receiver.borrow_and_update();

        TaskGuard::new(tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let online = *receiver.borrow_and_update();
                if online != last {
                    last = online;
                    callback(online);
                }
            }
        }))
    }

    /// Sample `probe` every `every` and publish the result
    pub fn spawn_probe<P>(&self, probe: P, every: Duration) -> TaskGuard
    where
        P: ReachabilityProbe + 'static,
    {
        let monitor = self.clone();
        TaskGuard::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = probe.probe().await;
                monitor.set_online(reachable);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_set_online_reports_edges_only() {
        let monitor = ConnectivityMonitor::new(true);
        assert!(monitor.is_online());
        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        assert!(!monitor.set_online(false));
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_on_transition_fires_once_per_edge() {
        let monitor = ConnectivityMonitor::new(true);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _guard = monitor.on_transition(move |online| sink.lock().unwrap().push(online));

        monitor.set_online(false);
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.set_online(false);
        monitor.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    struct FlagProbe(Arc<AtomicBool>);

    #[async_trait]
    impl ReachabilityProbe for FlagProbe {
        async fn probe(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_feeds_monitor() {
        let monitor = ConnectivityMonitor::new(true);
        let flag = Arc::new(AtomicBool::new(true));
        let _probe = monitor.spawn_probe(FlagProbe(flag.clone()), Duration::from_secs(5));

        flag.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!monitor.is_online());

        flag.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(monitor.is_online());
    }
}
