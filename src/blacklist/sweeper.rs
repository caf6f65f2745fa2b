//! Periodic deletion of expired rules
//!
//! The sweeper wakes on a fixed interval, or on request, and asks the engine
//! to durably delete everything queued as expired since the last wake.

use crate::blacklist::RuleEngine;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{error, info};

/// Default period between sweeps, in seconds
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Request sent to a running sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRequest {
    /// Sweep now instead of waiting for the next tick
    SweepNow,
    /// Stop the sweeper task
    Shutdown,
}

/// Handle used to talk to a spawned sweeper
#[derive(Debug, Clone)]
pub struct SweeperHandle {
    tx: Sender<SweepRequest>,
}

impl SweeperHandle {
    /// Ask the sweeper to run immediately
    pub async fn sweep_now(&self) -> bool {
        self.send(SweepRequest::SweepNow).await
    }

    /// Ask the sweeper to stop
    pub async fn shutdown(&self) -> bool {
        self.send(SweepRequest::Shutdown).await
    }

    async fn send(&self, request: SweepRequest) -> bool {
        if let Err(e) = self.tx.send(request).await {
            error!("Failed to send sweep request: {e}");
            return false;
        }
        true
    }
}

/// Background task deleting expired rules on a fixed period
pub struct ExpirySweeper {
    engine: Arc<RuleEngine>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(engine: Arc<RuleEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Spawn the sweeper on the current runtime
    pub fn spawn(self) -> (SweeperHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(self.run(rx));
        (SweeperHandle { tx }, task)
    }

    async fn run(self, mut rx: Receiver<SweepRequest>) {
        info!("Starting expiry sweeper with {:?} interval", self.interval);

        let start = tokio::time::Instant::now() + self.interval;
        let mut interval = tokio::time::interval_at(start, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(SweepRequest::SweepNow) => {
                        self.engine.sweep_expired().await;
                    }
                    Some(SweepRequest::Shutdown) | None => {
                        info!("Received shutdown request for expiry sweeper");
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.engine.sweep_expired().await;
                }
            }
        }

        info!("Expiry sweeper shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blacklist::{Action, MockRuleStore, RuleDraft};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn expired_rule(id: u64) -> crate::blacklist::Rule {
        RuleDraft::new(
            None,
            None,
            Some("ban".to_string()),
            Some(Utc::now() - chrono::Duration::seconds(1)),
        )
        .into_rule(id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_interval() {
        let deletes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deletes);
        let mut store = MockRuleStore::new();
        store.expect_delete().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let engine = Arc::new(RuleEngine::new(Arc::new(store)));
        let (handle, task) =
            ExpirySweeper::new(Arc::clone(&engine), Duration::from_secs(30)).spawn();

        engine.add(expired_rule(1)).await;
        assert!(!engine.evaluate(&Action::new("bob", Some("foo"), "ban")));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(deletes.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(deletes.load(Ordering::SeqCst), 1);

        assert!(handle.shutdown().await);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_now_and_shutdown() {
        let deletes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&deletes);
        let mut store = MockRuleStore::new();
        store.expect_delete().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let engine = Arc::new(RuleEngine::new(Arc::new(store)));
        let (handle, task) =
            ExpirySweeper::new(Arc::clone(&engine), Duration::from_secs(3600)).spawn();

        engine.add(expired_rule(1)).await;
        assert!(!engine.evaluate(&Action::new("bob", Some("foo"), "ban")));

        assert!(handle.sweep_now().await);
        assert!(handle.shutdown().await);
        task.await.unwrap();

        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert!(!handle.sweep_now().await);
    }
}
