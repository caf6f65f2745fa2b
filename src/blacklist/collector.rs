//! Hand-off queue for rules detected as expired
//!
//! The match path pushes without blocking; the sweeper drains whatever is
//! queued at the moment it wakes up.

use crate::blacklist::Rule;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Unbounded queue of expired rules awaiting durable deletion
pub struct ExpiryCollector {
    tx: UnboundedSender<Rule>,
    rx: Mutex<UnboundedReceiver<Rule>>,
}

impl Default for ExpiryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpiryCollector {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Queue an expired rule. Never blocks.
    pub fn push(&self, rule: Rule) {
        // The receiver lives as long as `self`, so sending cannot fail here.
        let _ = self.tx.send(rule);
    }

    /// Take everything currently queued without waiting for more
    pub fn drain(&self) -> Vec<Rule> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = Vec::new();
        while let Ok(rule) = rx.try_recv() {
            batch.push(rule);
        }
        batch
    }
}
