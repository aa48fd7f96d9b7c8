//! Reconciliation between the ledger, the upstream queues, and the chat
//! surface.
//!
//! Every tick runs entirely under the moderation lock, so a dispatch never
//! observes a half-reconciled channel.

pub mod forum;
pub mod wiki;

use crate::chat::ChatSurface;
use crate::config::Channels;
use crate::ledger::Ledger;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use forum::ForumSync;
pub use wiki::WikiSync;

/// Shared handles every sync task and dispatcher works through.
#[derive(Clone)]
pub struct BridgeContext {
    pub chat: Arc<dyn ChatSurface>,
    pub ledger: Arc<Ledger>,
    /// Serializes whole ticks against whole dispatches.
    pub lock: Arc<Mutex<()>>,
    pub channels: Channels,
}

impl BridgeContext {
    pub fn new(chat: Arc<dyn ChatSurface>, ledger: Arc<Ledger>, channels: Channels) -> Self {
        Self {
            chat,
            ledger,
            lock: Arc::new(Mutex::new(())),
            channels,
        }
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Chat messages with no open ledger row, deleted.
    pub orphans_deleted: usize,
    /// New cards posted.
    pub created: usize,
    /// New requests automod kept off the review channel.
    pub flagged: usize,
    /// Records resolved upstream outside the bridge, removed.
    pub purged: usize,
    /// Flagged requests automatically denied.
    pub swept: usize,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(&mut self, other: TickReport) {
        self.orphans_deleted += other.orphans_deleted;
        self.created += other.created;
        self.flagged += other.flagged;
        self.purged += other.purged;
        self.swept += other.swept;
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "orphans={} created={} flagged={} purged={} swept={}",
            self.orphans_deleted, self.created, self.flagged, self.purged, self.swept
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_merge_and_display() {
        let mut total = TickReport::default();
        assert!(total.is_quiet());
        total.merge(TickReport {
            created: 2,
            purged: 1,
            ..Default::default()
        });
        total.merge(TickReport {
            created: 1,
            ..Default::default()
        });
        assert_eq!(total.created, 3);
        assert_eq!(
            total.to_string(),
            "orphans=0 created=3 flagged=0 purged=1 swept=0"
        );
    }
}
