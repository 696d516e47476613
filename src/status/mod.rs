//! Status surface for the capture pipeline.
//!
//! The pipeline publishes short [`StatusUpdate`]s (a foreground indicator
//! title and body) through a [`StatusSink`]. Publishing is fire-and-forget.

pub mod messages;

use tokio::sync::mpsc;

pub use messages::{
    capture_failed, monitoring, new_record, position_lost, progress, session_stopped,
    MONITORING_TITLE, POSITION_LOST_TITLE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub title: String,
    pub body: String,
}

impl StatusUpdate {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

impl std::fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.body)
    }
}

/// Receives status updates. Must never block the caller.
pub trait StatusSink: Send + Sync {
    fn publish(&self, update: StatusUpdate);
}

/// Writes every update to the log at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn publish(&self, update: StatusUpdate) {
        log::info!("status: {update}");
    }
}

/// Forwards updates to a tokio channel. Updates are dropped when the
/// receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::UnboundedSender<StatusUpdate>,
}

impl ChannelStatusSink {
    pub fn new(tx: mpsc::UnboundedSender<StatusUpdate>) -> Self {
        Self { tx }
    }

    /// Build a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl StatusSink for ChannelStatusSink {
    fn publish(&self, update: StatusUpdate) {
        if self.tx.send(update).is_err() {
            log::debug!("status: receiver dropped, update discarded");
        }
    }
}
