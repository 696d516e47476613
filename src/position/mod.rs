//! Position sources feeding the capture pipeline.
//!
//! A [`PositionSource`] pushes [`PositionFix`]es into a `tokio::sync::mpsc`
//! channel supplied by the caller and hands back a [`Subscription`]. Dropping
//! the subscription stops delivery.
//!
//! * [`GpsdPositionSource`]: gpsd JSON protocol over TCP.
//! * [`ManualPositionSource`]: fixes pushed programmatically (replay, tests).
//!
//! Permission checks are the caller's business; sources assume access was
//! granted.

pub mod gpsd;
pub mod manual;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::geo::PositionFix;

pub use gpsd::{parse_report, GpsdPositionSource};
pub use manual::ManualPositionSource;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("cannot connect to position daemon at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("position source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can stream position fixes.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Start delivering fixes on `tx` until the returned [`Subscription`] is
    /// dropped or the receiver goes away.
    async fn subscribe(
        &self,
        tx: mpsc::Sender<PositionFix>,
    ) -> Result<Subscription, PositionError>;
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Handle to an active subscription. Drop it to unsubscribe.
pub struct Subscription {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Run `f` when the subscription ends.
    pub fn from_fn(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(f)),
        }
    }

    /// Abort `task` when the subscription ends.
    pub fn from_task(task: tokio::task::JoinHandle<()>) -> Self {
        Self::from_fn(move || task.abort())
    }

    /// Explicit spelling of `drop(subscription)`.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.on_drop.is_some())
            .finish()
    }
}
