//! Programmatic position source.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{PositionError, PositionSource, Subscription};
use crate::geo::PositionFix;

#[derive(Default)]
struct Slot {
    generation: u64,
    tx: Option<mpsc::Sender<PositionFix>>,
}

/// Source whose fixes come from [`push`](Self::push). Holds at most one
/// subscriber; a new subscription replaces the previous one.
#[derive(Clone, Default)]
pub struct ManualPositionSource {
    slot: Arc<Mutex<Slot>>,
}

impl ManualPositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `fix` to the current subscriber. Returns `false` when nobody
    /// is subscribed or the receiver is gone.
    pub async fn push(&self, fix: PositionFix) -> bool {
        let tx = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tx
            .clone();
        match tx {
            Some(tx) => tx.send(fix).await.is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tx
            .is_some()
    }
}

#[async_trait]
impl PositionSource for ManualPositionSource {
    async fn subscribe(
        &self,
        tx: mpsc::Sender<PositionFix>,
    ) -> Result<Subscription, PositionError> {
        let generation = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            slot.generation += 1;
            slot.tx = Some(tx);
            slot.generation
        };

        let slot = Arc::clone(&self.slot);
        Ok(Subscription::from_fn(move || {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            // A stale guard must not detach a newer subscriber.
            if slot.generation == generation {
                slot.tx = None;
            }
        }))
    }
}
