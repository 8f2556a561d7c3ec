use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::types::{ProgressEvent, Stage};

/// One-way progress channel for a single run.
///
/// Sending never blocks and never fails from the run's point of view: once
/// the receiver is gone, events are dropped.
#[derive(Clone, Debug)]
pub struct ProgressEmitter {
    run_id: Uuid,
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressEmitter {
    pub fn new(run_id: Uuid, tx: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            run_id,
            tx: Some(tx),
        }
    }

    /// Emitter with no listener.
    pub fn detached(run_id: Uuid) -> Self {
        Self { run_id, tx: None }
    }

    pub fn emit(&self, stage: Stage, message: impl Into<String>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressEvent {
                run_id: self.run_id,
                stage,
                message: message.into(),
            });
        }
    }

    pub fn is_listening(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}
