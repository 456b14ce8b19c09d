use crate::error::AppError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle of the capture engine. `Faulted`/`Recovering` cover the
/// watchdog-driven source restart path.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturePhase {
    Stopped,
    Starting,
    Running,
    Faulted { reason: String },
    Recovering,
    Stopping,
}

pub struct StateManager {
    phase: Arc<RwLock<CapturePhase>>,
    phase_tx: Sender<CapturePhase>,
    phase_rx: Receiver<CapturePhase>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        let (phase_tx, phase_rx) = crossbeam_channel::unbounded();
        Self {
            phase: Arc::new(RwLock::new(CapturePhase::Stopped)),
            phase_tx,
            phase_rx,
        }
    }

    pub fn transition(&self, next: CapturePhase) -> Result<(), AppError> {
        let mut current = self.phase.write();

        let valid = matches!(
            (&*current, &next),
            (CapturePhase::Stopped, CapturePhase::Starting)
                | (CapturePhase::Starting, CapturePhase::Running)
                | (CapturePhase::Starting, CapturePhase::Stopped)
                | (CapturePhase::Running, CapturePhase::Faulted { .. })
                | (CapturePhase::Running, CapturePhase::Stopping)
                | (CapturePhase::Faulted { .. }, CapturePhase::Recovering)
                | (CapturePhase::Faulted { .. }, CapturePhase::Stopping)
                | (CapturePhase::Recovering, CapturePhase::Running)
                | (CapturePhase::Recovering, CapturePhase::Faulted { .. })
                | (CapturePhase::Recovering, CapturePhase::Stopping)
                | (CapturePhase::Stopping, CapturePhase::Stopped)
        );

        if !valid {
            return Err(AppError::Fatal(format!(
                "Invalid capture phase transition: {:?} -> {:?}",
                *current, next
            )));
        }

        tracing::info!("Capture phase: {:?} -> {:?}", *current, next);
        *current = next.clone();
        let _ = self.phase_tx.send(next);
        Ok(())
    }

    pub fn current(&self) -> CapturePhase {
        self.phase.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<CapturePhase> {
        self.phase_rx.clone()
    }
}
