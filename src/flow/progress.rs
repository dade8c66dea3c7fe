use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::checkpoint::InitiatorState;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub flow_id: Uuid,
    pub step: InitiatorState,
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.flow_id, self.step.label())
    }
}

/// Reports each step an initiator enters. A tracker with no receiver is silent.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressTracker {
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub fn set_current_step(&self, flow_id: Uuid, step: InitiatorState) {
        if let Some(ref tx) = self.sender {
            // Receiver may have gone away; progress is best effort
            let _ = tx.send(ProgressEvent { flow_id, step });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_delivered_in_order() {
        let (tracker, mut rx) = ProgressTracker::channel();
        let flow_id = Uuid::new_v4();
        tracker.set_current_step(flow_id, InitiatorState::Generating);
        tracker.set_current_step(flow_id, InitiatorState::Verifying);

        assert_eq!(rx.try_recv().unwrap().step, InitiatorState::Generating);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.step, InitiatorState::Verifying);
        assert!(second.to_string().ends_with("Verifying contract constraints."));
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (tracker, rx) = ProgressTracker::channel();
        drop(rx);
        tracker.set_current_step(Uuid::new_v4(), InitiatorState::Signing);
        ProgressTracker::silent().set_current_step(Uuid::new_v4(), InitiatorState::Signing);
    }
}
