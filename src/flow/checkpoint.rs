use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::party::PartyIdentity;
use crate::models::transaction::SignedTransaction;

/// Where an initiating flow is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiatorState {
    Generating,
    Verifying,
    Signing,
    GatheringSignatures,
    Finalizing,
    Committed,
    Failed,
}

impl InitiatorState {
    pub fn label(&self) -> &'static str {
        match self {
            InitiatorState::Generating => "Generating transaction based on new IOU.",
            InitiatorState::Verifying => "Verifying contract constraints.",
            InitiatorState::Signing => "Signing transaction with our private key.",
            InitiatorState::GatheringSignatures => "Gathering the counterparty's signature.",
            InitiatorState::Finalizing => "Obtaining notary signature and recording transaction.",
            InitiatorState::Committed => "Transaction committed to ledger.",
            InitiatorState::Failed => "Flow failed.",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InitiatorState::Committed | InitiatorState::Failed)
    }
}

/// Where an accepting flow is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptorState {
    Awaiting,
    Checking,
    CounterSigning,
    Finalizing,
    Committed,
    Rejected,
}

/// Everything needed to rebuild an initiator after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitiatorCheckpoint {
    pub flow_id: Uuid,
    pub state: InitiatorState,
    pub amount: i64,
    pub counterparty: PartyIdentity,
    pub transaction: Option<SignedTransaction>,
}

/// A counter-signed proposal waiting for its finalised transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptorCheckpoint {
    pub flow_id: Uuid,
    pub state: AcceptorState,
    pub initiator: PartyIdentity,
    pub transaction: SignedTransaction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Checkpoint {
    Initiator(InitiatorCheckpoint),
    Acceptor(AcceptorCheckpoint),
}

impl Checkpoint {
    pub fn flow_id(&self) -> Uuid {
        match self {
            Checkpoint::Initiator(c) => c.flow_id,
            Checkpoint::Acceptor(c) => c.flow_id,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Checkpoint::Initiator(_) => "initiator",
            Checkpoint::Acceptor(_) => "acceptor",
        }
    }

    pub fn state_tag(&self) -> String {
        let tag = match self {
            Checkpoint::Initiator(c) => serde_json::to_value(c.state),
            Checkpoint::Acceptor(c) => serde_json::to_value(c.state),
        };
        tag.ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::party::PartyKey;

    #[test]
    fn test_checkpoint_is_tagged_by_role() {
        let checkpoint = Checkpoint::Initiator(InitiatorCheckpoint {
            flow_id: Uuid::new_v4(),
            state: InitiatorState::GatheringSignatures,
            amount: 99,
            counterparty: PartyIdentity::new("BankB", PartyKey::from_bytes([2; 32])),
            transaction: None,
        });
        let json = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(json["role"], "initiator");
        assert_eq!(json["state"], "gathering_signatures");
        assert_eq!(checkpoint.state_tag(), "gathering_signatures");

        let back: Checkpoint = serde_json::from_value(json).unwrap();
        assert_eq!(back, checkpoint);
    }

    #[test]
    fn test_only_committed_and_failed_are_terminal() {
        assert!(InitiatorState::Committed.is_terminal());
        assert!(InitiatorState::Failed.is_terminal());
        assert!(!InitiatorState::Finalizing.is_terminal());
    }
}
