use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::party::{PartyIdentity, PartyKey};

/// The IOU two parties agree on.
///
/// Invalid records (non-positive amount, same party on both sides) can be
/// constructed on purpose: the contract is what rejects them, so that a bad
/// proposal fails verification rather than failing to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementRecord {
    pub amount: i64,
    pub proposer: PartyIdentity,
    pub counterparty: PartyIdentity,
    pub linear_id: Uuid,
}

impl AgreementRecord {
    pub fn new(amount: i64, proposer: PartyIdentity, counterparty: PartyIdentity) -> Self {
        Self {
            amount,
            proposer,
            counterparty,
            linear_id: Uuid::new_v4(),
        }
    }

    pub fn participants(&self) -> [&PartyIdentity; 2] {
        [&self.proposer, &self.counterparty]
    }

    pub fn participant_keys(&self) -> Vec<PartyKey> {
        self.participants().iter().map(|p| p.owning_key).collect()
    }

    /// True if any of `keys` belongs to a participant
    pub fn is_relevant(&self, keys: &[PartyKey]) -> bool {
        self.participants()
            .iter()
            .any(|p| keys.contains(&p.owning_key))
    }
}
