//! The IOU contract.
//!
//! Issuance (`Create`) requires:
//! - zero input states,
//! - exactly one output state, the new IOU,
//! - the public keys of both the sender and the recipient among the signers.
//!
//! A `Move` hands an existing IOU to a new recipient without changing what is owed.

use std::collections::BTreeSet;

use crate::error::{ValidationError, ValidationKind};
use crate::models::agreement::AgreementRecord;
use crate::models::party::{PartyIdentity, PartyKey};
use crate::models::transaction::Command;

/// A transaction with its inputs resolved to the records they point at
#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    pub inputs: Vec<AgreementRecord>,
    pub outputs: Vec<AgreementRecord>,
    pub command: Command,
    pub signers: BTreeSet<PartyKey>,
}

/// Collects the first failed requirement while still evaluating every one
#[derive(Default)]
struct Requirements {
    failure: Option<ValidationError>,
}

impl Requirements {
    fn using(&mut self, kind: ValidationKind, message: &str, holds: bool) {
        if !holds && self.failure.is_none() {
            self.failure = Some(ValidationError::new(kind, message));
        }
    }

    fn finish(self) -> Result<(), ValidationError> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Verify a transaction against the IOU contract
pub fn verify(tx: &LedgerTransaction) -> Result<(), ValidationError> {
    match &tx.command {
        Command::Create => verify_create(tx),
        Command::Move { new_counterparty } => verify_move(tx, new_counterparty),
    }
}

fn verify_create(tx: &LedgerTransaction) -> Result<(), ValidationError> {
    let out = single(&tx.outputs);
    let mut require = Requirements::default();

    require.using(
        ValidationKind::NoInputsAllowed,
        "No inputs should be consumed when issuing an IOU.",
        tx.inputs.is_empty(),
    );
    require.using(
        ValidationKind::ExactlyOneOutput,
        "Only one output state should be created.",
        out.is_some(),
    );
    require.using(
        ValidationKind::PartiesMustDiffer,
        "The sender and the recipient cannot be the same entity.",
        out.map_or(false, |o| o.proposer != o.counterparty),
    );
    require.using(
        ValidationKind::AllParticipantsMustSign,
        "All of the participants must be signers.",
        out.map_or(false, |o| {
            o.participant_keys().iter().all(|k| tx.signers.contains(k))
        }),
    );
    require.using(
        ValidationKind::AmountMustBeNonNegative,
        "The IOU's value must be non-negative.",
        out.map_or(false, |o| o.amount > 0),
    );

    require.finish()
}

fn verify_move(tx: &LedgerTransaction, new_counterparty: &PartyIdentity) -> Result<(), ValidationError> {
    let input = single(&tx.inputs);
    let out = single(&tx.outputs);
    let both = input.zip(out);
    let mut require = Requirements::default();

    require.using(
        ValidationKind::ExactlyOneInput,
        "Only one input state should be consumed when moving an IOU.",
        input.is_some(),
    );
    require.using(
        ValidationKind::ExactlyOneOutput,
        "Only one output state should be created.",
        out.is_some(),
    );
    require.using(
        ValidationKind::LinearIdChanged,
        "The IOU's linear id must not change when it moves.",
        both.map_or(false, |(i, o)| i.linear_id == o.linear_id),
    );
    require.using(
        ValidationKind::AmountChanged,
        "The IOU's value must not change when it moves.",
        both.map_or(false, |(i, o)| i.amount == o.amount),
    );
    require.using(
        ValidationKind::ProposerChanged,
        "The IOU's sender must not change when it moves.",
        both.map_or(false, |(i, o)| i.proposer == o.proposer),
    );
    require.using(
        ValidationKind::CounterpartyMismatch,
        "The IOU must move to the new recipient named in the command.",
        both.map_or(false, |(i, o)| {
            &o.counterparty == new_counterparty && i.counterparty != o.counterparty
        }),
    );
    require.using(
        ValidationKind::PartiesMustDiffer,
        "The sender and the recipient cannot be the same entity.",
        out.map_or(false, |o| o.proposer != o.counterparty),
    );
    require.using(
        ValidationKind::AllParticipantsMustSign,
        "Both the current and the new recipient must be signers.",
        both.map_or(false, |(i, o)| {
            tx.signers.contains(&i.counterparty.owning_key)
                && tx.signers.contains(&o.counterparty.owning_key)
        }),
    );

    require.finish()
}

fn single(records: &[AgreementRecord]) -> Option<&AgreementRecord> {
    match records {
        [only] => Some(only),
        _ => None,
    }
}
