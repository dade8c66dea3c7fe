use uuid::Uuid;

use super::checkpoint::{AcceptorCheckpoint, AcceptorState, Checkpoint};
use super::resolve_transaction;
use super::services::FlowServices;
use crate::contract;
use crate::error::{FlowError, ValidationKind};
use crate::models::party::PartyIdentity;
use crate::models::transaction::{Command, SignedTransaction, TransactionSignature};

/// Local rules the counterparty applies on top of the contract
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptancePolicy {
    /// Largest IOU this node will counter-sign, inclusive
    pub max_amount: Option<i64>,
}

impl AcceptancePolicy {
    pub fn check(&self, amount: i64) -> Result<(), FlowError> {
        match self.max_amount {
            Some(max) if amount > max => Err(FlowError::validation(
                ValidationKind::AmountAboveLimit,
                "The IOU's value can't be too high.",
            )),
            _ => Ok(()),
        }
    }
}

/// The counterparty side of an issuance.
///
/// Never trusts the initiator's checks: the proposal is re-verified
/// against the contract before this node signs anything.
pub struct Acceptor {
    services: FlowServices,
    policy: AcceptancePolicy,
}

impl Acceptor {
    pub fn new(services: FlowServices, policy: AcceptancePolicy) -> Self {
        Self { services, policy }
    }

    /// Check a proposal and return this node's signature over it
    pub async fn on_proposal(
        &self,
        initiator: &PartyIdentity,
        flow_id: Uuid,
        proposal: SignedTransaction,
    ) -> Result<TransactionSignature, FlowError> {
        let id = proposal.id();
        let me = self.services.local_party();
        tracing::debug!("Flow {}: {:?} proposal {} from {}", flow_id, AcceptorState::Checking, id, initiator);

        if let Err(e) = self.check_proposal(initiator, &me, &proposal).await {
            tracing::info!("Flow {}: {:?} proposal {}: {}", flow_id, AcceptorState::Rejected, id, e);
            return Err(e);
        }

        match self.services.checkpoints.load(&flow_id).await? {
            Some(Checkpoint::Acceptor(existing)) if existing.transaction.id() != id => {
                return Err(FlowError::validation(
                    ValidationKind::ConflictingProposal,
                    format!("Flow {} already holds a different proposal.", flow_id),
                ));
            }
            Some(Checkpoint::Initiator(_)) => {
                return Err(FlowError::validation(
                    ValidationKind::ConflictingProposal,
                    format!("Flow {} is one of this node's own flows.", flow_id),
                ));
            }
            _ => {}
        }

        tracing::debug!("Flow {}: {:?} {}", flow_id, AcceptorState::CounterSigning, id);
        let signature = self.services.signer.sign(&id);

        if self.services.store.lookup(&id).await?.is_none() {
            let mut transaction = proposal;
            transaction.add_signature(signature.clone());
            self.services
                .checkpoints
                .save(&Checkpoint::Acceptor(AcceptorCheckpoint {
                    flow_id,
                    state: AcceptorState::Finalizing,
                    initiator: initiator.clone(),
                    transaction,
                }))
                .await?;
        }

        tracing::info!("Flow {}: counter-signed {} for {}", flow_id, id, initiator);
        Ok(signature)
    }

    /// Record the finalised transaction for a proposal this node signed
    pub async fn on_finalise(
        &self,
        initiator: &PartyIdentity,
        flow_id: Uuid,
        transaction: SignedTransaction,
    ) -> Result<(), FlowError> {
        let id = transaction.id();
        if self.services.store.lookup(&id).await?.is_some() {
            tracing::debug!("Flow {}: {} already recorded", flow_id, id);
            self.services.checkpoints.remove(&flow_id).await?;
            return Ok(());
        }

        let me = self.services.local_party();
        match self.services.checkpoints.load(&flow_id).await? {
            Some(Checkpoint::Acceptor(pending)) => {
                if pending.transaction.id() != id || &pending.initiator != initiator {
                    return Err(FlowError::validation(
                        ValidationKind::ConflictingProposal,
                        format!("Transaction {} is not the proposal signed in flow {}.", id, flow_id),
                    ));
                }
            }
            // The checkpoint expired, but our own signature on it says we agreed
            None if transaction.is_signed_by(&me.owning_key) => {
                self.check_proposal(initiator, &me, &transaction).await?;
            }
            _ => {
                return Err(FlowError::validation(
                    ValidationKind::UnknownProposal,
                    "No counter-signed proposal is pending for this flow.",
                ))
            }
        }

        transaction.verify_required_signatures()?;
        self.services.store.record(&transaction).await?;
        self.services.checkpoints.remove(&flow_id).await?;

        tracing::info!("Flow {}: {:?} {}", flow_id, AcceptorState::Committed, id);
        Ok(())
    }

    /// Forget a proposal the initiator has given up on
    pub async fn on_abort(&self, initiator: &PartyIdentity, flow_id: Uuid) -> Result<(), FlowError> {
        match self.services.checkpoints.load(&flow_id).await? {
            Some(Checkpoint::Acceptor(pending)) if &pending.initiator == initiator => {
                self.services.checkpoints.remove(&flow_id).await?;
                tracing::info!("Flow {}: {:?} by {}", flow_id, AcceptorState::Rejected, initiator);
            }
            Some(_) => tracing::warn!("Flow {}: {} may not abort this flow", flow_id, initiator),
            None => tracing::debug!("Flow {}: nothing to abort", flow_id),
        }
        Ok(())
    }

    async fn check_proposal(
        &self,
        initiator: &PartyIdentity,
        me: &PartyIdentity,
        proposal: &SignedTransaction,
    ) -> Result<(), FlowError> {
        if !proposal.is_signed_by(&initiator.owning_key) {
            return Err(FlowError::Signature(format!(
                "Proposal {} is not signed by {}",
                proposal.id(),
                initiator
            )));
        }
        proposal.verify_signatures_except(&[me.owning_key, proposal.tx.notary.owning_key])?;

        let ltx = resolve_transaction(self.services.store.as_ref(), &proposal.tx).await?;
        contract::iou::verify(&ltx)?;

        if ltx.command != Command::Create {
            return Err(FlowError::validation(
                ValidationKind::UnexpectedCommand,
                "This must be an IOU issuance transaction.",
            ));
        }

        // The contract guarantees exactly one output for an issuance
        let Some(output) = ltx.outputs.first() else {
            return Err(FlowError::validation(
                ValidationKind::ExactlyOneOutput,
                "Only one output state should be created.",
            ));
        };
        if &output.counterparty != me || &output.proposer != initiator {
            return Err(FlowError::validation(
                ValidationKind::NotCounterparty,
                format!("{} is not the counterparty of this IOU.", me),
            ));
        }

        self.policy.check(output.amount)
    }
}
