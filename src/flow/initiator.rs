use uuid::Uuid;

use super::checkpoint::{Checkpoint, InitiatorCheckpoint, InitiatorState};
use super::progress::ProgressTracker;
use super::resolve_transaction;
use super::services::FlowServices;
use crate::contract;
use crate::error::FlowError;
use crate::models::agreement::AgreementRecord;
use crate::models::party::PartyIdentity;
use crate::models::transaction::{Command, CommandWithSigners, SignedTransaction, WireTransaction};
use crate::p2p::protocol::{FlowRequest, FlowResponse};

/// Proposes an IOU to a counterparty and drives it to a notarised,
/// recorded transaction.
pub struct Initiator {
    services: FlowServices,
    progress: ProgressTracker,
    checkpoint: InitiatorCheckpoint,
}

impl Initiator {
    pub fn new(
        amount: i64,
        counterparty: PartyIdentity,
        services: FlowServices,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            services,
            progress,
            checkpoint: InitiatorCheckpoint {
                flow_id: Uuid::new_v4(),
                state: InitiatorState::Generating,
                amount,
                counterparty,
                transaction: None,
            },
        }
    }

    /// Rebuild a flow from its last checkpoint
    pub fn resume(
        checkpoint: InitiatorCheckpoint,
        services: FlowServices,
        progress: ProgressTracker,
    ) -> Self {
        Self {
            services,
            progress,
            checkpoint,
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.checkpoint.flow_id
    }

    #[cfg(test)]
    pub fn state(&self) -> InitiatorState {
        self.checkpoint.state
    }

    /// Run to a terminal state
    pub async fn run(mut self) -> Result<SignedTransaction, FlowError> {
        tracing::info!(
            "Flow {}: proposing IOU of {} to {}",
            self.checkpoint.flow_id,
            self.checkpoint.amount,
            self.checkpoint.counterparty
        );

        loop {
            self.progress
                .set_current_step(self.checkpoint.flow_id, self.checkpoint.state);

            match self.step().await {
                Ok(Some(stx)) => {
                    self.progress
                        .set_current_step(self.checkpoint.flow_id, InitiatorState::Committed);
                    tracing::info!(
                        "Flow {}: transaction {} committed to ledger",
                        self.checkpoint.flow_id,
                        stx.id()
                    );
                    return Ok(stx);
                }
                Ok(None) => {}
                Err(error) => return Err(self.fail(error).await),
            }
        }
    }

    /// Execute the current state and move to the next one.
    /// Returns the transaction once it is committed.
    pub(crate) async fn step(&mut self) -> Result<Option<SignedTransaction>, FlowError> {
        match self.checkpoint.state {
            InitiatorState::Generating => {
                let tx = self.generate().await?;
                self.checkpoint.transaction = Some(SignedTransaction::new(tx));
                self.advance(InitiatorState::Verifying).await?;
            }
            InitiatorState::Verifying => {
                let ltx = resolve_transaction(self.services.store.as_ref(), &self.transaction()?.tx).await?;
                contract::iou::verify(&ltx)?;
                self.advance(InitiatorState::Signing).await?;
            }
            InitiatorState::Signing => {
                let signature = self.services.signer.sign(&self.transaction()?.id());
                self.transaction_mut()?.add_signature(signature);
                self.advance(InitiatorState::GatheringSignatures).await?;
            }
            InitiatorState::GatheringSignatures => {
                self.gather_signatures().await?;
                self.advance(InitiatorState::Finalizing).await?;
            }
            InitiatorState::Finalizing => {
                let stx = self.finalise().await?;
                self.checkpoint.state = InitiatorState::Committed;
                if let Err(e) = self.services.checkpoints.remove(&self.checkpoint.flow_id).await {
                    tracing::warn!("Flow {}: could not clear checkpoint: {}", self.checkpoint.flow_id, e);
                }
                return Ok(Some(stx));
            }
            InitiatorState::Committed => return Ok(Some(self.transaction()?.clone())),
            InitiatorState::Failed => {
                return Err(FlowError::Transport(format!(
                    "Flow {} has already failed",
                    self.checkpoint.flow_id
                )))
            }
        }
        Ok(None)
    }

    async fn generate(&self) -> Result<WireTransaction, FlowError> {
        let network = &self.services.network;
        let notary = self
            .services
            .directory
            .notary_for(network)
            .await?
            .ok_or_else(|| FlowError::Transport(format!("No notary available on network '{}'", network)))?;

        let record = AgreementRecord::new(
            self.checkpoint.amount,
            self.services.local_party(),
            self.checkpoint.counterparty.clone(),
        );
        let command = CommandWithSigners {
            value: Command::Create,
            signers: record.participant_keys(),
        };

        Ok(WireTransaction {
            inputs: vec![],
            outputs: vec![record],
            command,
            notary,
        })
    }

    async fn gather_signatures(&mut self) -> Result<(), FlowError> {
        let counterparty = self.checkpoint.counterparty.clone();
        let request = FlowRequest::Propose {
            flow_id: self.checkpoint.flow_id,
            transaction: self.transaction()?.clone(),
        };

        let transport = &self.services.transport;
        let session = transport.open_session(&counterparty).await?;
        let signature = match transport.send_and_receive(&session, request).await? {
            FlowResponse::Signed(signature) => signature,
            FlowResponse::Rejected(e) => {
                tracing::warn!(
                    "Flow {}: {} rejected the proposal: {}",
                    self.checkpoint.flow_id,
                    counterparty,
                    e
                );
                return Err(e);
            }
            other => return Err(unexpected(&counterparty, &other)),
        };

        let id = self.transaction()?.id();
        if signature.by != counterparty.owning_key || !signature.verify(&id) {
            return Err(FlowError::Signature(format!(
                "{} did not return a valid signature over {}",
                counterparty, id
            )));
        }

        let stx = self.transaction_mut()?;
        stx.add_signature(signature);
        let notary_key = stx.tx.notary.owning_key;
        stx.verify_signatures_except(&[notary_key])
    }

    async fn finalise(&mut self) -> Result<SignedTransaction, FlowError> {
        let notary = self.transaction()?.tx.notary.clone();
        if !self.transaction()?.is_signed_by(&notary.owning_key) {
            self.notarise(&notary).await?;
        }

        let stx = self.transaction()?.clone();
        stx.verify_required_signatures()?;

        let counterparty = self.checkpoint.counterparty.clone();
        let request = FlowRequest::Finalise {
            flow_id: self.checkpoint.flow_id,
            transaction: stx.clone(),
        };
        let transport = &self.services.transport;
        let session = transport.open_session(&counterparty).await?;
        match transport.send_and_receive(&session, request).await? {
            FlowResponse::Recorded => {}
            FlowResponse::Rejected(e) => return Err(e),
            other => return Err(unexpected(&counterparty, &other)),
        }

        self.services.store.record(&stx).await?;
        Ok(stx)
    }

    async fn notarise(&mut self, notary: &PartyIdentity) -> Result<(), FlowError> {
        let request = FlowRequest::Notarise {
            transaction: self.transaction()?.clone(),
        };
        let transport = &self.services.transport;
        let session = transport.open_session(notary).await?;
        let signature = match transport.send_and_receive(&session, request).await? {
            FlowResponse::Notarised(signature) => signature,
            FlowResponse::Rejected(e) => return Err(e),
            other => return Err(unexpected(notary, &other)),
        };

        let id = self.transaction()?.id();
        if signature.by != notary.owning_key || !signature.verify(&id) {
            return Err(FlowError::Signature(format!(
                "Notary {} did not return a valid signature over {}",
                notary, id
            )));
        }
        self.transaction_mut()?.add_signature(signature);
        // Notarised: a resumed flow must not ask again
        self.save().await
    }

    async fn advance(&mut self, next: InitiatorState) -> Result<(), FlowError> {
        self.checkpoint.state = next;
        match next {
            InitiatorState::GatheringSignatures | InitiatorState::Finalizing => self.save().await,
            _ => Ok(()),
        }
    }

    async fn save(&self) -> Result<(), FlowError> {
        self.services
            .checkpoints
            .save(&Checkpoint::Initiator(self.checkpoint.clone()))
            .await
    }

    /// Finalisation that broke on the wire or disk keeps its checkpoint so it
    /// can be resumed; everything else is terminal and leaves nothing behind.
    async fn fail(&mut self, error: FlowError) -> FlowError {
        let flow_id = self.checkpoint.flow_id;
        let failed_in = self.checkpoint.state;
        let resumable = failed_in == InitiatorState::Finalizing
            && matches!(error, FlowError::Transport(_) | FlowError::Storage(_));

        if resumable {
            tracing::warn!("Flow {}: finalisation interrupted, will resume: {}", flow_id, error);
        } else {
            tracing::warn!("Flow {}: failed in {:?}: {}", flow_id, failed_in, error);
            self.checkpoint.state = InitiatorState::Failed;
            if let Err(e) = self.services.checkpoints.remove(&flow_id).await {
                tracing::warn!("Flow {}: could not clear checkpoint: {}", flow_id, e);
            }
            if matches!(failed_in, InitiatorState::GatheringSignatures | InitiatorState::Finalizing) {
                self.abort_counterparty().await;
            }
        }

        self.progress.set_current_step(flow_id, InitiatorState::Failed);
        error
    }

    /// Best effort: the counterparty may hold a counter-signed proposal
    async fn abort_counterparty(&self) {
        let flow_id = self.checkpoint.flow_id;
        let counterparty = &self.checkpoint.counterparty;
        let transport = &self.services.transport;
        let result = match transport.open_session(counterparty).await {
            Ok(session) => transport.send_and_receive(&session, FlowRequest::Abort { flow_id }).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(FlowResponse::Aborted) => tracing::debug!("Flow {}: {} dropped the proposal", flow_id, counterparty),
            Ok(other) => tracing::debug!("{}", unexpected(counterparty, &other)),
            Err(e) => tracing::debug!("Flow {}: could not abort at {}: {}", flow_id, counterparty, e),
        }
    }

    fn transaction(&self) -> Result<&SignedTransaction, FlowError> {
        self.checkpoint.transaction.as_ref().ok_or_else(|| self.missing_transaction())
    }

    fn transaction_mut(&mut self) -> Result<&mut SignedTransaction, FlowError> {
        let flow_id = self.checkpoint.flow_id;
        self.checkpoint
            .transaction
            .as_mut()
            .ok_or_else(|| FlowError::Storage(format!("Flow {} has no transaction in its checkpoint", flow_id)))
    }

    fn missing_transaction(&self) -> FlowError {
        FlowError::Storage(format!(
            "Flow {} has no transaction in its checkpoint",
            self.checkpoint.flow_id
        ))
    }
}

fn unexpected(party: &PartyIdentity, response: &FlowResponse) -> FlowError {
    FlowError::Transport(format!(
        "Unexpected '{}' response from {}",
        response.label(),
        party
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationKind;
    use crate::flow::acceptor::AcceptancePolicy;
    use crate::flow::services::CheckpointStore;
    use crate::flow::testing::MockNetwork;

    #[tokio::test]
    async fn test_flow_records_transaction_in_both_vaults() {
        let net = MockNetwork::new();
        let notary = net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        let stx = a.issue(99, &b.party()).await.unwrap();
        let id = stx.id();

        for node in [&a, &b] {
            let recorded = node.db.get_transaction(&id).unwrap().unwrap();
            assert_eq!(recorded, stx);
            assert!(recorded.tx.inputs.is_empty());
            assert_eq!(recorded.tx.outputs.len(), 1);

            let record = &recorded.tx.outputs[0];
            assert_eq!(record.amount, 99);
            assert_eq!(record.proposer, a.party());
            assert_eq!(record.counterparty, b.party());
        }
        assert!(notary.db.get_transaction(&id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_committed_transaction_is_signed_by_both_parties_and_notary() {
        let net = MockNetwork::new();
        let notary = net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        let stx = a.issue(1, &b.party()).await.unwrap();

        stx.verify_required_signatures().unwrap();
        for key in [a.party().owning_key, b.party().owning_key, notary.party().owning_key] {
            assert!(stx.is_signed_by(&key));
        }
    }

    #[tokio::test]
    async fn test_valid_amounts_commit_on_both_sides() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        for amount in [1, 2, 50, 99, 1_000_000] {
            let stx = a.issue(amount, &b.party()).await.unwrap();
            assert_eq!(
                a.db.get_transaction(&stx.id()).unwrap(),
                b.db.get_transaction(&stx.id()).unwrap()
            );
        }
        assert_eq!(a.db.get_unconsumed_records().unwrap().len(), 5);
        assert_eq!(b.db.get_unconsumed_records().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_flow_rejects_negative_value_before_contacting_anyone() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        let err = a.issue(-1, &b.party()).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation(ref v) if v.kind == ValidationKind::AmountMustBeNonNegative));
        assert!(err.to_string().contains("non-negative"));

        assert_eq!(a.transport.sessions_opened(), 0);
        assert!(a.db.get_transactions().unwrap().is_empty());
        assert!(b.db.get_transactions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flow_rejects_iou_to_self_before_any_session() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let a = net.create_node("BankA");
        net.create_node("BankB");

        let err = a.issue(10, &a.party()).await.unwrap_err();
        assert!(err.to_string().contains("cannot be the same entity"));
        assert_eq!(a.transport.sessions_opened(), 0);
        assert!(a.db.get_transactions().unwrap().is_empty());
        assert!(a.db.load_checkpoints().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acceptor_rejection_records_nothing_anywhere() {
        let net = MockNetwork::new();
        let notary = net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node_with_policy(
            "BankB",
            AcceptancePolicy {
                max_amount: Some(50),
            },
        );

        let err = a.issue(99, &b.party()).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation(ref v) if v.kind == ValidationKind::AmountAboveLimit));

        // The initiator sent its proposal and then the abort, but no one kept anything
        assert_eq!(a.transport.sessions_opened(), 2);
        for node in [&a, &b, &notary] {
            assert!(node.db.get_transactions().unwrap().is_empty());
            assert!(node.db.load_checkpoints().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_flow_without_notary_fails() {
        let net = MockNetwork::new();
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        let err = a.issue(5, &b.party()).await.unwrap_err();
        assert!(matches!(err, FlowError::Transport(_)));
        assert_eq!(a.transport.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_progress_is_reported_for_every_step() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        let (progress, mut rx) = ProgressTracker::channel();
        Initiator::new(7, b.party(), a.services.clone(), progress)
            .run()
            .await
            .unwrap();

        let mut steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            steps.push(event.step);
        }
        assert_eq!(
            steps,
            vec![
                InitiatorState::Generating,
                InitiatorState::Verifying,
                InitiatorState::Signing,
                InitiatorState::GatheringSignatures,
                InitiatorState::Finalizing,
                InitiatorState::Committed,
            ]
        );
    }

    #[tokio::test]
    async fn test_flow_resumes_from_gathering_signatures_checkpoint() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        let mut flow = Initiator::new(42, b.party(), a.services.clone(), ProgressTracker::silent());
        while flow.state() != InitiatorState::GatheringSignatures {
            assert!(flow.step().await.unwrap().is_none());
        }
        let flow_id = flow.flow_id();
        // Node goes down while suspended
        drop(flow);

        let Some(Checkpoint::Initiator(saved)) = a.db.load(&flow_id).await.unwrap() else {
            panic!("initiator checkpoint missing");
        };
        assert_eq!(saved.state, InitiatorState::GatheringSignatures);
        assert!(saved.transaction.as_ref().unwrap().is_signed_by(&a.party().owning_key));

        let stx = Initiator::resume(saved, a.services.clone(), ProgressTracker::silent())
            .run()
            .await
            .unwrap();
        assert!(a.db.get_transaction(&stx.id()).unwrap().is_some());
        assert!(b.db.get_transaction(&stx.id()).unwrap().is_some());
        assert!(a.db.load_checkpoints().unwrap().is_empty());
        assert!(b.db.load_checkpoints().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_finalisation_keeps_checkpoint_and_resumes() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        let mut flow = Initiator::new(12, b.party(), a.services.clone(), ProgressTracker::silent());
        while flow.state() != InitiatorState::Finalizing {
            flow.step().await.unwrap();
        }
        let flow_id = flow.flow_id();

        net.set_offline(&b.party(), true);
        let err = flow.run().await.unwrap_err();
        assert!(matches!(err, FlowError::Transport(_)));
        assert!(a.db.get_transactions().unwrap().is_empty());
        assert!(b.db.get_transactions().unwrap().is_empty());

        net.set_offline(&b.party(), false);
        assert_eq!(crate::flow::resume_pending(&a.services).await.unwrap(), 1);
        // The resumed flow runs on its own task; wait for both sides to record
        for _ in 0..100 {
            if a.db.load(&flow_id).await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(a.db.get_transactions().unwrap().len(), 1);
        assert_eq!(b.db.get_transactions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notary_refusal_leaves_no_checkpoint_on_counterparty() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let impostor = net.create_node("NotANotary");
        let a = net.create_node("BankA").trusting(&impostor.party());
        let b = net.create_node("BankB");

        let err = a.issue(10, &b.party()).await.unwrap_err();
        assert!(matches!(err, FlowError::Notarization(_)));

        for node in [&a, &b] {
            assert!(node.db.get_transactions().unwrap().is_empty());
            assert!(node.db.load_checkpoints().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_signature_rejection_records_nothing_anywhere() {
        let net = MockNetwork::new();
        net.create_notary("Notary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");
        let c = net.create_node("BankC");

        let mut flow = Initiator::new(15, b.party(), a.services.clone(), ProgressTracker::silent());
        while flow.state() != InitiatorState::GatheringSignatures {
            flow.step().await.unwrap();
        }
        // The proposal goes out carrying someone else's signature in place of A's
        let stx = flow.checkpoint.transaction.as_mut().unwrap();
        let id = stx.id();
        stx.sigs.clear();
        stx.add_signature(c.identity.sign_transaction(&id));

        let err = flow.run().await.unwrap_err();
        assert!(matches!(err, FlowError::Signature(_)));
        for node in [&a, &b] {
            assert!(node.db.get_transactions().unwrap().is_empty());
            assert!(node.db.load_checkpoints().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_self_declared_notary_is_not_used() {
        let net = MockNetwork::new();
        let notary = net.create_notary("Notary");
        // Also runs a notary service and sorts first by name
        net.create_notary("ANotary");
        let a = net.create_node("BankA");
        let b = net.create_node("BankB");

        let stx = a.issue(10, &b.party()).await.unwrap();
        assert_eq!(stx.tx.notary, notary.party());
        assert!(stx.is_signed_by(&notary.party().owning_key));
    }
}
