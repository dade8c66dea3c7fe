//! Collaborators a flow needs from its host node.
//!
//! Flows never reach for globals: everything they touch is handed to them in
//! a [`FlowServices`] bundle, so the same flow runs against the libp2p node or
//! the in-process test network.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::checkpoint::Checkpoint;
use crate::error::FlowError;
use crate::models::agreement::AgreementRecord;
use crate::models::party::{NodeInfo, PartyIdentity};
use crate::models::transaction::{SignedTransaction, StateRef, TransactionId, TransactionSignature};
use crate::p2p::protocol::{FlowRequest, FlowResponse};

/// An ordered request/response channel to one counterparty
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session {
    pub id: Uuid,
    pub counterparty: PartyIdentity,
}

impl Session {
    pub fn new(counterparty: PartyIdentity) -> Self {
        Self {
            id: Uuid::new_v4(),
            counterparty,
        }
    }
}

/// Who is on the network and which of them are notaries
#[async_trait]
pub trait NetworkDirectory: Send + Sync {
    async fn notary_for(&self, network: &str) -> Result<Option<PartyIdentity>, FlowError>;

    async fn party_from_name(&self, name: &str) -> Result<Option<PartyIdentity>, FlowError>;

    async fn peers(&self) -> Result<Vec<NodeInfo>, FlowError>;
}

/// Reliable, ordered, authenticated delivery to a peer
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn open_session(&self, party: &PartyIdentity) -> Result<Session, FlowError>;

    async fn send(&self, session: &Session, request: FlowRequest) -> Result<(), FlowError>;

    async fn receive(&self, session: &Session) -> Result<FlowResponse, FlowError>;

    /// Send and suspend until the reply arrives
    async fn send_and_receive(&self, session: &Session, request: FlowRequest) -> Result<FlowResponse, FlowError> {
        self.send(session, request).await?;
        self.receive(session).await
    }
}

pub trait SigningService: Send + Sync {
    fn local_party(&self) -> PartyIdentity;

    fn sign(&self, id: &TransactionId) -> TransactionSignature;
}

/// Append-only store of fully signed transactions
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Idempotent on transaction id; returns false if it was already recorded
    async fn record(&self, transaction: &SignedTransaction) -> Result<bool, FlowError>;

    async fn lookup(&self, id: &TransactionId) -> Result<Option<SignedTransaction>, FlowError>;

    async fn resolve_state(&self, state_ref: &StateRef) -> Result<Option<AgreementRecord>, FlowError>;
}

/// Durable flow state, written at every suspension point
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), FlowError>;

    async fn load(&self, flow_id: &Uuid) -> Result<Option<Checkpoint>, FlowError>;

    async fn remove(&self, flow_id: &Uuid) -> Result<(), FlowError>;

    async fn load_all(&self) -> Result<Vec<Checkpoint>, FlowError>;

    /// Drop acceptor checkpoints untouched for longer than `max_age`
    async fn expire_acceptors(&self, max_age: Duration) -> Result<usize, FlowError>;
}

/// Everything a flow may call on its host
#[derive(Clone)]
pub struct FlowServices {
    pub network: String,
    pub signer: Arc<dyn SigningService>,
    pub directory: Arc<dyn NetworkDirectory>,
    pub transport: Arc<dyn PeerTransport>,
    pub store: Arc<dyn TransactionStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl FlowServices {
    pub fn local_party(&self) -> PartyIdentity {
        self.signer.local_party()
    }
}
