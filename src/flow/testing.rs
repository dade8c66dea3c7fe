//! In-process network of nodes for exercising flows without libp2p.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::acceptor::{AcceptancePolicy, Acceptor};
use super::initiator::Initiator;
use super::progress::ProgressTracker;
use super::responder::Responder;
use super::services::{FlowServices, PeerTransport, Session};
use crate::crypto::keys::NodeIdentity;
use crate::error::FlowError;
use crate::models::party::{NodeInfo, NotaryRef, PartyIdentity, PartyKey};
use crate::models::transaction::SignedTransaction;
use crate::notary::NotaryService;
use crate::p2p::protocol::{FlowRequest, FlowResponse};
use crate::store::db::Database;
use crate::store::directory::PeerDirectory;

pub const TEST_NETWORK: &str = "test";

#[derive(Default)]
struct NetworkInner {
    responders: Mutex<HashMap<PartyKey, Arc<Responder>>>,
    directories: Mutex<Vec<(NodeInfo, Arc<Database>)>>,
    offline: Mutex<HashSet<PartyKey>>,
    notary: Mutex<Option<PartyKey>>,
}

/// Nodes that reach each other by direct calls.
/// The first notary created is the one every later node trusts.
#[derive(Clone, Default)]
pub struct MockNetwork {
    inner: Arc<NetworkInner>,
}

pub struct MockNode {
    pub identity: Arc<NodeIdentity>,
    pub db: Arc<Database>,
    pub transport: Arc<MockTransport>,
    pub services: FlowServices,
    pub info: NodeInfo,
    policy: AcceptancePolicy,
    responder: Arc<Responder>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_node(&self, name: &str) -> MockNode {
        self.spawn(name, false, AcceptancePolicy::default())
    }

    pub fn create_node_with_policy(&self, name: &str, policy: AcceptancePolicy) -> MockNode {
        self.spawn(name, false, policy)
    }

    pub fn create_notary(&self, name: &str) -> MockNode {
        self.spawn(name, true, AcceptancePolicy::default())
    }

    pub fn set_offline(&self, party: &PartyIdentity, offline: bool) {
        let mut set = self.inner.offline.lock().unwrap();
        if offline {
            set.insert(party.owning_key);
        } else {
            set.remove(&party.owning_key);
        }
    }

    fn spawn(&self, name: &str, notary: bool, policy: AcceptancePolicy) -> MockNode {
        let identity = Arc::new(NodeIdentity::generate(name).unwrap());
        let db = Arc::new(Database::open_in_memory().unwrap());
        let info = NodeInfo {
            party: identity.party.clone(),
            network: TEST_NETWORK.to_string(),
            notary,
        };

        // Every node knows every other node, itself included
        db.upsert_peer(&info, None, None).unwrap();
        {
            let mut directories = self.inner.directories.lock().unwrap();
            for (other_info, other_db) in directories.iter() {
                db.upsert_peer(other_info, None, None).unwrap();
                other_db.upsert_peer(&info, None, None).unwrap();
            }
            directories.push((info.clone(), db.clone()));
        }

        let trusted = {
            let mut trusted = self.inner.notary.lock().unwrap();
            if notary && trusted.is_none() {
                *trusted = Some(identity.party_key());
            }
            *trusted
        };

        let transport = Arc::new(MockTransport::new(identity.party.clone(), self.inner.clone()));
        let services = FlowServices {
            network: TEST_NETWORK.to_string(),
            signer: identity.clone(),
            directory: Arc::new(PeerDirectory::new(db.clone(), trusted.map(NotaryRef::Key))),
            transport: transport.clone(),
            store: db.clone(),
            checkpoints: db.clone(),
        };
        let notary_service = notary.then(|| NotaryService::new(identity.clone(), db.clone()));
        let responder = Arc::new(Responder::new(
            info.clone(),
            Acceptor::new(services.clone(), policy),
            notary_service,
        ));
        self.inner
            .responders
            .lock()
            .unwrap()
            .insert(identity.party_key(), responder.clone());

        MockNode {
            identity,
            db,
            transport,
            services,
            info,
            policy,
            responder,
        }
    }
}

impl MockNode {
    pub fn party(&self) -> PartyIdentity {
        self.identity.party.clone()
    }

    pub fn acceptor(&self) -> Acceptor {
        Acceptor::new(self.services.clone(), self.policy)
    }

    /// Point this node's flows at a different notary
    pub fn trusting(mut self, notary: &PartyIdentity) -> Self {
        self.services.directory = Arc::new(PeerDirectory::new(
            self.db.clone(),
            Some(NotaryRef::Key(notary.owning_key)),
        ));
        self
    }

    pub fn responder(&self) -> &Responder {
        &self.responder
    }

    /// Run an initiator from this node to completion
    pub async fn issue(&self, amount: i64, counterparty: &PartyIdentity) -> Result<SignedTransaction, FlowError> {
        Initiator::new(amount, counterparty.clone(), self.services.clone(), ProgressTracker::silent())
            .run()
            .await
    }
}

/// Delivers requests straight into the target node's responder
pub struct MockTransport {
    local: PartyIdentity,
    network: Arc<NetworkInner>,
    opened: AtomicUsize,
    replies: Mutex<HashMap<Uuid, VecDeque<FlowResponse>>>,
}

impl MockTransport {
    fn new(local: PartyIdentity, network: Arc<NetworkInner>) -> Self {
        Self {
            local,
            network,
            opened: AtomicUsize::new(0),
            replies: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn open_session(&self, party: &PartyIdentity) -> Result<Session, FlowError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Session::new(party.clone()))
    }

    async fn send(&self, session: &Session, request: FlowRequest) -> Result<(), FlowError> {
        let key = session.counterparty.owning_key;
        if self.network.offline.lock().unwrap().contains(&key) {
            return Err(FlowError::Transport(format!("{} is unreachable", session.counterparty)));
        }
        let responder = self
            .network
            .responders
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| FlowError::Transport(format!("Unknown peer {}", session.counterparty)))?;

        let response = responder.handle(Some(&self.local), request).await;
        self.replies
            .lock()
            .unwrap()
            .entry(session.id)
            .or_default()
            .push_back(response);
        Ok(())
    }

    async fn receive(&self, session: &Session) -> Result<FlowResponse, FlowError> {
        let mut replies = self.replies.lock().unwrap();
        let response = replies.get_mut(&session.id).and_then(|queue| queue.pop_front());
        if replies.get(&session.id).is_some_and(|queue| queue.is_empty()) {
            replies.remove(&session.id);
        }
        response.ok_or_else(|| FlowError::Transport(format!("No response from {}", session.counterparty)))
    }
}
