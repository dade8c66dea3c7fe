use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::node::P2PCommand;
use super::protocol::{FlowRequest, FlowResponse};
use crate::crypto::keys::peer_id_for;
use crate::error::FlowError;
use crate::flow::services::{PeerTransport, Session};
use crate::models::party::PartyIdentity;

type PendingReply = oneshot::Receiver<Result<FlowResponse, FlowError>>;

/// Carries flow sessions over the libp2p swarm.
///
/// A party's peer id is derived from its key, so any party can be addressed
/// once the swarm knows where to dial it.
pub struct SwarmTransport {
    commands: mpsc::Sender<P2PCommand>,
    pending: Mutex<HashMap<Uuid, VecDeque<PendingReply>>>,
}

impl SwarmTransport {
    pub fn new(commands: mpsc::Sender<P2PCommand>) -> Self {
        Self {
            commands,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PeerTransport for SwarmTransport {
    async fn open_session(&self, party: &PartyIdentity) -> Result<Session, FlowError> {
        peer_id_for(&party.owning_key)
            .map_err(|e| FlowError::Transport(format!("No peer id for {}: {}", party, e)))?;
        Ok(Session::new(party.clone()))
    }

    async fn send(&self, session: &Session, request: FlowRequest) -> Result<(), FlowError> {
        let peer_id = peer_id_for(&session.counterparty.owning_key)
            .map_err(|e| FlowError::Transport(format!("No peer id for {}: {}", session.counterparty, e)))?;

        let (response_tx, response_rx) = oneshot::channel();
        self.commands
            .send(P2PCommand::SendRequest {
                peer_id,
                request,
                response_tx,
            })
            .await
            .map_err(|_| FlowError::Transport("P2P node has stopped".into()))?;

        self.pending
            .lock()
            .map_err(|e| FlowError::Transport(format!("Lock error: {}", e)))?
            .entry(session.id)
            .or_default()
            .push_back(response_rx);
        Ok(())
    }

    async fn receive(&self, session: &Session) -> Result<FlowResponse, FlowError> {
        let pending = {
            let mut pending = self
                .pending
                .lock()
                .map_err(|e| FlowError::Transport(format!("Lock error: {}", e)))?;
            let next = pending.get_mut(&session.id).and_then(|queue| queue.pop_front());
            if pending.get(&session.id).is_some_and(|queue| queue.is_empty()) {
                pending.remove(&session.id);
            }
            next
        };
        let Some(response_rx) = pending else {
            return Err(FlowError::Transport(format!(
                "Nothing was sent to {} in this session",
                session.counterparty
            )));
        };

        response_rx
            .await
            .map_err(|_| FlowError::Transport(format!("{} did not answer", session.counterparty)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::NodeIdentity;

    #[tokio::test]
    async fn test_replies_come_back_through_the_command_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let transport = SwarmTransport::new(tx);
        let b = NodeIdentity::generate("BankB").unwrap();
        let expected_peer = peer_id_for(&b.party_key()).unwrap();

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                if let P2PCommand::SendRequest { peer_id, response_tx, .. } = cmd {
                    assert_eq!(peer_id, expected_peer);
                    let _ = response_tx.send(Ok(FlowResponse::Recorded));
                }
            }
        });

        let session = transport.open_session(&b.party).await.unwrap();
        let response = transport
            .send_and_receive(&session, FlowRequest::Hello(crate::models::party::NodeInfo {
                party: b.party.clone(),
                network: "test".into(),
                notary: false,
            }))
            .await
            .unwrap();
        assert!(matches!(response, FlowResponse::Recorded));
        assert!(transport.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finished_sessions_leave_no_queues_behind() {
        let (tx, mut rx) = mpsc::channel(8);
        let transport = SwarmTransport::new(tx);
        let b = NodeIdentity::generate("BankB").unwrap();

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                if let P2PCommand::SendRequest { response_tx, .. } = cmd {
                    let _ = response_tx.send(Ok(FlowResponse::Aborted));
                }
            }
        });

        for _ in 0..100 {
            let session = transport.open_session(&b.party).await.unwrap();
            transport
                .send(&session, FlowRequest::Abort { flow_id: Uuid::new_v4() })
                .await
                .unwrap();
            transport
                .send(&session, FlowRequest::Abort { flow_id: Uuid::new_v4() })
                .await
                .unwrap();
            transport.receive(&session).await.unwrap();
            assert_eq!(transport.pending.lock().unwrap().len(), 1);
            transport.receive(&session).await.unwrap();
        }
        assert!(transport.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stopped_node_is_a_transport_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let transport = SwarmTransport::new(tx);
        let b = NodeIdentity::generate("BankB").unwrap();

        let session = transport.open_session(&b.party).await.unwrap();
        let err = transport
            .send(&session, FlowRequest::Hello(crate::models::party::NodeInfo {
                party: b.party.clone(),
                network: "test".into(),
                notary: false,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Transport(_)));
        assert!(transport.receive(&session).await.is_err());
    }
}
